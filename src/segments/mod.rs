//! Splits a chat message into an ordered rendering plan of text and emote
//! segments.
//!
//! Two annotation systems are merged here: native emotes arrive as character
//! ranges in the message's `emotes` tag, third-party emotes are matched as
//! whole space-delimited words against a name -> URL dictionary.

use serde::Serialize;
use std::collections::HashMap;

const NATIVE_EMOTE_CDN: &str = "https://static-cdn.jtvnw.net/emoticons/v2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text { value: String },
    Emote { name: String, url: String },
}

impl Segment {
    fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    fn emote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Emote {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EmoteRange {
    start: usize,
    end: usize,
    url: String,
}

pub fn native_emote_url(emote_id: &str) -> String {
    format!("{NATIVE_EMOTE_CDN}/{emote_id}/default/dark/1.0")
}

pub fn parse_segments(
    message: &str,
    emotes_tag: Option<&str>,
    third_party: &HashMap<String, String>,
) -> Vec<Segment> {
    let chars: Vec<char> = message.chars().collect();
    let ranges = native_ranges(emotes_tag.unwrap_or(""), chars.len());

    let mut stage: Vec<Segment> = Vec::new();
    let mut cursor = 0usize;
    for range in &ranges {
        if range.start > cursor {
            push_trimmed(&mut stage, &chars[cursor..range.start]);
        }
        let name: String = chars[range.start..=range.end].iter().collect();
        stage.push(Segment::emote(name, range.url.clone()));
        cursor = range.end + 1;
        if chars.get(cursor) == Some(&' ') {
            cursor += 1;
        }
    }
    if cursor < chars.len() {
        push_trimmed(&mut stage, &chars[cursor..]);
    }

    if third_party.is_empty() {
        return stage;
    }

    stage
        .into_iter()
        .flat_map(|segment| match segment {
            Segment::Text { value } => scan_words(&value, third_party),
            emote => vec![emote],
        })
        .collect()
}

/// Parses `id:start-end,start-end/id:start-end` into sorted, non-overlapping
/// ranges. Offsets count chars. Invalid or out-of-bounds ranges are dropped;
/// on overlap the range that starts first wins.
fn native_ranges(tag: &str, len: usize) -> Vec<EmoteRange> {
    let mut ranges = Vec::new();
    for entry in tag.split('/') {
        let Some((emote_id, spans)) = entry.split_once(':') else {
            continue;
        };
        if emote_id.is_empty() {
            continue;
        }
        let url = native_emote_url(emote_id);
        for span in spans.split(',') {
            let Some((start, end)) = span.split_once('-') else {
                continue;
            };
            let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
                continue;
            };
            if start <= end && end < len {
                ranges.push(EmoteRange {
                    start,
                    end,
                    url: url.clone(),
                });
            }
        }
    }

    ranges.sort_by_key(|r| r.start);

    let mut accepted: Vec<EmoteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if accepted.last().map_or(true, |prev| range.start > prev.end) {
            accepted.push(range);
        }
    }
    accepted
}

fn push_trimmed(out: &mut Vec<Segment>, chars: &[char]) {
    let text: String = chars.iter().collect();
    let text = text.trim();
    if !text.is_empty() {
        out.push(Segment::text(text));
    }
}

fn scan_words(text: &str, dict: &HashMap<String, String>) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    for word in text.split(' ').filter(|w| !w.is_empty()) {
        match dict.get(word) {
            Some(url) => {
                if !pending.is_empty() {
                    out.push(Segment::text(pending.join(" ")));
                    pending.clear();
                }
                out.push(Segment::emote(word, url.clone()));
            }
            None => pending.push(word),
        }
    }
    if !pending.is_empty() {
        out.push(Segment::text(pending.join(" ")));
    }
    out
}
