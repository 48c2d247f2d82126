//! Anonymous read-only Twitch chat over the IRC websocket relay.

use crate::segments::{parse_segments, Segment};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub const MAX_MESSAGES: usize = 300;
pub const DEFAULT_RELAY_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands";
const PONG: &str = "PONG :tmi.twitch.tv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub text: String,
    pub color: Option<String>,
    pub emotes_tag: Option<String>,
    pub badge_tags: Vec<String>,
}

impl ChatMessage {
    pub fn segments(&self, third_party: &HashMap<String, String>) -> Vec<Segment> {
        parse_segments(&self.text, self.emotes_tag.as_deref(), third_party)
    }

    /// Resolves `set/version` badge tags. Channel-specific versions (sub
    /// months, bits tiers) fall back to the set's `/0` image when the exact
    /// version is unknown.
    pub fn badge_urls(&self, badges: &HashMap<String, String>) -> Vec<String> {
        self.badge_tags
            .iter()
            .filter_map(|tag| {
                badges.get(tag).or_else(|| {
                    let set = tag.split('/').next()?;
                    badges.get(&format!("{set}/0"))
                })
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatState {
    pub channel: String,
    pub connected: bool,
    pub room_id: String,
    pub messages: VecDeque<ChatMessage>,
}

impl ChatState {
    /// Returns true when the state changed.
    pub fn apply(&mut self, line: Line) -> bool {
        match line {
            Line::RoomState {
                room_id: Some(room_id),
            } if self.room_id.is_empty() => {
                self.room_id = room_id;
                true
            }
            Line::Message(message) => {
                self.push(message);
                true
            }
            _ => false,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Ping,
    RoomState { room_id: Option<String> },
    Message(ChatMessage),
    Ignored,
}

pub fn parse_line(raw: &str) -> Line {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Ignored;
    }
    if line.starts_with("PING") {
        return Line::Ping;
    }

    let (tags, rest) = split_tags(line);
    let Some(rest) = rest else {
        return Line::Ignored;
    };

    match command(rest) {
        Some("ROOMSTATE") => Line::RoomState {
            room_id: tag(&tags, "room-id")
                .filter(|id| id.parse::<u64>().is_ok())
                .map(str::to_string),
        },
        Some("PRIVMSG") => parse_privmsg(&tags, rest)
            .map(Line::Message)
            .unwrap_or(Line::Ignored),
        _ => Line::Ignored,
    }
}

/// Splits a leading `@k=v;k=v ` block off the line. A tag block with nothing
/// after it yields `None` for the remainder.
fn split_tags(line: &str) -> (Vec<(&str, &str)>, Option<&str>) {
    let Some(tagged) = line.strip_prefix('@') else {
        return (Vec::new(), Some(line));
    };
    let Some((block, rest)) = tagged.split_once(' ') else {
        return (Vec::new(), None);
    };
    let tags = block
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .collect();
    (tags, Some(rest.trim_start()))
}

fn tag<'a>(tags: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .filter(|v| !v.is_empty())
}

fn command(rest: &str) -> Option<&str> {
    let mut words = rest.split(' ').filter(|w| !w.is_empty());
    let first = words.next()?;
    if first.starts_with(':') {
        words.next()
    } else {
        Some(first)
    }
}

fn parse_privmsg(tags: &[(&str, &str)], rest: &str) -> Option<ChatMessage> {
    let nick = rest
        .strip_prefix(':')
        .unwrap_or(rest)
        .split('!')
        .next()
        .unwrap_or_default();
    let username = match tag(tags, "display-name") {
        Some(name) => name.to_string(),
        None if !nick.is_empty() => nick.to_string(),
        None => return None,
    };

    // Text starts after the second ':' of the line body.
    let text_at = rest.get(1..)?.find(':')? + 2;
    let text = &rest[text_at..];
    if text.trim().is_empty() {
        return None;
    }

    Some(ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        username,
        text: text.to_string(),
        color: tag(tags, "color").map(str::to_string),
        emotes_tag: tag(tags, "emotes").map(str::to_string),
        badge_tags: tag(tags, "badges")
            .map(|b| {
                b.split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

pub fn guest_nick() -> String {
    use rand::Rng;
    format!("justinfan{}", rand::thread_rng().gen_range(10000..=99999))
}

struct Link {
    #[allow(dead_code)] // never written to; dropping it makes the link task close the socket
    tx: mpsc::UnboundedSender<Message>,
}

struct Inner {
    relay_url: String,
    state: watch::Sender<ChatState>,
    link: Mutex<Option<Link>>,
    epoch: AtomicU64,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    pub fn new(relay_url: &str) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            inner: Arc::new(Inner {
                relay_url: relay_url.to_string(),
                state,
                link: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.inner.state.borrow().clone()
    }

    /// Joins `channel`, dropping any previous connection along with its
    /// messages and room id.
    pub fn connect(&self, channel: &str) {
        let (epoch, outbound, channel) = self.open(channel);
        let url = self.inner.relay_url.clone();
        tracing::info!(channel = %channel, "joining chat");

        let session = self.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => session.run_link(epoch, ws, outbound, channel).await,
                Err(err) => {
                    tracing::warn!(error = %err, "chat connection failed");
                    session.finish(epoch);
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn connect_over<S>(&self, ws: S, channel: &str)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (epoch, outbound, channel) = self.open(channel);
        let session = self.clone();
        tokio::spawn(async move { session.run_link(epoch, ws, outbound, channel).await });
    }

    pub fn disconnect(&self) {
        let mut link = self.link();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        *link = None;
        self.inner.state.send_if_modified(|state| {
            let changed = state.connected || !state.room_id.is_empty();
            state.connected = false;
            state.room_id.clear();
            changed
        });
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<Message>, String) {
        let channel = channel.trim().trim_start_matches('#').to_lowercase();
        let mut link = self.link();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *link = Some(Link { tx });
        self.inner.state.send_replace(ChatState {
            channel: channel.clone(),
            ..ChatState::default()
        });
        (epoch, rx, channel)
    }

    fn finish(&self, epoch: u64) {
        let mut link = self.link();
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        *link = None;
        self.inner.state.send_modify(|state| state.connected = false);
        tracing::info!("chat connection closed");
    }

    /// Runs `f` on the state if `epoch` is still current.
    fn update(&self, epoch: u64, f: impl FnOnce(&mut ChatState) -> bool) {
        let _link = self.link();
        if self.inner.epoch.load(Ordering::SeqCst) == epoch {
            self.inner.state.send_if_modified(f);
        }
    }

    async fn run_link<S>(
        self,
        epoch: u64,
        ws: S,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        channel: String,
    ) where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError>,
    {
        let (mut sink, mut stream) = ws.split();

        let nick = guest_nick();
        for line in [
            CAPABILITIES.to_string(),
            format!("NICK {nick}"),
            format!("JOIN #{channel}"),
        ] {
            if let Err(err) = sink.send(Message::Text(line)).await {
                tracing::warn!(error = %err, "chat handshake failed");
                self.finish(epoch);
                return;
            }
        }
        self.update(epoch, |state| {
            state.connected = true;
            true
        });

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let mut pong_failed = false;
                        for raw in text.lines() {
                            match parse_line(raw) {
                                Line::Ping => {
                                    if let Err(err) = sink.send(Message::Text(PONG.to_string())).await {
                                        tracing::warn!(error = %err, "chat pong failed");
                                        pong_failed = true;
                                        break;
                                    }
                                }
                                Line::Ignored => {}
                                line => self.update(epoch, |state| state.apply(line)),
                            }
                        }
                        if pong_failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "chat socket error");
                        break;
                    }
                },
                queued = outbound.recv() => match queued {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
            }
        }
        self.finish(epoch);
    }
}
