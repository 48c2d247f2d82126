//! HTTP adapters for the third-party emote services and the Twitch badge
//! catalogue. Each fetch is one GET; response parsing is kept in pure
//! `parse_*` functions so it can be tested without a network.

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Client, StatusCode, Url,
};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, fmt, time::Duration};

pub type EmoteMap = HashMap<String, String>;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 Chrome/124.0 Mobile Safari/537.36";

const BTTV_CDN: &str = "https://cdn.betterttv.net/emote";
const BADGE_CDN: &str = "https://static-cdn.jtvnw.net/badges/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub seventv: String,
    pub bttv: String,
    pub ffz: String,
    pub badges: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            seventv: "https://7tv.io".to_string(),
            bttv: "https://api.betterttv.net".to_string(),
            ffz: "https://api.frankerfacez.com".to_string(),
            badges: "https://badges.twitch.tv".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Every provider served from one base, used against local stubs.
    #[cfg(test)]
    pub fn single(base: &str) -> Self {
        Self {
            seventv: base.to_string(),
            bttv: base.to_string(),
            ffz: base.to_string(),
            badges: base.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ProviderError {
    Url(String),
    Http(reqwest::Error),
    Status(StatusCode),
    Json(serde_json::Error),
    Shape(&'static str),
}

impl ProviderError {
    /// Short marker for the load report.
    pub fn marker(&self) -> String {
        match self {
            Self::Url(_) => "url".to_string(),
            Self::Http(err) if err.is_timeout() => "timeout".to_string(),
            Self::Http(_) => "http".to_string(),
            Self::Status(status) => status.as_u16().to_string(),
            Self::Json(_) => "json".to_string(),
            Self::Shape(_) => "shape".to_string(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Status(status) => write!(f, "unexpected status {}", status.as_u16()),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Shape(what) => write!(f, "unexpected response shape: {what}"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Clone, Debug)]
pub struct ProviderClientBuilder {
    endpoints: ProviderEndpoints,
    user_agent: String,
    timeout: Duration,
}

impl ProviderClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoints: ProviderEndpoints::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ProviderClient, ProviderError> {
        for base in [
            &self.endpoints.seventv,
            &self.endpoints.bttv,
            &self.endpoints.ffz,
            &self.endpoints.badges,
        ] {
            Url::parse(base.trim()).map_err(|err| ProviderError::Url(format!("{base}: {err}")))?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(self.user_agent.trim())
                .map_err(|err| ProviderError::Url(format!("user agent: {err}")))?,
        );

        let http = Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(ProviderError::Http)?;

        Ok(ProviderClient {
            http,
            endpoints: self.endpoints,
        })
    }
}

impl Default for ProviderClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct ProviderClient {
    http: Client,
    endpoints: ProviderEndpoints,
}

impl ProviderClient {
    pub fn builder() -> ProviderClientBuilder {
        ProviderClientBuilder::new()
    }

    pub async fn seventv_global(&self) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(&self.endpoints.seventv, &["v3", "emote-sets", "global"])?;
        parse_seventv_set(&self.get(url).await?)
    }

    pub async fn seventv_channel(&self, channel_id: &str) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(&self.endpoints.seventv, &["v3", "users", "twitch", channel_id])?;
        parse_seventv_user(&self.get(url).await?)
    }

    pub async fn bttv_global(&self) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(&self.endpoints.bttv, &["3", "cached", "emotes", "global"])?;
        parse_bttv_global(&self.get(url).await?)
    }

    pub async fn bttv_channel(&self, channel_id: &str) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(
            &self.endpoints.bttv,
            &["3", "cached", "users", "twitch", channel_id],
        )?;
        parse_bttv_channel(&self.get(url).await?)
    }

    pub async fn ffz_global(&self) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(&self.endpoints.ffz, &["v1", "set", "global"])?;
        parse_ffz_sets(&self.get(url).await?)
    }

    pub async fn ffz_channel(&self, channel_login: &str) -> Result<EmoteMap, ProviderError> {
        let url = endpoint_url(&self.endpoints.ffz, &["v1", "room", channel_login])?;
        parse_ffz_sets(&self.get(url).await?)
    }

    pub async fn badges(&self) -> Result<EmoteMap, ProviderError> {
        let mut url = endpoint_url(&self.endpoints.badges, &["v1", "badges", "global", "display"])?;
        url.query_pairs_mut().append_pair("language", "en");
        parse_badges(&self.get(url).await?)
    }

    async fn get(&self, url: Url) -> Result<String, ProviderError> {
        let resp = self.http.get(url).send().await.map_err(ProviderError::Http)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }
        resp.text().await.map_err(ProviderError::Http)
    }
}

/// Appends `segments` to the base path, percent-encoding each one.
fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, ProviderError> {
    let mut url =
        Url::parse(base.trim()).map_err(|err| ProviderError::Url(format!("{base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|()| ProviderError::Url(format!("{base}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    name: String,
    data: SevenTvData,
}

#[derive(Debug, Deserialize)]
struct SevenTvData {
    host: SevenTvHost,
}

#[derive(Debug, Deserialize)]
struct SevenTvHost {
    url: String,
    #[serde(default)]
    files: Vec<SevenTvFile>,
}

#[derive(Debug, Deserialize)]
struct SevenTvFile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BttvEmote {
    id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct FfzEmote {
    name: String,
    urls: HashMap<String, Option<String>>,
}

fn parse_root(body: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(ProviderError::Json)
}

/// Provider URLs are often protocol-relative (`//cdn...`).
fn absolute(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

/// Entries that do not fit the expected shape are skipped one by one.
fn entries<'a, T: serde::de::DeserializeOwned + 'a>(
    list: Option<&'a Value>,
) -> impl Iterator<Item = T> + 'a {
    list.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| T::deserialize(entry).ok())
}

fn seventv_emotes(list: Option<&Value>) -> EmoteMap {
    entries::<SevenTvEmote>(list)
        .map(|emote| {
            let animated = emote
                .data
                .host
                .files
                .iter()
                .any(|f| f.name.as_deref() == Some("1x.gif"));
            let file = if animated { "1x.gif" } else { "1x.webp" };
            let url = format!("{}/{}", absolute(&emote.data.host.url), file);
            (emote.name, url)
        })
        .collect()
}

pub fn parse_seventv_set(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    if !root.is_object() {
        return Err(ProviderError::Shape("7tv emote set is not an object"));
    }
    Ok(seventv_emotes(root.get("emotes")))
}

pub fn parse_seventv_user(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    if !root.is_object() {
        return Err(ProviderError::Shape("7tv user is not an object"));
    }
    Ok(seventv_emotes(
        root.get("emote_set").and_then(|set| set.get("emotes")),
    ))
}

fn bttv_emotes(list: Option<&Value>) -> impl Iterator<Item = (String, String)> + '_ {
    entries::<BttvEmote>(list).map(|emote| (emote.code, format!("{BTTV_CDN}/{}/1x", emote.id)))
}

pub fn parse_bttv_global(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    if !root.is_array() {
        return Err(ProviderError::Shape("bttv global emotes are not an array"));
    }
    Ok(bttv_emotes(Some(&root)).collect())
}

pub fn parse_bttv_channel(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    if !root.is_object() {
        return Err(ProviderError::Shape("bttv user is not an object"));
    }
    Ok(bttv_emotes(root.get("channelEmotes"))
        .chain(bttv_emotes(root.get("sharedEmotes")))
        .collect())
}

/// Global and room responses share the `sets.<id>.emoticons` layout.
pub fn parse_ffz_sets(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    let sets = root
        .get("sets")
        .and_then(Value::as_object)
        .ok_or(ProviderError::Shape("ffz response has no sets"))?;

    let mut map = EmoteMap::new();
    for set in sets.values() {
        for emote in entries::<FfzEmote>(set.get("emoticons")) {
            if let Some(Some(url)) = emote.urls.get("1") {
                map.insert(emote.name, absolute(url));
            }
        }
    }
    Ok(map)
}

/// Flattens `badge_sets.<set>.versions.<version>.image_url_1x` into
/// `set/version -> url`.
pub fn parse_badges(body: &str) -> Result<EmoteMap, ProviderError> {
    let root = parse_root(body)?;
    let sets = root
        .get("badge_sets")
        .and_then(Value::as_object)
        .ok_or(ProviderError::Shape("badge response has no badge_sets"))?;

    let mut map = EmoteMap::new();
    for (set, entry) in sets {
        let Some(versions) = entry.get("versions").and_then(Value::as_object) else {
            continue;
        };
        for (version, info) in versions {
            if let Some(url) = info.get("image_url_1x").and_then(Value::as_str) {
                map.insert(format!("{set}/{version}"), url.to_string());
            }
        }
    }
    Ok(map)
}

/// Used when the live badge endpoint is down or returns nothing.
pub fn fallback_badges() -> EmoteMap {
    [
        ("admin/1", "9ef7e029-4cdf-4d4d-a0d5-e2b3fb2583fe"),
        ("broadcaster/1", "5527c58c-fb7d-422d-b71b-f309dcb85cc1"),
        ("global_mod/1", "9384c9a7-f2f2-4f74-b6e5-7f78898a43fc"),
        ("moderator/1", "3267646d-33f0-4b17-b3df-f923a41db1d0"),
        ("partner/1", "d12a2e27-16f6-41d0-ab77-b780518f00a3"),
        ("premium/1", "bbbe0db0-a598-423e-86d0-f9fb98ca1933"),
        ("staff/1", "d97c37be-57b3-4f3d-b8db-6dcb904f84c8"),
        ("subscriber/0", "5d9f2208-5dd8-11e7-8513-2ff4adfae661"),
        ("turbo/1", "bd444ec6-8f34-4bf9-91f4-af1e3428d80f"),
        ("vip/1", "b817aba4-fad8-49e2-b88a-7cc744dfa6ec"),
    ]
    .into_iter()
    .map(|(key, uuid)| (key.to_string(), format!("{BADGE_CDN}/{uuid}/1")))
    .collect()
}
