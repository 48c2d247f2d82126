//! Emote and badge catalogue shared by the chat view.
//!
//! Global sets are loaded from 7TV, BTTV and FFZ one provider at a time and
//! merged into a single name -> url dictionary (later providers override
//! earlier ones on a name clash). Channel sets are merged on top once the
//! chat room id is known.

mod providers;

pub use providers::{
    fallback_badges, EmoteMap, ProviderClient, ProviderEndpoints, ProviderError,
    DEFAULT_USER_AGENT,
};

use serde::{Deserialize, Serialize};
use std::{fmt, future::Future};
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToggles {
    pub seventv: bool,
    pub bttv: bool,
    pub ffz: bool,
}

impl Default for ProviderToggles {
    fn default() -> Self {
        Self {
            seventv: true,
            bttv: true,
            ffz: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Loaded(usize),
    Off,
    /// Live source failed or was empty; a built-in table was used instead.
    Fallback(usize),
    Failed(String),
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(n) => write!(f, "{n}"),
            Self::Off => f.write_str("off"),
            Self::Fallback(n) => write!(f, "fallback({n})"),
            Self::Failed(marker) => write!(f, "err({marker})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalReport {
    pub seventv: ProviderStatus,
    pub bttv: ProviderStatus,
    pub ffz: ProviderStatus,
    pub badges: ProviderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub seventv: ProviderStatus,
    pub bttv: ProviderStatus,
    pub ffz: ProviderStatus,
}

/// Human-readable summary of the last loads, e.g.
/// `7tv:412 bttv:off ffz:err(503) bdg:fallback(10) | ch: 7tv:3 bttv:0 ffz:off`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub global: Option<GlobalReport>,
    pub channel: Option<ChannelReport>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.global {
            Some(g) => write!(
                f,
                "7tv:{} bttv:{} ffz:{} bdg:{}",
                g.seventv, g.bttv, g.ffz, g.badges
            )?,
            None => f.write_str("loading…")?,
        }
        if let Some(c) = &self.channel {
            write!(f, " | ch: 7tv:{} bttv:{} ffz:{}", c.seventv, c.bttv, c.ffz)?;
        }
        Ok(())
    }
}

pub struct EmoteCatalog {
    client: ProviderClient,
    third_party: watch::Sender<EmoteMap>,
    badges: watch::Sender<EmoteMap>,
    report: watch::Sender<LoadReport>,
    // Loads run one at a time so merges never interleave.
    load_lock: Mutex<()>,
}

impl EmoteCatalog {
    pub fn new(client: ProviderClient) -> Self {
        Self {
            client,
            third_party: watch::channel(EmoteMap::new()).0,
            badges: watch::channel(EmoteMap::new()).0,
            report: watch::channel(LoadReport::default()).0,
            load_lock: Mutex::new(()),
        }
    }

    pub fn third_party(&self) -> watch::Receiver<EmoteMap> {
        self.third_party.subscribe()
    }

    pub fn badges(&self) -> watch::Receiver<EmoteMap> {
        self.badges.subscribe()
    }

    pub fn report(&self) -> watch::Receiver<LoadReport> {
        self.report.subscribe()
    }

    pub fn third_party_snapshot(&self) -> EmoteMap {
        self.third_party.borrow().clone()
    }

    pub fn badges_snapshot(&self) -> EmoteMap {
        self.badges.borrow().clone()
    }

    /// Rebuilds the global dictionary from scratch and refreshes badges.
    /// Running it twice with the same upstream data yields the same result.
    pub async fn load_all(&self, toggles: ProviderToggles) -> GlobalReport {
        let _guard = self.load_lock.lock().await;
        self.third_party.send_replace(EmoteMap::new());

        let seventv = self
            .merge(toggles.seventv, "7tv", self.client.seventv_global())
            .await;
        let bttv = self
            .merge(toggles.bttv, "bttv", self.client.bttv_global())
            .await;
        let ffz = self.merge(toggles.ffz, "ffz", self.client.ffz_global()).await;
        let badges = self.load_badges().await;

        let report = GlobalReport {
            seventv,
            bttv,
            ffz,
            badges,
        };
        self.report.send_modify(|r| {
            r.global = Some(report.clone());
            r.channel = None;
        });
        let summary = self.report.borrow().to_string();
        tracing::info!(
            emotes = self.third_party.borrow().len(),
            report = %summary,
            "global emotes loaded"
        );
        report
    }

    /// Merges the channel's sets into the current dictionary.
    pub async fn load_channel_emotes(
        &self,
        channel_id: &str,
        channel_login: &str,
        toggles: ProviderToggles,
    ) -> ChannelReport {
        let _guard = self.load_lock.lock().await;

        let seventv = self
            .merge(toggles.seventv, "7tv", self.client.seventv_channel(channel_id))
            .await;
        let bttv = self
            .merge(toggles.bttv, "bttv", self.client.bttv_channel(channel_id))
            .await;
        let ffz = self
            .merge(toggles.ffz, "ffz", self.client.ffz_channel(channel_login))
            .await;

        let report = ChannelReport { seventv, bttv, ffz };
        self.report.send_modify(|r| r.channel = Some(report.clone()));
        let summary = self.report.borrow().to_string();
        tracing::info!(
            channel = channel_login,
            channel_id,
            report = %summary,
            "channel emotes loaded"
        );
        report
    }

    async fn merge(
        &self,
        enabled: bool,
        provider: &'static str,
        fetch: impl Future<Output = Result<EmoteMap, ProviderError>>,
    ) -> ProviderStatus {
        if !enabled {
            return ProviderStatus::Off;
        }
        match fetch.await {
            Ok(map) => {
                let count = map.len();
                self.third_party.send_modify(|dict| dict.extend(map));
                tracing::debug!(provider, count, "emote provider merged");
                ProviderStatus::Loaded(count)
            }
            Err(err) => {
                tracing::warn!(provider, error = %err, "emote provider failed");
                ProviderStatus::Failed(err.marker())
            }
        }
    }

    async fn load_badges(&self) -> ProviderStatus {
        match self.client.badges().await {
            Ok(map) if !map.is_empty() => {
                let count = map.len();
                self.badges.send_replace(map);
                return ProviderStatus::Loaded(count);
            }
            Ok(_) => tracing::warn!("badge catalogue empty, using built-in table"),
            Err(err) => {
                tracing::warn!(error = %err, "badge catalogue failed, using built-in table")
            }
        }
        let fallback = fallback_badges();
        let count = fallback.len();
        self.badges.send_replace(fallback);
        ProviderStatus::Fallback(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::time::Duration;

    async fn stub_server(badges_ok: bool) -> String {
        let mut app = Router::new()
            .route(
                "/v3/emote-sets/global",
                get(|| async {
                    Json(json!({"emotes": [
                        {"name": "Shared", "data": {"host": {"url": "//7tv/a", "files": [{"name": "1x.webp"}]}}},
                        {"name": "SevenOnly", "data": {"host": {"url": "//7tv/b", "files": [{"name": "1x.gif"}]}}}
                    ]}))
                }),
            )
            .route(
                "/3/cached/emotes/global",
                get(|| async { Json(json!([{"id": "bt1", "code": "Shared"}])) }),
            )
            .route(
                "/v1/set/global",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route(
                "/v3/users/twitch/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"emote_set": {"emotes": [
                        {"name": format!("Chan{id}"), "data": {"host": {"url": "//7tv/c", "files": []}}}
                    ]}}))
                }),
            )
            .route(
                "/3/cached/users/twitch/:id",
                get(|| async {
                    Json(json!({"channelEmotes": [{"id": "c1", "code": "Shared"}], "sharedEmotes": []}))
                }),
            )
            .route(
                "/v1/room/:login",
                get(|| async {
                    Json(json!({"sets": {"9": {"emoticons": [
                        {"name": "Room", "urls": {"1": "//ffz/room"}}
                    ]}}}))
                }),
            );
        if badges_ok {
            app = app.route(
                "/v1/badges/global/display",
                get(|| async {
                    Json(json!({"badge_sets": {"vip": {"versions": {"1": {"image_url_1x": "https://b/vip"}}}}}))
                }),
            );
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn catalog(base: &str) -> EmoteCatalog {
        let client = ProviderClient::builder()
            .endpoints(ProviderEndpoints::single(base))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        EmoteCatalog::new(client)
    }

    #[test]
    fn report_before_any_load() {
        assert_eq!(LoadReport::default().to_string(), "loading…");
    }

    #[tokio::test]
    async fn global_load_merges_in_order_and_is_idempotent() {
        let base = stub_server(true).await;
        let catalog = catalog(&base);

        let report = catalog.load_all(ProviderToggles::default()).await;
        assert_eq!(report.seventv, ProviderStatus::Loaded(2));
        assert_eq!(report.bttv, ProviderStatus::Loaded(1));
        assert_eq!(report.ffz, ProviderStatus::Failed("503".to_string()));
        assert_eq!(report.badges, ProviderStatus::Loaded(1));
        assert_eq!(
            catalog.report().borrow().to_string(),
            "7tv:2 bttv:1 ffz:err(503) bdg:1"
        );

        let first = catalog.third_party_snapshot();
        assert_eq!(first.len(), 2);
        assert_eq!(first["Shared"], "https://cdn.betterttv.net/emote/bt1/1x");
        assert_eq!(first["SevenOnly"], "https://7tv/b/1x.gif");

        catalog.load_all(ProviderToggles::default()).await;
        assert_eq!(catalog.third_party_snapshot(), first);
    }

    #[tokio::test]
    async fn disabled_provider_reports_off_and_contributes_nothing() {
        let base = stub_server(true).await;
        let catalog = catalog(&base);
        let toggles = ProviderToggles {
            bttv: false,
            ..ProviderToggles::default()
        };

        let report = catalog.load_all(toggles).await;
        assert_eq!(report.bttv, ProviderStatus::Off);
        assert_eq!(catalog.third_party_snapshot()["Shared"], "https://7tv/a/1x.webp");
    }

    #[tokio::test]
    async fn channel_load_adds_to_global_and_extends_report() {
        let base = stub_server(true).await;
        let catalog = catalog(&base);
        catalog.load_all(ProviderToggles::default()).await;

        let report = catalog
            .load_channel_emotes("42", "somechannel", ProviderToggles::default())
            .await;
        assert_eq!(report.seventv, ProviderStatus::Loaded(1));
        assert_eq!(report.ffz, ProviderStatus::Loaded(1));

        let dict = catalog.third_party_snapshot();
        assert_eq!(dict["Chan42"], "https://7tv/c/1x.webp");
        assert_eq!(dict["Room"], "https://ffz/room");
        assert_eq!(dict["Shared"], "https://cdn.betterttv.net/emote/c1/1x");
        assert_eq!(dict["SevenOnly"], "https://7tv/b/1x.gif");
        assert_eq!(
            catalog.report().borrow().to_string(),
            "7tv:2 bttv:1 ffz:err(503) bdg:1 | ch: 7tv:1 bttv:1 ffz:1"
        );
    }

    #[tokio::test]
    async fn missing_badge_endpoint_falls_back_to_builtin_table() {
        let base = stub_server(false).await;
        let catalog = catalog(&base);

        let report = catalog.load_all(ProviderToggles::default()).await;
        assert_eq!(report.badges, ProviderStatus::Fallback(10));
        assert!(catalog.badges_snapshot().contains_key("broadcaster/1"));
    }

    #[tokio::test]
    async fn unreachable_providers_leave_an_empty_dictionary() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let catalog = catalog(&base);

        let report = catalog.load_all(ProviderToggles::default()).await;
        assert!(matches!(report.seventv, ProviderStatus::Failed(_)));
        assert!(catalog.third_party_snapshot().is_empty());
        assert_eq!(report.badges, ProviderStatus::Fallback(10));
    }
}
