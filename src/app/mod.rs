mod remote;

use crate::chat::{ChatMessage, ChatSession, ChatState};
use crate::config::Config;
use crate::control::{ControlSession, ScreenshotPoller, AUTHENTICATION_FAILED};
use crate::emotes::{EmoteCatalog, ProviderClient, ProviderToggles};
use crate::model::{ConnectionState, ControlState, ObsProfile};
use crate::reconnect::{ReconnectStatus, ReconnectSupervisor};
use crate::segments::Segment;
use crate::store::ProfileStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

const TOGGLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        let args: Vec<String> = std::env::args().skip(2).collect();
        return match command.as_str() {
            "config-init" => handle_config_init(),
            "profile-add" => handle_profile_add(&config, &args),
            "profile-list" => handle_profile_list(&config),
            "profile-remove" => handle_profile_remove(&config, &args),
            "profile-use" => handle_profile_use(&config, &args),
            "auto-connect" => handle_auto_connect(&config, &args),
            "chat-channel" => handle_chat_channel(&config, &args),
            "emotes" => handle_emotes_toggle(&config, &args),
            "emotes-report" => handle_emotes_report(&config, &args).await,
            "screenshots" => handle_screenshots(&config, &args),
            "obs" => remote::handle_obs(&config, &args).await,
            other => Err(format!("unknown command: {other}").into()),
        };
    }

    run_bridge(config).await
}

async fn run_bridge(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store_path = config.store_path();
    let store = ProfileStore::open(&store_path)?;

    let session = ControlSession::new(config.screenshots.spec());
    let supervisor = ReconnectSupervisor::new(
        session.clone(),
        config.reconnect.delay(),
        config.reconnect.enabled,
    );
    let poller = ScreenshotPoller::new(session.clone(), config.screenshots.interval());
    let chat = ChatSession::new(&config.chat.relay_url);
    let catalog = Arc::new(EmoteCatalog::new(build_provider_client(&config)?));

    let mut toggles = store.provider_toggles();
    let mut screenshots_paused = store.screenshots_paused();
    poller.set_paused(screenshots_paused);
    let emote_jobs = spawn_emote_worker(catalog.clone());
    let _ = emote_jobs.send(EmoteJob::Reload(toggles));

    if store.auto_connect() {
        match last_used_profile(&store)? {
            Some(profile) => {
                tracing::info!(profile = %profile.name, host = %profile.host, port = profile.port, "auto-connecting to obs");
                supervisor.connect(profile);
            }
            None => tracing::info!("auto-connect enabled but no last-used profile"),
        }
    }

    if let Some(channel) = store.twitch_channel() {
        chat.connect(&channel);
    }

    let mut control_rx = supervisor.session().subscribe();
    let mut reconnect_rx = supervisor.status();
    let mut chat_rx = chat.subscribe();
    let mut toggle_ticker = tokio::time::interval(TOGGLE_POLL_INTERVAL);
    toggle_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_connection: Option<(u64, ConnectionState)> = None;
    let mut last_message_id: Option<String> = None;
    let mut loaded_room = String::new();

    loop {
        tokio::select! {
            changed = control_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = control_rx.borrow_and_update().clone();
                on_control_state(&state, &mut last_connection, &poller, config.screenshots.enabled);
            }
            changed = reconnect_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *reconnect_rx.borrow_and_update();
                on_reconnect_status(status, &supervisor);
            }
            changed = chat_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = chat_rx.borrow_and_update().clone();
                for message in new_messages(&state.messages, last_message_id.as_deref()) {
                    log_chat_message(&state.channel, message, &catalog);
                }
                last_message_id = state.messages.back().map(|m| m.id.clone());
                if let Some(job) = channel_job(&state, &mut loaded_room) {
                    let _ = emote_jobs.send(job);
                }
            }
            _ = toggle_ticker.tick() => {
                let store = match ProfileStore::open(&store_path) {
                    Ok(store) => store,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not re-read stored toggles");
                        continue;
                    }
                };
                if store.screenshots_paused() != screenshots_paused {
                    screenshots_paused = store.screenshots_paused();
                    tracing::info!(paused = screenshots_paused, "screenshot polling toggled");
                    poller.set_paused(screenshots_paused);
                }
                let current = store.provider_toggles();
                if current != toggles {
                    tracing::info!(?current, "emote provider toggles changed, reloading");
                    toggles = current;
                    let _ = emote_jobs.send(EmoteJob::Reload(toggles));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown: ctrl-c");
                break;
            }
        }
    }

    poller.stop();
    supervisor.disconnect();
    chat.disconnect();
    Ok(())
}

fn on_control_state(
    state: &ControlState,
    last: &mut Option<(u64, ConnectionState)>,
    poller: &ScreenshotPoller,
    screenshots_enabled: bool,
) {
    let current = (state.generation, state.connection.clone());
    if last.as_ref() == Some(&current) {
        return;
    }
    match &state.connection {
        ConnectionState::Connecting => tracing::info!("obs: connecting"),
        ConnectionState::Connected => {
            tracing::info!(generation = state.generation, "obs: connected");
            if screenshots_enabled && !poller.is_running() {
                poller.start();
            }
        }
        ConnectionState::Disconnected => {
            tracing::info!("obs: disconnected");
            poller.stop();
        }
        ConnectionState::Error(message) => {
            tracing::warn!(error = %message, "obs: connection error");
            poller.stop();
        }
    }
    *last = Some(current);
}

/// Retrying a rejected password only repeats the rejection, so a scheduled
/// attempt after an authentication failure is cancelled.
fn on_reconnect_status(status: ReconnectStatus, supervisor: &ReconnectSupervisor) {
    let ReconnectStatus::Scheduled { attempt, .. } = status else {
        return;
    };
    let profile = supervisor
        .last_profile()
        .map(|p| p.name)
        .unwrap_or_default();
    if gives_up_on(&supervisor.session().snapshot().connection) && supervisor.is_reconnecting() {
        tracing::warn!(profile = %profile, "obs: authentication failed, not reconnecting");
        supervisor.cancel();
        return;
    }
    tracing::info!(
        profile = %profile,
        attempt,
        in_ms = status.remaining().unwrap_or_default().as_millis() as u64,
        "obs: reconnect scheduled"
    );
}

fn gives_up_on(connection: &ConnectionState) -> bool {
    matches!(connection, ConnectionState::Error(message) if message == AUTHENTICATION_FAILED)
}

/// Messages after `last_seen`; everything when it was evicted or reset.
fn new_messages<'a>(
    messages: &'a VecDeque<ChatMessage>,
    last_seen: Option<&str>,
) -> impl Iterator<Item = &'a ChatMessage> {
    let start = last_seen
        .and_then(|id| messages.iter().rposition(|m| m.id == id))
        .map_or(0, |pos| pos + 1);
    messages.iter().skip(start)
}

fn log_chat_message(channel: &str, message: &ChatMessage, catalog: &EmoteCatalog) {
    let third_party = catalog.third_party();
    let segments = message.segments(&third_party.borrow());
    let emotes = segments
        .iter()
        .filter(|s| matches!(s, Segment::Emote { .. }))
        .count();
    let badges = message.badge_urls(&catalog.badges().borrow()).len();
    tracing::info!(
        channel = %channel,
        user = %message.username,
        emotes,
        badges,
        "{}",
        message.text
    );
}

/// A channel load is due once per learned room id.
fn channel_job(state: &ChatState, loaded_room: &mut String) -> Option<EmoteJob> {
    if state.room_id.is_empty() || state.room_id == *loaded_room {
        return None;
    }
    *loaded_room = state.room_id.clone();
    Some(EmoteJob::Channel {
        room_id: state.room_id.clone(),
        login: state.channel.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EmoteJob {
    Reload(ProviderToggles),
    Channel { room_id: String, login: String },
}

/// Runs emote loads one after another. A global reload wipes the
/// dictionary, so the known channel set is merged again afterwards.
fn spawn_emote_worker(catalog: Arc<EmoteCatalog>) -> mpsc::UnboundedSender<EmoteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut toggles = ProviderToggles::default();
        let mut channel: Option<(String, String)> = None;
        while let Some(job) = rx.recv().await {
            match job {
                EmoteJob::Reload(next) => {
                    toggles = next;
                    catalog.load_all(toggles).await;
                }
                EmoteJob::Channel { room_id, login } => {
                    channel = Some((room_id, login));
                }
            }
            if let Some((room_id, login)) = &channel {
                catalog.load_channel_emotes(room_id, login, toggles).await;
            }
        }
    });
    tx
}

fn build_provider_client(config: &Config) -> Result<ProviderClient, Box<dyn std::error::Error>> {
    Ok(ProviderClient::builder()
        .endpoints(config.emotes.endpoints())
        .user_agent(config.emotes.user_agent.clone())
        .timeout(config.emotes.timeout())
        .build()?)
}

fn open_store(config: &Config) -> Result<ProfileStore, Box<dyn std::error::Error>> {
    Ok(ProfileStore::open(config.store_path())?)
}

fn last_used_profile(store: &ProfileStore) -> Result<Option<ObsProfile>, Box<dyn std::error::Error>> {
    match store.last_used_id() {
        Some(id) => Ok(store.profile(&id)?),
        None => Ok(None),
    }
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn handle_profile_add(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let usage = "usage: profile-add <name> <host> [port] [password]";
    let name = args.first().ok_or(usage)?;
    let host = args.get(1).ok_or(usage)?;
    let port = match args.get(2) {
        Some(port) => port.parse().map_err(|_| format!("invalid port: {port}"))?,
        None => config.obs.default_port,
    };
    if port == 0 {
        return Err("port must be non-zero".into());
    }
    let password = args.get(3).map(String::as_str).unwrap_or("");

    let mut store = open_store(config)?;
    let profile = ObsProfile::new(name, host, port, password);
    store.save_profile(&profile)?;
    if store.last_used_id().is_none() {
        store.set_last_used_id(Some(&profile.id))?;
    }

    tracing::info!(id = %profile.id, host = %profile.host, port = profile.port, "profile saved");
    println!("{}", profile.id);
    Ok(())
}

fn handle_profile_list(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let last_used = store.last_used_id();
    let profiles = store.profiles()?;
    if profiles.is_empty() {
        println!("no profiles in {}", store.path().display());
    }
    for profile in profiles {
        let marker = if last_used.as_deref() == Some(profile.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  {}:{}",
            marker, profile.id, profile.name, profile.host, profile.port
        );
    }
    Ok(())
}

fn handle_profile_remove(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let id = args.first().ok_or("usage: profile-remove <id>")?;
    let mut store = open_store(config)?;
    if !store.delete_profile(id)? {
        return Err(format!("no profile with id {id}").into());
    }
    println!("Removed profile {id}");
    Ok(())
}

fn handle_profile_use(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let id = args.first().ok_or("usage: profile-use <id>")?;
    let mut store = open_store(config)?;
    let profile = store
        .profile(id)?
        .ok_or_else(|| format!("no profile with id {id}"))?;
    store.set_last_used_id(Some(&profile.id))?;
    println!("Using profile {} ({}:{})", profile.name, profile.host, profile.port);
    Ok(())
}

fn handle_auto_connect(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let enabled = parse_switch(args.first().ok_or("usage: auto-connect <on|off>")?)?;
    let mut store = open_store(config)?;
    store.set_auto_connect(enabled)?;
    println!("auto-connect {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn handle_chat_channel(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = open_store(config)?;
    store.set_twitch_channel(args.first().map(String::as_str))?;
    match store.twitch_channel() {
        Some(channel) => println!("chat channel: {channel}"),
        None => println!("chat channel cleared"),
    }
    Ok(())
}

fn handle_emotes_toggle(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let usage = "usage: emotes <on|off> <7tv|bttv|ffz>";
    let enabled = parse_switch(args.first().ok_or(usage)?)?;
    let provider = args.get(1).ok_or(usage)?;

    let mut store = open_store(config)?;
    let toggles = with_provider(store.provider_toggles(), provider, enabled)?;
    store.set_provider_toggles(toggles)?;
    println!(
        "7tv:{} bttv:{} ffz:{}",
        on_off(toggles.seventv),
        on_off(toggles.bttv),
        on_off(toggles.ffz)
    );
    Ok(())
}

/// Loads the global sets and prints the report; any extra words are looked
/// up in the merged dictionary.
async fn handle_emotes_report(
    config: &Config,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let catalog = EmoteCatalog::new(build_provider_client(config)?);
    catalog.load_all(store.provider_toggles()).await;
    println!("{}", catalog.report().borrow().clone());

    let emotes = catalog.third_party_snapshot();
    println!(
        "{} emotes, {} badges",
        emotes.len(),
        catalog.badges_snapshot().len()
    );
    for word in args {
        match emotes.get(word) {
            Some(url) => println!("{word}  {url}"),
            None => println!("{word}  (not an emote)"),
        }
    }
    Ok(())
}

fn handle_screenshots(config: &Config, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let paused = match args.first().map(String::as_str) {
        Some("pause") => true,
        Some("resume") => false,
        _ => return Err("usage: screenshots <pause|resume>".into()),
    };
    let mut store = open_store(config)?;
    store.set_screenshots_paused(paused)?;
    println!("screenshot polling {}", if paused { "paused" } else { "resumed" });
    Ok(())
}

fn parse_switch(value: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got {other}").into()),
    }
}

fn with_provider(
    mut toggles: ProviderToggles,
    provider: &str,
    enabled: bool,
) -> Result<ProviderToggles, Box<dyn std::error::Error>> {
    match provider.to_ascii_lowercase().as_str() {
        "7tv" | "seventv" => toggles.seventv = enabled,
        "bttv" => toggles.bttv = enabled,
        "ffz" => toggles.ffz = enabled,
        other => return Err(format!("unknown emote provider: {other}").into()),
    }
    Ok(toggles)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            username: "viewer".to_string(),
            text: "hi".to_string(),
            color: None,
            emotes_tag: None,
            badge_tags: Vec::new(),
        }
    }

    #[test]
    fn switch_and_provider_parsing() {
        assert!(parse_switch("ON").unwrap());
        assert!(!parse_switch("off").unwrap());
        assert!(parse_switch("maybe").is_err());

        let toggles = with_provider(ProviderToggles::default(), "7TV", false).unwrap();
        assert!(!toggles.seventv);
        assert!(toggles.bttv && toggles.ffz);
        assert!(with_provider(toggles, "twitch", true).is_err());
    }

    #[test]
    fn only_unseen_messages_are_returned() {
        let messages: VecDeque<_> = ["a", "b", "c"].into_iter().map(message).collect();
        let ids = |last: Option<&str>| {
            new_messages(&messages, last)
                .map(|m| m.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(None), ["a", "b", "c"]);
        assert_eq!(ids(Some("b")), ["c"]);
        assert!(ids(Some("c")).is_empty());
        assert_eq!(ids(Some("evicted")), ["a", "b", "c"]);
    }

    #[test]
    fn channel_job_fires_once_per_room() {
        let mut loaded = String::new();
        let mut state = ChatState {
            channel: "somechannel".to_string(),
            ..ChatState::default()
        };
        assert_eq!(channel_job(&state, &mut loaded), None);

        state.room_id = "42".to_string();
        assert_eq!(
            channel_job(&state, &mut loaded),
            Some(EmoteJob::Channel {
                room_id: "42".to_string(),
                login: "somechannel".to_string()
            })
        );
        assert_eq!(channel_job(&state, &mut loaded), None);
    }

    #[test]
    fn only_authentication_failures_stop_reconnects() {
        assert!(gives_up_on(&ConnectionState::Error(AUTHENTICATION_FAILED.to_string())));
        assert!(!gives_up_on(&ConnectionState::Error("connection refused".to_string())));
        assert!(!gives_up_on(&ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn transport_failures_keep_the_scheduled_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let supervisor = ReconnectSupervisor::new(
            ControlSession::new(crate::control::ScreenshotSpec::default()),
            Duration::from_secs(30),
            true,
        );
        let mut status = supervisor.status();
        supervisor.connect(ObsProfile::new("local", "127.0.0.1", port, ""));
        let scheduled = *tokio::time::timeout(
            Duration::from_secs(3),
            status.wait_for(|s| s.is_reconnecting()),
        )
        .await
        .unwrap()
        .unwrap();

        on_reconnect_status(scheduled, &supervisor);
        assert!(supervisor.is_reconnecting());
        supervisor.disconnect();
    }

    #[tokio::test]
    async fn poller_follows_connection_state() {
        let session = ControlSession::new(crate::control::ScreenshotSpec::default());
        let poller = ScreenshotPoller::new(session, Duration::from_secs(60));
        let mut last = None;

        let mut state = ControlState {
            connection: ConnectionState::Connected,
            generation: 1,
            ..ControlState::default()
        };
        on_control_state(&state, &mut last, &poller, true);
        assert!(poller.is_running());

        state.connection = ConnectionState::Error("authentication failed".to_string());
        on_control_state(&state, &mut last, &poller, true);
        assert!(!poller.is_running());

        state.connection = ConnectionState::Connected;
        state.generation = 2;
        on_control_state(&state, &mut last, &poller, false);
        assert!(!poller.is_running());
    }
}
