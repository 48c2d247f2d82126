//! `obs <action>`: connect with the last-used profile, run one request
//! against the server and print the outcome.

use super::{last_used_profile, on_off, open_store, parse_switch};
use crate::config::Config;
use crate::control::ControlSession;
use crate::model::{
    ConnectionState, ControlState, SceneItem, ScreenshotTarget, SettingValue, Settings,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use tokio::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const USAGE: &str = "usage: obs <status|scene|scene-create|preview|studio|transition|cut|stream|record|\
screenshot|items|item|item-remove|item-move|group-items|group-item|group-item-remove|inputs|mute|\
volume|input-create|input-settings|input-set|filters|filter|filter-create|filter-remove|filter-set|\
filter-move|call> [args]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Switch {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Clone, PartialEq)]
enum ObsAction {
    Status,
    Scene(String),
    CreateScene(String),
    Preview(String),
    Studio(Switch),
    Transition,
    Cut,
    Stream(Switch),
    Record(Switch),
    Screenshot { source: String, file: PathBuf, target: ScreenshotTarget },
    Items(String),
    ItemEnabled { scene: String, item_id: i64, enabled: bool },
    ItemRemove { scene: String, item_id: i64 },
    ItemMove { scene: String, item_id: i64, position: usize },
    GroupItems(String),
    GroupItemEnabled { group: String, item_id: i64, enabled: bool },
    GroupItemRemove { group: String, item_id: i64 },
    Inputs { audio_only: bool },
    Mute(String),
    Volume { input: String, volume_db: f64 },
    CreateInput { scene: String, input: String, kind: String },
    InputSettings(String),
    SetInput { input: String, settings: Settings },
    Filters(String),
    FilterEnabled { source: String, filter: String, enabled: bool },
    CreateFilter { source: String, filter: String, kind: String },
    RemoveFilter { source: String, filter: String },
    SetFilter { source: String, filter: String, settings: Settings },
    MoveFilter { source: String, filter: String, index: usize },
    Call { request_type: String, data: Option<Value> },
}

pub(super) async fn handle_obs(config: &Config, args: &[String]) -> Result<(), Box<dyn Error>> {
    let action = parse_action(args)?;
    let store = open_store(config)?;
    let profile = last_used_profile(&store)?
        .ok_or("no last-used profile, run profile-add or profile-use first")?;

    let session = ControlSession::new(config.screenshots.spec());
    session.connect(&profile.host, profile.port, &profile.password);
    let result = match wait_connected(&session).await {
        Ok(()) => execute(&session, action).await,
        Err(err) => Err(err),
    };
    session.disconnect();
    result
}

async fn wait_connected(session: &ControlSession) -> Result<(), Box<dyn Error>> {
    let mut rx = session.subscribe();
    let connection = tokio::time::timeout(
        CONNECT_TIMEOUT,
        rx.wait_for(|s| s.connection.is_connected() || s.connection.is_down()),
    )
    .await
    .map_err(|_| "timed out connecting to obs")??
    .connection
    .clone();
    match connection {
        ConnectionState::Connected => Ok(()),
        ConnectionState::Error(message) => Err(format!("obs connection failed: {message}").into()),
        _ => Err("obs closed the connection".into()),
    }
}

fn parse_action(args: &[String]) -> Result<ObsAction, Box<dyn Error>> {
    let (command, rest) = args.split_first().ok_or(USAGE)?;
    let arg = |i: usize, usage: &'static str| -> Result<String, Box<dyn Error>> {
        rest.get(i).cloned().ok_or_else(|| usage.into())
    };

    let action = match command.as_str() {
        "status" => ObsAction::Status,
        "scene" => ObsAction::Scene(arg(0, "usage: obs scene <name>")?),
        "scene-create" => ObsAction::CreateScene(arg(0, "usage: obs scene-create <name>")?),
        "preview" => ObsAction::Preview(arg(0, "usage: obs preview <name>")?),
        "studio" => ObsAction::Studio(parse_toggle(&arg(0, "usage: obs studio <on|off|toggle>")?)?),
        "transition" => ObsAction::Transition,
        "cut" => ObsAction::Cut,
        "stream" => ObsAction::Stream(parse_toggle(&arg(0, "usage: obs stream <on|off|toggle>")?)?),
        "record" => ObsAction::Record(parse_toggle(&arg(0, "usage: obs record <on|off|toggle>")?)?),
        "screenshot" => {
            let usage = "usage: obs screenshot <source> <file> [program|preview]";
            let target = match rest.get(2).map(String::as_str) {
                None | Some("program") => ScreenshotTarget::Program,
                Some("preview") => ScreenshotTarget::Preview,
                Some(other) => return Err(format!("unknown screenshot target: {other}").into()),
            };
            ObsAction::Screenshot {
                source: arg(0, usage)?,
                file: PathBuf::from(arg(1, usage)?),
                target,
            }
        }
        "items" => ObsAction::Items(arg(0, "usage: obs items <scene>")?),
        "item" => {
            let usage = "usage: obs item <scene> <id> <on|off>";
            ObsAction::ItemEnabled {
                scene: arg(0, usage)?,
                item_id: parse_number(&arg(1, usage)?, "item id")?,
                enabled: parse_switch(&arg(2, usage)?)?,
            }
        }
        "item-remove" => {
            let usage = "usage: obs item-remove <scene> <id>";
            ObsAction::ItemRemove {
                scene: arg(0, usage)?,
                item_id: parse_number(&arg(1, usage)?, "item id")?,
            }
        }
        "item-move" => {
            let usage = "usage: obs item-move <scene> <id> <position>";
            ObsAction::ItemMove {
                scene: arg(0, usage)?,
                item_id: parse_number(&arg(1, usage)?, "item id")?,
                position: parse_number(&arg(2, usage)?, "position")?,
            }
        }
        "group-items" => ObsAction::GroupItems(arg(0, "usage: obs group-items <group>")?),
        "group-item" => {
            let usage = "usage: obs group-item <group> <id> <on|off>";
            ObsAction::GroupItemEnabled {
                group: arg(0, usage)?,
                item_id: parse_number(&arg(1, usage)?, "item id")?,
                enabled: parse_switch(&arg(2, usage)?)?,
            }
        }
        "group-item-remove" => {
            let usage = "usage: obs group-item-remove <group> <id>";
            ObsAction::GroupItemRemove {
                group: arg(0, usage)?,
                item_id: parse_number(&arg(1, usage)?, "item id")?,
            }
        }
        "inputs" => ObsAction::Inputs {
            audio_only: match rest.first().map(String::as_str) {
                None => false,
                Some("audio") => true,
                Some(other) => return Err(format!("unknown input filter: {other}").into()),
            },
        },
        "mute" => ObsAction::Mute(arg(0, "usage: obs mute <input>")?),
        "volume" => {
            let usage = "usage: obs volume <input> <db>";
            ObsAction::Volume {
                input: arg(0, usage)?,
                volume_db: parse_number(&arg(1, usage)?, "volume")?,
            }
        }
        "input-create" => {
            let usage = "usage: obs input-create <scene> <name> <kind>";
            ObsAction::CreateInput {
                scene: arg(0, usage)?,
                input: arg(1, usage)?,
                kind: arg(2, usage)?,
            }
        }
        "input-settings" => ObsAction::InputSettings(arg(0, "usage: obs input-settings <input>")?),
        "input-set" => {
            let usage = "usage: obs input-set <input> <key> <value>";
            ObsAction::SetInput {
                input: arg(0, usage)?,
                settings: single_setting(&arg(1, usage)?, &arg(2, usage)?),
            }
        }
        "filters" => ObsAction::Filters(arg(0, "usage: obs filters <source>")?),
        "filter" => {
            let usage = "usage: obs filter <source> <name> <on|off>";
            ObsAction::FilterEnabled {
                source: arg(0, usage)?,
                filter: arg(1, usage)?,
                enabled: parse_switch(&arg(2, usage)?)?,
            }
        }
        "filter-create" => {
            let usage = "usage: obs filter-create <source> <name> <kind>";
            ObsAction::CreateFilter {
                source: arg(0, usage)?,
                filter: arg(1, usage)?,
                kind: arg(2, usage)?,
            }
        }
        "filter-remove" => {
            let usage = "usage: obs filter-remove <source> <name>";
            ObsAction::RemoveFilter {
                source: arg(0, usage)?,
                filter: arg(1, usage)?,
            }
        }
        "filter-set" => {
            let usage = "usage: obs filter-set <source> <name> <key> <value>";
            ObsAction::SetFilter {
                source: arg(0, usage)?,
                filter: arg(1, usage)?,
                settings: single_setting(&arg(2, usage)?, &arg(3, usage)?),
            }
        }
        "filter-move" => {
            let usage = "usage: obs filter-move <source> <name> <index>";
            ObsAction::MoveFilter {
                source: arg(0, usage)?,
                filter: arg(1, usage)?,
                index: parse_number(&arg(2, usage)?, "index")?,
            }
        }
        "call" => ObsAction::Call {
            request_type: arg(0, "usage: obs call <RequestType> [json]")?,
            data: rest.get(1).map(|raw| serde_json::from_str(raw)).transpose()?,
        },
        other => return Err(format!("unknown obs action: {other}\n{USAGE}").into()),
    };
    Ok(action)
}

async fn execute(session: &ControlSession, action: ObsAction) -> Result<(), Box<dyn Error>> {
    match action {
        ObsAction::Status => {
            tokio::try_join!(
                session.fetch_scene_list(),
                session.fetch_studio_mode(),
                session.fetch_stream_status(),
                session.fetch_record_status(),
            )?;
            if session.snapshot().studio_mode_enabled {
                session.fetch_preview_scene().await?;
            }
            print_status(&session.snapshot());
        }
        ObsAction::Scene(scene) => {
            session.fetch_studio_mode().await?;
            session.select_scene(&scene).await?;
        }
        ObsAction::CreateScene(scene) => {
            session.create_scene(&scene).await?;
        }
        ObsAction::Preview(scene) => {
            session.set_preview_scene(&scene).await?;
        }
        ObsAction::Studio(switch) => {
            match switch {
                Switch::On => session.set_studio_mode_enabled(true).await?,
                Switch::Off => session.set_studio_mode_enabled(false).await?,
                Switch::Toggle => {
                    session.fetch_studio_mode().await?;
                    session.toggle_studio_mode().await?
                }
            };
            println!("studio mode {}", on_off(session.snapshot().studio_mode_enabled));
        }
        ObsAction::Transition => {
            session.trigger_transition().await?;
        }
        ObsAction::Cut => {
            session.fetch_studio_mode().await?;
            if !session.snapshot().studio_mode_enabled {
                return Err("studio mode is off".into());
            }
            session.fetch_preview_scene().await?;
            session.cut_to_preview().ok_or("no preview scene to cut to")?.await?;
        }
        ObsAction::Stream(switch) => {
            match switch {
                Switch::On => session.start_stream().await?,
                Switch::Off => session.stop_stream().await?,
                Switch::Toggle => {
                    session.fetch_stream_status().await?;
                    session.toggle_stream().await?
                }
            };
        }
        ObsAction::Record(switch) => {
            match switch {
                Switch::On => session.start_record().await?,
                Switch::Off => session.stop_record().await?,
                Switch::Toggle => {
                    session.fetch_record_status().await?;
                    session.toggle_record().await?
                }
            };
        }
        ObsAction::Screenshot { source, file, target } => {
            session.fetch_screenshot(&source, target).await?;
            let state = session.snapshot();
            let image = state.screenshot(target).ok_or("obs returned no image data")?;
            let bytes = decode_data_uri(image)?;
            std::fs::write(&file, &bytes)?;
            println!("wrote {} bytes to {}", bytes.len(), file.display());
        }
        ObsAction::Items(scene) => {
            session.fetch_scene_items(&scene).await?;
            print_items(&session.snapshot().scene_items);
        }
        ObsAction::ItemEnabled { scene, item_id, enabled } => {
            session.set_scene_item_enabled(&scene, item_id, enabled).await?;
        }
        ObsAction::ItemRemove { scene, item_id } => {
            session.remove_scene_item(&scene, item_id).await?;
        }
        ObsAction::ItemMove { scene, item_id, position } => {
            session.reorder_scene_item(&scene, item_id, position).await?;
            print_items(&session.snapshot().scene_items);
        }
        ObsAction::GroupItems(group) => {
            session.fetch_group_items(&group).await?;
            let state = session.snapshot();
            print_items(state.group_items.get(&group).map(Vec::as_slice).unwrap_or_default());
        }
        ObsAction::GroupItemEnabled { group, item_id, enabled } => {
            session.set_group_item_enabled(&group, item_id, enabled).await?;
        }
        ObsAction::GroupItemRemove { group, item_id } => {
            session.remove_group_item(&group, item_id).await?;
        }
        ObsAction::Inputs { audio_only } => {
            session.fetch_input_list().await?;
            let audio: Vec<String> = session
                .snapshot()
                .inputs
                .iter()
                .filter(|i| i.is_audio())
                .map(|i| i.name.clone())
                .collect();
            for name in &audio {
                let [volume, mute] = session.refresh_input_audio(name);
                tokio::try_join!(volume, mute)?;
            }
            for input in session.snapshot().inputs {
                if input.is_audio() {
                    println!(
                        "{}  {}  {:.1} dB{}",
                        input.name,
                        input.kind,
                        input.volume_db,
                        if input.muted { "  muted" } else { "" }
                    );
                } else if !audio_only {
                    println!("{}  {}", input.name, input.kind);
                }
            }
        }
        ObsAction::Mute(input) => {
            let data = session.toggle_mute(&input).await?;
            match data.get("inputMuted").and_then(Value::as_bool) {
                Some(muted) => println!("{input} {}", if muted { "muted" } else { "unmuted" }),
                None => println!("{input} mute toggled"),
            }
        }
        ObsAction::Volume { input, volume_db } => {
            session.set_volume(&input, volume_db).await?;
        }
        ObsAction::CreateInput { scene, input, kind } => {
            session.create_input(&scene, &input, &kind).await?;
        }
        ObsAction::InputSettings(input) => {
            session.fetch_input_settings(&input).await?;
            print_settings(&session.snapshot().input_settings.unwrap_or_default());
        }
        ObsAction::SetInput { input, settings } => {
            session.set_input_settings(&input, settings).await?;
        }
        ObsAction::Filters(source) => {
            session.fetch_filters(&source).await?;
            for (index, filter) in session.snapshot().filters.iter().enumerate() {
                println!(
                    "{index}  {}  {}  {}",
                    filter.name,
                    filter.kind,
                    on_off(filter.enabled)
                );
            }
        }
        ObsAction::FilterEnabled { source, filter, enabled } => {
            session.set_filter_enabled(&source, &filter, enabled).await?;
        }
        ObsAction::CreateFilter { source, filter, kind } => {
            session.create_filter(&source, &filter, &kind).await?;
        }
        ObsAction::RemoveFilter { source, filter } => {
            session.remove_filter(&source, &filter).await?;
        }
        ObsAction::SetFilter { source, filter, settings } => {
            session.set_filter_settings(&source, &filter, settings).await?;
        }
        ObsAction::MoveFilter { source, filter, index } => {
            session.reorder_filter(&source, &filter, index).await?;
        }
        ObsAction::Call { request_type, data } => {
            let response = session.call(&request_type, data).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn print_status(state: &ControlState) {
    println!("program: {}", state.current_scene);
    if state.studio_mode_enabled {
        println!("preview: {}", state.preview_scene);
    }
    println!(
        "studio:{} stream:{} record:{}",
        on_off(state.studio_mode_enabled),
        on_off(state.stream_active),
        on_off(state.record_active)
    );
    for scene in &state.scenes {
        let marker = if scene.name == state.current_scene {
            "*"
        } else if scene.name == state.preview_scene {
            "~"
        } else {
            " "
        };
        println!("{marker} {}", scene.name);
    }
}

fn print_items(items: &[SceneItem]) {
    for (position, item) in items.iter().enumerate() {
        println!(
            "{position}  #{}  {}  {}  {}",
            item.item_id,
            item.source_name,
            item.input_kind,
            on_off(item.enabled)
        );
    }
}

fn print_settings(settings: &Settings) {
    for (key, value) in settings {
        match value {
            SettingValue::Bool(b) => println!("{key} = {b}"),
            SettingValue::Number(n) => println!("{key} = {n}"),
            SettingValue::Text(s) => println!("{key} = {s:?}"),
        }
    }
}

fn parse_toggle(value: &str) -> Result<Switch, Box<dyn Error>> {
    if value.eq_ignore_ascii_case("toggle") {
        return Ok(Switch::Toggle);
    }
    Ok(if parse_switch(value)? { Switch::On } else { Switch::Off })
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, Box<dyn Error>> {
    value
        .parse()
        .map_err(|_| format!("invalid {what}: {value}").into())
}

/// `true`/`false` and numbers keep their type, anything else is text.
fn parse_setting_value(raw: &str) -> SettingValue {
    match raw {
        "true" => SettingValue::Bool(true),
        "false" => SettingValue::Bool(false),
        _ => match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => SettingValue::Number(n),
            _ => SettingValue::Text(raw.to_string()),
        },
    }
}

fn single_setting(key: &str, raw: &str) -> Settings {
    let mut settings = Settings::new();
    settings.insert(key.to_string(), parse_setting_value(raw));
    settings
}

/// Image bytes of a `data:<mime>;base64,<payload>` uri.
fn decode_data_uri(uri: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let (header, payload) = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or("image data is not a data uri")?;
    if !header.ends_with(";base64") {
        return Err("image data is not base64 encoded".into());
    }
    Ok(general_purpose::STANDARD.decode(payload)?)
}
