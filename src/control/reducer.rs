//! State transitions for [`ControlState`].
//!
//! Three entry points, all synchronous and free of I/O: pushed events, local
//! intents applied before a request goes out, and successful responses. Each
//! returns the follow-up fetches the session should issue.

use crate::model::{
    settings_from_json, ControlState, Filter, Input, Scene, SceneItem, ScreenshotTarget, Settings,
};
use serde_json::Value;

/// A fetch the session issues after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    SceneList,
    InputAudio(String),
    PreviewScene,
    SceneItems(String),
    GroupItems(String),
    Filters(String),
}

/// What a successful response should do to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseAction {
    SceneList,
    InputList,
    InputVolume(String),
    InputMute(String),
    StreamStatus,
    RecordStatus,
    StudioMode,
    PreviewScene,
    SceneItems(String),
    GroupItems(String),
    Filters(String),
    InputSettings(String),
    Screenshot(ScreenshotTarget),
    FilterCreated(String),
    FilterRemoved { source: String, filter: String },
    GroupItemRemoved { group: String, item_id: i64 },
}

/// Local intent applied before the request is written to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetCurrentScene(String),
    SetPreviewScene(String),
    SetStudioMode(bool),
    ScopeSceneItems(String),
    SetSceneItemEnabled {
        scene: String,
        item_id: i64,
        enabled: bool,
    },
    MoveSceneItem {
        scene: String,
        item_id: i64,
        ui_index: usize,
    },
    SetGroupItemEnabled {
        group: String,
        item_id: i64,
        enabled: bool,
    },
    ToggleMute(String),
    SetVolume {
        input: String,
        volume_db: f64,
    },
    ScopeInputSettings(String),
    MergeInputSettings {
        input: String,
        settings: Settings,
    },
    ScopeFilters(String),
    SetFilterEnabled {
        source: String,
        filter: String,
        enabled: bool,
    },
    MergeFilterSettings {
        source: String,
        filter: String,
        settings: Settings,
    },
    MoveFilter {
        source: String,
        filter: String,
        index: usize,
    },
}

/// Server collections are bottom-up, presented lists are top-down.
pub fn to_server_index(ui_index: usize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    count - 1 - ui_index.min(count - 1)
}

pub fn apply_event(state: &mut ControlState, event_type: &str, data: &Value) -> Vec<Refresh> {
    let mut follow_up = Vec::new();
    match event_type {
        "CurrentProgramSceneChanged" => {
            state.current_scene = str_field(data, "sceneName").unwrap_or_default().to_string();
        }
        "CurrentPreviewSceneChanged" => {
            state.preview_scene = str_field(data, "sceneName").unwrap_or_default().to_string();
        }
        "SceneListChanged" => follow_up.push(Refresh::SceneList),
        "StreamStateChanged" => {
            state.stream_active = bool_field(data, "outputActive").unwrap_or(false);
        }
        "RecordStateChanged" => {
            state.record_active = bool_field(data, "outputActive").unwrap_or(false);
        }
        "StudioModeStateChanged" => {
            let enabled = bool_field(data, "studioModeEnabled").unwrap_or(false);
            follow_up.extend(set_studio_mode(state, enabled));
        }
        "SceneItemEnableStateChanged" => {
            let (Some(scene), Some(item_id), Some(enabled)) = (
                str_field(data, "sceneName"),
                data.get("sceneItemId").and_then(Value::as_i64),
                bool_field(data, "sceneItemEnabled"),
            ) else {
                return follow_up;
            };
            if scene == state.scene_items_scene {
                set_item_enabled(&mut state.scene_items, item_id, enabled);
            }
            if let Some(items) = state.group_items.get_mut(scene) {
                set_item_enabled(items, item_id, enabled);
            }
        }
        "SceneItemCreated" | "SceneItemRemoved" | "SceneItemListReindexed" => {
            let Some(scene) = str_field(data, "sceneName") else {
                return follow_up;
            };
            if scene == state.scene_items_scene {
                follow_up.push(Refresh::SceneItems(scene.to_string()));
            }
            if state.group_items.contains_key(scene) {
                follow_up.push(Refresh::GroupItems(scene.to_string()));
            }
        }
        "InputMuteStateChanged" => {
            if let (Some(name), Some(muted)) =
                (str_field(data, "inputName"), bool_field(data, "inputMuted"))
            {
                if let Some(input) = state.input_mut(name) {
                    input.muted = muted;
                }
            }
        }
        "InputVolumeChanged" => {
            if let (Some(name), Some(db)) = (
                str_field(data, "inputName"),
                data.get("inputVolumeDb").and_then(Value::as_f64),
            ) {
                if let Some(input) = state.input_mut(name) {
                    input.volume_db = db;
                }
            }
        }
        "InputCreated" => {
            if let (Some(name), Some(kind)) =
                (str_field(data, "inputName"), str_field(data, "inputKind"))
            {
                state.upsert_input(Input::new(name, kind));
                follow_up.push(Refresh::InputAudio(name.to_string()));
            }
        }
        "InputRemoved" => {
            if let Some(name) = str_field(data, "inputName") {
                state.inputs.retain(|i| i.name != name);
            }
        }
        "InputNameChanged" => {
            if let (Some(old), Some(new)) =
                (str_field(data, "oldInputName"), str_field(data, "inputName"))
            {
                if state.input(new).is_none() {
                    if let Some(input) = state.input_mut(old) {
                        input.name = new.to_string();
                    }
                }
            }
        }
        "SourceFilterCreated" | "SourceFilterRemoved" | "SourceFilterListReindexed" => {
            if let Some(source) = str_field(data, "sourceName") {
                if source == state.filter_source {
                    follow_up.push(Refresh::Filters(source.to_string()));
                }
            }
        }
        "SourceFilterEnableStateChanged" => {
            let (Some(source), Some(filter), Some(enabled)) = (
                str_field(data, "sourceName"),
                str_field(data, "filterName"),
                bool_field(data, "filterEnabled"),
            ) else {
                return follow_up;
            };
            if source == state.filter_source {
                if let Some(f) = state.filter_mut(filter) {
                    f.enabled = enabled;
                }
            }
        }
        other => {
            tracing::debug!(event_type = %other, "ignoring unhandled event");
        }
    }
    follow_up
}

pub fn apply_command(state: &mut ControlState, command: &Command) {
    match command {
        Command::SetCurrentScene(name) => state.current_scene = name.clone(),
        Command::SetPreviewScene(name) => state.preview_scene = name.clone(),
        Command::SetStudioMode(enabled) => {
            set_studio_mode(state, *enabled);
        }
        Command::ScopeSceneItems(scene) => {
            state.scene_items_scene = scene.clone();
            state.scene_items.clear();
        }
        Command::SetSceneItemEnabled {
            scene,
            item_id,
            enabled,
        } => {
            if *scene == state.scene_items_scene {
                set_item_enabled(&mut state.scene_items, *item_id, *enabled);
            }
        }
        Command::MoveSceneItem {
            scene,
            item_id,
            ui_index,
        } => {
            if *scene == state.scene_items_scene {
                if let Some(from) = state.scene_items.iter().position(|i| i.item_id == *item_id) {
                    let item = state.scene_items.remove(from);
                    let to = (*ui_index).min(state.scene_items.len());
                    state.scene_items.insert(to, item);
                }
            }
        }
        Command::SetGroupItemEnabled {
            group,
            item_id,
            enabled,
        } => {
            if let Some(items) = state.group_items.get_mut(group) {
                set_item_enabled(items, *item_id, *enabled);
            }
        }
        Command::ToggleMute(name) => {
            if let Some(input) = state.input_mut(name) {
                input.muted = !input.muted;
            }
        }
        Command::SetVolume { input, volume_db } => {
            if let Some(input) = state.input_mut(input) {
                input.volume_db = *volume_db;
            }
        }
        Command::ScopeInputSettings(input) => {
            state.input_settings_source = input.clone();
            state.input_settings = None;
        }
        Command::MergeInputSettings { input, settings } => {
            if *input == state.input_settings_source {
                let current = state.input_settings.get_or_insert_with(Settings::new);
                current.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Command::ScopeFilters(source) => {
            state.filter_source = source.clone();
            state.filters.clear();
        }
        Command::SetFilterEnabled {
            source,
            filter,
            enabled,
        } => {
            if *source == state.filter_source {
                if let Some(f) = state.filter_mut(filter) {
                    f.enabled = *enabled;
                }
            }
        }
        Command::MergeFilterSettings {
            source,
            filter,
            settings,
        } => {
            if *source == state.filter_source {
                if let Some(f) = state.filter_mut(filter) {
                    f.settings
                        .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        Command::MoveFilter {
            source,
            filter,
            index,
        } => {
            if *source == state.filter_source {
                if let Some(from) = state.filters.iter().position(|f| f.name == *filter) {
                    let moved = state.filters.remove(from);
                    let to = (*index).min(state.filters.len());
                    state.filters.insert(to, moved);
                }
            }
        }
    }
}

pub fn apply_response(state: &mut ControlState, action: &ResponseAction, data: &Value) -> Vec<Refresh> {
    let mut follow_up = Vec::new();
    match action {
        ResponseAction::SceneList => {
            let mut scenes: Vec<Scene> = array(data, "scenes")
                .filter_map(|s| str_field(s, "sceneName"))
                .map(|name| Scene {
                    name: name.to_string(),
                })
                .collect();
            scenes.reverse();
            dedup_by_name(&mut scenes);
            state.scenes = scenes;
            state.current_scene = str_field(data, "currentProgramSceneName")
                .unwrap_or_default()
                .to_string();
        }
        ResponseAction::InputList => {
            let previous = std::mem::take(&mut state.inputs);
            for entry in array(data, "inputs") {
                let (Some(name), Some(kind)) =
                    (str_field(entry, "inputName"), str_field(entry, "inputKind"))
                else {
                    continue;
                };
                let mut input = Input::new(name, kind);
                if let Some(old) = previous.iter().find(|i| i.name == name) {
                    input.muted = old.muted;
                    input.volume_db = old.volume_db;
                }
                state.upsert_input(input);
            }
            follow_up.extend(state.inputs.iter().map(|i| Refresh::InputAudio(i.name.clone())));
        }
        ResponseAction::InputVolume(name) => {
            let db = data
                .get("inputVolumeDb")
                .and_then(Value::as_f64)
                .unwrap_or(-100.0);
            if let Some(input) = state.input_mut(name) {
                input.volume_db = db;
            }
        }
        ResponseAction::InputMute(name) => {
            let muted = bool_field(data, "inputMuted").unwrap_or(false);
            if let Some(input) = state.input_mut(name) {
                input.muted = muted;
            }
        }
        ResponseAction::StreamStatus => {
            state.stream_active = bool_field(data, "outputActive").unwrap_or(false);
        }
        ResponseAction::RecordStatus => {
            state.record_active = bool_field(data, "outputActive").unwrap_or(false);
        }
        ResponseAction::StudioMode => {
            let enabled = bool_field(data, "studioModeEnabled").unwrap_or(false);
            follow_up.extend(set_studio_mode(state, enabled));
        }
        ResponseAction::PreviewScene => {
            state.preview_scene = str_field(data, "currentPreviewSceneName")
                .unwrap_or_default()
                .to_string();
        }
        ResponseAction::SceneItems(scene) => {
            if *scene == state.scene_items_scene {
                state.scene_items = parse_items(data, |is_group| {
                    if is_group {
                        "group"
                    } else {
                        "scene"
                    }
                });
            }
        }
        ResponseAction::GroupItems(group) => {
            let items = parse_items(data, |_| "unknown");
            state.group_items.insert(group.clone(), items);
        }
        ResponseAction::Filters(source) => {
            if *source == state.filter_source {
                state.filters = array(data, "filters").filter_map(parse_filter).collect();
            }
        }
        ResponseAction::InputSettings(input) => {
            if *input == state.input_settings_source {
                let settings = data
                    .get("inputSettings")
                    .map(settings_from_json)
                    .unwrap_or_default();
                state.input_settings = Some(settings);
            }
        }
        ResponseAction::Screenshot(target) => {
            let image = str_field(data, "imageData").map(str::to_string);
            match target {
                ScreenshotTarget::Program => state.program_screenshot = image,
                ScreenshotTarget::Preview => state.preview_screenshot = image,
            }
        }
        ResponseAction::FilterCreated(source) => {
            follow_up.push(Refresh::Filters(source.clone()));
        }
        ResponseAction::FilterRemoved { source, filter } => {
            if *source == state.filter_source {
                state.filters.retain(|f| f.name != *filter);
            }
        }
        ResponseAction::GroupItemRemoved { group, item_id } => {
            if let Some(items) = state.group_items.get_mut(group) {
                items.retain(|i| i.item_id != *item_id);
            }
        }
    }
    follow_up
}

fn set_studio_mode(state: &mut ControlState, enabled: bool) -> Option<Refresh> {
    state.studio_mode_enabled = enabled;
    if enabled {
        Some(Refresh::PreviewScene)
    } else {
        state.preview_scene.clear();
        state.preview_screenshot = None;
        None
    }
}

fn set_item_enabled(items: &mut [SceneItem], item_id: i64, enabled: bool) {
    for item in items.iter_mut().filter(|i| i.item_id == item_id) {
        item.enabled = enabled;
    }
}

fn parse_items(data: &Value, missing_kind: impl Fn(bool) -> &'static str) -> Vec<SceneItem> {
    let mut items: Vec<SceneItem> = array(data, "sceneItems")
        .filter_map(|entry| {
            let source_name = str_field(entry, "sourceName")?;
            let item_id = entry.get("sceneItemId")?.as_i64()?;
            let is_group = bool_field(entry, "isGroup").unwrap_or(false);
            Some(SceneItem {
                item_id,
                source_name: source_name.to_string(),
                input_kind: str_field(entry, "inputKind")
                    .unwrap_or_else(|| missing_kind(is_group))
                    .to_string(),
                enabled: bool_field(entry, "sceneItemEnabled").unwrap_or(true),
            })
        })
        .collect();
    items.reverse();
    items
}

fn parse_filter(entry: &Value) -> Option<Filter> {
    Some(Filter {
        name: str_field(entry, "filterName")?.to_string(),
        kind: str_field(entry, "filterKind")?.to_string(),
        enabled: bool_field(entry, "filterEnabled").unwrap_or(true),
        settings: entry
            .get("filterSettings")
            .map(settings_from_json)
            .unwrap_or_default(),
    })
}

fn dedup_by_name(scenes: &mut Vec<Scene>) {
    let mut seen = std::collections::HashSet::new();
    scenes.retain(|s| seen.insert(s.name.clone()));
}

fn array<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn bool_field(data: &Value, key: &str) -> Option<bool> {
    data.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SettingValue;
    use serde_json::json;

    fn with_inputs(names: &[&str]) -> ControlState {
        let mut state = ControlState::default();
        for name in names {
            state.upsert_input(Input::new(*name, "wasapi_input_capture"));
        }
        state
    }

    #[test]
    fn scene_list_is_reversed_and_sets_program() {
        let mut state = ControlState::default();
        apply_response(
            &mut state,
            &ResponseAction::SceneList,
            &json!({
                "currentProgramSceneName": "B",
                "scenes": [
                    {"sceneName": "A", "sceneIndex": 0},
                    {"sceneName": "B", "sceneIndex": 1},
                    {"sceneName": "C", "sceneIndex": 2}
                ]
            }),
        );
        let names: Vec<&str> = state.scenes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["C", "B", "A"]);
        assert_eq!(state.current_scene, "B");
    }

    #[test]
    fn index_translation_round_trips() {
        for count in 1..12 {
            for ui in 0..count {
                let server = to_server_index(ui, count);
                assert!(server < count);
                assert_eq!(to_server_index(server, count), ui);
            }
        }
        assert_eq!(to_server_index(99, 3), 0);
        assert_eq!(to_server_index(0, 0), 0);
    }

    #[test]
    fn mute_event_touches_only_the_named_input() {
        let mut state = with_inputs(&["Mic", "Desktop"]);
        apply_event(
            &mut state,
            "InputMuteStateChanged",
            &json!({"inputName": "Mic", "inputMuted": true}),
        );
        assert!(state.input("Mic").unwrap().muted);
        assert!(!state.input("Desktop").unwrap().muted);
    }

    #[test]
    fn malformed_event_payload_is_ignored() {
        let mut state = with_inputs(&["Mic"]);
        let before = state.clone();
        let follow_up = apply_event(&mut state, "InputMuteStateChanged", &json!({"inputName": 3}));
        assert!(follow_up.is_empty());
        assert_eq!(state, before);
        apply_event(&mut state, "SomethingNew", &json!({}));
        assert_eq!(state, before);
    }

    #[test]
    fn studio_mode_event_requests_preview_when_enabled() {
        let mut state = ControlState::default();
        let follow_up = apply_event(
            &mut state,
            "StudioModeStateChanged",
            &json!({"studioModeEnabled": true}),
        );
        assert!(state.studio_mode_enabled);
        assert_eq!(follow_up, vec![Refresh::PreviewScene]);

        state.preview_scene = "P".to_string();
        let follow_up = apply_event(
            &mut state,
            "StudioModeStateChanged",
            &json!({"studioModeEnabled": false}),
        );
        assert!(follow_up.is_empty());
        assert!(state.preview_scene.is_empty());
    }

    #[test]
    fn scene_item_enable_event_is_scoped() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeSceneItems("Main".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::SceneItems("Main".to_string()),
            &json!({"sceneItems": [
                {"sceneItemId": 1, "sourceName": "Cam", "inputKind": "dshow_input", "sceneItemEnabled": true}
            ]}),
        );
        apply_event(
            &mut state,
            "SceneItemEnableStateChanged",
            &json!({"sceneName": "Other", "sceneItemId": 1, "sceneItemEnabled": false}),
        );
        assert!(state.scene_items[0].enabled);
        apply_event(
            &mut state,
            "SceneItemEnableStateChanged",
            &json!({"sceneName": "Main", "sceneItemId": 1, "sceneItemEnabled": false}),
        );
        assert!(!state.scene_items[0].enabled);
    }

    #[test]
    fn scene_items_parse_defaults_and_skip_null_sources() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeSceneItems("Main".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::SceneItems("Main".to_string()),
            &json!({"sceneItems": [
                {"sceneItemId": 1, "sourceName": "Cam", "inputKind": "dshow_input"},
                {"sceneItemId": 2, "sourceName": null},
                {"sceneItemId": 3, "sourceName": "Folder", "inputKind": null, "isGroup": true, "sceneItemEnabled": false},
                {"sceneItemId": 4, "sourceName": "Nested", "inputKind": null, "isGroup": null}
            ]}),
        );
        let ids: Vec<i64> = state.scene_items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![4, 3, 1]);
        assert_eq!(state.scene_items[0].input_kind, "scene");
        assert_eq!(state.scene_items[1].input_kind, "group");
        assert!(!state.scene_items[1].enabled);
        assert!(state.scene_items[2].enabled);
    }

    #[test]
    fn stale_scene_items_response_is_discarded() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeSceneItems("New".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::SceneItems("Old".to_string()),
            &json!({"sceneItems": [{"sceneItemId": 1, "sourceName": "Cam"}]}),
        );
        assert!(state.scene_items.is_empty());
    }

    #[test]
    fn move_scene_item_places_it_at_ui_index() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeSceneItems("Main".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::SceneItems("Main".to_string()),
            &json!({"sceneItems": [
                {"sceneItemId": 1, "sourceName": "a"},
                {"sceneItemId": 2, "sourceName": "b"},
                {"sceneItemId": 3, "sourceName": "c"}
            ]}),
        );
        apply_command(
            &mut state,
            &Command::MoveSceneItem {
                scene: "Main".to_string(),
                item_id: 1,
                ui_index: 0,
            },
        );
        let ids: Vec<i64> = state.scene_items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn mute_and_volume_commands_touch_only_the_named_input() {
        let mut state = with_inputs(&["Mic", "Desktop"]);
        apply_command(&mut state, &Command::ToggleMute("Mic".to_string()));
        assert!(state.input("Mic").unwrap().muted);
        assert!(!state.input("Desktop").unwrap().muted);
        apply_command(&mut state, &Command::ToggleMute("Mic".to_string()));
        assert!(!state.input("Mic").unwrap().muted);

        apply_command(
            &mut state,
            &Command::SetVolume {
                input: "Desktop".to_string(),
                volume_db: -12.5,
            },
        );
        assert_eq!(state.input("Desktop").unwrap().volume_db, -12.5);
        assert_eq!(state.input("Mic").unwrap().volume_db, 0.0);

        let before = state.clone();
        apply_command(&mut state, &Command::ToggleMute("Ghost".to_string()));
        assert_eq!(state, before);
    }

    #[test]
    fn studio_mode_command_clears_preview_when_disabled() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::SetStudioMode(true));
        assert!(state.studio_mode_enabled);
        apply_command(&mut state, &Command::SetPreviewScene("Next".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::Screenshot(ScreenshotTarget::Preview),
            &json!({"imageData": "data:image/jpeg;base64,AAA"}),
        );
        assert_eq!(state.preview_scene, "Next");

        apply_command(&mut state, &Command::SetStudioMode(false));
        assert!(!state.studio_mode_enabled);
        assert!(state.preview_scene.is_empty());
        assert_eq!(state.screenshot(ScreenshotTarget::Preview), None);

        apply_command(&mut state, &Command::SetCurrentScene("Live".to_string()));
        assert_eq!(state.current_scene, "Live");
    }

    #[test]
    fn item_visibility_commands_respect_their_scope() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeSceneItems("Main".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::SceneItems("Main".to_string()),
            &json!({"sceneItems": [{"sceneItemId": 1, "sourceName": "Cam"}]}),
        );
        apply_response(
            &mut state,
            &ResponseAction::GroupItems("Folder".to_string()),
            &json!({"sceneItems": [{"sceneItemId": 1, "sourceName": "Inner"}]}),
        );

        apply_command(
            &mut state,
            &Command::SetSceneItemEnabled {
                scene: "Other".to_string(),
                item_id: 1,
                enabled: false,
            },
        );
        assert!(state.scene_items[0].enabled);
        apply_command(
            &mut state,
            &Command::SetSceneItemEnabled {
                scene: "Main".to_string(),
                item_id: 1,
                enabled: false,
            },
        );
        assert!(!state.scene_items[0].enabled);
        assert!(state.group_items["Folder"][0].enabled);

        apply_command(
            &mut state,
            &Command::SetGroupItemEnabled {
                group: "Folder".to_string(),
                item_id: 1,
                enabled: false,
            },
        );
        assert!(!state.group_items["Folder"][0].enabled);
        apply_command(
            &mut state,
            &Command::SetGroupItemEnabled {
                group: "Unknown".to_string(),
                item_id: 1,
                enabled: false,
            },
        );
        assert!(!state.group_items.contains_key("Unknown"));
    }

    #[test]
    fn input_settings_merge_only_into_the_scoped_input() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeInputSettings("Browser".to_string()));
        assert_eq!(state.input_settings, None);

        let mut partial = Settings::new();
        partial.insert("url".to_string(), SettingValue::Text("https://a".to_string()));
        apply_command(
            &mut state,
            &Command::MergeInputSettings {
                input: "Other".to_string(),
                settings: partial.clone(),
            },
        );
        assert_eq!(state.input_settings, None);

        apply_command(
            &mut state,
            &Command::MergeInputSettings {
                input: "Browser".to_string(),
                settings: partial,
            },
        );
        let mut width = Settings::new();
        width.insert("width".to_string(), SettingValue::Number(800.0));
        apply_command(
            &mut state,
            &Command::MergeInputSettings {
                input: "Browser".to_string(),
                settings: width,
            },
        );
        let settings = state.input_settings.as_ref().unwrap();
        assert_eq!(settings["url"], SettingValue::Text("https://a".to_string()));
        assert_eq!(settings["width"], SettingValue::Number(800.0));
    }

    #[test]
    fn filter_enable_and_move_commands_are_scoped() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeFilters("Mic".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::Filters("Mic".to_string()),
            &json!({"filters": [
                {"filterName": "Gain", "filterKind": "gain_filter", "filterEnabled": true},
                {"filterName": "Gate", "filterKind": "noise_gate_filter", "filterEnabled": true},
                {"filterName": "Comp", "filterKind": "compressor_filter", "filterEnabled": true}
            ]}),
        );

        apply_command(
            &mut state,
            &Command::SetFilterEnabled {
                source: "Desktop".to_string(),
                filter: "Gain".to_string(),
                enabled: false,
            },
        );
        assert!(state.filters[0].enabled);
        apply_command(
            &mut state,
            &Command::SetFilterEnabled {
                source: "Mic".to_string(),
                filter: "Gain".to_string(),
                enabled: false,
            },
        );
        assert!(!state.filters[0].enabled);

        apply_command(
            &mut state,
            &Command::MoveFilter {
                source: "Mic".to_string(),
                filter: "Gain".to_string(),
                index: 9,
            },
        );
        let names: Vec<&str> = state.filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Gate", "Comp", "Gain"]);

        apply_command(
            &mut state,
            &Command::MoveFilter {
                source: "Desktop".to_string(),
                filter: "Gain".to_string(),
                index: 0,
            },
        );
        assert_eq!(state.filters[2].name, "Gain");
    }

    #[test]
    fn input_list_keeps_known_audio_and_requests_refresh() {
        let mut state = with_inputs(&["Mic"]);
        state.input_mut("Mic").unwrap().volume_db = -6.0;
        let follow_up = apply_response(
            &mut state,
            &ResponseAction::InputList,
            &json!({"inputs": [
                {"inputName": "Mic", "inputKind": "wasapi_input_capture"},
                {"inputName": "Cam", "inputKind": "dshow_input"},
                {"inputName": "Mic", "inputKind": "wasapi_input_capture"}
            ]}),
        );
        assert_eq!(state.inputs.len(), 2);
        assert_eq!(state.input("Mic").unwrap().volume_db, -6.0);
        assert_eq!(
            follow_up,
            vec![
                Refresh::InputAudio("Mic".to_string()),
                Refresh::InputAudio("Cam".to_string())
            ]
        );

        apply_response(&mut state, &ResponseAction::InputVolume("Cam".to_string()), &json!({}));
        assert_eq!(state.input("Cam").unwrap().volume_db, -100.0);
    }

    #[test]
    fn input_rename_and_removal() {
        let mut state = with_inputs(&["Mic", "Desktop"]);
        apply_event(
            &mut state,
            "InputNameChanged",
            &json!({"oldInputName": "Mic", "inputName": "Voice"}),
        );
        assert!(state.input("Voice").is_some());
        assert!(state.input("Mic").is_none());
        apply_event(&mut state, "InputRemoved", &json!({"inputName": "Desktop"}));
        assert_eq!(state.inputs.len(), 1);
    }

    #[test]
    fn filter_settings_merge_and_removal() {
        let mut state = ControlState::default();
        apply_command(&mut state, &Command::ScopeFilters("Mic".to_string()));
        apply_response(
            &mut state,
            &ResponseAction::Filters("Mic".to_string()),
            &json!({"filters": [
                {"filterName": "Gain", "filterKind": "gain_filter", "filterEnabled": true,
                 "filterSettings": {"db": 2.0}},
                {"filterName": "Gate", "filterKind": "noise_gate_filter", "filterEnabled": false}
            ]}),
        );
        assert_eq!(state.filters.len(), 2);

        let mut partial = Settings::new();
        partial.insert("db".to_string(), SettingValue::Number(5.0));
        apply_command(
            &mut state,
            &Command::MergeFilterSettings {
                source: "Mic".to_string(),
                filter: "Gain".to_string(),
                settings: partial,
            },
        );
        assert_eq!(state.filters[0].settings["db"], SettingValue::Number(5.0));

        apply_response(
            &mut state,
            &ResponseAction::FilterRemoved {
                source: "Mic".to_string(),
                filter: "Gate".to_string(),
            },
            &json!({}),
        );
        assert_eq!(state.filters.len(), 1);

        let follow_up = apply_event(
            &mut state,
            "SourceFilterCreated",
            &json!({"sourceName": "Mic", "filterName": "New"}),
        );
        assert_eq!(follow_up, vec![Refresh::Filters("Mic".to_string())]);
        let follow_up = apply_event(
            &mut state,
            "SourceFilterCreated",
            &json!({"sourceName": "Other", "filterName": "New"}),
        );
        assert!(follow_up.is_empty());
    }

    #[test]
    fn group_items_are_stored_per_group_and_refetched() {
        let mut state = ControlState::default();
        apply_response(
            &mut state,
            &ResponseAction::GroupItems("Folder".to_string()),
            &json!({"sceneItems": [
                {"sceneItemId": 7, "sourceName": "Inner"},
                {"sceneItemId": 8, "sourceName": "Inner2", "inputKind": "image_source"}
            ]}),
        );
        let items = &state.group_items["Folder"];
        assert_eq!(items[0].item_id, 8);
        assert_eq!(items[1].input_kind, "unknown");

        let follow_up = apply_event(&mut state, "SceneItemRemoved", &json!({"sceneName": "Folder"}));
        assert_eq!(follow_up, vec![Refresh::GroupItems("Folder".to_string())]);

        apply_response(
            &mut state,
            &ResponseAction::GroupItemRemoved {
                group: "Folder".to_string(),
                item_id: 7,
            },
            &json!({}),
        );
        assert_eq!(state.group_items["Folder"].len(), 1);
    }

    #[test]
    fn screenshot_is_cached_per_target() {
        let mut state = ControlState::default();
        apply_response(
            &mut state,
            &ResponseAction::Screenshot(ScreenshotTarget::Preview),
            &json!({"imageData": "data:image/jpeg;base64,AAA"}),
        );
        assert_eq!(
            state.screenshot(ScreenshotTarget::Preview),
            Some("data:image/jpeg;base64,AAA")
        );
        assert_eq!(state.screenshot(ScreenshotTarget::Program), None);
    }
}
