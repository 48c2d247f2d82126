use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Disconnected or errored, i.e. a state the reconnect policy reacts to.
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scene {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Input {
    pub name: String,
    pub kind: String,
    pub muted: bool,
    pub volume_db: f64,
}

const AUDIO_KINDS: &[&str] = &[
    "wasapi_input_capture",
    "wasapi_output_capture",
    "pulse_input_capture",
    "pulse_output_capture",
    "alsa_input_capture",
    "coreaudio_input_capture",
    "coreaudio_output_capture",
    "dshow_input",
];

const AUDIO_KEYWORDS: &[&str] = &["audio", "mic", "sound", "capture"];

impl Input {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            muted: false,
            volume_db: 0.0,
        }
    }

    pub fn is_audio(&self) -> bool {
        AUDIO_KINDS.contains(&self.kind.as_str())
            || AUDIO_KEYWORDS.iter().any(|kw| self.kind.contains(kw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneItem {
    pub item_id: i64,
    pub source_name: String,
    pub input_kind: String,
    pub enabled: bool,
}

/// Filter settings keep primitive values only; nested objects and arrays are
/// dropped when a settings bag is read from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

pub type Settings = BTreeMap<String, SettingValue>;

impl SettingValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            // Integral values go out as integers so the server keeps int settings typed.
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Value::Number(Number::from(*n as i64))
            }
            Self::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

pub fn settings_from_json(value: &Value) -> Settings {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| SettingValue::from_json(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

pub fn settings_to_json(settings: &Settings) -> Value {
    let map: Map<String, Value> = settings
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Value::Object(map)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotTarget {
    Program,
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
}

impl ObsProfile {
    pub fn new(name: &str, host: &str, port: u16, password: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            password: password.to_string(),
        }
    }
}

/// Everything the control session knows about the connected server. Replaced
/// wholesale on every teardown; `generation` increases with each replacement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlState {
    pub connection: ConnectionState,
    pub generation: u64,
    pub scenes: Vec<Scene>,
    pub current_scene: String,
    pub preview_scene: String,
    pub studio_mode_enabled: bool,
    pub inputs: Vec<Input>,
    pub scene_items_scene: String,
    pub scene_items: Vec<SceneItem>,
    pub group_items: BTreeMap<String, Vec<SceneItem>>,
    pub filter_source: String,
    pub filters: Vec<Filter>,
    pub input_settings_source: String,
    pub input_settings: Option<Settings>,
    pub stream_active: bool,
    pub record_active: bool,
    pub program_screenshot: Option<String>,
    pub preview_screenshot: Option<String>,
}

impl ControlState {
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Input> {
        self.inputs.iter_mut().find(|i| i.name == name)
    }

    /// Inserts or replaces by name so names stay unique.
    pub fn upsert_input(&mut self, input: Input) {
        match self.input_mut(&input.name) {
            Some(existing) => *existing = input,
            None => self.inputs.push(input),
        }
    }

    pub fn filter_mut(&mut self, name: &str) -> Option<&mut Filter> {
        self.filters.iter_mut().find(|f| f.name == name)
    }

    pub fn screenshot(&self, target: ScreenshotTarget) -> Option<&str> {
        match target {
            ScreenshotTarget::Program => self.program_screenshot.as_deref(),
            ScreenshotTarget::Preview => self.preview_screenshot.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audio_classification_covers_known_kinds_and_keywords() {
        assert!(Input::new("Mic", "wasapi_input_capture").is_audio());
        assert!(Input::new("Cam Audio", "dshow_input").is_audio());
        assert!(Input::new("Desktop", "pulse_output_capture").is_audio());
        assert!(Input::new("Plugin", "vst_sound_source").is_audio());
        assert!(!Input::new("Overlay", "browser_source").is_audio());
        assert!(!Input::new("Logo", "image_source").is_audio());
    }

    #[test]
    fn settings_keep_primitives_only() {
        let settings = settings_from_json(&json!({
            "gain_db": 3.5,
            "enabled": true,
            "label": "x",
            "nested": {"a": 1},
            "list": [1, 2],
            "nothing": null
        }));
        assert_eq!(settings.len(), 3);
        assert_eq!(settings["gain_db"], SettingValue::Number(3.5));
        assert_eq!(settings["enabled"], SettingValue::Bool(true));
        assert_eq!(settings["label"], SettingValue::Text("x".to_string()));
    }

    #[test]
    fn integral_numbers_serialize_as_integers() {
        let mut settings = Settings::new();
        settings.insert("width".to_string(), SettingValue::Number(1920.0));
        settings.insert("ratio".to_string(), SettingValue::Number(0.5));
        let value = settings_to_json(&settings);
        assert_eq!(value, json!({"width": 1920, "ratio": 0.5}));
    }

    #[test]
    fn upsert_input_keeps_names_unique() {
        let mut state = ControlState::default();
        state.upsert_input(Input::new("Mic", "wasapi_input_capture"));
        let mut replaced = Input::new("Mic", "wasapi_input_capture");
        replaced.muted = true;
        state.upsert_input(replaced);
        assert_eq!(state.inputs.len(), 1);
        assert!(state.input("Mic").unwrap().muted);
    }

    #[test]
    fn connection_state_serializes_with_message() {
        let value = serde_json::to_value(ConnectionState::Error("boom".to_string())).unwrap();
        assert_eq!(value, json!({"state": "error", "message": "boom"}));
        assert!(ConnectionState::Error(String::new()).is_down());
        assert!(!ConnectionState::Connecting.is_down());
    }
}
