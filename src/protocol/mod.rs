//! Wire envelope for the obs-websocket 5.x control protocol.
//!
//! Every frame is a JSON text message `{"op": <u8>, "d": {...}}`. The decoder
//! never panics: anything that does not fit one of the server shapes comes back
//! as a [`CodecError`] and the session drops it.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

pub const RPC_VERSION: u32 = 1;

/// Event subscription categories (bit flags).
pub mod subscription {
    pub const GENERAL: u32 = 1 << 0;
    pub const CONFIG: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const INPUTS: u32 = 1 << 3;
    pub const FILTERS: u32 = 1 << 5;
    pub const OUTPUTS: u32 = 1 << 6;
    pub const SCENE_ITEMS: u32 = 1 << 7;
    pub const UI: u32 = 1 << 10;
}

/// Sent verbatim on every Identify. Transitions (bit 4) and the volume meters
/// (bit 16) are not subscribed; meters fire several times per second per input.
pub const EVENT_SUBSCRIPTIONS: u32 = subscription::GENERAL
    | subscription::CONFIG
    | subscription::SCENES
    | subscription::INPUTS
    | subscription::FILTERS
    | subscription::OUTPUTS
    | subscription::SCENE_ITEMS
    | subscription::UI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0,
    Identify = 1,
    Identified = 2,
    Event = 5,
    Request = 6,
    RequestResponse = 7,
}

impl OpCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Hello),
            1 => Some(Self::Identify),
            2 => Some(Self::Identified),
            5 => Some(Self::Event),
            6 => Some(Self::Request),
            7 => Some(Self::RequestResponse),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    MissingField(&'static str),
    UnsupportedOp(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::MissingField(field) => write!(f, "envelope missing field: {field}"),
            Self::UnsupportedOp(op) => write!(f, "unsupported op code: {op}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub request_id: String,
    pub success: bool,
    pub code: Option<u16>,
    pub comment: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello {
        authentication: Option<AuthChallenge>,
    },
    Identified,
    Event {
        event_type: String,
        event_data: Value,
    },
    Response(RequestOutcome),
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    op: u8,
    d: T,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    op: Option<u8>,
    #[serde(default)]
    d: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    #[serde(default)]
    authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    event_type: String,
    #[serde(default)]
    event_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    result: bool,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyData<'a> {
    rpc_version: u32,
    event_subscriptions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    authentication: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestData<'a> {
    request_type: &'a str,
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_data: Option<&'a Value>,
}

pub fn decode(text: &str) -> Result<ServerMessage, CodecError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(CodecError::Json)?;
    let op = raw.op.ok_or(CodecError::MissingField("op"))?;
    let d = match raw.d {
        Some(Value::Null) | None => return Err(CodecError::MissingField("d")),
        Some(d) => d,
    };

    match OpCode::from_u8(op) {
        Some(OpCode::Hello) => {
            let hello: HelloData = serde_json::from_value(d).map_err(CodecError::Json)?;
            Ok(ServerMessage::Hello {
                authentication: hello.authentication,
            })
        }
        Some(OpCode::Identified) => Ok(ServerMessage::Identified),
        Some(OpCode::Event) => {
            let event: EventData = serde_json::from_value(d).map_err(CodecError::Json)?;
            Ok(ServerMessage::Event {
                event_type: event.event_type,
                event_data: object_or_empty(event.event_data),
            })
        }
        Some(OpCode::RequestResponse) => {
            let resp: ResponseData = serde_json::from_value(d).map_err(CodecError::Json)?;
            Ok(ServerMessage::Response(RequestOutcome {
                request_id: resp.request_id,
                success: resp.request_status.result,
                code: resp.request_status.code,
                comment: resp.request_status.comment,
                data: object_or_empty(resp.response_data),
            }))
        }
        _ => Err(CodecError::UnsupportedOp(op)),
    }
}

pub fn encode_identify(authentication: Option<&str>) -> Result<String, CodecError> {
    encode(
        OpCode::Identify,
        IdentifyData {
            rpc_version: RPC_VERSION,
            event_subscriptions: EVENT_SUBSCRIPTIONS,
            authentication,
        },
    )
}

pub fn encode_request(
    request_type: &str,
    request_id: &str,
    request_data: Option<&Value>,
) -> Result<String, CodecError> {
    encode(
        OpCode::Request,
        RequestData {
            request_type,
            request_id,
            request_data,
        },
    )
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn compute_auth(password: &str, challenge: &str, salt: &str) -> String {
    let secret = general_purpose::STANDARD.encode(Sha256::digest(format!("{password}{salt}")));
    general_purpose::STANDARD.encode(Sha256::digest(format!("{secret}{challenge}")))
}

fn encode<T: Serialize>(op: OpCode, d: T) -> Result<String, CodecError> {
    serde_json::to_string(&Envelope { op: op as u8, d }).map_err(CodecError::Json)
}

fn object_or_empty(value: Option<Value>) -> Value {
    match value {
        Some(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_matches_protocol_reference_vector() {
        let token = compute_auth(
            "supersecretpassword",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
        );
        assert_eq!(token, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn auth_is_deterministic_and_input_sensitive() {
        let a = compute_auth("pw", "challenge", "salt");
        let b = compute_auth("pw", "challenge", "salt");
        assert_eq!(a, b);
        assert_ne!(a, compute_auth("pw", "challenge2", "salt"));
        assert_ne!(a, compute_auth("pw2", "challenge", "salt"));
    }

    #[test]
    fn decodes_hello_with_and_without_auth() {
        let msg = decode(
            r#"{"op":0,"d":{"obsWebSocketVersion":"5.1.0","rpcVersion":1,
                "authentication":{"challenge":"c1","salt":"s1"}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Hello {
                authentication: Some(AuthChallenge {
                    challenge: "c1".to_string(),
                    salt: "s1".to_string(),
                })
            }
        );

        let msg = decode(r#"{"op":0,"d":{"rpcVersion":1}}"#).unwrap();
        assert_eq!(msg, ServerMessage::Hello { authentication: None });
    }

    #[test]
    fn decodes_identified_event_and_response() {
        assert_eq!(
            decode(r#"{"op":2,"d":{"negotiatedRpcVersion":1}}"#).unwrap(),
            ServerMessage::Identified
        );

        let msg = decode(
            r#"{"op":5,"d":{"eventType":"CurrentProgramSceneChanged","eventIntent":4,
                "eventData":{"sceneName":"Live"}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Event {
                event_type: "CurrentProgramSceneChanged".to_string(),
                event_data: json!({"sceneName": "Live"}),
            }
        );

        let msg = decode(
            r#"{"op":7,"d":{"requestType":"GetStreamStatus","requestId":"r-1",
                "requestStatus":{"result":true,"code":100},"responseData":{"outputActive":true}}}"#,
        )
        .unwrap();
        let ServerMessage::Response(outcome) = msg else {
            panic!("expected response");
        };
        assert_eq!(outcome.request_id, "r-1");
        assert!(outcome.success);
        assert_eq!(outcome.code, Some(100));
        assert_eq!(outcome.data, json!({"outputActive": true}));
    }

    #[test]
    fn failed_response_without_data_gets_empty_object() {
        let msg = decode(
            r#"{"op":7,"d":{"requestType":"SetCurrentProgramScene","requestId":"r-2",
                "requestStatus":{"result":false,"code":600,"comment":"No source was found"}}}"#,
        )
        .unwrap();
        let ServerMessage::Response(outcome) = msg else {
            panic!("expected response");
        };
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(600));
        assert_eq!(outcome.comment.as_deref(), Some("No source was found"));
        assert_eq!(outcome.data, json!({}));
    }

    #[test]
    fn malformed_envelopes_are_errors_not_panics() {
        assert!(matches!(decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(decode(r#"{"d":{}}"#), Err(CodecError::MissingField("op"))));
        assert!(matches!(decode(r#"{"op":5}"#), Err(CodecError::MissingField("d"))));
        assert!(matches!(decode(r#"{"op":5,"d":null}"#), Err(CodecError::MissingField("d"))));
        assert!(matches!(decode(r#"{"op":9,"d":{}}"#), Err(CodecError::UnsupportedOp(9))));
        assert!(matches!(
            decode(r#"{"op":7,"d":{"requestId":"x"}}"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode(r#"{"op":5,"d":{"eventData":{}}}"#),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn identify_carries_fixed_subscriptions_and_optional_token() {
        let with_auth: Value = serde_json::from_str(&encode_identify(Some("tok")).unwrap()).unwrap();
        assert_eq!(with_auth["op"], 1);
        assert_eq!(with_auth["d"]["rpcVersion"], 1);
        assert_eq!(with_auth["d"]["eventSubscriptions"], 1263);
        assert_eq!(with_auth["d"]["authentication"], "tok");

        let without: Value = serde_json::from_str(&encode_identify(None).unwrap()).unwrap();
        assert_eq!(without["d"]["eventSubscriptions"], EVENT_SUBSCRIPTIONS);
        assert!(without["d"].get("authentication").is_none());
    }

    #[test]
    fn request_envelope_omits_absent_data() {
        let data = json!({"sceneName": "Main"});
        let encoded: Value = serde_json::from_str(
            &encode_request("SetCurrentProgramScene", "id-1", Some(&data)).unwrap(),
        )
        .unwrap();
        assert_eq!(encoded["op"], 6);
        assert_eq!(encoded["d"]["requestType"], "SetCurrentProgramScene");
        assert_eq!(encoded["d"]["requestId"], "id-1");
        assert_eq!(encoded["d"]["requestData"]["sceneName"], "Main");

        let bare: Value =
            serde_json::from_str(&encode_request("StartStream", "id-2", None).unwrap()).unwrap();
        assert!(bare["d"].get("requestData").is_none());
    }
}
