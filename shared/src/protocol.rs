//! JSON wire protocol shared by the scene server and remote scene clients.
//!
//! One persistent WebSocket per client carries four message shapes:
//! handshake request/response once, then input batches upstream and state
//! notifications downstream until the connection closes.

use crate::diff::AttributeMap;
use crate::error::{ReplicationError, Result};
use crate::rpc::RpcMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type SessionId = String;
pub type EntityId = String;

/// One recorded drawing primitive.
pub type Instruction = RpcMessage;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8765;

// Event codes as reported by the desktop toolkit the clients run on.
pub const KEY_DOWN: i32 = 768;
pub const KEY_UP: i32 = 769;
pub const MOUSE_MOTION: i32 = 1024;
pub const MOUSE_BUTTON_DOWN: i32 = 1025;
pub const MOUSE_BUTTON_UP: i32 = 1026;
pub const VIDEO_RESIZE: i32 = 32769;

/// Key codes used by the bundled scenes.
pub mod keys {
    pub const SPACE: i32 = 32;
    pub const RIGHT: i32 = 1073741903;
    pub const LEFT: i32 = 1073741904;
    pub const DOWN: i32 = 1073741905;
    pub const UP: i32 = 1073741906;
}

/// Client to server, first message on a new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub resolution: (u32, u32),
    #[serde(default)]
    pub client_data: Map<String, Value>,
}

/// Server to client, reply to [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub session_id: SessionId,
    pub full_entity_states: BTreeMap<EntityId, AttributeMap>,
    #[serde(default)]
    pub screen_baseline: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub event_type: i32,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Client to server, all input queued since the previous flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBatch {
    pub events: Vec<InputEvent>,
    /// Sender's clock when the batch left, in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedEntity {
    pub visual: String,
    pub session_id: SessionId,
    pub is_focus: bool,
}

/// Global entity delta for one tick. The three collections are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorsState {
    #[serde(default)]
    pub added: BTreeMap<EntityId, AddedEntity>,
    #[serde(default)]
    pub removed: Vec<EntityId>,
    #[serde(default)]
    pub modified: BTreeMap<EntityId, AttributeMap>,
}

impl ActorsState {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Server to client, once per tick when something changed for the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNotification {
    pub actors: ActorsState,
    /// `None` leaves the client's screen untouched; `Some` replaces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Vec<Instruction>>,
    /// Server clock when the notification was sent, in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl StateNotification {
    /// Builds a notification, or `None` when there is nothing to tell the recipient.
    pub fn build(actors: &ActorsState, screen: Option<Vec<Instruction>>) -> Option<Self> {
        if actors.is_empty() && screen.is_none() {
            return None;
        }
        Some(Self {
            actors: actors.clone(),
            screen,
            time: None,
        })
    }
}

/// Typed view of an [`InputEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    MouseMove {
        pos: (f32, f32),
        rel: (f32, f32),
        buttons: Vec<u8>,
    },
    MouseDown {
        pos: (f32, f32),
        button: u8,
    },
    MouseUp {
        pos: (f32, f32),
        button: u8,
    },
    KeyDown {
        key: i32,
    },
    KeyUp {
        key: i32,
    },
    Resize {
        size: (u32, u32),
    },
    Other(InputEvent),
}

impl SceneEvent {
    pub fn from_input(event: &InputEvent) -> Result<Self> {
        let attrs = &event.attributes;
        let parsed = match event.event_type {
            MOUSE_MOTION => SceneEvent::MouseMove {
                pos: required(attrs, "pos")?,
                rel: optional(attrs, "rel")?.unwrap_or((0.0, 0.0)),
                buttons: optional(attrs, "buttons")?.unwrap_or_default(),
            },
            MOUSE_BUTTON_DOWN => SceneEvent::MouseDown {
                pos: required(attrs, "pos")?,
                button: required(attrs, "button")?,
            },
            MOUSE_BUTTON_UP => SceneEvent::MouseUp {
                pos: required(attrs, "pos")?,
                button: required(attrs, "button")?,
            },
            KEY_DOWN => SceneEvent::KeyDown {
                key: required(attrs, "key")?,
            },
            KEY_UP => SceneEvent::KeyUp {
                key: required(attrs, "key")?,
            },
            VIDEO_RESIZE => SceneEvent::Resize {
                size: required(attrs, "size")?,
            },
            _ => SceneEvent::Other(event.clone()),
        };
        Ok(parsed)
    }

    pub fn to_input(&self) -> InputEvent {
        let (event_type, attributes) = match self {
            SceneEvent::MouseMove { pos, rel, buttons } => (
                MOUSE_MOTION,
                attributes([
                    ("pos", point(*pos)),
                    ("rel", point(*rel)),
                    ("buttons", Value::from(buttons.clone())),
                ]),
            ),
            SceneEvent::MouseDown { pos, button } => (
                MOUSE_BUTTON_DOWN,
                attributes([("pos", point(*pos)), ("button", Value::from(*button))]),
            ),
            SceneEvent::MouseUp { pos, button } => (
                MOUSE_BUTTON_UP,
                attributes([("pos", point(*pos)), ("button", Value::from(*button))]),
            ),
            SceneEvent::KeyDown { key } => (KEY_DOWN, attributes([("key", Value::from(*key))])),
            SceneEvent::KeyUp { key } => (KEY_UP, attributes([("key", Value::from(*key))])),
            SceneEvent::Resize { size } => (
                VIDEO_RESIZE,
                attributes([("size", Value::from(vec![size.0, size.1]))]),
            ),
            SceneEvent::Other(event) => return event.clone(),
        };
        InputEvent {
            event_type,
            attributes,
        }
    }

    pub fn is_pointer_move(&self) -> bool {
        matches!(self, SceneEvent::MouseMove { .. })
    }
}

impl From<SceneEvent> for InputEvent {
    fn from(event: SceneEvent) -> Self {
        event.to_input()
    }
}

fn point(p: (f32, f32)) -> Value {
    Value::from(vec![p.0, p.1])
}

fn attributes<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn required<T: DeserializeOwned>(attrs: &Map<String, Value>, name: &str) -> Result<T> {
    optional(attrs, name)?
        .ok_or_else(|| ReplicationError::protocol(format!("event attribute {} missing", name)))
}

fn optional<T: DeserializeOwned>(attrs: &Map<String, Value>, name: &str) -> Result<Option<T>> {
    attrs
        .get(name)
        .map(|value| {
            T::deserialize(value).map_err(|e| {
                ReplicationError::protocol(format!("event attribute {}: {}", name, e))
            })
        })
        .transpose()
}

/// Serializes a wire message to JSON text.
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parses JSON text into a wire message. Shape mismatches are protocol errors.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| ReplicationError::protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_notification_wire_shape() {
        let mut actors = ActorsState::default();
        actors.added.insert(
            "s1:ship:0".to_string(),
            AddedEntity {
                visual: "ship (1)".to_string(),
                session_id: "s1".to_string(),
                is_focus: true,
            },
        );
        actors.removed.push("s0:cannonball:3".to_string());
        let mut changes = AttributeMap::new();
        changes.insert("position".to_string(), json!([5.0, 5.0]));
        actors.modified.insert("s1:ship:0".to_string(), changes);

        let notification = StateNotification::build(&actors, None).unwrap();
        let value = serde_json::to_value(&notification).unwrap();

        assert_eq!(
            value,
            json!({
                "actors": {
                    "added": {"s1:ship:0": {"visual": "ship (1)", "session_id": "s1", "is_focus": true}},
                    "removed": ["s0:cannonball:3"],
                    "modified": {"s1:ship:0": {"position": [5.0, 5.0]}}
                }
            })
        );
    }

    #[test]
    fn test_empty_notification_suppressed() {
        assert!(StateNotification::build(&ActorsState::default(), None).is_none());
        assert!(StateNotification::build(&ActorsState::default(), Some(vec![])).is_some());
    }

    #[test]
    fn test_send_time_is_optional() {
        let batch: InputBatch = decode(r#"{"events": []}"#).unwrap();
        assert_eq!(batch.time, None);

        let stamped: InputBatch = decode(r#"{"events": [], "time": 1700000000.25}"#).unwrap();
        assert_eq!(stamped.time, Some(1700000000.25));

        let mut notification = StateNotification::build(&ActorsState::default(), Some(vec![])).unwrap();
        notification.time = Some(12.5);
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"actors": {"added": {}, "removed": [], "modified": {}}, "screen": [], "time": 12.5})
        );
    }

    #[test]
    fn test_handshake_request_defaults() {
        let request: HandshakeRequest = decode(r#"{"resolution": [1280, 720]}"#).unwrap();
        assert_eq!(request.resolution, (1280, 720));
        assert!(request.client_data.is_empty());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode::<InputBatch>(r#"{"evts": []}"#).unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol(_)));
    }

    #[test]
    fn test_scene_event_from_input() {
        let event: InputEvent = serde_json::from_value(json!({
            "event_type": MOUSE_BUTTON_DOWN,
            "attributes": {"pos": [10, 20], "button": 1}
        }))
        .unwrap();

        assert_eq!(
            SceneEvent::from_input(&event).unwrap(),
            SceneEvent::MouseDown {
                pos: (10.0, 20.0),
                button: 1
            }
        );
    }

    #[test]
    fn test_scene_event_missing_attribute() {
        let event = InputEvent {
            event_type: KEY_DOWN,
            attributes: Map::new(),
        };
        assert!(matches!(
            SceneEvent::from_input(&event),
            Err(ReplicationError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_event_passes_through() {
        let event = InputEvent {
            event_type: 4242,
            attributes: Map::new(),
        };
        let parsed = SceneEvent::from_input(&event).unwrap();
        assert_eq!(parsed, SceneEvent::Other(event.clone()));
        assert_eq!(parsed.to_input(), event);
    }

    #[test]
    fn test_scene_event_to_input() {
        let event = SceneEvent::MouseMove {
            pos: (2.0, 2.0),
            rel: (1.0, 1.0),
            buttons: vec![0, 0, 0],
        };
        let input = event.to_input();
        assert_eq!(input.event_type, MOUSE_MOTION);
        assert_eq!(input.attributes["pos"], json!([2.0, 2.0]));
        assert_eq!(SceneEvent::from_input(&input).unwrap(), event);
        assert!(event.is_pointer_move());
    }
}
