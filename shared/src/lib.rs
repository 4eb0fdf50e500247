//! Types and protocol pieces shared by the scene server and its clients.

pub mod diff;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod screen;
pub mod stats;

pub use diff::{serialize_full_state, AttributeMap, DiffTracker, TrackedAttributes, WireValue};
pub use error::{ReplicationError, Result};
pub use protocol::{
    ActorsState, AddedEntity, EntityId, HandshakeRequest, HandshakeResponse, InputBatch,
    InputEvent, Instruction, SceneEvent, SessionId, StateNotification, DEFAULT_HOST, DEFAULT_PORT,
};
pub use rpc::{Dispatcher, RpcMessage, RpcSink};
pub use screen::{Color, DrawSurface, Rect, RemoteScreenPlayer, RemoteScreenRecorder, TextStyle};
pub use stats::RollingAverage;
