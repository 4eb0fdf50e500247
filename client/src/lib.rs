//! # Remote Scene Client Library
//!
//! Client side of the scene replication protocol. The server owns the
//! simulation; the client keeps a shadow copy of every replicated entity,
//! forwards local input and replays the drawing instructions the server
//! records for its session.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Connection settings: server address, requested resolution, retry budget
//! and the free-form `client_data` sent during the handshake.
//!
//! ### Game Module (`game`)
//! The shadow scene. Entities are created from the handshake snapshot and
//! then kept current by applying each state notification in order:
//! additions first, then modifications, then removals.
//!
//! ### Input Module (`input`)
//! Buffers local events between ticks. Consecutive pointer motion is
//! coalesced so only the latest position is sent.
//!
//! ### Network Module (`network`)
//! WebSocket transport. Handles connection retries, the handshake and a
//! background reader that queues incoming notifications.
//!
//! ### Rendering Module (`rendering`)
//! A headless draw surface that traces every replayed primitive.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::config::ClientConfig;
//! use client::network::RemoteSceneClient;
//! use client::rendering::TraceSurface;
//! use shared::SceneEvent;
//!
//! # async fn run() -> shared::Result<()> {
//! let mut client = RemoteSceneClient::new(ClientConfig::default().with_name("Anne Bonny"));
//! client.connect().await?;
//!
//! let mut surface = TraceSurface::new();
//! loop {
//!     client.push_event(SceneEvent::KeyDown { key: shared::protocol::keys::UP });
//!     client.update().await?;
//!     surface.begin_frame();
//!     client.draw(&mut surface);
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
