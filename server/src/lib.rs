//! # Scene Server Library
//!
//! This library provides the authoritative scene-replication server. One
//! shared world holds every entity; each connected client gets a private
//! session running its own scene against that world, and every tick the
//! server sends each client what changed.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Entities live only in the server's [`world::World`]. Clients never
//! mutate them directly; they send input, and the owning session's scene
//! decides what happens.
//!
//! ### Session Management
//! Handles the complete lifecycle of a connection:
//! - Handshake with a full snapshot of the world and the screen baseline
//! - Admission into the tick on the following tick
//! - Input queuing in arrival order
//! - Teardown that removes every entity the session owned
//!
//! ### Replication
//! Entity setters feed per-entity diff trackers. Once per tick the world
//! folds them into one added/removed/modified delta shared by every
//! recipient, paired with each session's own screen instructions when
//! those changed. Ticks with nothing new for a session send nothing.
//!
//! ## Architecture Design
//!
//! ### Single Tick Loop
//! All simulation state is mutated from one loop. Network tasks only decode
//! frames and forward messages over a channel, so no scene ever observes a
//! half-finished tick.
//!
//! ### Failure Isolation
//! A malformed message is logged and skipped. A scene callback that returns
//! an error is logged; one that panics moves its session to draining and the
//! rest of the tick carries on.
//!
//! ## Module Organization
//!
//! - `entity`: replicated entities and their templates
//! - `world`: shared entity store, collision groups and clock
//! - `scene`: the scene trait, entity registry and session context
//! - `session`: per-connection state machine and input queue
//! - `session_manager`: the tick pipeline
//! - `network`: WebSocket front end and server loop
//! - `game`: the bundled pirate demo
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::game;
//! use server::network::NetworkServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let sessions = game::session_manager(&config);
//!     let mut server = NetworkServer::bind(config, sessions).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entity;
pub mod game;
pub mod keyboard;
pub mod network;
pub mod scene;
pub mod session;
pub mod session_manager;
pub mod world;
