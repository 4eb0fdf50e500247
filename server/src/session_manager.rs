//! Session lifecycle and the authoritative tick
//!
//! This module owns every [`Session`] together with the shared [`World`] and
//! runs the fixed per-tick pipeline:
//! - tear down sessions whose connection closed (or whose scene panicked)
//! - admit sessions that finished their handshake
//! - drain each session's input queue into its scene
//! - step the shared world, then each scene's timers and update
//! - draw every scene into its screen recorder
//! - compute the one global entity diff and build per-session notifications,
//!   including sessions whose handshake snapshot is already on its way
//!
//! Network tasks never touch sessions directly; they report handshakes,
//! input and disconnects, and the server loop forwards them here between ticks.

use crate::scene::{EntityRegistry, SceneFactory};
use crate::session::{Session, SessionState};
use crate::world::World;
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{HandshakeRequest, HandshakeResponse, InputEvent, SessionId, StateNotification};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// Owns all sessions and the world they share.
pub struct SessionManager {
    world: World,
    registry: EntityRegistry,
    scene_factory: SceneFactory,
    /// Every session that is not yet closed, keyed by id
    sessions: BTreeMap<SessionId, Session>,
    /// Handshakes completed since the last tick, in completion order
    admissions: Vec<SessionId>,
    /// Connections reported closed since the last tick
    disconnects: Vec<SessionId>,
    tick: u64,
}

impl SessionManager {
    /// Creates a manager around an existing world
    ///
    /// `registry` lists the entity kinds scenes may create and
    /// `scene_factory` builds one scene per connecting client.
    pub fn new(world: World, registry: EntityRegistry, scene_factory: SceneFactory) -> Self {
        Self {
            world,
            registry,
            scene_factory,
            sessions: BTreeMap::new(),
            admissions: Vec::new(),
            disconnects: Vec::new(),
            tick: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Starts a session for a new connection and builds the handshake reply
    ///
    /// The reply carries the full state of every live entity and the session's
    /// screen baseline. The session is not ticked until
    /// [`SessionManager::complete_handshake`] is called for it.
    pub fn begin_session(&mut self, request: HandshakeRequest) -> HandshakeResponse {
        let session_id = self.generate_session_id();
        let mut session = Session::new(session_id.clone(), (self.scene_factory)());
        session.begin_handshake(request);

        let response = HandshakeResponse {
            session_id: session_id.clone(),
            full_entity_states: self.world.snapshot(),
            screen_baseline: session.screen_baseline(),
        };
        info!(
            "Session {} handshaking, snapshot of {} entities",
            session_id,
            response.full_entity_states.len()
        );
        self.sessions.insert(session_id, session);
        response
    }

    /// Marks the handshake as finished; the session joins on the next tick
    pub fn complete_handshake(&mut self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(session) if session.state() == SessionState::Handshaking => {
                self.admissions.push(session_id.to_string());
                true
            }
            Some(session) => {
                warn!(
                    "Session {} completed handshake in state {:?}",
                    session_id,
                    session.state()
                );
                false
            }
            None => false,
        }
    }

    /// Queues client input. Input that arrives before admission is kept
    /// and dispatched on the session's first tick.
    pub fn enqueue_events(&mut self, session_id: &str, events: Vec<InputEvent>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                for event in events {
                    session.enqueue_event(event);
                }
                true
            }
            None => {
                debug!("Input for unknown session {}", session_id);
                false
            }
        }
    }

    /// Reports a closed connection. Teardown happens at the start of the next tick.
    pub fn disconnect(&mut self, session_id: &str) {
        if self.sessions.contains_key(session_id) && !self.disconnects.iter().any(|id| id == session_id) {
            self.disconnects.push(session_id.to_string());
        }
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(Session::state)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of sessions included in ticks
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|session| session.is_active()).count()
    }

    /// Returns the number of sessions that are not yet closed
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Advances the simulation by `dt` seconds
    ///
    /// Returns one notification per active session that has something new
    /// to receive. Every notification of a tick shares the same entity diff.
    pub fn tick(&mut self, dt: f32) -> Vec<(SessionId, StateNotification)> {
        self.tick += 1;
        self.teardown_sessions();
        self.admit_sessions();

        let Self {
            world,
            registry,
            sessions,
            ..
        } = self;

        for session in sessions.values_mut().filter(|s| s.is_active()) {
            guarded(session, "event dispatch", |session| {
                session.process_events(world, registry);
            });
        }

        let fired = world.step(dt);

        for session in sessions.values_mut().filter(|s| s.is_active()) {
            guarded(session, "update", |session| {
                let session_id = session.id().to_string();
                for timer in fired.iter().filter(|timer| timer.session_id == session_id) {
                    session.fire_timer(world, registry, &timer.token);
                }
                session.update(world, registry, dt);
            });
        }

        for session in sessions.values_mut().filter(|s| s.is_active()) {
            guarded(session, "draw", |session| session.draw(world, registry));
        }

        let actors = world.collect_changes();

        // Sessions still handshaking already hold a snapshot, so they need
        // this tick's entity diff too. Their screen starts once admitted.
        let notifications: Vec<(SessionId, StateNotification)> = sessions
            .values_mut()
            .filter_map(|session| {
                let screen = match session.state() {
                    SessionState::Active => session.flush_screen(),
                    SessionState::Handshaking => None,
                    _ => return None,
                };
                StateNotification::build(&actors, screen).map(|n| (session.id().to_string(), n))
            })
            .collect();

        if self.tick % 60 == 0 {
            debug!(
                "Tick {}: {} sessions, {} entities, {} notifications",
                self.tick,
                self.sessions.len(),
                self.world.len(),
                notifications.len()
            );
        }
        notifications
    }

    /// Removes disconnected and failed sessions along with everything they own
    fn teardown_sessions(&mut self) {
        let mut closing: Vec<SessionId> = std::mem::take(&mut self.disconnects);
        let failed: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.state() == SessionState::Draining)
            .map(|session| session.id().to_string())
            .filter(|id| !closing.contains(id))
            .collect();
        closing.extend(failed);

        for session_id in closing {
            let Some(mut session) = self.sessions.remove(&session_id) else {
                continue;
            };
            self.admissions.retain(|id| id != &session_id);

            let entered = matches!(session.state(), SessionState::Active | SessionState::Draining);
            session.begin_draining();
            if entered {
                let (world, registry) = (&mut self.world, &self.registry);
                guarded(&mut session, "exit", |session| session.exit(world, registry));
            }

            let removed = self.world.remove_owned_by(&session_id);
            let timers = self.world.clock_mut().cancel_session(&session_id);
            session.close();
            info!(
                "Session {} closed, removed {} entities and {} timers",
                session_id,
                removed.len(),
                timers
            );
        }
    }

    fn admit_sessions(&mut self) {
        for session_id in std::mem::take(&mut self.admissions) {
            let Some(session) = self.sessions.get_mut(&session_id) else {
                continue;
            };
            if session.state() != SessionState::Handshaking {
                continue;
            }
            session.activate();
            let (world, registry) = (&mut self.world, &self.registry);
            guarded(session, "enter", |session| session.enter(world, registry));
        }
    }

    fn generate_session_id(&self) -> SessionId {
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("{:016x}", rng.gen::<u64>());
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Runs one scene phase, moving the session to draining if it panics
fn guarded(session: &mut Session, phase: &str, f: impl FnOnce(&mut Session)) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *session))) {
        error!(
            "Session {} panicked during {}: {}",
            session.id(),
            phase,
            panic_message(payload.as_ref())
        );
        session.begin_draining();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
