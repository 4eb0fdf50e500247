//! Server-side state for one connected client.

use crate::keyboard::Keyboard;
use crate::scene::{EntityRegistry, Scene, SceneResult, SessionContext};
use crate::world::World;
use log::{info, warn};
use serde_json::{Map, Value};
use shared::{EntityId, HandshakeRequest, InputEvent, Instruction, RemoteScreenRecorder, SceneEvent, SessionId};
use std::collections::VecDeque;

/// `Created -> Handshaking -> Active -> Draining -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Handshaking,
    Active,
    Draining,
    Closed,
}

pub struct Session {
    id: SessionId,
    state: SessionState,
    scene: Box<dyn Scene>,
    events: VecDeque<InputEvent>,
    recorder: RemoteScreenRecorder,
    keyboard: Keyboard,
    client_data: Map<String, Value>,
    focus: Option<EntityId>,
    next_seq: u64,
}

impl Session {
    pub fn new(id: SessionId, scene: Box<dyn Scene>) -> Self {
        Self {
            id,
            state: SessionState::Created,
            scene,
            events: VecDeque::new(),
            recorder: RemoteScreenRecorder::new((0, 0)),
            keyboard: Keyboard::new(),
            client_data: Map::new(),
            focus: None,
            next_seq: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn client_data(&self) -> &Map<String, Value> {
        &self.client_data
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.recorder.resolution()
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    /// Applies the client's handshake request.
    pub fn begin_handshake(&mut self, request: HandshakeRequest) {
        self.recorder = RemoteScreenRecorder::new(request.resolution);
        self.client_data = request.client_data;
        self.transition(SessionState::Handshaking);
    }

    pub fn screen_baseline(&self) -> Vec<Instruction> {
        self.recorder.baseline()
    }

    pub fn activate(&mut self) {
        self.transition(SessionState::Active);
    }

    pub fn begin_draining(&mut self) {
        if self.state != SessionState::Closed {
            self.transition(SessionState::Draining);
        }
    }

    pub fn close(&mut self) {
        self.events.clear();
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!("Session {}: {:?} -> {:?}", self.id, self.state, next);
            self.state = next;
        }
    }

    /// Queues client input for the next tick. Never blocks.
    pub fn enqueue_event(&mut self, event: InputEvent) {
        if self.state == SessionState::Closed {
            return;
        }
        self.events.push_back(event);
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    /// Runs `f` against the scene with a context bound to this session.
    fn with_scene<R>(
        &mut self,
        world: &mut World,
        registry: &EntityRegistry,
        f: impl FnOnce(&mut dyn Scene, &mut SessionContext<'_>, &mut RemoteScreenRecorder) -> R,
    ) -> R {
        let mut ctx = SessionContext {
            session_id: &self.id,
            world,
            registry,
            keyboard: &self.keyboard,
            client_data: &self.client_data,
            resolution: self.recorder.resolution(),
            focus: &mut self.focus,
            next_seq: &mut self.next_seq,
        };
        f(self.scene.as_mut(), &mut ctx, &mut self.recorder)
    }

    pub fn enter(&mut self, world: &mut World, registry: &EntityRegistry) {
        let outcome = self.with_scene(world, registry, |scene, ctx, _| scene.on_enter(ctx));
        self.log_outcome("on_enter", outcome);
    }

    pub fn exit(&mut self, world: &mut World, registry: &EntityRegistry) {
        let outcome = self.with_scene(world, registry, |scene, ctx, _| scene.on_exit(ctx));
        self.log_outcome("on_exit", outcome);
    }

    /// Drains the inbound queue in arrival order, dispatching each event
    /// into the scene. Undecodable events are logged and skipped.
    pub fn process_events(&mut self, world: &mut World, registry: &EntityRegistry) -> usize {
        let mut handled = 0;
        while let Some(raw) = self.events.pop_front() {
            let event = match SceneEvent::from_input(&raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Session {} dropped event {}: {}", self.id, raw.event_type, e);
                    continue;
                }
            };
            match &event {
                SceneEvent::KeyDown { key } => self.keyboard.press(*key),
                SceneEvent::KeyUp { key } => self.keyboard.release(*key),
                SceneEvent::Resize { size } => self.recorder.set_resolution(*size),
                _ => {}
            }
            let outcome = self.with_scene(world, registry, |scene, ctx, _| scene.dispatch_event(ctx, &event));
            self.log_outcome("event", outcome);
            handled += 1;
        }
        handled
    }

    pub fn fire_timer(&mut self, world: &mut World, registry: &EntityRegistry, token: &str) {
        let outcome = self.with_scene(world, registry, |scene, ctx, _| scene.on_timer(ctx, token));
        self.log_outcome("on_timer", outcome);
    }

    pub fn update(&mut self, world: &mut World, registry: &EntityRegistry, dt: f32) {
        let outcome = self.with_scene(world, registry, |scene, ctx, _| scene.update(ctx, dt));
        self.log_outcome("update", outcome);
    }

    pub fn draw(&mut self, world: &mut World, registry: &EntityRegistry) {
        let outcome = self.with_scene(world, registry, |scene, ctx, screen| scene.draw(ctx, screen));
        self.log_outcome("draw", outcome);
    }

    /// Ends the frame; `Some` when the recorded screen changed.
    pub fn flush_screen(&mut self) -> Option<Vec<Instruction>> {
        self.recorder.flush()
    }

    fn log_outcome(&self, phase: &str, outcome: SceneResult) {
        if let Err(e) = outcome {
            warn!("Session {} {} failed: {}", self.id, phase, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::EmptyScene;
    use serde_json::json;
    use shared::protocol::{keys, KEY_DOWN, VIDEO_RESIZE};

    fn handshaking() -> Session {
        let mut session = Session::new("abc".to_string(), Box::new(EmptyScene));
        session.begin_handshake(HandshakeRequest {
            resolution: (640, 480),
            client_data: Map::new(),
        });
        session
    }

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new("abc".to_string(), Box::new(EmptyScene));
        assert_eq!(session.state(), SessionState::Created);

        session.begin_handshake(HandshakeRequest {
            resolution: (640, 480),
            client_data: Map::new(),
        });
        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(session.resolution(), (640, 480));

        session.activate();
        assert!(session.is_active());
        session.begin_draining();
        session.close();
        session.begin_draining();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_events_drained_and_keyboard_tracked() {
        let mut session = handshaking();
        session.activate();
        let mut world = World::new((100.0, 100.0));
        let registry = EntityRegistry::new();

        let mut attributes = Map::new();
        attributes.insert("key".to_string(), Value::from(keys::UP));
        session.enqueue_event(InputEvent {
            event_type: KEY_DOWN,
            attributes,
        });
        session.enqueue_event(InputEvent {
            event_type: KEY_DOWN,
            attributes: Map::new(),
        });

        assert_eq!(session.process_events(&mut world, &registry), 1);
        assert_eq!(session.queued_events(), 0);
        assert!(session.keyboard.is_pressed(keys::UP));
    }

    #[test]
    fn test_resize_updates_resolution() {
        let mut session = handshaking();
        session.activate();
        let mut world = World::new((100.0, 100.0));
        let registry = EntityRegistry::new();

        let mut attributes = Map::new();
        attributes.insert("size".to_string(), json!([800, 600]));
        session.enqueue_event(InputEvent {
            event_type: VIDEO_RESIZE,
            attributes,
        });

        assert_eq!(session.process_events(&mut world, &registry), 1);
        assert_eq!(session.resolution(), (800, 600));
        assert_eq!(session.recorder.bounds().w, 800.0);
    }

    #[test]
    fn test_closed_session_ignores_events() {
        let mut session = handshaking();
        session.close();
        session.enqueue_event(InputEvent {
            event_type: 1,
            attributes: Map::new(),
        });
        assert_eq!(session.queued_events(), 0);
    }
}
