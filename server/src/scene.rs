//! Per-session game logic.
//!
//! Every session runs its own [`Scene`]. Scenes never touch the network: they
//! react to input and timers through callbacks, mutate the shared world via a
//! [`SessionContext`], and draw into the session's screen recorder.

use crate::entity::{Entity, EntityTemplate};
use crate::keyboard::Keyboard;
use crate::world::World;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use shared::{EntityId, InputEvent, RemoteScreenRecorder, ReplicationError, SceneEvent};
use std::collections::HashMap;

pub type SceneError = Box<dyn std::error::Error + Send + Sync>;
pub type SceneResult = Result<(), SceneError>;

/// Builds the scene for a newly connected session.
pub type SceneFactory = Box<dyn Fn() -> Box<dyn Scene> + Send + Sync>;

type TemplateFn = Box<dyn Fn() -> EntityTemplate + Send + Sync>;

/// Entity kinds a scene may create, keyed by kind name.
#[derive(Default)]
pub struct EntityRegistry {
    kinds: HashMap<String, TemplateFn>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, template: F)
    where
        F: Fn() -> EntityTemplate + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.kinds.insert(kind.clone(), Box::new(template)).is_some() {
            debug!("Replaced entity kind {}", kind);
        }
    }

    pub fn template(&self, kind: &str) -> shared::Result<EntityTemplate> {
        self.kinds
            .get(kind)
            .map(|build| build())
            .ok_or_else(|| ReplicationError::UnknownEntityKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }
}

/// Everything a scene callback may use, scoped to one session.
pub struct SessionContext<'a> {
    pub(crate) session_id: &'a str,
    pub(crate) world: &'a mut World,
    pub(crate) registry: &'a EntityRegistry,
    pub(crate) keyboard: &'a Keyboard,
    pub(crate) client_data: &'a Map<String, Value>,
    pub(crate) resolution: (u32, u32),
    pub(crate) focus: &'a mut Option<EntityId>,
    pub(crate) next_seq: &'a mut u64,
}

impl<'a> SessionContext<'a> {
    pub fn session_id(&self) -> &str {
        self.session_id
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn keyboard(&self) -> &Keyboard {
        self.keyboard
    }

    /// Metadata the client sent in its handshake.
    pub fn client_data(&self) -> &Map<String, Value> {
        self.client_data
    }

    pub fn client_str(&self, key: &str) -> Option<&str> {
        self.client_data.get(key).and_then(Value::as_str)
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn now(&self) -> f64 {
        self.world.clock().now()
    }

    /// Creates an entity of a registered kind owned by this session and adds
    /// it to the shared world. It is announced to every client with the next
    /// state notification.
    pub fn create_entity(&mut self, kind: &str, position: (f32, f32)) -> shared::Result<EntityId> {
        self.spawn(kind, position, false)
    }

    /// Like [`SessionContext::create_entity`] but marks the entity as the
    /// one the client's camera follows. A session has at most one.
    pub fn create_focus_entity(&mut self, kind: &str, position: (f32, f32)) -> shared::Result<EntityId> {
        let is_focus = match self.focus.as_deref() {
            Some(existing) if self.world.contains(existing) => {
                warn!(
                    "Session {} already has focus entity {}, creating {} without focus",
                    self.session_id, existing, kind
                );
                false
            }
            _ => true,
        };
        let id = self.spawn(kind, position, is_focus)?;
        if is_focus {
            *self.focus = Some(id.clone());
        }
        Ok(id)
    }

    fn spawn(&mut self, kind: &str, position: (f32, f32), is_focus: bool) -> shared::Result<EntityId> {
        let template = self.registry.template(kind)?;
        let id = format!("{}:{}:{}", self.session_id, kind, self.next_seq);
        *self.next_seq += 1;

        let mut entity = Entity::new(id.clone(), kind, &template, position);
        entity.attach(self.session_id, is_focus);
        self.world.add_entity(entity, template.group.as_deref());
        debug!("Session {} created {}", self.session_id, id);
        Ok(id)
    }

    /// Removes an entity owned by this session.
    pub fn remove_entity(&mut self, id: &str) -> bool {
        if !self.owns(id) {
            warn!("Session {} cannot remove {}: not its entity", self.session_id, id);
            return false;
        }
        if self.focus.as_deref() == Some(id) {
            *self.focus = None;
        }
        self.world.remove_entity(id).is_some()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.world.get(id)
    }

    /// Mutable access, limited to entities this session owns.
    pub fn entity_mut(&mut self, id: &str) -> Option<&mut Entity> {
        let session_id = self.session_id;
        self.world
            .get_mut(id)
            .filter(|entity| entity.is_owned_by(session_id))
    }

    pub fn owns(&self, id: &str) -> bool {
        self.world
            .get(id)
            .is_some_and(|entity| entity.is_owned_by(self.session_id))
    }

    pub fn collide_group(&self, id: &str, group: &str) -> Vec<EntityId> {
        self.world.collide_group(id, group)
    }

    pub fn is_inside_bounds(&self, id: &str) -> bool {
        self.world.is_inside_bounds(id)
    }

    /// Schedules `on_timer(token)` on this session's scene after `delay` seconds.
    pub fn schedule(&mut self, delay: f32, token: impl Into<String>) {
        self.world.clock_mut().schedule(self.session_id, delay, token);
    }
}

/// Game logic for one session. Every callback has a no-op default.
#[allow(unused_variables)]
pub trait Scene: Send {
    fn on_enter(&mut self, ctx: &mut SessionContext<'_>) -> SceneResult {
        Ok(())
    }

    fn on_exit(&mut self, ctx: &mut SessionContext<'_>) -> SceneResult {
        Ok(())
    }

    fn on_mouse_move(
        &mut self,
        ctx: &mut SessionContext<'_>,
        pos: (f32, f32),
        rel: (f32, f32),
        buttons: &[u8],
    ) -> SceneResult {
        Ok(())
    }

    fn on_mouse_down(&mut self, ctx: &mut SessionContext<'_>, pos: (f32, f32), button: u8) -> SceneResult {
        Ok(())
    }

    fn on_mouse_up(&mut self, ctx: &mut SessionContext<'_>, pos: (f32, f32), button: u8) -> SceneResult {
        Ok(())
    }

    fn on_key_down(&mut self, ctx: &mut SessionContext<'_>, key: i32) -> SceneResult {
        Ok(())
    }

    fn on_key_up(&mut self, ctx: &mut SessionContext<'_>, key: i32) -> SceneResult {
        Ok(())
    }

    fn on_resize(&mut self, ctx: &mut SessionContext<'_>, size: (u32, u32)) -> SceneResult {
        Ok(())
    }

    /// Fallback for event types without a dedicated callback.
    fn handle_event(&mut self, ctx: &mut SessionContext<'_>, event: &InputEvent) -> SceneResult {
        Ok(())
    }

    fn on_timer(&mut self, ctx: &mut SessionContext<'_>, token: &str) -> SceneResult {
        Ok(())
    }

    fn update(&mut self, ctx: &mut SessionContext<'_>, dt: f32) -> SceneResult {
        Ok(())
    }

    fn draw(&mut self, ctx: &mut SessionContext<'_>, screen: &mut RemoteScreenRecorder) -> SceneResult {
        Ok(())
    }

    fn dispatch_event(&mut self, ctx: &mut SessionContext<'_>, event: &SceneEvent) -> SceneResult {
        match event {
            SceneEvent::MouseMove { pos, rel, buttons } => self.on_mouse_move(ctx, *pos, *rel, buttons),
            SceneEvent::MouseDown { pos, button } => self.on_mouse_down(ctx, *pos, *button),
            SceneEvent::MouseUp { pos, button } => self.on_mouse_up(ctx, *pos, *button),
            SceneEvent::KeyDown { key } => self.on_key_down(ctx, *key),
            SceneEvent::KeyUp { key } => self.on_key_up(ctx, *key),
            SceneEvent::Resize { size } => {
                info!("Session {} resized to {}x{}", ctx.session_id(), size.0, size.1);
                self.on_resize(ctx, *size)
            }
            SceneEvent::Other(raw) => self.handle_event(ctx, raw),
        }
    }
}

/// A scene that does nothing. Useful for servers that only relay entities.
#[derive(Debug, Default)]
pub struct EmptyScene;

impl Scene for EmptyScene {}
