//! Replicated entities.
//!
//! An [`Entity`] is plain simulation state. It becomes replicated once it is
//! attached to a session, which gives it a [`Replication`] component: the
//! owning session id plus a [`DiffTracker`] that records writes made through
//! the entity's setters.

use log::warn;
use serde_json::Value;
use shared::diff::to_wire;
use shared::screen::Rect;
use shared::{
    serialize_full_state, AddedEntity, AttributeMap, DiffTracker, EntityId, SessionId,
    TrackedAttributes, WireValue,
};
use std::collections::BTreeMap;

pub const POSITION: &str = "position";
pub const ANGLE: &str = "angle";
pub const VISUAL: &str = "visual";

/// Blueprint an entity kind is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTemplate {
    pub visual: String,
    pub size: (f32, f32),
    /// Collision group the entity joins when added to the world.
    pub group: Option<String>,
    /// Kind-specific tracked fields with their initial values.
    pub fields: Vec<(String, Value)>,
}

impl EntityTemplate {
    pub fn new(visual: impl Into<String>, size: (f32, f32)) -> Self {
        Self {
            visual: visual.into(),
            size,
            group: None,
            fields: Vec::new(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Replication {
    pub session_id: SessionId,
    pub tracker: DiffTracker,
}

#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    kind: String,
    visual: String,
    position: (f32, f32),
    angle: f32,
    size: (f32, f32),
    is_focus: bool,
    fields: BTreeMap<String, Value>,
    replication: Option<Replication>,
}

impl Entity {
    pub fn new(id: EntityId, kind: impl Into<String>, template: &EntityTemplate, position: (f32, f32)) -> Self {
        Self {
            id,
            kind: kind.into(),
            visual: template.visual.clone(),
            position,
            angle: 0.0,
            size: template.size,
            is_focus: false,
            fields: template.fields.iter().cloned().collect(),
            replication: None,
        }
    }

    /// Attaches the replication component. The owner is fixed from then on;
    /// every tracked attribute starts out pending so peers receive the
    /// initial state with the first diff.
    pub fn attach(&mut self, session_id: &str, is_focus: bool) -> bool {
        if let Some(replication) = &self.replication {
            warn!(
                "Entity {} already owned by session {}, ignoring attach",
                self.id, replication.session_id
            );
            return false;
        }
        self.is_focus = is_focus;
        let mut tracker = DiffTracker::new();
        tracker.seed(serialize_full_state(self));
        self.replication = Some(Replication {
            session_id: session_id.to_string(),
            tracker,
        });
        true
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn visual(&self) -> &str {
        &self.visual
    }

    pub fn position(&self) -> (f32, f32) {
        self.position
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn size(&self) -> (f32, f32) {
        self.size
    }

    pub fn is_focus(&self) -> bool {
        self.is_focus
    }

    /// Owning session, empty when the entity is not session scoped.
    pub fn session_id(&self) -> &str {
        self.replication
            .as_ref()
            .map(|replication| replication.session_id.as_str())
            .unwrap_or("")
    }

    pub fn is_owned_by(&self, session_id: &str) -> bool {
        self.replication
            .as_ref()
            .is_some_and(|replication| replication.session_id == session_id)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_center(self.position, self.size)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn set_position(&mut self, position: (f32, f32)) -> bool {
        track(&mut self.replication, POSITION, &mut self.position, position)
    }

    pub fn set_angle(&mut self, angle: f32) -> bool {
        track(&mut self.replication, ANGLE, &mut self.angle, angle)
    }

    pub fn set_visual(&mut self, visual: impl Into<String>) -> bool {
        track(&mut self.replication, VISUAL, &mut self.visual, visual.into())
    }

    /// Sets a kind-specific field. Fields are fixed by the template, so
    /// writes to undeclared names are rejected.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        match self.fields.get_mut(name) {
            Some(slot) => track(&mut self.replication, name, slot, value),
            None => {
                warn!("Entity {} ({}) has no field {}", self.id, self.kind, name);
                false
            }
        }
    }

    pub fn move_by(&mut self, dx: f32, dy: f32) -> bool {
        self.set_position((self.position.0 + dx, self.position.1 + dy))
    }

    /// Moves up to `distance` towards `target`. Returns true once the target is reached.
    pub fn move_towards(&mut self, target: (f32, f32), distance: f32) -> bool {
        let dx = target.0 - self.position.0;
        let dy = target.1 - self.position.1;
        let remaining = (dx * dx + dy * dy).sqrt();
        if remaining <= distance {
            self.set_position(target);
            return true;
        }
        let scale = distance / remaining;
        self.move_by(dx * scale, dy * scale);
        false
    }

    /// Angle in degrees from this entity to `point`, counter-clockwise with y pointing down.
    pub fn angle_to(&self, point: (f32, f32)) -> f32 {
        let dx = point.0 - self.position.0;
        let dy = self.position.1 - point.1;
        dy.atan2(dx).to_degrees()
    }

    /// Changes recorded since the previous call.
    pub fn take_changes(&mut self) -> AttributeMap {
        self.replication
            .as_mut()
            .map(|replication| replication.tracker.flush())
            .unwrap_or_default()
    }

    /// Every tracked attribute plus owner and focus flag.
    pub fn full_state(&self) -> AttributeMap {
        let mut state = serialize_full_state(self);
        state.insert("session_id".to_string(), Value::from(self.session_id()));
        state.insert("is_focus".to_string(), Value::from(self.is_focus));
        state
    }

    pub fn added_record(&self) -> AddedEntity {
        AddedEntity {
            visual: self.visual.clone(),
            session_id: self.session_id().to_string(),
            is_focus: self.is_focus,
        }
    }
}

impl TrackedAttributes for Entity {
    fn tracked_attributes(&self) -> Vec<(String, shared::Result<Value>)> {
        let mut attributes = vec![
            (POSITION.to_string(), to_wire(POSITION, &self.position)),
            (ANGLE.to_string(), to_wire(ANGLE, &self.angle)),
            (VISUAL.to_string(), to_wire(VISUAL, &self.visual)),
        ];
        for (name, value) in &self.fields {
            attributes.push((name.clone(), to_wire(name, value)));
        }
        attributes
    }
}

fn track<T: WireValue>(replication: &mut Option<Replication>, attribute: &str, slot: &mut T, value: T) -> bool {
    match replication {
        Some(replication) => replication.tracker.write(attribute, slot, value),
        None if *slot != value => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;

    fn ship() -> Entity {
        let template = EntityTemplate::new("ship (1)", (66.0, 113.0)).with_field("health", json!(100));
        Entity::new("s1:ship:0".to_string(), "ship", &template, (0.0, 0.0))
    }

    #[test]
    fn test_detached_entity_records_nothing() {
        let mut entity = ship();
        assert!(entity.set_position((1.0, 1.0)));
        assert!(entity.take_changes().is_empty());
        assert_eq!(entity.session_id(), "");
    }

    #[test]
    fn test_attach_seeds_full_state() {
        let mut entity = ship();
        assert!(entity.attach("s1", true));

        let changes = entity.take_changes();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes["position"], json!([0.0, 0.0]));
        assert_eq!(changes["visual"], json!("ship (1)"));
        assert_eq!(changes["health"], json!(100));
        assert!(entity.take_changes().is_empty());
    }

    #[test]
    fn test_owner_is_set_once() {
        let mut entity = ship();
        assert!(entity.attach("s1", true));
        assert!(!entity.attach("s2", false));
        assert!(entity.is_owned_by("s1"));
        assert!(entity.is_focus());
    }

    #[test]
    fn test_setters_record_only_changes() {
        let mut entity = ship();
        entity.attach("s1", false);
        entity.take_changes();

        entity.set_position((5.0, 5.0));
        entity.set_angle(0.0);
        entity.set_field("health", json!(90));
        assert!(!entity.set_field("mana", json!(1)));

        let changes = entity.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["position"], json!([5.0, 5.0]));
        assert_eq!(changes["health"], json!(90));
    }

    #[test]
    fn test_full_state_includes_owner() {
        let mut entity = ship();
        entity.attach("s1", true);
        let state = entity.full_state();

        assert_eq!(state["session_id"], json!("s1"));
        assert_eq!(state["is_focus"], json!(true));
        assert_eq!(state["angle"], json!(0.0));
    }

    #[test]
    fn test_move_towards_stops_at_target() {
        let mut entity = ship();
        assert!(!entity.move_towards((10.0, 0.0), 4.0));
        assert_eq!(entity.position(), (4.0, 0.0));
        assert!(entity.move_towards((10.0, 0.0), 8.0));
        assert_eq!(entity.position(), (10.0, 0.0));
    }

    #[test]
    fn test_angle_to() {
        let entity = ship();
        assert_approx_eq!(entity.angle_to((0.0, -10.0)), 90.0, 1e-4);
        assert_approx_eq!(entity.angle_to((10.0, 0.0)), 0.0, 1e-4);
        assert_approx_eq!(entity.angle_to((-10.0, 0.0)).abs(), 180.0, 1e-4);
    }
}
