//! The shared simulation every session plays in.
//!
//! The world owns all entities, their collision groups and the clock. It is
//! mutated only from the server tick loop. Once per tick
//! [`World::collect_changes`] turns what happened since the previous call into
//! the single [`ActorsState`] broadcast to every session.

use crate::entity::Entity;
use log::{debug, warn};
use shared::{ActorsState, AttributeMap, EntityId, SessionId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A one-shot timer that came due during [`World::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTimer {
    pub session_id: SessionId,
    pub token: String,
}

#[derive(Debug, Clone)]
struct Timer {
    due: f64,
    seq: u64,
    session_id: SessionId,
    token: String,
}

/// Simulation clock with one-shot timers owned by sessions.
#[derive(Debug, Default)]
pub struct Clock {
    now: f64,
    next_seq: u64,
    timers: Vec<Timer>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds of simulated time since the clock was created.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn schedule(&mut self, session_id: &str, delay: f32, token: impl Into<String>) {
        self.timers.push(Timer {
            due: self.now + f64::from(delay.max(0.0)),
            seq: self.next_seq,
            session_id: session_id.to_string(),
            token: token.into(),
        });
        self.next_seq += 1;
    }

    /// Advances time and returns the timers that came due, earliest first.
    pub fn tick(&mut self, dt: f32) -> Vec<FiredTimer> {
        self.now += f64::from(dt);
        let now = self.now;
        let (mut due, pending): (Vec<Timer>, Vec<Timer>) =
            std::mem::take(&mut self.timers).into_iter().partition(|timer| timer.due <= now);
        self.timers = pending;
        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)));
        due.into_iter()
            .map(|timer| FiredTimer {
                session_id: timer.session_id,
                token: timer.token,
            })
            .collect()
    }

    /// Drops every timer owned by `session_id`.
    pub fn cancel_session(&mut self, session_id: &str) -> usize {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.session_id != session_id);
        before - self.timers.len()
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

pub struct World {
    size: (f32, f32),
    entities: BTreeMap<EntityId, Entity>,
    groups: HashMap<String, BTreeSet<EntityId>>,
    clock: Clock,
    /// Ids present at the previous `collect_changes`.
    announced: BTreeSet<EntityId>,
}

impl World {
    pub fn new(size: (f32, f32)) -> Self {
        Self {
            size,
            entities: BTreeMap::new(),
            groups: HashMap::new(),
            clock: Clock::new(),
            announced: BTreeSet::new(),
        }
    }

    pub fn size(&self) -> (f32, f32) {
        self.size
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn add_entity(&mut self, entity: Entity, group: Option<&str>) {
        let id = entity.id().to_string();
        if let Some(group) = group {
            self.groups.entry(group.to_string()).or_default().insert(id.clone());
        }
        if self.entities.insert(id.clone(), entity).is_some() {
            warn!("Entity {} replaced an existing entity with the same id", id);
        }
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        for members in self.groups.values_mut() {
            members.remove(id);
        }
        Some(entity)
    }

    /// Removes every entity owned by `session_id`, returning their ids.
    pub fn remove_owned_by(&mut self, session_id: &str) -> Vec<EntityId> {
        let owned = self.owned_by(session_id);
        for id in &owned {
            self.remove_entity(id);
        }
        owned
    }

    pub fn owned_by(&self, session_id: &str) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|entity| entity.is_owned_by(session_id))
            .map(|entity| entity.id().to_string())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Members of `group` whose bounds overlap the entity's bounds.
    pub fn collide_group(&self, id: &str, group: &str) -> Vec<EntityId> {
        let (Some(entity), Some(members)) = (self.entities.get(id), self.groups.get(group)) else {
            return Vec::new();
        };
        let bounds = entity.bounds();
        members
            .iter()
            .filter(|member| member.as_str() != id)
            .filter_map(|member| self.entities.get(member))
            .filter(|other| bounds.intersects(&other.bounds()))
            .map(|other| other.id().to_string())
            .collect()
    }

    /// Whether the entity's centre lies within the map.
    pub fn is_inside_bounds(&self, id: &str) -> bool {
        self.entities.get(id).is_some_and(|entity| {
            let (x, y) = entity.position();
            x >= 0.0 && y >= 0.0 && x <= self.size.0 && y <= self.size.1
        })
    }

    /// Advances the shared simulation and returns the timers that fired.
    pub fn step(&mut self, dt: f32) -> Vec<FiredTimer> {
        self.clock.tick(dt)
    }

    /// Full state of every live entity, as sent in a handshake.
    pub fn snapshot(&self) -> BTreeMap<EntityId, AttributeMap> {
        self.entities
            .iter()
            .map(|(id, entity)| (id.clone(), entity.full_state()))
            .collect()
    }

    /// Entities added, removed and modified since the previous call.
    pub fn collect_changes(&mut self) -> ActorsState {
        let mut actors = ActorsState::default();

        for (id, entity) in &mut self.entities {
            if !self.announced.contains(id) {
                actors.added.insert(id.clone(), entity.added_record());
            }
            let changes = entity.take_changes();
            if !changes.is_empty() {
                actors.modified.insert(id.clone(), changes);
            }
        }
        actors.removed = self
            .announced
            .iter()
            .filter(|id| !self.entities.contains_key(*id))
            .cloned()
            .collect();

        self.announced = self.entities.keys().cloned().collect();
        if !actors.is_empty() {
            debug!(
                "World diff: {} added, {} removed, {} modified",
                actors.added.len(),
                actors.removed.len(),
                actors.modified.len()
            );
        }
        actors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityTemplate;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;

    fn spawn(world: &mut World, id: &str, session: &str, position: (f32, f32), group: Option<&str>) {
        let template = EntityTemplate::new("ball", (10.0, 10.0));
        let mut entity = Entity::new(id.to_string(), "ball", &template, position);
        entity.attach(session, false);
        world.add_entity(entity, group);
    }

    #[test]
    fn test_clock_fires_in_due_order() {
        let mut clock = Clock::new();
        clock.schedule("s1", 0.2, "late");
        clock.schedule("s1", 0.1, "early");
        clock.schedule("s2", 1.0, "later");

        assert!(clock.tick(0.05).is_empty());
        let fired: Vec<String> = clock.tick(0.2).into_iter().map(|timer| timer.token).collect();
        assert_eq!(fired, vec!["early", "late"]);
        assert_approx_eq!(clock.now(), 0.25, 1e-6);
        assert_eq!(clock.pending(), 1);
        assert_eq!(clock.cancel_session("s2"), 1);
    }

    #[test]
    fn test_collect_changes_lifecycle() {
        let mut world = World::new((800.0, 600.0));
        spawn(&mut world, "s1:ball:0", "s1", (0.0, 0.0), None);

        let first = world.collect_changes();
        assert!(first.added.contains_key("s1:ball:0"));
        assert_eq!(first.modified["s1:ball:0"]["position"], json!([0.0, 0.0]));

        assert!(world.collect_changes().is_empty());

        world.get_mut("s1:ball:0").unwrap().set_position((5.0, 5.0));
        let moved = world.collect_changes();
        assert!(moved.added.is_empty());
        assert_eq!(moved.modified["s1:ball:0"].len(), 1);

        world.remove_entity("s1:ball:0");
        let removed = world.collect_changes();
        assert_eq!(removed.removed, vec!["s1:ball:0".to_string()]);
        assert!(removed.modified.is_empty());
    }

    #[test]
    fn test_added_and_removed_within_one_tick_is_silent() {
        let mut world = World::new((800.0, 600.0));
        spawn(&mut world, "s1:ball:0", "s1", (0.0, 0.0), None);
        world.remove_entity("s1:ball:0");
        assert!(world.collect_changes().is_empty());
    }

    #[test]
    fn test_collide_group() {
        let mut world = World::new((800.0, 600.0));
        spawn(&mut world, "s1:ship:0", "s1", (100.0, 100.0), None);
        spawn(&mut world, "s2:ball:0", "s2", (105.0, 105.0), Some("cannon_balls"));
        spawn(&mut world, "s2:ball:1", "s2", (300.0, 300.0), Some("cannon_balls"));

        assert_eq!(world.collide_group("s1:ship:0", "cannon_balls"), vec!["s2:ball:0".to_string()]);
        assert!(world.collide_group("s1:ship:0", "reefs").is_empty());

        world.remove_entity("s2:ball:0");
        assert!(world.collide_group("s1:ship:0", "cannon_balls").is_empty());
    }

    #[test]
    fn test_remove_owned_by() {
        let mut world = World::new((800.0, 600.0));
        spawn(&mut world, "s1:ball:0", "s1", (0.0, 0.0), None);
        spawn(&mut world, "s1:ball:1", "s1", (0.0, 0.0), None);
        spawn(&mut world, "s2:ball:0", "s2", (0.0, 0.0), None);

        assert_eq!(world.remove_owned_by("s1").len(), 2);
        assert!(world.owned_by("s1").is_empty());
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn test_is_inside_bounds() {
        let mut world = World::new((100.0, 100.0));
        spawn(&mut world, "in", "s1", (50.0, 50.0), None);
        spawn(&mut world, "out", "s1", (150.0, 50.0), None);

        assert!(world.is_inside_bounds("in"));
        assert!(!world.is_inside_bounds("out"));
        assert!(!world.is_inside_bounds("missing"));
    }
}
