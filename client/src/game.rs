//! Local shadow copies of server entities

use log::{debug, warn};
use serde_json::Value;
use shared::{
    AddedEntity, AttributeMap, DrawSurface, EntityId, HandshakeResponse, Instruction,
    RemoteScreenPlayer, SessionId, StateNotification,
};
use std::collections::BTreeMap;

/// Client-side mirror of one replicated entity
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowEntity {
    pub id: EntityId,
    pub visual: String,
    pub session_id: SessionId,
    pub is_focus: bool,
    pub position: (f32, f32),
    pub angle: f32,
    /// Kind-specific attributes such as health.
    pub attributes: AttributeMap,
}

impl ShadowEntity {
    /// Focus is only honoured for entities owned by `own_session`.
    pub fn new(id: EntityId, added: &AddedEntity, own_session: &str) -> Self {
        Self {
            id,
            visual: added.visual.clone(),
            session_id: added.session_id.clone(),
            is_focus: added.is_focus && added.session_id == own_session,
            position: (0.0, 0.0),
            angle: 0.0,
            attributes: AttributeMap::new(),
        }
    }

    /// Rebuilds an entity from a full handshake snapshot.
    pub fn from_state(id: EntityId, state: &AttributeMap, own_session: &str) -> Self {
        let added = AddedEntity {
            visual: state.get("visual").and_then(Value::as_str).unwrap_or_default().to_string(),
            session_id: state
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_focus: state.get("is_focus").and_then(Value::as_bool).unwrap_or(false),
        };
        let mut entity = Self::new(id, &added, own_session);
        entity.apply(state);
        entity
    }

    /// Applies a partial attribute update.
    pub fn apply(&mut self, changes: &AttributeMap) {
        for (name, value) in changes {
            let applied = match name.as_str() {
                "position" => decode(value).map(|position| self.position = position),
                "angle" => decode(value).map(|angle| self.angle = angle),
                "visual" => decode(value).map(|visual| self.visual = visual),
                // Ownership and focus are fixed when the entity is added.
                "session_id" | "is_focus" => Ok(()),
                _ => {
                    self.attributes.insert(name.clone(), value.clone());
                    Ok(())
                }
            };
            if let Err(e) = applied {
                warn!("Entity {} attribute {} ignored: {}", self.id, name, e);
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> serde_json::Result<T> {
    T::deserialize(value)
}

/// What the client knows about the shared world
pub struct ShadowScene {
    session_id: SessionId,
    entities: BTreeMap<EntityId, ShadowEntity>,
    screen: RemoteScreenPlayer,
}

impl ShadowScene {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            entities: BTreeMap::new(),
            screen: RemoteScreenPlayer::new(),
        }
    }

    pub fn from_handshake(response: &HandshakeResponse) -> Self {
        let mut scene = Self::new(response.session_id.clone());
        for (id, state) in &response.full_entity_states {
            let entity = ShadowEntity::from_state(id.clone(), state, &scene.session_id);
            scene.entities.insert(id.clone(), entity);
        }
        scene.screen.set_instructions(response.screen_baseline.clone());
        scene
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Applies one notification: additions, then updates, then removals,
    /// then the screen replacement if one was sent.
    pub fn apply(&mut self, notification: StateNotification) {
        let StateNotification { actors, screen, .. } = notification;

        for (id, added) in &actors.added {
            if self.entities.contains_key(id) {
                debug!("Entity {} already known, keeping its state", id);
                continue;
            }
            let entity = ShadowEntity::new(id.clone(), added, &self.session_id);
            self.entities.insert(id.clone(), entity);
        }

        for (id, changes) in &actors.modified {
            match self.entities.get_mut(id) {
                Some(entity) => entity.apply(changes),
                None => warn!("Update for unknown entity {}", id),
            }
        }

        for id in &actors.removed {
            if self.entities.remove(id).is_none() {
                debug!("Removal of unknown entity {}", id);
            }
        }

        if let Some(instructions) = screen {
            self.screen.set_instructions(instructions);
        }
    }

    pub fn get(&self, id: &str) -> Option<&ShadowEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ShadowEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity the camera follows, if this client has one.
    pub fn focus(&self) -> Option<&ShadowEntity> {
        self.entities.values().find(|entity| entity.is_focus)
    }

    pub fn screen_instructions(&self) -> &[Instruction] {
        self.screen.instructions()
    }

    /// Replays the latest screen instructions onto `surface`.
    pub fn draw(&self, surface: &mut (dyn DrawSurface + 'static)) -> usize {
        self.screen.replay(surface)
    }
}
