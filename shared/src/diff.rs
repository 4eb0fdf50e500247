//! Per-entity change tracking.
//!
//! Tracked attributes are written through [`DiffTracker::write`], which only
//! records values that actually changed. Pending changes are compared against
//! the values sent at the previous flush, so an attribute that is changed and
//! then restored within one interval is not re-sent.

use crate::error::{ReplicationError, Result};
use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute name to wire value. Ordered so notifications serialize deterministically.
pub type AttributeMap = BTreeMap<String, Value>;

/// A value that can be stored in a tracked attribute.
pub trait WireValue: Serialize + PartialEq + Clone {
    /// Whether the value survives a round trip through the wire format.
    fn is_representable(&self) -> bool {
        true
    }
}

impl WireValue for f32 {
    fn is_representable(&self) -> bool {
        self.is_finite()
    }
}

impl WireValue for f64 {
    fn is_representable(&self) -> bool {
        self.is_finite()
    }
}

impl WireValue for (f32, f32) {
    fn is_representable(&self) -> bool {
        self.0.is_finite() && self.1.is_finite()
    }
}

impl WireValue for i32 {}
impl WireValue for i64 {}
impl WireValue for u32 {}
impl WireValue for u64 {}
impl WireValue for bool {}
impl WireValue for String {}
impl WireValue for Value {}

impl<T: WireValue> WireValue for Option<T> {
    fn is_representable(&self) -> bool {
        self.as_ref().map_or(true, |value| value.is_representable())
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn is_representable(&self) -> bool {
        self.iter().all(|value| value.is_representable())
    }
}

/// Converts a tracked value to its wire form.
pub fn to_wire<T: WireValue>(attribute: &str, value: &T) -> Result<Value> {
    if !value.is_representable() {
        return Err(ReplicationError::SerializationSkipped {
            attribute: attribute.to_string(),
            reason: "value has no wire representation".to_string(),
        });
    }
    serde_json::to_value(value).map_err(|e| ReplicationError::SerializationSkipped {
        attribute: attribute.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct DiffTracker {
    accumulate: bool,
    pending: AttributeMap,
    /// Wire values as of the last flush.
    flushed: AttributeMap,
}

impl DiffTracker {
    /// Creates a tracker in accumulate mode.
    pub fn new() -> Self {
        Self {
            accumulate: true,
            pending: AttributeMap::new(),
            flushed: AttributeMap::new(),
        }
    }

    /// Creates a tracker whose writes are not recorded until accumulation is switched on.
    pub fn paused() -> Self {
        Self {
            accumulate: false,
            ..Self::new()
        }
    }

    pub fn set_accumulate(&mut self, accumulate: bool) {
        self.accumulate = accumulate;
    }

    pub fn is_accumulating(&self) -> bool {
        self.accumulate
    }

    /// Marks every attribute in `state` as changed. Used when an entity is
    /// first attached so its initial values reach peers.
    pub fn seed(&mut self, state: AttributeMap) {
        self.pending.extend(state);
    }

    /// Stores `value` into `slot`, recording it when it differs from the
    /// current value. Returns whether the slot changed.
    pub fn write<T: WireValue>(&mut self, attribute: &str, slot: &mut T, value: T) -> bool {
        if *slot == value {
            return false;
        }
        *slot = value;
        if self.accumulate {
            self.record(attribute, slot);
        }
        true
    }

    /// Records the current value of an attribute that was mutated in place.
    pub fn record<T: WireValue>(&mut self, attribute: &str, value: &T) {
        match to_wire(attribute, value) {
            Ok(wire) => {
                if self.flushed.get(attribute) == Some(&wire) {
                    self.pending.remove(attribute);
                } else {
                    self.pending.insert(attribute.to_string(), wire);
                }
            }
            Err(e) => {
                warn!("{}", e);
                self.pending.remove(attribute);
            }
        }
    }

    /// Returns the pending changes and clears them.
    pub fn flush(&mut self) -> AttributeMap {
        let changes = std::mem::take(&mut self.pending);
        for (attribute, value) in &changes {
            self.flushed.insert(attribute.clone(), value.clone());
        }
        changes
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &AttributeMap {
        &self.pending
    }
}

impl Default for DiffTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by types with a fixed set of tracked attributes.
pub trait TrackedAttributes {
    /// Every tracked attribute with its current value in wire form.
    fn tracked_attributes(&self) -> Vec<(String, Result<Value>)>;
}

/// Full snapshot of an entity's tracked attributes. Values that cannot be
/// represented are logged and omitted; the rest of the snapshot is kept.
pub fn serialize_full_state<E: TrackedAttributes + ?Sized>(entity: &E) -> AttributeMap {
    entity
        .tracked_attributes()
        .into_iter()
        .filter_map(|(name, value)| match value {
            Ok(value) => Some((name, value)),
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Hull {
        tracker: DiffTracker,
        position: (f32, f32),
        angle: f32,
        visual: String,
    }

    impl Hull {
        fn new() -> Self {
            Self {
                tracker: DiffTracker::new(),
                position: (0.0, 0.0),
                angle: 0.0,
                visual: "ship (1)".to_string(),
            }
        }

        fn set_position(&mut self, position: (f32, f32)) {
            self.tracker.write("position", &mut self.position, position);
        }

        fn set_angle(&mut self, angle: f32) {
            self.tracker.write("angle", &mut self.angle, angle);
        }

        fn set_visual(&mut self, visual: &str) {
            self.tracker
                .write("visual", &mut self.visual, visual.to_string());
        }
    }

    impl TrackedAttributes for Hull {
        fn tracked_attributes(&self) -> Vec<(String, Result<Value>)> {
            vec![
                ("position".to_string(), to_wire("position", &self.position)),
                ("angle".to_string(), to_wire("angle", &self.angle)),
                ("visual".to_string(), to_wire("visual", &self.visual)),
            ]
        }
    }

    #[test]
    fn test_flush_returns_last_write() {
        let mut hull = Hull::new();
        hull.set_position((1.0, 1.0));
        hull.set_position((2.0, 3.0));
        hull.set_angle(45.0);

        let changes = hull.tracker.flush();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["position"], json!([2.0, 3.0]));
        assert_eq!(changes["angle"], json!(45.0));
    }

    #[test]
    fn test_second_flush_is_empty() {
        let mut hull = Hull::new();
        hull.set_angle(10.0);
        assert!(!hull.tracker.flush().is_empty());
        assert!(hull.tracker.flush().is_empty());
    }

    #[test]
    fn test_equal_write_not_recorded() {
        let mut hull = Hull::new();
        hull.set_position((0.0, 0.0));
        hull.set_visual("ship (1)");
        assert!(!hull.tracker.has_changes());
    }

    #[test]
    fn test_restored_value_not_reported() {
        let mut hull = Hull::new();
        hull.set_angle(30.0);
        hull.tracker.flush();

        hull.set_angle(90.0);
        hull.set_angle(30.0);
        hull.set_visual("ship (2)");

        let changes = hull.tracker.flush();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["visual"], json!("ship (2)"));
    }

    #[test]
    fn test_paused_tracker_ignores_writes() {
        let mut hull = Hull::new();
        hull.tracker = DiffTracker::paused();
        hull.set_angle(12.0);

        assert_eq!(hull.angle, 12.0);
        assert!(hull.tracker.flush().is_empty());

        hull.tracker.set_accumulate(true);
        hull.set_angle(13.0);
        assert_eq!(hull.tracker.flush()["angle"], json!(13.0));
    }

    #[test]
    fn test_unrepresentable_value_skipped() {
        let mut hull = Hull::new();
        hull.set_angle(f32::NAN);
        hull.set_position((4.0, 4.0));

        let changes = hull.tracker.flush();
        assert!(!changes.contains_key("angle"));
        assert_eq!(changes["position"], json!([4.0, 4.0]));

        let full = serialize_full_state(&hull);
        assert_eq!(full.len(), 2);
        assert!(!full.contains_key("angle"));
    }

    #[test]
    fn test_seed_marks_everything_pending() {
        let mut hull = Hull::new();
        let state = serialize_full_state(&hull);
        hull.tracker.seed(state);

        let changes = hull.tracker.flush();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes["visual"], json!("ship (1)"));

        // Already flushed, so writing the same wire value again is a no-op.
        hull.position = (9.0, 9.0);
        hull.tracker.record("position", &(0.0f32, 0.0f32));
        assert!(!hull.tracker.has_changes());
    }

    #[test]
    fn test_write_sequences_report_net_change() {
        let cases: Vec<(Vec<f32>, Option<f32>)> = vec![
            (vec![], None),
            (vec![1.0], Some(1.0)),
            (vec![1.0, 2.0, 3.0], Some(3.0)),
            (vec![5.0, 0.0], None),
            (vec![0.0, 0.0], None),
        ];

        for (writes, expected) in cases {
            let mut hull = Hull::new();
            hull.tracker.seed(serialize_full_state(&hull));
            hull.tracker.flush();

            for angle in &writes {
                hull.set_angle(*angle);
            }
            let changes = hull.tracker.flush();
            assert_eq!(
                changes.get("angle").cloned(),
                expected.map(|a| json!(a)),
                "writes {:?}",
                writes
            );
        }
    }
}
