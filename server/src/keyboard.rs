use std::collections::HashSet;

/// Keys currently held down by one client.
#[derive(Debug, Default, Clone)]
pub struct Keyboard {
    pressed: HashSet<i32>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, key: i32) {
        self.pressed.insert(key);
    }

    pub fn release(&mut self, key: i32) {
        self.pressed.remove(&key);
    }

    pub fn is_pressed(&self, key: i32) -> bool {
        self.pressed.contains(&key)
    }

    pub fn any_pressed(&self) -> bool {
        !self.pressed.is_empty()
    }

    /// -1, 0 or 1 along one axis from a pair of opposing keys.
    pub fn axis(&self, negative: i32, positive: i32) -> f32 {
        match (self.is_pressed(negative), self.is_pressed(positive)) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::keys;

    #[test]
    fn test_press_and_release() {
        let mut keyboard = Keyboard::new();
        keyboard.press(keys::LEFT);
        assert!(keyboard.is_pressed(keys::LEFT));
        assert_eq!(keyboard.axis(keys::LEFT, keys::RIGHT), -1.0);

        keyboard.press(keys::RIGHT);
        assert_eq!(keyboard.axis(keys::LEFT, keys::RIGHT), 0.0);

        keyboard.release(keys::LEFT);
        keyboard.release(keys::RIGHT);
        assert!(!keyboard.any_pressed());
    }
}
