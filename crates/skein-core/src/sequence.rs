//! Wrapping sequence counters and a registry to look them up by name.
//!
//! Stage identifiers are drawn from a [`Serial`] obtained from a
//! [`SerialRegistry`] that the caller owns and passes to constructors, so two
//! engines in one process can share or separate their numbering explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Registry name of the serial used for stage identifiers.
pub const STAGE_SERIAL: &str = "stage";

#[derive(Debug)]
struct SerialState {
    next: u64,
    cycle: u64,
}

/// Thread-safe counter over `min..=max` that wraps around and counts cycles.
#[derive(Debug)]
pub struct Serial {
    min: u64,
    max: u64,
    state: Mutex<SerialState>,
}

impl Serial {
    /// A serial over the full `u64` range.
    pub fn new() -> Self {
        Self::with_range(0, u64::MAX)
    }

    /// A serial over `min..=max`. A `max` of 0 means `u64::MAX`.
    pub fn with_range(min: u64, max: u64) -> Self {
        let max = if max == 0 { u64::MAX } else { max };
        Self {
            min,
            max,
            state: Mutex::new(SerialState {
                next: min,
                cycle: 0,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SerialState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Return the current value and advance, wrapping to `min` after `max`.
    pub fn next(&self) -> u64 {
        let mut state = self.lock_state();
        let id = state.next;
        if id >= self.max {
            state.next = self.min;
            state.cycle += 1;
        } else {
            state.next += 1;
        }
        id
    }

    /// Current value without advancing.
    pub fn peek(&self) -> u64 {
        self.lock_state().next
    }

    pub fn set(&self, value: u64) {
        self.lock_state().next = value.clamp(self.min, self.max);
    }

    /// Number of times the serial wrapped around.
    pub fn cycle(&self) -> u64 {
        self.lock_state().cycle
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}

/// Named serials, shared by reference among the components that need them.
#[derive(Debug, Default)]
pub struct SerialRegistry {
    serials: RwLock<HashMap<String, Arc<Serial>>>,
}

impl SerialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `serial` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, serial: Serial) -> Arc<Serial> {
        let serial = Arc::new(serial);
        self.serials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), Arc::clone(&serial));
        serial
    }

    pub fn get(&self, name: &str) -> Option<Arc<Serial>> {
        self.serials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Look up `name`, creating a full-range serial if it does not exist yet.
    pub fn get_or_create(&self, name: &str) -> Arc<Serial> {
        if let Some(serial) = self.get(name) {
            return serial;
        }
        let mut serials = self
            .serials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            serials
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Serial::new())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_advances() {
        let serial = Serial::new();
        assert_eq!(serial.next(), 0);
        assert_eq!(serial.next(), 1);
        assert_eq!(serial.peek(), 2);
    }

    #[test]
    fn test_serial_wraps_and_counts_cycles() {
        let serial = Serial::with_range(5, 7);
        let values: Vec<u64> = (0..5).map(|_| serial.next()).collect();
        assert_eq!(values, vec![5, 6, 7, 5, 6]);
        assert_eq!(serial.cycle(), 1);
    }

    #[test]
    fn test_serial_set_is_clamped() {
        let serial = Serial::with_range(10, 20);
        serial.set(3);
        assert_eq!(serial.peek(), 10);
        serial.set(15);
        assert_eq!(serial.next(), 15);
    }

    #[test]
    fn test_registry_lookup_by_name() {
        let registry = SerialRegistry::new();
        assert!(registry.get("jobs").is_none());

        let registered = registry.register("jobs", Serial::with_range(100, 0));
        assert_eq!(registered.next(), 100);

        let looked_up = registry.get("jobs").unwrap();
        assert_eq!(looked_up.next(), 101);
    }

    #[test]
    fn test_get_or_create_shares_instance() {
        let registry = SerialRegistry::new();
        let a = registry.get_or_create(STAGE_SERIAL);
        let b = registry.get_or_create(STAGE_SERIAL);
        a.next();
        assert_eq!(b.peek(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = SerialRegistry::new();
        let second = SerialRegistry::new();
        first.get_or_create(STAGE_SERIAL).next();
        assert_eq!(second.get_or_create(STAGE_SERIAL).peek(), 0);
    }
}
