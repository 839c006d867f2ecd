//! Small shared-state holders used between the control thread and the
//! real-time I/O threads.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Boolean flag with release stores and acquire loads.
///
/// Real-time threads only ever call [`Flag::get`], which never blocks.
#[derive(Debug, Default)]
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new(value: bool) -> Self {
        Self(AtomicBool::new(value))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

/// A mutex-protected holder for a single value.
///
/// Used for values the control context reads and writes as a whole (route
/// information, preferred device names). Not for the real-time path.
#[derive(Debug, Default)]
pub struct StateCell<T> {
    value: Mutex<T>,
}

impl<T: Clone> StateCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Replaces the value, returning the old one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.lock(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn flag_set_and_get() {
        let flag = Flag::new(false);
        assert!(!flag.get());
        flag.set(true);
        assert!(flag.get());
        flag.set(false);
        assert!(!flag.get());
    }

    #[test]
    fn flag_visible_across_threads() {
        let flag = Arc::new(Flag::default());
        let writer = {
            let flag = flag.clone();
            thread::spawn(move || flag.set(true))
        };
        writer.join().unwrap();
        assert!(flag.get());
    }

    #[test]
    fn state_cell_replace_returns_old() {
        let cell = StateCell::new(Some("hw:0".to_string()));
        let old = cell.replace(None);
        assert_eq!(old.as_deref(), Some("hw:0"));
        assert_eq!(cell.get(), None);
    }
}
