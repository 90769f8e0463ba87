//! Level-based GPIO lines between emulated components.
//!
//! A [`GpioLine`] is a cloneable handle to one signal: peripherals drive it,
//! the machine (or a test probe) observes it. Levels are latched, so a
//! consumer attached late still sees the current state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Observer = Box<dyn Fn(bool) + Send + Sync>;

struct LineInner {
    name: &'static str,
    level: AtomicBool,
    observers: Mutex<Vec<Observer>>,
}

/// One level-sensitive signal line.
///
/// Cloning yields another handle to the same line, which lets a deferred
/// closure drive the line without holding any peripheral lock. Observers run
/// on the driving thread, often while the driving peripheral's lock is held:
/// they must not attach further observers from inside the callback and must
/// not call back into the component that drives the line.
#[derive(Clone)]
pub struct GpioLine {
    inner: Arc<LineInner>,
}

impl GpioLine {
    /// Create a new line, initially low.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(LineInner {
                name,
                level: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The line's wiring name, used in logs.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Current level.
    pub fn level(&self) -> bool {
        self.inner.level.load(Ordering::SeqCst)
    }

    /// Drive the line to `high`. Observers fire only on an actual change.
    pub fn set_level(&self, high: bool) {
        let previous = self.inner.level.swap(high, Ordering::SeqCst);
        if previous == high {
            return;
        }
        tracing::trace!(line = self.inner.name, level = high, "gpio level change");
        if let Ok(observers) = self.inner.observers.lock() {
            for observer in observers.iter() {
                observer(high);
            }
        }
    }

    /// Drive the line high.
    pub fn raise(&self) {
        self.set_level(true);
    }

    /// Drive the line low.
    pub fn lower(&self) {
        self.set_level(false);
    }

    /// Attach an observer called with the new level on every change.
    pub fn on_change(&self, observer: impl Fn(bool) + Send + Sync + 'static) {
        if let Ok(mut observers) = self.inner.observers.lock() {
            observers.push(Box::new(observer));
        }
    }
}

impl core::fmt::Debug for GpioLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GpioLine")
            .field("name", &self.inner.name)
            .field("level", &self.level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn line_starts_low() {
        let line = GpioLine::new("test");
        assert!(!line.level());
    }

    #[test]
    fn raise_and_lower_toggle_level() {
        let line = GpioLine::new("test");
        line.raise();
        assert!(line.level());
        line.lower();
        assert!(!line.level());
    }

    #[test]
    fn observers_fire_only_on_change() {
        let line = GpioLine::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        line.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        line.raise();
        line.raise(); // no change, no callback
        line.lower();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clones_share_state() {
        let line = GpioLine::new("test");
        let other = line.clone();
        other.raise();
        assert!(line.level());
    }
}
