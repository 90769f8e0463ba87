//! Deferred execution at virtual-time sync points.
//!
//! Raising an IRQ from inside the register write that caused it would
//! deliver the ISR re-entrantly within the same emulated bus transaction.
//! Peripherals instead hand the edge to a [`SyncScheduler`], which runs it
//! once the machine reaches its nearest synchronized state.

use std::sync::Mutex;

/// A deferred job. Must not re-enter the scheduling peripheral's lock unless
/// the scheduler guarantees it runs outside that lock.
pub type SyncJob = Box<dyn FnOnce() + Send>;

/// The machine's virtual-time synchronization service.
pub trait SyncScheduler: Send + Sync {
    /// Run `job` at the nearest synchronized state, after the current bus
    /// transaction has retired.
    fn execute_in_nearest_synced_state(&self, job: SyncJob);
}

/// Scheduler that runs jobs inline.
///
/// Correct for single-threaded harnesses where every register access already
/// happens at a sync point, and the default for tests.
pub struct ImmediateSync;

impl SyncScheduler for ImmediateSync {
    fn execute_in_nearest_synced_state(&self, job: SyncJob) {
        job();
    }
}

/// Scheduler that parks jobs until the owner drains them.
///
/// Lets a harness assert on the state *between* the triggering access and
/// the deferred effect, which is exactly the window the deferral exists for.
#[derive(Default)]
pub struct QueuedSync {
    jobs: Mutex<Vec<SyncJob>>,
}

impl QueuedSync {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parked jobs.
    pub fn pending(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Run all parked jobs in submission order.
    pub fn drain(&self) {
        let drained: Vec<SyncJob> = match self.jobs.lock() {
            Ok(mut jobs) => jobs.drain(..).collect(),
            Err(_) => return,
        };
        for job in drained {
            job();
        }
    }
}

impl SyncScheduler for QueuedSync {
    fn execute_in_nearest_synced_state(&self, job: SyncJob) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job);
        }
    }
}
