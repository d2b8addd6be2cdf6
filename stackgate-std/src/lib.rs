//! Host port for [stackgate](https://github.com/stackgate-rs/stackgate)
//!
//! Runs the dispatcher on plain `std` threads. Task identity is the thread id, indexed
//! notifications are counters behind a `Mutex`/`Condvar` pair, and the tick clock is a
//! monotonic [`Instant`]. Interrupt context is simulated by calling the `*_from_isr`
//! entry points from an ordinary thread.
//!
//! Useful for running application code and tests on a development machine.

use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use stackgate::{DispatcherConfig, Error, Fatal, Port, Slot, Timeout};

/// Host threads get at least this much stack whatever the configuration asks for.
pub const MIN_STACK_SIZE: usize = 256 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A halted thread panics while other threads keep running
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct NotifyState {
    counts: [u32; Slot::COUNT],
    waiting_on: Option<Slot>,
}

#[derive(Default)]
struct Notifications {
    state: Mutex<NotifyState>,
    changed: Condvar,
}

struct Inner {
    start: Instant,
    tick: Duration,
    /// Threads that waited on this port, dropped again when the thread exits.
    tasks: Mutex<HashMap<ThreadId, Arc<Notifications>>>,
    fatals: Mutex<Vec<Fatal>>,
    isr_yields: AtomicUsize,
}

/// Forgets a thread in every port it waited on once the thread exits.
struct ExitHook {
    task: ThreadId,
    ports: Vec<Weak<Inner>>,
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        for inner in self.ports.iter().filter_map(Weak::upgrade) {
            lock(&inner.tasks).remove(&self.task);
        }
    }
}

thread_local! {
    static EXIT_HOOK: RefCell<Option<ExitHook>> = const { RefCell::new(None) };
}

/// [`Port`] over `std::thread`. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct StdPort {
    inner: Arc<Inner>,
}

impl StdPort {
    /// Port with a 1 ms tick.
    pub fn new() -> Self {
        Self::with_tick(Duration::from_millis(1))
    }

    pub fn with_tick(tick: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                start: Instant::now(),
                tick: tick.max(Duration::from_nanos(1)),
                tasks: Mutex::new(HashMap::new()),
                fatals: Mutex::new(Vec::new()),
                isr_yields: AtomicUsize::new(0),
            }),
        }
    }

    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Fatal conditions reported through [`Port::halt`], oldest first.
    pub fn fatals(&self) -> Vec<Fatal> {
        lock(&self.inner.fatals).clone()
    }

    /// Context switches requested on simulated interrupt exit.
    pub fn isr_yields(&self) -> usize {
        self.inner.isr_yields.load(Ordering::Relaxed)
    }

    /// Threads currently holding notification state.
    pub fn tasks(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    fn notifications(&self, task: ThreadId) -> Arc<Notifications> {
        lock(&self.inner.tasks).entry(task).or_default().clone()
    }

    /// Arranges for the calling thread's entry to be removed when it exits.
    ///
    /// Only waiting threads register. A thread that is notified but never waits keeps
    /// its entry until the port is dropped, which the dispatcher never causes: every
    /// waiter token belongs to a task blocked in [`Port::wait`].
    fn register_current(&self) {
        // Fails only while the thread is already tearing down its locals
        let _ = EXIT_HOOK.try_with(|hook| {
            let mut hook = hook.borrow_mut();
            let hook = hook.get_or_insert_with(|| ExitHook {
                task: thread::current().id(),
                ports: Vec::new(),
            });
            let this = Arc::as_ptr(&self.inner);
            if !hook.ports.iter().any(|port| port.as_ptr() == this) {
                hook.ports.retain(|port| port.strong_count() > 0);
                hook.ports.push(Arc::downgrade(&self.inner));
            }
        });
    }

    /// Gives a count and reports whether `task` was blocked on that very slot.
    fn give(&self, task: ThreadId, slot: Slot) -> bool {
        let notifications = self.notifications(task);
        let mut state = lock(&notifications.state);
        state.counts[slot.index()] = state.counts[slot.index()].saturating_add(1);
        let was_waiting = state.waiting_on == Some(slot);
        drop(state);

        notifications.changed.notify_all();
        was_waiting
    }

    fn ticks_to_duration(&self, ticks: u32) -> Duration {
        self.inner.tick.saturating_mul(ticks)
    }
}

impl Default for StdPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for StdPort {
    type TaskId = ThreadId;

    fn current_task(&self) -> ThreadId {
        thread::current().id()
    }

    fn notify(&self, task: ThreadId, slot: Slot) {
        self.give(task, slot);
    }

    fn notify_from_isr(&self, task: ThreadId, slot: Slot) -> bool {
        self.give(task, slot)
    }

    fn wait(&self, slot: Slot, timeout: Timeout) -> bool {
        self.register_current();
        let notifications = self.notifications(self.current_task());
        let deadline = match timeout {
            Timeout::Ticks(ticks) => Some(Instant::now() + self.ticks_to_duration(ticks)),
            Timeout::Forever => None,
        };

        let mut state = lock(&notifications.state);
        loop {
            let count = &mut state.counts[slot.index()];
            if *count > 0 {
                *count -= 1;
                state.waiting_on = None;
                return true;
            }

            state.waiting_on = Some(slot);
            state = match deadline {
                None => notifications
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.waiting_on = None;
                        return false;
                    }
                    notifications
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn yield_from_isr(&self, higher_priority_woken: bool) {
        if higher_priority_woken {
            self.inner.isr_yields.fetch_add(1, Ordering::Relaxed);
            thread::yield_now();
        }
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn now(&self) -> u64 {
        let ticks = self.inner.start.elapsed().as_nanos() / self.inner.tick.as_nanos();
        ticks.min(u64::MAX as u128) as u64
    }

    fn spawn<F: FnOnce() + Send + 'static>(
        &self,
        entry: F,
        config: &DispatcherConfig,
    ) -> Result<ThreadId, Error> {
        // Host threads have neither priorities nor pinning; record what was asked for
        debug!(
            "Spawning {} (priority {}, core {:?})",
            config.name, config.priority, config.core
        );

        let handle = thread::Builder::new()
            .name(config.name.into())
            .stack_size(config.stack_size.max(MIN_STACK_SIZE))
            .spawn(entry)
            .map_err(|err| {
                warn!("Unable to spawn {}: {}", config.name, err);
                Error::SpawnFailed
            })?;

        Ok(handle.thread().id())
    }

    fn halt(&self, fatal: Fatal) -> ! {
        error!("Halted: {}", fatal);
        lock(&self.inner.fatals).push(fatal);
        panic!("{fatal}");
    }
}
