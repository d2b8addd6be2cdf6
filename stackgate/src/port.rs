//! Interface for the RTOS primitives the dispatcher runs on, implemented in separate crates.

use core::fmt::Debug;

use crate::{Error, Fatal, dispatcher::DispatcherConfig};

/// Per-task notification index.
///
/// Each index is an independent counting notification, so a task blocked on a reply
/// is never woken by a channel-space notification and vice versa.
///
/// [`Slot::index`] numbers the slots from zero. Ports on an RTOS that already uses low
/// notification indices for its own primitives (FreeRTOS stream and message buffers
/// use index 0) should map them onto the top of the array instead, e.g.
/// `configTASK_NOTIFICATION_ARRAY_ENTRIES - Slot::COUNT + slot.index()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    /// The worker finished the caller's request.
    Reply,
    /// New work was queued for the worker.
    Work,
    /// A slot became free in the work channel.
    Space,
}

impl Slot {
    /// Number of notification indices a port must provide per task.
    pub const COUNT: usize = 3;

    /// Position of the slot among the dispatcher's own notification indices.
    pub const fn index(self) -> usize {
        match self {
            Slot::Reply => 0,
            Slot::Work => 1,
            Slot::Space => 2,
        }
    }
}

/// Blocking time limit, in scheduler ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    Ticks(u32),
    Forever,
}

impl Timeout {
    const FOREVER_RAW: u32 = u32::MAX;

    /// Encodes the timeout into a single word (used for the dispatcher's atomic deadline).
    pub(crate) const fn to_raw(self) -> u32 {
        match self {
            // `u32::MAX` ticks is indistinguishable from forever on a 1 kHz tick anyway
            Timeout::Ticks(ticks) if ticks == Self::FOREVER_RAW => Self::FOREVER_RAW - 1,
            Timeout::Ticks(ticks) => ticks,
            Timeout::Forever => Self::FOREVER_RAW,
        }
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        if raw == Self::FOREVER_RAW {
            Timeout::Forever
        } else {
            Timeout::Ticks(raw)
        }
    }

    /// Absolute tick at which the timeout expires, `None` if it never does.
    pub fn deadline_from(self, now: u64) -> Option<u64> {
        match self {
            Timeout::Ticks(ticks) => Some(now.saturating_add(ticks as u64)),
            Timeout::Forever => None,
        }
    }

    /// Time left until `deadline`, `None` once it has passed.
    pub fn until(deadline: Option<u64>, now: u64) -> Option<Self> {
        match deadline {
            None => Some(Timeout::Forever),
            Some(deadline) if deadline <= now => None,
            Some(deadline) => Some(Timeout::Ticks(
                (deadline - now).min((Self::FOREVER_RAW - 1) as u64) as u32,
            )),
        }
    }
}

/// RTOS services consumed by the dispatcher.
///
/// A port maps these onto a concrete scheduler (FreeRTOS task notifications, host
/// threads, ...). All methods except the `*_from_isr` ones are only called from task
/// context.
pub trait Port {
    /// Identity of a schedulable task. Doubles as the waiter token.
    type TaskId: Copy + Eq + Debug + Send;

    /// Identity of the calling task.
    fn current_task(&self) -> Self::TaskId;

    /// Gives one count on `task`'s notification `slot`.
    fn notify(&self, task: Self::TaskId, slot: Slot);

    /// Interrupt-safe variant of [`Port::notify`].
    ///
    /// Returns `true` if a task of higher priority than the interrupted one became
    /// runnable, i.e. a context switch should be requested on interrupt exit.
    fn notify_from_isr(&self, task: Self::TaskId, slot: Slot) -> bool;

    /// Takes one count from the calling task's notification `slot`, blocking up to
    /// `timeout`. Returns `false` on timeout. Never returns `false` for
    /// [`Timeout::Forever`].
    fn wait(&self, slot: Slot, timeout: Timeout) -> bool;

    /// Requests a context switch on interrupt exit if `higher_priority_woken`.
    fn yield_from_isr(&self, higher_priority_woken: bool);

    /// Yields the CPU to another task.
    fn yield_now(&self);

    /// Ticks since the scheduler started.
    fn now(&self) -> u64;

    /// Creates a task running `entry`, with the priority, core affinity and stack size
    /// taken from `config`.
    fn spawn<F: FnOnce() + Send + 'static>(
        &self,
        entry: F,
        config: &DispatcherConfig,
    ) -> Result<Self::TaskId, Error>;

    /// Reports an unrecoverable condition. Never returns.
    fn halt(&self, fatal: Fatal) -> !;
}
