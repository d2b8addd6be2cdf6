//! Serialized access to a non-reentrant network stack.
//!
//! Every call into the stack, whether it comes from an application task, a packet
//! interrupt or a timer, is turned into a [`WorkItem`](channel::WorkItem) and handed to a
//! single worker context that is the only code ever allowed to enter the stack.
//! [`Dispatcher`] implements that worker; [`mutex::Locked`] is the lock-based
//! alternative for builds without a worker task.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod channel;
pub mod dispatcher;
pub mod gateway;
mod log_wrapper;
pub mod mutex;
pub mod op;
pub mod port;
pub mod request;
pub mod stack;

pub use portable_atomic;

pub use channel::{WorkChannel, WorkItem};
pub use dispatcher::{DEFAULT_QUEUE_LEN, Dispatcher, DispatcherConfig, Stats, Step};
pub use gateway::{Gateway, Net};
pub use mutex::{IrqSource, Locked, RecursiveLock, StackGuard, StackLock, StackMutex};
pub use op::Op;
pub use request::IsrSlot;
pub use port::{Port, Slot, Timeout};
pub use stack::{NetError, NetStack};

/// Recoverable errors reported to a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A worker context is already attached to the dispatcher.
    WorkerAttached,
    /// The port could not create the worker task.
    SpawnFailed,
}

/// Conditions under which the system cannot make progress.
///
/// These never travel through a return value. They are handed to [`Port::halt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fatal {
    /// The worker task could not be created at startup.
    SpawnFailed,
    /// A second worker tried to attach to the same dispatcher.
    WorkerAttached,
    /// An interrupt-context enqueue found the work channel full.
    QueueFull,
    /// The worker dequeued a tag that no executor is registered for.
    UnknownOp(u16),
    /// The stack was entered from a context other than the attached worker.
    ForeignContext,
}

impl core::fmt::Display for Fatal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Fatal::SpawnFailed => f.write_str("unable to create network worker task"),
            Fatal::WorkerAttached => f.write_str("network worker attached twice"),
            Fatal::QueueFull => f.write_str("network work queue full in interrupt context"),
            Fatal::UnknownOp(tag) => write!(f, "unimplemented network operation {tag}"),
            Fatal::ForeignContext => f.write_str("network stack entered outside the worker"),
        }
    }
}
