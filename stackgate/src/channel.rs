//! Bounded FIFO between any number of producers (tasks and interrupts) and the worker.
//!
//! Built the same way as a futex wait queue: the items and the queue of blocked senders
//! sit behind one critical section, and the actual sleeping is done on per-task
//! notifications supplied by the [`Port`].

use core::{cell::RefCell, ptr::NonNull};

use critical_section::Mutex;
use heapless::Deque;
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    op::Op,
    port::{Port, Slot, Timeout},
    request::Request,
    stack::NetStack,
};

/// Senders that can be parked on a full channel at once. Further senders poll.
pub const MAX_BLOCKED_SENDERS: usize = 16;

/// The unit of serialized work: which entry point, where its descriptor lives, and
/// who to wake once it is done.
///
/// Copied by value into the channel, so the channel never refers to a producer's frame
/// other than through `request`, whose lifetime the gateway guarantees.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem<T> {
    tag: u16,
    request: NonNull<()>,
    waiter: Option<T>,
    release: Option<NonNull<AtomicBool>>,
}

// SAFETY: `request` is only dereferenced by the worker while the issuing context is
// committed to not touching the descriptor, and descriptors are `Send`.
unsafe impl<T: Send> Send for WorkItem<T> {}

impl<T> WorkItem<T> {
    pub(crate) fn new<S: NetStack, R: Request<S>>(request: &mut R, waiter: Option<T>) -> Self {
        Self::from_request::<S, R>(NonNull::from(request), waiter)
    }

    pub(crate) fn from_request<S: NetStack, R: Request<S>>(
        request: NonNull<R>,
        waiter: Option<T>,
    ) -> Self {
        Self {
            tag: R::OP.raw(),
            request: request.cast(),
            waiter,
            release: None,
        }
    }

    /// Makes the worker clear `flag` once the request has run.
    pub(crate) fn with_release(self, flag: &'static AtomicBool) -> Self {
        Self {
            release: Some(NonNull::from(flag)),
            ..self
        }
    }

    /// Builds an item from raw parts.
    ///
    /// # Safety
    ///
    /// If `tag` decodes to a known [`Op`], `request` must point to a live descriptor of
    /// the matching type that stays untouched until the worker is done with it.
    pub unsafe fn from_raw(tag: u16, request: NonNull<()>, waiter: Option<T>) -> Self {
        Self {
            tag,
            request,
            waiter,
            release: None,
        }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Decoded tag, `None` if unknown.
    pub fn op(&self) -> Option<Op> {
        Op::from_raw(self.tag)
    }

    pub(crate) fn request(&self) -> NonNull<()> {
        self.request
    }

    /// Marks the request as done for whoever owns its storage.
    pub(crate) fn complete(&self) {
        if let Some(flag) = self.release {
            // SAFETY: release flags are only attached from `'static` slots
            unsafe { flag.as_ref() }.store(false, Ordering::Release);
        }
    }
}

impl<T: Copy> WorkItem<T> {
    /// Task to wake on completion; `None` for interrupt-originated items.
    pub fn waiter(&self) -> Option<T> {
        self.waiter
    }
}

struct ChannelState<T, const N: usize> {
    items: Deque<WorkItem<T>, N>,
    blocked_senders: Deque<T, MAX_BLOCKED_SENDERS>,
    consumer: Option<T>,
}

enum SendOutcome<T> {
    Queued(Option<T>),
    Blocked,
    Congested,
}

/// Work channel with a fixed capacity of `N` items.
pub struct WorkChannel<T, const N: usize> {
    state: Mutex<RefCell<ChannelState<T, N>>>,
}

impl<T: Copy + Eq, const N: usize> WorkChannel<T, N> {
    pub const fn new() -> Self {
        const { assert!(N > 0, "work channel needs room for at least one item") };

        Self {
            state: Mutex::new(RefCell::new(ChannelState {
                items: Deque::new(),
                blocked_senders: Deque::new(),
                consumer: None,
            })),
        }
    }

    /// Registers the task that receives from this channel. Producers notify it on
    /// [`Slot::Work`].
    pub fn attach_consumer(&self, consumer: T) {
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).consumer = Some(consumer);
        });
    }

    /// Enqueues from task context, waiting for space as long as needed.
    pub fn send<P: Port<TaskId = T>>(&self, port: &P, item: WorkItem<T>) {
        let me = port.current_task();

        loop {
            let outcome = critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                if state.items.push_back(item).is_ok() {
                    SendOutcome::Queued(state.consumer)
                } else if state.blocked_senders.push_back(me).is_ok() {
                    // Registered under the same critical section as the failed push,
                    // so the receiver cannot free a slot without seeing us.
                    SendOutcome::Blocked
                } else {
                    SendOutcome::Congested
                }
            });

            match outcome {
                SendOutcome::Queued(consumer) => {
                    if let Some(consumer) = consumer {
                        port.notify(consumer, Slot::Work);
                    }
                    return;
                }
                SendOutcome::Blocked => {
                    port.wait(Slot::Space, Timeout::Forever);
                }
                SendOutcome::Congested => port.yield_now(),
            }
        }
    }

    /// Enqueues from interrupt context without blocking.
    ///
    /// On success returns whether a higher-priority task was woken. A full channel hands
    /// the item back.
    pub fn send_from_isr<P: Port<TaskId = T>>(
        &self,
        port: &P,
        item: WorkItem<T>,
    ) -> Result<bool, WorkItem<T>> {
        let consumer = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.items.push_back(item).map(|()| state.consumer)
        })?;

        Ok(consumer.is_some_and(|consumer| port.notify_from_isr(consumer, Slot::Work)))
    }

    /// Takes the oldest item without waiting.
    pub fn try_receive<P: Port<TaskId = T>>(&self, port: &P) -> Option<WorkItem<T>> {
        let (item, sender) = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let item = state.items.pop_front();
            let sender = if item.is_some() {
                state.blocked_senders.pop_front()
            } else {
                None
            };
            (item, sender)
        });

        if let Some(sender) = sender {
            port.notify(sender, Slot::Space);
        }

        item
    }

    /// Takes the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Only the attached consumer may call this. Early wakeups (stale notifications) do
    /// not stretch the timeout: the remaining time is recomputed from the port clock.
    pub fn receive<P: Port<TaskId = T>>(&self, port: &P, timeout: Timeout) -> Option<WorkItem<T>> {
        let deadline = timeout.deadline_from(port.now());

        loop {
            if let Some(item) = self.try_receive(port) {
                return Some(item);
            }

            let remaining = Timeout::until(deadline, port.now())?;
            if !port.wait(Slot::Work, remaining) {
                // An item queued right at the deadline is still worth taking
                return self.try_receive(port);
            }
        }
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).items.is_full())
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy + Eq, const N: usize> Default for WorkChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
