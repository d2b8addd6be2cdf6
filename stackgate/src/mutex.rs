//! Lock-based serialization, for builds where the stack is not owned by a worker task.
//!
//! Tasks take a recursive lock around every stack call. The packet interrupt cannot
//! take a lock, so while any guard is alive it masks its own source and leaves a note;
//! the last guard to go away unmasks it, and the interrupt fires again with the stack
//! free.

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    gateway::Gateway,
    port::{Port, Timeout},
    request::{self, Request},
    stack::NetStack,
};

/// Platform hook that grants exclusive access to the stack.
///
/// # Safety
///
/// While one context is between `enter` (or a successful `try_enter`) and the matching
/// `exit`, no other context may get past `enter`. The same context must be able to
/// enter again without deadlocking.
pub unsafe trait StackLock {
    fn enter(&self);
    fn try_enter(&self) -> bool;
    fn exit(&self);
}

/// The interrupt source whose handler feeds the stack (usually the Ethernet chip's
/// GPIO interrupt).
pub trait IrqSource {
    fn mask(&self);
    fn unmask(&self);
}

/// Recursive lock keyed on the port's task identity. Contended entry yields.
pub struct RecursiveLock<P: Port> {
    port: P,
    /// Holder and its nesting depth.
    owner: Mutex<Cell<Option<(P::TaskId, usize)>>>,
}

impl<P: Port> RecursiveLock<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            owner: Mutex::new(Cell::new(None)),
        }
    }

    pub fn owner(&self) -> Option<P::TaskId> {
        critical_section::with(|cs| self.owner.borrow(cs).get().map(|(task, _)| task))
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

unsafe impl<P: Port> StackLock for RecursiveLock<P> {
    fn enter(&self) {
        while !self.try_enter() {
            self.port.yield_now();
        }
    }

    fn try_enter(&self) -> bool {
        let me = self.port.current_task();

        critical_section::with(|cs| {
            let owner = self.owner.borrow(cs);
            match owner.get() {
                None => {
                    owner.set(Some((me, 1)));
                    true
                }
                Some((task, depth)) if task == me => {
                    owner.set(Some((task, depth + 1)));
                    true
                }
                Some(_) => false,
            }
        })
    }

    fn exit(&self) {
        let me = self.port.current_task();

        critical_section::with(|cs| {
            let owner = self.owner.borrow(cs);
            match owner.get() {
                Some((task, depth)) if task == me => {
                    owner.set((depth > 1).then_some((task, depth - 1)));
                }
                _ => debug_assert!(false, "stack lock released by a context not holding it"),
            }
        });
    }
}

/// Recursive lock plus deferred interrupt re-enable.
pub struct StackMutex<L, I> {
    lock: L,
    irq: I,
    /// Guards alive or being acquired, across all contexts.
    depth: AtomicUsize,
    needs_irq_enable: AtomicBool,
}

impl<L: StackLock, I: IrqSource> StackMutex<L, I> {
    pub const fn new(lock: L, irq: I) -> Self {
        Self {
            lock,
            irq,
            depth: AtomicUsize::new(0),
            needs_irq_enable: AtomicBool::new(false),
        }
    }

    /// Waits for exclusive access. Nested calls from the holder succeed immediately.
    pub fn lock(&self) -> StackGuard<'_, L, I> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.lock.enter();
        StackGuard { mutex: self }
    }

    /// Takes exclusive access only if nobody else holds it.
    pub fn try_lock(&self) -> Option<StackGuard<'_, L, I>> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.lock.try_enter() {
            Some(StackGuard { mutex: self })
        } else {
            self.leave();
            None
        }
    }

    /// Called by the interrupt handler before touching the stack.
    ///
    /// If a guard is alive, masks the source, arranges for it to be unmasked when the
    /// last guard is dropped and returns `true`: the handler must return without
    /// touching the stack. Otherwise returns `false`.
    pub fn defer_irq(&self) -> bool {
        critical_section::with(|_| {
            if self.depth.load(Ordering::SeqCst) == 0 {
                return false;
            }
            self.irq.mask();
            self.needs_irq_enable.store(true, Ordering::SeqCst);
            true
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.depth() > 0
    }

    /// Whether an interrupt is waiting for the last guard to go away.
    pub fn irq_deferred(&self) -> bool {
        self.needs_irq_enable.load(Ordering::SeqCst)
    }

    pub fn irq_source(&self) -> &I {
        &self.irq
    }

    fn leave(&self) {
        critical_section::with(|_| {
            let previous = self.depth.fetch_sub(1, Ordering::SeqCst);
            debug_assert!(previous > 0, "stack mutex released more often than taken");
            if previous == 1 && self.needs_irq_enable.swap(false, Ordering::SeqCst) {
                self.irq.unmask();
            }
        });
    }
}

/// Exclusive access to the stack until dropped.
#[must_use = "the stack is unlocked as soon as the guard is dropped"]
pub struct StackGuard<'m, L: StackLock, I: IrqSource> {
    mutex: &'m StackMutex<L, I>,
}

impl<L: StackLock, I: IrqSource> Drop for StackGuard<'_, L, I> {
    fn drop(&mut self) {
        self.mutex.lock.exit();
        self.mutex.leave();
    }
}

/// A stack paired with the mutex that protects it.
pub struct Locked<S, L, I> {
    stack: S,
    mutex: StackMutex<L, I>,
    initialized: AtomicBool,
}

// SAFETY: the stack is only reachable through `with`, which holds the lock.
unsafe impl<S: Send, L: Sync, I: Sync> Sync for Locked<S, L, I> {}

impl<S: NetStack, L: StackLock, I: IrqSource> Locked<S, L, I> {
    pub const fn new(stack: S, lock: L, irq: I) -> Self {
        Self {
            stack,
            mutex: StackMutex::new(lock, irq),
            initialized: AtomicBool::new(false),
        }
    }

    /// Runs `func` with the lock held.
    pub fn with<T>(&self, func: impl FnOnce(&S) -> T) -> T {
        let _guard = self.mutex.lock();
        func(&self.stack)
    }

    /// Runs expired timers if the stack is free right now.
    ///
    /// Returns the time until the next timer, or `None` if the lock was busy and the
    /// pass was skipped.
    pub fn maintain(&self) -> Option<Timeout> {
        let _guard = self.mutex.try_lock()?;
        self.stack.check_timeouts();
        Some(
            self.stack
                .timeouts_sleeptime()
                .map_or(Timeout::Forever, Timeout::Ticks),
        )
    }

    pub fn mutex(&self) -> &StackMutex<L, I> {
        &self.mutex
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl<S: NetStack, L: StackLock, I: IrqSource> Gateway for Locked<S, L, I> {
    type Stack = S;

    fn call<R: Request<S> + Send>(&self, request: &mut R) {
        self.with(|stack| request::execute_typed(stack, &self.initialized, request));
    }
}
