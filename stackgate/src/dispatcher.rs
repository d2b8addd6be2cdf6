//! The worker loop and the call gateway built on top of it.

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::{
    Error, Fatal,
    channel::{WorkChannel, WorkItem},
    debug, error, info,
    op::Op,
    port::{Port, Slot, Timeout},
    request::{self, Callback, Init, IsrSlot, Request},
    stack::NetStack,
    trace,
};

/// Work channel capacity used when none is given.
pub const DEFAULT_QUEUE_LEN: usize = 16;
/// Ticks the worker idles before its first maintenance pass.
pub const DEFAULT_INITIAL_DEADLINE: u32 = 100;

/// Worker task parameters.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct DispatcherConfig {
    /// Idle time before the first maintenance pass, in ticks.
    pub initial_deadline: u32,
    /// Priority handed to [`Port::spawn`]. Ports clamp it to their highest priority.
    pub priority: usize,
    /// Core the worker is pinned to, `None` to let the scheduler choose.
    pub core: Option<usize>,
    /// Worker stack size in bytes.
    pub stack_size: usize,
    pub name: &'static str,
}

impl DispatcherConfig {
    pub const fn new() -> Self {
        Self {
            initial_deadline: DEFAULT_INITIAL_DEADLINE,
            priority: usize::MAX,
            core: Some(0),
            stack_size: 4096,
            name: "net-worker",
        }
    }

    pub const fn with_initial_deadline(self, initial_deadline: u32) -> Self {
        Self {
            initial_deadline,
            ..self
        }
    }

    pub const fn with_priority(self, priority: usize) -> Self {
        Self { priority, ..self }
    }

    pub const fn with_core(self, core: Option<usize>) -> Self {
        Self { core, ..self }
    }

    pub const fn with_stack_size(self, stack_size: usize) -> Self {
        Self { stack_size, ..self }
    }

    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What a single [`Dispatcher::step`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Executed one queued request.
    Serviced(Op),
    /// Nothing arrived before the deadline; timers ran and the new deadline is attached.
    Maintenance(Timeout),
}

/// Worker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    /// Requests executed, whatever their origin.
    pub serviced: usize,
    /// Of those, requests enqueued from interrupt context.
    pub from_isr: usize,
    /// Maintenance passes run on idle timeout.
    pub maintenance: usize,
}

/// Owns the stack and serializes every call into it through a single worker context.
///
/// Usually placed in a `static` and started once with [`Dispatcher::start`]; the worker
/// then runs forever.
pub struct Dispatcher<P: Port, S: NetStack, const N: usize = DEFAULT_QUEUE_LEN> {
    port: P,
    stack: S,
    channel: WorkChannel<P::TaskId, N>,
    worker: Mutex<Cell<Option<P::TaskId>>>,
    /// Current receive timeout, in [`Timeout::to_raw`] encoding.
    deadline: AtomicU32,
    initialized: AtomicBool,
    config: DispatcherConfig,
    serviced: AtomicUsize,
    from_isr: AtomicUsize,
    maintenance: AtomicUsize,
}

// SAFETY: the stack is only ever touched from the attached worker context, which
// `step` and `call_blocking` check before entering it.
unsafe impl<P: Port + Sync, S: NetStack + Send, const N: usize> Sync for Dispatcher<P, S, N> {}

impl<P: Port, S: NetStack, const N: usize> Dispatcher<P, S, N> {
    pub const fn new(port: P, stack: S, config: DispatcherConfig) -> Self {
        Self {
            port,
            stack,
            channel: WorkChannel::new(),
            worker: Mutex::new(Cell::new(None)),
            deadline: AtomicU32::new(Timeout::Ticks(config.initial_deadline).to_raw()),
            initialized: AtomicBool::new(false),
            config,
            serviced: AtomicUsize::new(0),
            from_isr: AtomicUsize::new(0),
            maintenance: AtomicUsize::new(0),
        }
    }

    /// Creates the worker task through the port. Failure is fatal.
    pub fn start(&'static self)
    where
        Self: Sync,
    {
        match self.port.spawn(move || self.run(), &self.config) {
            Ok(_) => info!(
                "Network worker spawned (stack {} bytes)",
                self.config.stack_size
            ),
            Err(_) => self.fatal(Fatal::SpawnFailed),
        }
    }

    /// Records the calling context as the only one allowed to enter the stack.
    pub fn attach_worker(&self) -> Result<(), Error> {
        let me = self.port.current_task();

        critical_section::with(|cs| {
            let worker = self.worker.borrow(cs);
            if worker.get().is_some() {
                return Err(Error::WorkerAttached);
            }
            worker.set(Some(me));
            Ok(())
        })?;

        self.channel.attach_consumer(me);
        Ok(())
    }

    /// Worker body: attaches, initializes the stack, then services requests forever.
    pub fn run(&self) -> ! {
        if self.attach_worker().is_err() {
            self.fatal(Fatal::WorkerAttached);
        }

        info!("Network worker started");
        request::execute_typed(&self.stack, &self.initialized, &mut Init::<S>::new());

        loop {
            self.step();
        }
    }

    /// Performs one worker transition: services the next request, or runs timers if
    /// none arrives before the current deadline.
    pub fn step(&self) -> Step {
        if !self.is_worker() {
            self.fatal(Fatal::ForeignContext);
        }

        match self.channel.receive(&self.port, self.deadline()) {
            Some(item) => Step::Serviced(self.service(item)),
            None => Step::Maintenance(self.maintain()),
        }
    }

    fn service(&self, item: WorkItem<P::TaskId>) -> Op {
        let Some(op) = item.op() else {
            self.fatal(Fatal::UnknownOp(item.tag()));
        };

        trace!("Servicing {:?}", op);

        // SAFETY: items are only built from a descriptor of the type matching their tag
        // (or through the unsafe `WorkItem::from_raw`), and the issuer does not touch it
        // until woken.
        unsafe { request::execute(op, &self.stack, &self.initialized, item.request()) };

        self.serviced.fetch_add(1, Ordering::Relaxed);
        match item.waiter() {
            Some(waiter) => self.port.notify(waiter, Slot::Reply),
            None => {
                self.from_isr.fetch_add(1, Ordering::Relaxed);
            }
        }
        item.complete();

        op
    }

    fn maintain(&self) -> Timeout {
        self.stack.check_timeouts();

        let next = self
            .stack
            .timeouts_sleeptime()
            .map_or(Timeout::Forever, Timeout::Ticks);
        self.deadline.store(next.to_raw(), Ordering::Relaxed);
        self.maintenance.fetch_add(1, Ordering::Relaxed);

        trace!("Timers checked, next deadline {:?}", next);
        next
    }

    /// Runs `request` in the worker and returns once its return slot is filled.
    ///
    /// Called from the worker itself (a stack callback, or a closure passed to
    /// [`Dispatcher::run_in_worker`]), the request runs inline.
    pub fn call_blocking<R: Request<S> + Send>(&self, request: &mut R) {
        if self.is_worker() {
            request::execute_typed(&self.stack, &self.initialized, request);
            self.serviced.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let me = self.port.current_task();
        self.channel
            .send(&self.port, WorkItem::new::<S, R>(request, Some(me)));

        while !self.port.wait(Slot::Reply, Timeout::Forever) {}

        debug_assert!(request.is_complete());
    }

    /// Queues `request` from interrupt context. Never blocks; nobody is woken on
    /// completion, and the descriptor is not handed back.
    ///
    /// A full work channel is fatal.
    pub fn call_from_isr<R: Request<S> + Send + 'static>(&self, request: &'static mut R) {
        match self
            .channel
            .send_from_isr(&self.port, WorkItem::new::<S, R>(request, None))
        {
            Ok(woken) => self.port.yield_from_isr(woken),
            Err(_) => self.fatal(Fatal::QueueFull),
        }
    }

    /// Queues `request` from interrupt context through a reusable slot.
    ///
    /// The slot stays busy until the worker has run the request; while it is, the
    /// request is handed back untouched and nothing is queued. A full work channel is
    /// fatal, as with [`Dispatcher::call_from_isr`].
    pub fn call_from_isr_slot<R: Request<S> + Send + 'static>(
        &self,
        slot: &'static IsrSlot<R>,
        request: R,
    ) -> Result<(), R> {
        let request = slot.fill(request)?;
        let item = WorkItem::from_request::<S, R>(request, None).with_release(slot.release_flag());

        match self.channel.send_from_isr(&self.port, item) {
            Ok(woken) => {
                self.port.yield_from_isr(woken);
                Ok(())
            }
            Err(_) => self.fatal(Fatal::QueueFull),
        }
    }

    /// Runs `func` with access to the stack inside the worker context.
    pub fn run_in_worker<F: FnMut(&S) + Send>(&self, mut func: F) {
        let mut request = Callback::new(&mut func);
        self.call_blocking(&mut request);
    }

    pub fn is_worker(&self) -> bool {
        let me = self.port.current_task();
        self.worker() == Some(me)
    }

    pub fn worker(&self) -> Option<P::TaskId> {
        critical_section::with(|cs| self.worker.borrow(cs).get())
    }

    /// Whether the stack has been initialized, by the worker or by an explicit request.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Timeout the worker waits with when idle.
    pub fn deadline(&self) -> Timeout {
        Timeout::from_raw(self.deadline.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> Stats {
        Stats {
            serviced: self.serviced.load(Ordering::Relaxed),
            from_isr: self.from_isr.load(Ordering::Relaxed),
            maintenance: self.maintenance.load(Ordering::Relaxed),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn channel(&self) -> &WorkChannel<P::TaskId, N> {
        &self.channel
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn fatal(&self, fatal: Fatal) -> ! {
        error!("{}", fatal);
        debug!("{:?}", self.stats());
        self.port.halt(fatal)
    }
}
