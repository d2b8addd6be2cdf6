//! Request descriptors: the arguments and return slot of one stack call.
//!
//! A descriptor lives in the caller's frame (or in `'static` storage for interrupt
//! callers). The work channel only carries a pointer to it, so the worker writes the
//! result straight into the caller's memory.
//!
//! Descriptors and the tag-to-executor table are generated from one list, so a tag
//! without an executor (or the reverse) does not compile.

use core::{cell::UnsafeCell, marker::PhantomData, ptr::NonNull};

use portable_atomic::{AtomicBool, Ordering};

use crate::{
    op::Op,
    stack::{
        DnsAddrType, DnsFoundFn, IpType, NetError, NetStack, PbufLayer, PbufType, RawRecvFn,
        TcpAcceptFn, TcpConnectedFn, TcpErrFn, TcpPollFn, TcpRecvFn, TcpSentFn, UdpRecvFn,
        WriteFlags,
    },
};

mod sealed {
    pub trait Sealed {}
}

/// One call into the stack.
///
/// Sealed: the worker reinterprets type-erased pointers based on [`Request::OP`], which
/// is only sound for the descriptors declared in this module.
pub trait Request<S: NetStack>: sealed::Sealed {
    /// Tag of the entry point this descriptor targets.
    const OP: Op;
    /// Value the entry point returns.
    type Output;

    /// Calls the entry point and fills the return slot.
    fn execute(&mut self, stack: &S);

    /// Whether the return slot has been filled.
    fn is_complete(&self) -> bool;

    /// Consumes a completed descriptor and yields the returned value.
    fn into_output(self) -> Self::Output
    where
        Self: Sized;
}

/// Runs the executor registered for `R` on a type-erased descriptor.
///
/// # Safety
///
/// `request` must point to a live `R` that nothing else accesses during the call.
unsafe fn execute_as<S: NetStack, R: Request<S>>(stack: &S, request: NonNull<()>) {
    let request = unsafe { request.cast::<R>().as_mut() };
    request.execute(stack);
}

macro_rules! requests {
    (
        $lt:lifetime, $S:ident;
        $(
            $(#[$meta:meta])*
            $name:ident ( $( $field:ident : $ty:ty ),* ) -> $ret:ty
                = |$stack:ident, $req:ident| $body:expr;
        )+
    ) => {
        $(
            $(#[$meta])*
            #[doc = concat!("Descriptor for [`Op::", stringify!($name), "`].")]
            pub struct $name<$lt, $S: NetStack> {
                $( pub $field: $ty, )*
                /// Return slot, filled in by the worker.
                pub ret: Option<$ret>,
                _marker: PhantomData<(&$lt (), fn() -> $S)>,
            }

            impl<$lt, $S: NetStack> $name<$lt, $S> {
                #[allow(clippy::new_without_default, clippy::too_many_arguments)]
                pub fn new($( $field: $ty ),*) -> Self {
                    Self {
                        $( $field, )*
                        ret: None,
                        _marker: PhantomData,
                    }
                }
            }

            impl<$lt, $S: NetStack> sealed::Sealed for $name<$lt, $S> {}

            impl<$lt, $S: NetStack> Request<$S> for $name<$lt, $S> {
                const OP: Op = Op::$name;
                type Output = $ret;

                #[allow(clippy::let_unit_value, clippy::unit_arg)]
                fn execute(&mut self, $stack: &$S) {
                    let ret = {
                        let $req = &mut *self;
                        $body
                    };
                    self.ret = Some(ret);
                }

                fn is_complete(&self) -> bool {
                    self.ret.is_some()
                }

                fn into_output(self) -> $ret {
                    match self.ret {
                        Some(ret) => ret,
                        None => unreachable!("{:?} descriptor read before completion", Op::$name),
                    }
                }
            }
        )+

        /// # Safety
        ///
        /// Same as [`execute`].
        unsafe fn execute_table<$S: NetStack>(op: Op, stack: &$S, request: NonNull<()>) {
            match op {
                $( Op::$name => unsafe { execute_as::<$S, $name<'_, $S>>(stack, request) }, )+
            }
        }
    };
}

requests! {
    'a, S;

    Init() -> () = |stack, _r| stack.init();

    PbufHeader(p: S::Pbuf, header_size: i16) -> bool
        = |stack, r| stack.pbuf_header(r.p, r.header_size);
    PbufFree(p: S::Pbuf) -> u8 = |stack, r| stack.pbuf_free(r.p);
    PbufAlloc(layer: PbufLayer, length: u16, kind: PbufType) -> Option<S::Pbuf>
        = |stack, r| stack.pbuf_alloc(r.layer, r.length, r.kind);
    PbufTake(p: S::Pbuf, data: &'a [u8]) -> Result<(), NetError>
        = |stack, r| stack.pbuf_take(r.p, r.data);
    PbufCopyPartial(p: S::Pbuf, out: &'a mut [u8], offset: u16) -> u16
        = |stack, r| stack.pbuf_copy_partial(r.p, &mut *r.out, r.offset);
    PbufRef(p: S::Pbuf) -> () = |stack, r| stack.pbuf_ref(r.p);
    PbufGetAt(p: S::Pbuf, offset: u16) -> u8 = |stack, r| stack.pbuf_get_at(r.p, r.offset);
    PbufCat(head: S::Pbuf, tail: S::Pbuf) -> () = |stack, r| stack.pbuf_cat(r.head, r.tail);
    PbufGetContiguous(p: S::Pbuf, buffer: &'a mut [u8], len: u16, offset: u16) -> Option<u16>
        = |stack, r| stack.pbuf_get_contiguous(r.p, &mut *r.buffer, r.len, r.offset);

    TcpClose(pcb: S::TcpPcb) -> Result<(), NetError> = |stack, r| stack.tcp_close(r.pcb);
    TcpShutdown(pcb: S::TcpPcb, rx: bool, tx: bool) -> Result<(), NetError>
        = |stack, r| stack.tcp_shutdown(r.pcb, r.rx, r.tx);
    TcpAbort(pcb: S::TcpPcb) -> () = |stack, r| stack.tcp_abort(r.pcb);
    TcpBind(pcb: S::TcpPcb, addr: Option<S::IpAddr>, port: u16) -> Result<(), NetError>
        = |stack, r| stack.tcp_bind(r.pcb, r.addr, r.port);
    TcpListen(pcb: S::TcpPcb, backlog: u8) -> Option<S::TcpPcb>
        = |stack, r| stack.tcp_listen(r.pcb, r.backlog);
    TcpRecved(pcb: S::TcpPcb, len: u16) -> () = |stack, r| stack.tcp_recved(r.pcb, r.len);
    TcpConnect(
        pcb: S::TcpPcb,
        addr: S::IpAddr,
        port: u16,
        connected: Option<TcpConnectedFn<S>>
    ) -> Result<(), NetError>
        = |stack, r| stack.tcp_connect(r.pcb, r.addr, r.port, r.connected);
    TcpNew(ip_type: IpType) -> Option<S::TcpPcb> = |stack, r| stack.tcp_new(r.ip_type);
    TcpArg(pcb: S::TcpPcb, arg: Option<S::Arg>) -> () = |stack, r| stack.tcp_arg(r.pcb, r.arg);
    TcpRecv(pcb: S::TcpPcb, recv: Option<TcpRecvFn<S>>) -> ()
        = |stack, r| stack.tcp_recv(r.pcb, r.recv);
    TcpSent(pcb: S::TcpPcb, sent: Option<TcpSentFn<S>>) -> ()
        = |stack, r| stack.tcp_sent(r.pcb, r.sent);
    TcpErr(pcb: S::TcpPcb, err: Option<TcpErrFn<S>>) -> ()
        = |stack, r| stack.tcp_err(r.pcb, r.err);
    TcpAccept(pcb: S::TcpPcb, accept: Option<TcpAcceptFn<S>>) -> ()
        = |stack, r| stack.tcp_accept(r.pcb, r.accept);
    TcpWrite(pcb: S::TcpPcb, data: &'a [u8], flags: WriteFlags) -> Result<(), NetError>
        = |stack, r| stack.tcp_write(r.pcb, r.data, r.flags);
    TcpOutput(pcb: S::TcpPcb) -> Result<(), NetError> = |stack, r| stack.tcp_output(r.pcb);
    TcpBindNetif(pcb: S::TcpPcb, netif: Option<S::Netif>) -> Result<(), NetError>
        = |stack, r| stack.tcp_bind_netif(r.pcb, r.netif);
    TcpListenWithErr(pcb: S::TcpPcb, backlog: u8) -> Result<S::TcpPcb, NetError>
        = |stack, r| stack.tcp_listen_with_err(r.pcb, r.backlog);
    TcpPoll(pcb: S::TcpPcb, poll: Option<TcpPollFn<S>>, interval: u8) -> ()
        = |stack, r| stack.tcp_poll(r.pcb, r.poll, r.interval);
    TcpSetPrio(pcb: S::TcpPcb, prio: u8) -> () = |stack, r| stack.tcp_setprio(r.pcb, r.prio);
    TcpBacklogDelayed(pcb: S::TcpPcb) -> () = |stack, r| stack.tcp_backlog_delayed(r.pcb);
    TcpBacklogAccepted(pcb: S::TcpPcb) -> () = |stack, r| stack.tcp_backlog_accepted(r.pcb);

    UdpSend(pcb: S::UdpPcb, p: S::Pbuf) -> Result<(), NetError>
        = |stack, r| stack.udp_send(r.pcb, r.p);
    UdpSendTo(pcb: S::UdpPcb, p: S::Pbuf, addr: S::IpAddr, port: u16) -> Result<(), NetError>
        = |stack, r| stack.udp_sendto(r.pcb, r.p, r.addr, r.port);
    UdpBind(pcb: S::UdpPcb, addr: Option<S::IpAddr>, port: u16) -> Result<(), NetError>
        = |stack, r| stack.udp_bind(r.pcb, r.addr, r.port);
    UdpConnect(pcb: S::UdpPcb, addr: S::IpAddr, port: u16) -> Result<(), NetError>
        = |stack, r| stack.udp_connect(r.pcb, r.addr, r.port);
    UdpDisconnect(pcb: S::UdpPcb) -> () = |stack, r| stack.udp_disconnect(r.pcb);
    UdpRecv(pcb: S::UdpPcb, recv: Option<UdpRecvFn<S>>, arg: Option<S::Arg>) -> ()
        = |stack, r| stack.udp_recv(r.pcb, r.recv, r.arg);
    UdpRemove(pcb: S::UdpPcb) -> () = |stack, r| stack.udp_remove(r.pcb);
    UdpNew(ip_type: IpType) -> Option<S::UdpPcb> = |stack, r| stack.udp_new(r.ip_type);
    UdpSendToIf(
        pcb: S::UdpPcb,
        p: S::Pbuf,
        addr: S::IpAddr,
        port: u16,
        netif: S::Netif
    ) -> Result<(), NetError>
        = |stack, r| stack.udp_sendto_if(r.pcb, r.p, r.addr, r.port, r.netif);
    UdpSendToIfSrc(
        pcb: S::UdpPcb,
        p: S::Pbuf,
        addr: S::IpAddr,
        port: u16,
        netif: S::Netif,
        src: S::IpAddr
    ) -> Result<(), NetError>
        = |stack, r| stack.udp_sendto_if_src(r.pcb, r.p, r.addr, r.port, r.netif, r.src);

    CheckTimeouts() -> () = |stack, _r| stack.check_timeouts();

    DnsGetHostByName(
        hostname: &'a str,
        found: Option<DnsFoundFn<S>>,
        arg: Option<S::Arg>
    ) -> Result<S::IpAddr, NetError>
        = |stack, r| stack.dns_gethostbyname(r.hostname, r.found, r.arg);
    DnsGetHostByNameAddrType(
        hostname: &'a str,
        found: Option<DnsFoundFn<S>>,
        arg: Option<S::Arg>,
        addr_type: DnsAddrType
    ) -> Result<S::IpAddr, NetError>
        = |stack, r| stack.dns_gethostbyname_addrtype(r.hostname, r.found, r.arg, r.addr_type);

    RawBind(pcb: S::RawPcb, addr: Option<S::IpAddr>) -> Result<(), NetError>
        = |stack, r| stack.raw_bind(r.pcb, r.addr);
    RawConnect(pcb: S::RawPcb, addr: S::IpAddr) -> Result<(), NetError>
        = |stack, r| stack.raw_connect(r.pcb, r.addr);
    RawSendTo(pcb: S::RawPcb, p: S::Pbuf, addr: S::IpAddr) -> Result<(), NetError>
        = |stack, r| stack.raw_sendto(r.pcb, r.p, r.addr);
    RawRemove(pcb: S::RawPcb) -> () = |stack, r| stack.raw_remove(r.pcb);
    RawNew(ip_type: IpType, proto: u8) -> Option<S::RawPcb>
        = |stack, r| stack.raw_new(r.ip_type, r.proto);
    RawRecv(pcb: S::RawPcb, recv: Option<RawRecvFn<S>>, arg: Option<S::Arg>) -> ()
        = |stack, r| stack.raw_recv(r.pcb, r.recv, r.arg);
    RawSend(pcb: S::RawPcb, p: S::Pbuf) -> Result<(), NetError>
        = |stack, r| stack.raw_send(r.pcb, r.p);

    NetifAdd(
        netif: S::Netif,
        addr: S::IpAddr,
        netmask: S::IpAddr,
        gateway: S::IpAddr
    ) -> Option<S::Netif>
        = |stack, r| stack.netif_add(r.netif, r.addr, r.netmask, r.gateway);
    NetifRemove(netif: S::Netif) -> () = |stack, r| stack.netif_remove(r.netif);

    Input(p: S::Pbuf, netif: S::Netif) -> Result<(), NetError>
        = |stack, r| stack.input(r.p, r.netif);

    /// Runs `func` inside the worker, with the same ordering and exclusivity as any
    /// other request. Lets other subsystems share the serialized context without a tag
    /// of their own.
    Callback(func: &'a mut (dyn FnMut(&S) + Send + 'a)) -> () = |stack, r| (r.func)(stack);
}

/// Runs the entry point selected by `op` on the descriptor behind `request`.
///
/// The stack is initialized at most once per `initialized` flag: later [`Init`]
/// requests complete without reaching the stack.
///
/// # Safety
///
/// `request` must point to a live descriptor of the type declared for `op`, and
/// nothing else may access it until this returns.
pub(crate) unsafe fn execute<S: NetStack>(
    op: Op,
    stack: &S,
    initialized: &AtomicBool,
    request: NonNull<()>,
) {
    if op == Op::Init && initialized.swap(true, Ordering::AcqRel) {
        let init = unsafe { request.cast::<Init<'_, S>>().as_mut() };
        init.ret = Some(());
        return;
    }

    unsafe { execute_table(op, stack, request) }
}

/// Typed entry to [`execute`].
pub(crate) fn execute_typed<S: NetStack, R: Request<S>>(
    stack: &S,
    initialized: &AtomicBool,
    request: &mut R,
) {
    // SAFETY: `Request` is sealed and every descriptor reports its own tag as `OP`
    unsafe { execute(R::OP, stack, initialized, NonNull::from(request).cast()) }
}

/// Descriptor storage an interrupt handler reuses request after request.
///
/// A slot holds at most one request. It is busy from the moment a request is queued
/// until the worker has executed it, after which the completed descriptor can be read
/// back with [`IsrSlot::take`] or simply overwritten by the next request.
pub struct IsrSlot<R> {
    request: UnsafeCell<Option<R>>,
    busy: AtomicBool,
}

// SAFETY: the cell is only accessed by whoever flipped `busy` from `false` to `true`,
// and the worker while the queued item is in flight.
unsafe impl<R: Send> Sync for IsrSlot<R> {}

impl<R> IsrSlot<R> {
    pub const fn new() -> Self {
        Self {
            request: UnsafeCell::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a request is queued or running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Removes the last request, completed or not yet submitted. `None` while busy or
    /// when empty.
    pub fn take(&self) -> Option<R> {
        if !self.acquire() {
            return None;
        }
        // SAFETY: exclusive access through `busy`
        let request = unsafe { (*self.request.get()).take() };
        self.busy.store(false, Ordering::Release);
        request
    }

    /// Stores `request` and keeps the slot busy until [`IsrSlot::release_flag`] is
    /// cleared. Hands `request` back if the slot is busy.
    pub(crate) fn fill(&self, request: R) -> Result<NonNull<R>, R> {
        if !self.acquire() {
            return Err(request);
        }
        // SAFETY: exclusive access through `busy`, which stays set until the worker is done
        let cell = unsafe { &mut *self.request.get() };
        Ok(NonNull::from(cell.insert(request)))
    }

    pub(crate) fn release_flag(&self) -> &AtomicBool {
        &self.busy
    }

    fn acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<R> Default for IsrSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}
