//! The non-reentrant network stack being protected.
//!
//! [`NetStack`] is the fixed set of entry points the dispatcher wraps. Implementations
//! are thin bindings over the real stack (lwIP in `NO_SYS` mode on target, an
//! instrumented stub in tests). They take `&self` because the underlying library keeps
//! global state of its own; exclusivity is the dispatcher's job, not the binding's.

/// Error codes returned by stack entry points, matching lwIP's `err_t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i8)]
pub enum NetError {
    /// Out of memory.
    Mem = -1,
    /// Buffer error.
    Buf = -2,
    Timeout = -3,
    /// Routing problem.
    Rte = -4,
    InProgress = -5,
    /// Illegal value.
    Val = -6,
    WouldBlock = -7,
    /// Address in use.
    Use = -8,
    Already = -9,
    IsConn = -10,
    /// Not connected.
    Conn = -11,
    /// Low-level netif error.
    If = -12,
    Abrt = -13,
    Rst = -14,
    Clsd = -15,
    /// Illegal argument.
    Arg = -16,
}

impl NetError {
    const ALL: [NetError; 16] = [
        NetError::Mem,
        NetError::Buf,
        NetError::Timeout,
        NetError::Rte,
        NetError::InProgress,
        NetError::Val,
        NetError::WouldBlock,
        NetError::Use,
        NetError::Already,
        NetError::IsConn,
        NetError::Conn,
        NetError::If,
        NetError::Abrt,
        NetError::Rst,
        NetError::Clsd,
        NetError::Arg,
    ];

    pub const fn to_raw(self) -> i8 {
        self as i8
    }

    /// Converts an `err_t` into a result. `0` (`ERR_OK`) is `Ok`, unknown codes map to
    /// [`NetError::Arg`].
    pub fn result_from_raw(raw: i8) -> Result<(), NetError> {
        if raw == 0 {
            return Ok(());
        }
        Err(Self::ALL
            .iter()
            .copied()
            .find(|err| err.to_raw() == raw)
            .unwrap_or(NetError::Arg))
    }

    /// Converts a result back into an `err_t`.
    pub fn result_to_raw(result: Result<(), NetError>) -> i8 {
        match result {
            Ok(()) => 0,
            Err(err) => err.to_raw(),
        }
    }
}

impl core::fmt::Display for NetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            NetError::Mem => "out of memory",
            NetError::Buf => "buffer error",
            NetError::Timeout => "timeout",
            NetError::Rte => "routing problem",
            NetError::InProgress => "operation in progress",
            NetError::Val => "illegal value",
            NetError::WouldBlock => "operation would block",
            NetError::Use => "address in use",
            NetError::Already => "already connecting",
            NetError::IsConn => "connection already established",
            NetError::Conn => "not connected",
            NetError::If => "low-level netif error",
            NetError::Abrt => "connection aborted",
            NetError::Rst => "connection reset",
            NetError::Clsd => "connection closed",
            NetError::Arg => "illegal argument",
        };
        f.write_str(msg)
    }
}

/// Layer a new buffer reserves header space for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PbufLayer {
    Transport,
    Ip,
    Link,
    RawTx,
    Raw,
}

/// Allocation strategy of a new buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PbufType {
    Ram,
    Rom,
    Ref,
    Pool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpType {
    V4,
    V6,
    Any,
}

/// Address families a name lookup asks for, in order of preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DnsAddrType {
    #[default]
    Ipv4 = 0,
    Ipv6 = 1,
    Ipv4Ipv6 = 2,
    Ipv6Ipv4 = 3,
}

/// `tcp_write` flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteFlags {
    /// Copy the data into stack-owned memory.
    pub copy: bool,
    /// More data follows; do not set PSH.
    pub more: bool,
}

impl WriteFlags {
    pub const COPY: WriteFlags = WriteFlags {
        copy: true,
        more: false,
    };
}

pub type TcpAcceptFn<S> = fn(
    Option<<S as NetStack>::Arg>,
    Option<<S as NetStack>::TcpPcb>,
    Result<(), NetError>,
) -> Result<(), NetError>;
pub type TcpConnectedFn<S> =
    fn(Option<<S as NetStack>::Arg>, <S as NetStack>::TcpPcb, Result<(), NetError>) -> Result<(), NetError>;
pub type TcpRecvFn<S> = fn(
    Option<<S as NetStack>::Arg>,
    <S as NetStack>::TcpPcb,
    Option<<S as NetStack>::Pbuf>,
    Result<(), NetError>,
) -> Result<(), NetError>;
pub type TcpSentFn<S> =
    fn(Option<<S as NetStack>::Arg>, <S as NetStack>::TcpPcb, u16) -> Result<(), NetError>;
pub type TcpErrFn<S> = fn(Option<<S as NetStack>::Arg>, NetError);
pub type TcpPollFn<S> =
    fn(Option<<S as NetStack>::Arg>, <S as NetStack>::TcpPcb) -> Result<(), NetError>;
pub type UdpRecvFn<S> = fn(
    Option<<S as NetStack>::Arg>,
    <S as NetStack>::UdpPcb,
    <S as NetStack>::Pbuf,
    <S as NetStack>::IpAddr,
    u16,
);
/// Returns `true` if the packet was consumed and must not be passed on.
pub type RawRecvFn<S> = fn(
    Option<<S as NetStack>::Arg>,
    <S as NetStack>::RawPcb,
    <S as NetStack>::Pbuf,
    <S as NetStack>::IpAddr,
) -> bool;
pub type DnsFoundFn<S> =
    fn(&str, Option<<S as NetStack>::IpAddr>, Option<<S as NetStack>::Arg>);

/// Entry points of the protected stack.
///
/// None of these may run concurrently with another one. Only the dispatcher's worker
/// (or the holder of a [`StackMutex`](crate::mutex::StackMutex) guard) calls them.
pub trait NetStack: Sized {
    type Pbuf: Copy + Send;
    type TcpPcb: Copy + Send;
    type UdpPcb: Copy + Send;
    type RawPcb: Copy + Send;
    type Netif: Copy + Send;
    type IpAddr: Copy + Send;
    /// User argument handed back to callbacks.
    type Arg: Copy + Send;

    fn init(&self);

    fn pbuf_alloc(&self, layer: PbufLayer, length: u16, kind: PbufType) -> Option<Self::Pbuf>;
    /// Returns the reference count left on the head of the chain.
    fn pbuf_free(&self, p: Self::Pbuf) -> u8;
    /// Moves the payload pointer by `header_size` bytes. Returns `false` if not possible.
    fn pbuf_header(&self, p: Self::Pbuf, header_size: i16) -> bool;
    fn pbuf_take(&self, p: Self::Pbuf, data: &[u8]) -> Result<(), NetError>;
    fn pbuf_copy_partial(&self, p: Self::Pbuf, out: &mut [u8], offset: u16) -> u16;
    fn pbuf_ref(&self, p: Self::Pbuf);
    fn pbuf_get_at(&self, p: Self::Pbuf, offset: u16) -> u8;
    fn pbuf_cat(&self, head: Self::Pbuf, tail: Self::Pbuf);
    /// Gathers `len` bytes starting at `offset` into `buffer`. Returns the number of
    /// bytes made available, `None` if the chain is too short or `buffer` too small.
    fn pbuf_get_contiguous(
        &self,
        p: Self::Pbuf,
        buffer: &mut [u8],
        len: u16,
        offset: u16,
    ) -> Option<u16>;

    fn tcp_new(&self, ip_type: IpType) -> Option<Self::TcpPcb>;
    fn tcp_arg(&self, pcb: Self::TcpPcb, arg: Option<Self::Arg>);
    fn tcp_bind(
        &self,
        pcb: Self::TcpPcb,
        addr: Option<Self::IpAddr>,
        port: u16,
    ) -> Result<(), NetError>;
    /// Returns the listening pcb that replaces `pcb`, or `None` on failure.
    fn tcp_listen(&self, pcb: Self::TcpPcb, backlog: u8) -> Option<Self::TcpPcb>;
    fn tcp_accept(&self, pcb: Self::TcpPcb, accept: Option<TcpAcceptFn<Self>>);
    fn tcp_connect(
        &self,
        pcb: Self::TcpPcb,
        addr: Self::IpAddr,
        port: u16,
        connected: Option<TcpConnectedFn<Self>>,
    ) -> Result<(), NetError>;
    fn tcp_write(&self, pcb: Self::TcpPcb, data: &[u8], flags: WriteFlags) -> Result<(), NetError>;
    fn tcp_output(&self, pcb: Self::TcpPcb) -> Result<(), NetError>;
    fn tcp_recved(&self, pcb: Self::TcpPcb, len: u16);
    fn tcp_recv(&self, pcb: Self::TcpPcb, recv: Option<TcpRecvFn<Self>>);
    fn tcp_sent(&self, pcb: Self::TcpPcb, sent: Option<TcpSentFn<Self>>);
    fn tcp_err(&self, pcb: Self::TcpPcb, err: Option<TcpErrFn<Self>>);
    fn tcp_close(&self, pcb: Self::TcpPcb) -> Result<(), NetError>;
    fn tcp_shutdown(&self, pcb: Self::TcpPcb, rx: bool, tx: bool) -> Result<(), NetError>;
    fn tcp_abort(&self, pcb: Self::TcpPcb);
    /// Restricts `pcb` to one interface, `None` to lift the restriction.
    fn tcp_bind_netif(&self, pcb: Self::TcpPcb, netif: Option<Self::Netif>)
    -> Result<(), NetError>;
    /// Like [`NetStack::tcp_listen`], reporting why listening failed.
    fn tcp_listen_with_err(&self, pcb: Self::TcpPcb, backlog: u8)
    -> Result<Self::TcpPcb, NetError>;
    /// Calls `poll` every `interval` coarse TCP timer ticks.
    fn tcp_poll(&self, pcb: Self::TcpPcb, poll: Option<TcpPollFn<Self>>, interval: u8);
    fn tcp_setprio(&self, pcb: Self::TcpPcb, prio: u8);
    /// Holds a connection in the listener's backlog until accepted.
    fn tcp_backlog_delayed(&self, pcb: Self::TcpPcb);
    fn tcp_backlog_accepted(&self, pcb: Self::TcpPcb);

    fn udp_new(&self, ip_type: IpType) -> Option<Self::UdpPcb>;
    fn udp_bind(
        &self,
        pcb: Self::UdpPcb,
        addr: Option<Self::IpAddr>,
        port: u16,
    ) -> Result<(), NetError>;
    fn udp_connect(&self, pcb: Self::UdpPcb, addr: Self::IpAddr, port: u16)
    -> Result<(), NetError>;
    fn udp_disconnect(&self, pcb: Self::UdpPcb);
    fn udp_send(&self, pcb: Self::UdpPcb, p: Self::Pbuf) -> Result<(), NetError>;
    fn udp_sendto(
        &self,
        pcb: Self::UdpPcb,
        p: Self::Pbuf,
        addr: Self::IpAddr,
        port: u16,
    ) -> Result<(), NetError>;
    fn udp_recv(&self, pcb: Self::UdpPcb, recv: Option<UdpRecvFn<Self>>, arg: Option<Self::Arg>);
    fn udp_remove(&self, pcb: Self::UdpPcb);
    fn udp_sendto_if(
        &self,
        pcb: Self::UdpPcb,
        p: Self::Pbuf,
        addr: Self::IpAddr,
        port: u16,
        netif: Self::Netif,
    ) -> Result<(), NetError>;
    fn udp_sendto_if_src(
        &self,
        pcb: Self::UdpPcb,
        p: Self::Pbuf,
        addr: Self::IpAddr,
        port: u16,
        netif: Self::Netif,
        src: Self::IpAddr,
    ) -> Result<(), NetError>;

    /// Resolves `hostname`. `Ok` carries a cached answer; `Err(InProgress)` means `found`
    /// will be called later from the worker.
    fn dns_gethostbyname(
        &self,
        hostname: &str,
        found: Option<DnsFoundFn<Self>>,
        arg: Option<Self::Arg>,
    ) -> Result<Self::IpAddr, NetError>;
    fn dns_gethostbyname_addrtype(
        &self,
        hostname: &str,
        found: Option<DnsFoundFn<Self>>,
        arg: Option<Self::Arg>,
        addr_type: DnsAddrType,
    ) -> Result<Self::IpAddr, NetError>;

    fn raw_new(&self, ip_type: IpType, proto: u8) -> Option<Self::RawPcb>;
    fn raw_bind(&self, pcb: Self::RawPcb, addr: Option<Self::IpAddr>) -> Result<(), NetError>;
    fn raw_connect(&self, pcb: Self::RawPcb, addr: Self::IpAddr) -> Result<(), NetError>;
    fn raw_sendto(
        &self,
        pcb: Self::RawPcb,
        p: Self::Pbuf,
        addr: Self::IpAddr,
    ) -> Result<(), NetError>;
    fn raw_remove(&self, pcb: Self::RawPcb);
    fn raw_recv(&self, pcb: Self::RawPcb, recv: Option<RawRecvFn<Self>>, arg: Option<Self::Arg>);
    /// Sends to the address set with [`NetStack::raw_connect`].
    fn raw_send(&self, pcb: Self::RawPcb, p: Self::Pbuf) -> Result<(), NetError>;

    fn netif_add(
        &self,
        netif: Self::Netif,
        addr: Self::IpAddr,
        netmask: Self::IpAddr,
        gateway: Self::IpAddr,
    ) -> Option<Self::Netif>;
    fn netif_remove(&self, netif: Self::Netif);
    /// Hands a received frame to the stack.
    fn input(&self, p: Self::Pbuf, netif: Self::Netif) -> Result<(), NetError>;

    /// Runs expired timers.
    fn check_timeouts(&self);
    /// Ticks until the next timer expires, `None` if no timer is pending.
    fn timeouts_sleeptime(&self) -> Option<u32>;
}
