//! Typed wrappers over the stack entry points, independent of the serialization
//! strategy behind them.

use crate::{
    dispatcher::Dispatcher,
    port::Port,
    request::*,
    stack::{
        DnsAddrType, DnsFoundFn, IpType, NetError, NetStack, PbufLayer, PbufType, RawRecvFn,
        TcpAcceptFn, TcpConnectedFn, TcpErrFn, TcpPollFn, TcpRecvFn, TcpSentFn, UdpRecvFn,
        WriteFlags,
    },
};

/// Something that can run a request against the stack with exclusive access and
/// return once it is complete.
pub trait Gateway {
    type Stack: NetStack;

    fn call<R: Request<Self::Stack> + Send>(&self, request: &mut R);
}

impl<P: Port, S: NetStack, const N: usize> Gateway for Dispatcher<P, S, N> {
    type Stack = S;

    fn call<R: Request<S> + Send>(&self, request: &mut R) {
        self.call_blocking(request);
    }
}

/// Stack entry points callable from any task.
///
/// Each method builds a descriptor on the caller's stack, passes it through the
/// gateway and returns whatever the entry point returned.
pub struct Net<'g, G> {
    gateway: &'g G,
}

impl<G> Clone for Net<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G> Copy for Net<'_, G> {}

impl<'g, S: NetStack, G: Gateway<Stack = S>> Net<'g, G> {
    pub const fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &'g G {
        self.gateway
    }

    fn call<R: Request<S> + Send>(&self, mut request: R) -> R::Output {
        self.gateway.call(&mut request);
        request.into_output()
    }

    /// Initializes the stack. Does nothing once it has been initialized, which a
    /// dispatcher does before serving its first request.
    pub fn init(&self) {
        self.call(Init::new())
    }

    pub fn pbuf_alloc(&self, layer: PbufLayer, length: u16, kind: PbufType) -> Option<S::Pbuf> {
        self.call(PbufAlloc::new(layer, length, kind))
    }

    pub fn pbuf_free(&self, p: S::Pbuf) -> u8 {
        self.call(PbufFree::new(p))
    }

    pub fn pbuf_header(&self, p: S::Pbuf, header_size: i16) -> bool {
        self.call(PbufHeader::new(p, header_size))
    }

    pub fn pbuf_take(&self, p: S::Pbuf, data: &[u8]) -> Result<(), NetError> {
        self.call(PbufTake::new(p, data))
    }

    pub fn pbuf_copy_partial(&self, p: S::Pbuf, out: &mut [u8], offset: u16) -> u16 {
        self.call(PbufCopyPartial::new(p, out, offset))
    }

    pub fn pbuf_ref(&self, p: S::Pbuf) {
        self.call(PbufRef::new(p))
    }

    pub fn pbuf_get_at(&self, p: S::Pbuf, offset: u16) -> u8 {
        self.call(PbufGetAt::new(p, offset))
    }

    pub fn pbuf_cat(&self, head: S::Pbuf, tail: S::Pbuf) {
        self.call(PbufCat::new(head, tail))
    }

    pub fn pbuf_get_contiguous(
        &self,
        p: S::Pbuf,
        buffer: &mut [u8],
        len: u16,
        offset: u16,
    ) -> Option<u16> {
        self.call(PbufGetContiguous::new(p, buffer, len, offset))
    }

    pub fn tcp_new(&self, ip_type: IpType) -> Option<S::TcpPcb> {
        self.call(TcpNew::new(ip_type))
    }

    pub fn tcp_arg(&self, pcb: S::TcpPcb, arg: Option<S::Arg>) {
        self.call(TcpArg::new(pcb, arg))
    }

    pub fn tcp_bind(
        &self,
        pcb: S::TcpPcb,
        addr: Option<S::IpAddr>,
        port: u16,
    ) -> Result<(), NetError> {
        self.call(TcpBind::new(pcb, addr, port))
    }

    pub fn tcp_listen(&self, pcb: S::TcpPcb, backlog: u8) -> Option<S::TcpPcb> {
        self.call(TcpListen::new(pcb, backlog))
    }

    pub fn tcp_accept(&self, pcb: S::TcpPcb, accept: Option<TcpAcceptFn<S>>) {
        self.call(TcpAccept::new(pcb, accept))
    }

    pub fn tcp_connect(
        &self,
        pcb: S::TcpPcb,
        addr: S::IpAddr,
        port: u16,
        connected: Option<TcpConnectedFn<S>>,
    ) -> Result<(), NetError> {
        self.call(TcpConnect::new(pcb, addr, port, connected))
    }

    pub fn tcp_write(&self, pcb: S::TcpPcb, data: &[u8], flags: WriteFlags) -> Result<(), NetError> {
        self.call(TcpWrite::new(pcb, data, flags))
    }

    pub fn tcp_output(&self, pcb: S::TcpPcb) -> Result<(), NetError> {
        self.call(TcpOutput::new(pcb))
    }

    pub fn tcp_recved(&self, pcb: S::TcpPcb, len: u16) {
        self.call(TcpRecved::new(pcb, len))
    }

    pub fn tcp_recv(&self, pcb: S::TcpPcb, recv: Option<TcpRecvFn<S>>) {
        self.call(TcpRecv::new(pcb, recv))
    }

    pub fn tcp_sent(&self, pcb: S::TcpPcb, sent: Option<TcpSentFn<S>>) {
        self.call(TcpSent::new(pcb, sent))
    }

    pub fn tcp_err(&self, pcb: S::TcpPcb, err: Option<TcpErrFn<S>>) {
        self.call(TcpErr::new(pcb, err))
    }

    pub fn tcp_close(&self, pcb: S::TcpPcb) -> Result<(), NetError> {
        self.call(TcpClose::new(pcb))
    }

    pub fn tcp_shutdown(&self, pcb: S::TcpPcb, rx: bool, tx: bool) -> Result<(), NetError> {
        self.call(TcpShutdown::new(pcb, rx, tx))
    }

    pub fn tcp_abort(&self, pcb: S::TcpPcb) {
        self.call(TcpAbort::new(pcb))
    }

    pub fn tcp_bind_netif(&self, pcb: S::TcpPcb, netif: Option<S::Netif>) -> Result<(), NetError> {
        self.call(TcpBindNetif::new(pcb, netif))
    }

    pub fn tcp_listen_with_err(&self, pcb: S::TcpPcb, backlog: u8) -> Result<S::TcpPcb, NetError> {
        self.call(TcpListenWithErr::new(pcb, backlog))
    }

    pub fn tcp_poll(&self, pcb: S::TcpPcb, poll: Option<TcpPollFn<S>>, interval: u8) {
        self.call(TcpPoll::new(pcb, poll, interval))
    }

    pub fn tcp_setprio(&self, pcb: S::TcpPcb, prio: u8) {
        self.call(TcpSetPrio::new(pcb, prio))
    }

    pub fn tcp_backlog_delayed(&self, pcb: S::TcpPcb) {
        self.call(TcpBacklogDelayed::new(pcb))
    }

    pub fn tcp_backlog_accepted(&self, pcb: S::TcpPcb) {
        self.call(TcpBacklogAccepted::new(pcb))
    }

    pub fn udp_new(&self, ip_type: IpType) -> Option<S::UdpPcb> {
        self.call(UdpNew::new(ip_type))
    }

    pub fn udp_bind(
        &self,
        pcb: S::UdpPcb,
        addr: Option<S::IpAddr>,
        port: u16,
    ) -> Result<(), NetError> {
        self.call(UdpBind::new(pcb, addr, port))
    }

    pub fn udp_connect(&self, pcb: S::UdpPcb, addr: S::IpAddr, port: u16) -> Result<(), NetError> {
        self.call(UdpConnect::new(pcb, addr, port))
    }

    pub fn udp_disconnect(&self, pcb: S::UdpPcb) {
        self.call(UdpDisconnect::new(pcb))
    }

    pub fn udp_send(&self, pcb: S::UdpPcb, p: S::Pbuf) -> Result<(), NetError> {
        self.call(UdpSend::new(pcb, p))
    }

    pub fn udp_sendto(
        &self,
        pcb: S::UdpPcb,
        p: S::Pbuf,
        addr: S::IpAddr,
        port: u16,
    ) -> Result<(), NetError> {
        self.call(UdpSendTo::new(pcb, p, addr, port))
    }

    pub fn udp_recv(&self, pcb: S::UdpPcb, recv: Option<UdpRecvFn<S>>, arg: Option<S::Arg>) {
        self.call(UdpRecv::new(pcb, recv, arg))
    }

    pub fn udp_remove(&self, pcb: S::UdpPcb) {
        self.call(UdpRemove::new(pcb))
    }

    pub fn udp_sendto_if(
        &self,
        pcb: S::UdpPcb,
        p: S::Pbuf,
        addr: S::IpAddr,
        port: u16,
        netif: S::Netif,
    ) -> Result<(), NetError> {
        self.call(UdpSendToIf::new(pcb, p, addr, port, netif))
    }

    pub fn udp_sendto_if_src(
        &self,
        pcb: S::UdpPcb,
        p: S::Pbuf,
        addr: S::IpAddr,
        port: u16,
        netif: S::Netif,
        src: S::IpAddr,
    ) -> Result<(), NetError> {
        self.call(UdpSendToIfSrc::new(pcb, p, addr, port, netif, src))
    }

    pub fn dns_gethostbyname(
        &self,
        hostname: &str,
        found: Option<DnsFoundFn<S>>,
        arg: Option<S::Arg>,
    ) -> Result<S::IpAddr, NetError> {
        self.call(DnsGetHostByName::new(hostname, found, arg))
    }

    pub fn dns_gethostbyname_addrtype(
        &self,
        hostname: &str,
        found: Option<DnsFoundFn<S>>,
        arg: Option<S::Arg>,
        addr_type: DnsAddrType,
    ) -> Result<S::IpAddr, NetError> {
        self.call(DnsGetHostByNameAddrType::new(hostname, found, arg, addr_type))
    }

    pub fn raw_new(&self, ip_type: IpType, proto: u8) -> Option<S::RawPcb> {
        self.call(RawNew::new(ip_type, proto))
    }

    pub fn raw_bind(&self, pcb: S::RawPcb, addr: Option<S::IpAddr>) -> Result<(), NetError> {
        self.call(RawBind::new(pcb, addr))
    }

    pub fn raw_connect(&self, pcb: S::RawPcb, addr: S::IpAddr) -> Result<(), NetError> {
        self.call(RawConnect::new(pcb, addr))
    }

    pub fn raw_sendto(&self, pcb: S::RawPcb, p: S::Pbuf, addr: S::IpAddr) -> Result<(), NetError> {
        self.call(RawSendTo::new(pcb, p, addr))
    }

    pub fn raw_remove(&self, pcb: S::RawPcb) {
        self.call(RawRemove::new(pcb))
    }

    pub fn raw_recv(&self, pcb: S::RawPcb, recv: Option<RawRecvFn<S>>, arg: Option<S::Arg>) {
        self.call(RawRecv::new(pcb, recv, arg))
    }

    pub fn raw_send(&self, pcb: S::RawPcb, p: S::Pbuf) -> Result<(), NetError> {
        self.call(RawSend::new(pcb, p))
    }

    pub fn netif_add(
        &self,
        netif: S::Netif,
        addr: S::IpAddr,
        netmask: S::IpAddr,
        gateway: S::IpAddr,
    ) -> Option<S::Netif> {
        self.call(NetifAdd::new(netif, addr, netmask, gateway))
    }

    pub fn netif_remove(&self, netif: S::Netif) {
        self.call(NetifRemove::new(netif))
    }

    /// Hands a received frame to the stack from task context. Drivers that receive in
    /// an interrupt queue an [`Input`] descriptor with
    /// [`Dispatcher::call_from_isr_slot`] instead.
    pub fn input(&self, p: S::Pbuf, netif: S::Netif) -> Result<(), NetError> {
        self.call(Input::new(p, netif))
    }

    /// Runs expired timers now instead of waiting for the next maintenance pass.
    pub fn check_timeouts(&self) {
        self.call(CheckTimeouts::new())
    }

    /// Runs `func` with exclusive access to the stack.
    pub fn run<F: FnMut(&S) + Send>(&self, mut func: F) {
        self.call(Callback::new(&mut func))
    }
}
