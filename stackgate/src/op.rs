//! Operation tags, one per wrapped stack entry point.
//!
//! Tags are grouped in numeric ranges by subsystem. The grouping is for readability
//! only; what matters is that every value is unique and that the worker knows an
//! executor for each of them.

macro_rules! ops {
    ( $( $(#[$meta:meta])* $name:ident = $value:expr, )+ ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[repr(u16)]
        pub enum Op {
            $( $(#[$meta])* $name = $value, )+
        }

        impl Op {
            /// All tags, in declaration order.
            pub const ALL: &'static [Op] = &[ $( Op::$name, )+ ];

            /// Decodes a raw tag. Unknown values yield `None`.
            pub const fn from_raw(raw: u16) -> Option<Op> {
                $(
                    if raw == Op::$name as u16 {
                        return Some(Op::$name);
                    }
                )+
                None
            }
        }
    };
}

ops! {
    Init = 1000,

    PbufHeader = 2000,
    PbufFree = 2001,
    PbufAlloc = 2002,
    PbufTake = 2003,
    PbufCopyPartial = 2004,
    PbufRef = 2005,
    PbufGetAt = 2006,
    PbufCat = 2007,
    PbufGetContiguous = 2008,

    TcpClose = 3000,
    TcpShutdown = 3001,
    TcpAbort = 3002,
    TcpBind = 3003,
    TcpListen = 3004,
    TcpRecved = 3005,
    TcpConnect = 3006,
    TcpNew = 3007,
    TcpArg = 3008,
    TcpRecv = 3009,
    TcpSent = 3010,
    TcpErr = 3011,
    TcpAccept = 3012,
    TcpWrite = 3013,
    TcpOutput = 3014,
    TcpBindNetif = 3015,
    TcpListenWithErr = 3016,
    TcpPoll = 3017,
    TcpSetPrio = 3018,
    TcpBacklogDelayed = 3019,
    TcpBacklogAccepted = 3020,

    UdpSend = 4000,
    UdpSendTo = 4001,
    UdpBind = 4002,
    UdpConnect = 4003,
    UdpDisconnect = 4004,
    UdpRecv = 4005,
    UdpRemove = 4006,
    UdpNew = 4007,
    UdpSendToIf = 4008,
    UdpSendToIfSrc = 4009,

    CheckTimeouts = 5000,

    DnsGetHostByName = 6000,
    DnsGetHostByNameAddrType = 6001,

    RawBind = 7000,
    RawConnect = 7001,
    RawSendTo = 7002,
    RawRemove = 7003,
    RawNew = 7004,
    RawRecv = 7005,
    RawSend = 7006,

    NetifAdd = 8000,
    NetifRemove = 8001,

    /// Frame handed up from a network interface driver, usually from its interrupt.
    Input = 9000,

    /// Arbitrary closure run in the worker context.
    Callback = 10000,
}

/// Subsystem a tag belongs to, derived from its numeric range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subsystem {
    Init,
    Buffer,
    Tcp,
    Udp,
    Timeouts,
    Dns,
    Raw,
    Netif,
    Input,
    Callback,
}

impl Op {
    pub const fn raw(self) -> u16 {
        self as u16
    }

    pub const fn subsystem(self) -> Subsystem {
        match self.raw() / 1000 {
            1 => Subsystem::Init,
            2 => Subsystem::Buffer,
            3 => Subsystem::Tcp,
            4 => Subsystem::Udp,
            5 => Subsystem::Timeouts,
            6 => Subsystem::Dns,
            7 => Subsystem::Raw,
            8 => Subsystem::Netif,
            9 => Subsystem::Input,
            _ => Subsystem::Callback,
        }
    }
}
