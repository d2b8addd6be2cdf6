#[doc(hidden)]
#[macro_export]
macro_rules! dispatch_log {
    ( $level:ident, $( $arg:expr ),+ ) => {
        {
            #[cfg(feature = "log")]
            log::$level!( $( $arg ),+ );
            #[cfg(feature = "defmt")]
            defmt::$level!( $( $arg ),+ );
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! error {
    ( $( $arg:expr ),+ ) => { $crate::dispatch_log!(error, $( $arg ),+ ) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! warn {
    ( $( $arg:expr ),+ ) => { $crate::dispatch_log!(warn, $( $arg ),+ ) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! info {
    ( $( $arg:expr ),+ ) => { $crate::dispatch_log!(info, $( $arg ),+ ) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! debug {
    ( $( $arg:expr ),+ ) => { $crate::dispatch_log!(debug, $( $arg ),+ ) };
}

#[doc(hidden)]
#[macro_export]
macro_rules! trace {
    ( $( $arg:expr ),+ ) => { $crate::dispatch_log!(trace, $( $arg ),+ ) };
}
