// Level-gated logging through a pki_common Logger. The format arguments are
// only evaluated when the level is enabled.

#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($level:expr, $logger:expr, $($arg:tt)*) => {{
        let level: ::log::Level = $level;
        if ::log::log_enabled!(level) {
            ($logger).log_args(level, format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => { $crate::log_at!(::log::Level::Debug, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => { $crate::log_at!(::log::Level::Info, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => { $crate::log_at!(::log::Level::Warn, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => { $crate::log_at!(::log::Level::Error, $logger, $($arg)*) };
}
