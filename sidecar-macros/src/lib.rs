#[doc(hidden)]
pub use log as __log;

/// Lets a macro body define new `macro_rules!` that need their own `$` tokens.
/// The body receives the dollar sign as `$d`.
#[macro_export]
macro_rules! with_dollar_sign {
    ($($body:tt)*) => {
        macro_rules! __with_dollar_sign { $($body)* }
        __with_dollar_sign!($);
    }
}

#[macro_export]
macro_rules! sidecar_log {
    ($level:ident, $target:expr, $($arg:tt)+) => {
        $crate::__log::$level!(target: $target, $($arg)+)
    };
}

/// Declares module local `debug!`, `info!`, `warn!` and `error!` macros that log
/// under the given target.
///
/// ```ignore
/// logger!("Registrar");
/// info!("Created {}", name);
/// ```
#[macro_export]
macro_rules! logger {
    ($target:literal) => {
        $crate::with_dollar_sign! {
            ($d:tt) => {
                #[allow(unused_macros)]
                macro_rules! debug {
                    ($d($d arg:tt)+) => { $crate::sidecar_log!(debug, $target, $d($d arg)+) };
                }
                #[allow(unused_macros)]
                macro_rules! info {
                    ($d($d arg:tt)+) => { $crate::sidecar_log!(info, $target, $d($d arg)+) };
                }
                #[allow(unused_macros)]
                macro_rules! warn {
                    ($d($d arg:tt)+) => { $crate::sidecar_log!(warn, $target, $d($d arg)+) };
                }
                #[allow(unused_macros)]
                macro_rules! error {
                    ($d($d arg:tt)+) => { $crate::sidecar_log!(error, $target, $d($d arg)+) };
                }
            }
        }
    };
}
