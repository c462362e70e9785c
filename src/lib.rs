//! Native OS threads behind one contract on every platform.
//!
//! A [`Thread`] is configured (name, stack size, [`Priority`], cpu affinity),
//! started with a closure, and joined, optionally with a timeout. The
//! per-OS differences are absorbed here:
//!
//! * Priorities are five abstract levels spread over the native range of the
//!   scheduling [`Policy`], see [`priority`].
//! * [`sleep`] keeps sleeping when signals interrupt the native wait.
//! * Affinity is reported as unsupported instead of being silently ignored.
//! * Panics and errors of the closure go to an [`ErrorHandler`] instead of
//!   tearing down the process.

#![warn(rust_2018_idioms)]

mod affinity;
mod builder;
mod completion;
mod error;
mod fault;
mod init;
mod platform;
pub mod priority;
mod registry;
mod sleep;
mod thread;

pub use self::{
    affinity::cpu_count,
    builder::Builder,
    completion::CompletionSignal,
    error::{AffinityError, Error, Result},
    fault::{error_handler, set_error_handler, ErrorHandler, Fault, LogErrorHandler, Outcome},
    init::initialize,
    platform::NativeId,
    priority::{Policy, Priority, PriorityRange},
    registry::{current, current_native_id},
    sleep::{sleep, yield_now},
    thread::{Thread, ThreadRef},
};
