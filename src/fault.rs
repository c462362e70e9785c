use crate::error::Error;
use parking_lot::{const_rwlock, RwLock};
use std::{any::Any, error::Error as StdError, fmt, io, sync::Arc};

/// A failure raised by a closure running on a [`Thread`](crate::Thread).
///
/// Faults never propagate past the thread's entry point. They are handed to
/// the installed [`ErrorHandler`] instead.
pub enum Fault {
    /// The closure returned one of this crate's errors.
    Thread(Error),
    /// The closure returned some other error.
    Runtime(Box<dyn StdError + Send + Sync + 'static>),
    /// The closure panicked with the given payload.
    Panic(Box<dyn Any + Send + 'static>),
}

impl Fault {
    pub fn runtime(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Runtime(err.into())
    }

    /// The panic message, when the payload is a string.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            Self::Panic(payload) => payload
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(err) => err.fmt(f),
            Self::Runtime(err) => err.fmt(f),
            Self::Panic(_) => match self.panic_message() {
                Some(message) => write!(f, "panicked: {}", message),
                None => f.write_str("panicked"),
            },
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(err) => f.debug_tuple("Thread").field(err).finish(),
            Self::Runtime(err) => f.debug_tuple("Runtime").field(err).finish(),
            Self::Panic(_) => f.debug_tuple("Panic").field(&self.panic_message()).finish(),
        }
    }
}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        Self::Thread(err)
    }
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        Self::Runtime(err.into())
    }
}

impl From<Box<dyn StdError + Send + Sync + 'static>> for Fault {
    fn from(err: Box<dyn StdError + Send + Sync + 'static>) -> Self {
        Self::Runtime(err)
    }
}

/// Values a thread closure may return.
pub trait Outcome {
    fn into_fault(self) -> Option<Fault>;
}

impl Outcome for () {
    fn into_fault(self) -> Option<Fault> {
        None
    }
}

impl<E: Into<Fault>> Outcome for Result<(), E> {
    fn into_fault(self) -> Option<Fault> {
        self.err().map(Into::into)
    }
}

/// Receives the faults of closures running on threads of this crate.
///
/// Handlers run on the faulting thread, so [`current`](crate::current) can be
/// used to find out which thread it was.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, fault: Fault);
}

/// Logs every fault at error level.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, fault: Fault) {
        let thread = crate::current();
        tracing::error!(
            thread_id = thread.as_ref().map(|t| t.id()),
            thread_name = thread.as_ref().and_then(|t| t.name()).as_deref(),
            %fault,
            "unhandled fault in thread",
        );
    }
}

static HANDLER: RwLock<Option<Arc<dyn ErrorHandler>>> = const_rwlock(None);

/// Install `handler` for all threads, returning the one it replaces.
pub fn set_error_handler(handler: Arc<dyn ErrorHandler>) -> Arc<dyn ErrorHandler> {
    HANDLER
        .write()
        .replace(handler)
        .unwrap_or_else(|| Arc::new(LogErrorHandler))
}

/// The handler currently receiving faults.
pub fn error_handler() -> Arc<dyn ErrorHandler> {
    HANDLER
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(LogErrorHandler))
}

pub(crate) fn report(fault: Fault) {
    error_handler().handle(fault)
}
