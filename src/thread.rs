use crate::{
    affinity,
    completion::CompletionSignal,
    error::{Error, Result},
    fault::{self, Fault, Outcome},
    platform::{NativeId, OsHandle, OsPlatform, Platform},
    priority::{self, Policy, Priority},
    registry,
};
use parking_lot::{Mutex, MutexGuard};
use std::{
    fmt, io,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

// Reserved in `Inner::native_id` for "not reported yet".
const UNKNOWN_NATIVE_ID: u64 = 0;

pub(crate) struct Inner {
    id: u64,
    started: AtomicBool,
    joined: AtomicBool,
    // Set for the lifetime of a launch: from `start` until the closure has returned.
    // Only ever cleared while holding `state`, so a native handle observed with
    // `running` set under the lock refers to a thread which hasn't exited.
    running: AtomicBool,
    native_id: AtomicU64,
    state: Mutex<State>,
}

struct State {
    name: Option<String>,
    priority: Priority,
    os_priority: i32,
    policy: Policy,
    stack_size: usize,
    affinity: Option<usize>,
    handle: Option<OsHandle>,
    completion: Arc<CompletionSignal>,
}

impl Inner {
    fn new(name: Option<String>) -> Self {
        let policy = Policy::default();
        let priority = Priority::default();
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            started: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            running: AtomicBool::new(false),
            native_id: AtomicU64::new(UNKNOWN_NATIVE_ID),
            state: Mutex::new(State {
                name,
                priority,
                os_priority: priority::to_native(priority, policy).unwrap_or(0),
                policy,
                stack_size: 0,
                affinity: None,
                handle: None,
                completion: Arc::new(CompletionSignal::new()),
            }),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn native_id(&self) -> Option<NativeId> {
        match self.native_id.load(Ordering::Acquire) {
            UNKNOWN_NATIVE_ID => None,
            id => Some(NativeId(id)),
        }
    }

    fn record_native_id(&self, native_id: NativeId) {
        let _ = self.native_id.compare_exchange(
            UNKNOWN_NATIVE_ID,
            native_id.0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// The native handle, if it refers to a thread which is still executing the closure.
    fn live(&self, state: &MutexGuard<'_, State>) -> Option<OsHandle> {
        state.handle.filter(|_| self.is_running())
    }
}

/// Round a requested stack size up to whole pages and the platform minimum.
/// Zero keeps meaning "OS default".
fn normalize_stack_size(bytes: usize) -> usize {
    if bytes == 0 {
        return 0;
    }

    let page = OsPlatform::page_size();
    let rounded = match bytes.checked_add(page - 1) {
        Some(bytes) => bytes / page * page,
        None => usize::MAX / page * page,
    };

    rounded.max(OsPlatform::min_stack_size())
}

/// Everything the new OS thread runs, from registration to completion.
fn trampoline<F, R>(
    inner: Arc<Inner>,
    name: Option<String>,
    completion: Arc<CompletionSignal>,
    f: F,
) where
    F: FnOnce() -> R,
    R: Outcome,
{
    let native_id = OsPlatform::current_native_id();
    inner.record_native_id(native_id);
    registry::register(native_id, &inner);

    OsPlatform::block_signals();
    if let Some(name) = name.as_deref() {
        OsPlatform::set_current_name(name);
    }

    tracing::trace!(thread_id = inner.id, %native_id, "thread entered");

    let fault = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome.into_fault(),
        Err(payload) => Some(Fault::Panic(payload)),
    };

    if let Some(fault) = fault {
        // A panicking handler must not unwind out of the OS entry point.
        if panic::catch_unwind(AssertUnwindSafe(|| fault::report(fault))).is_err() {
            tracing::error!(thread_id = inner.id, "error handler panicked");
        }
    }

    {
        let _state = inner.state.lock();
        inner.running.store(false, Ordering::Release);
    }

    tracing::trace!(thread_id = inner.id, "thread completed");
    completion.set();
}

/// A shared view of a [`Thread`] used to inspect and reconfigure it.
///
/// Unlike the owning [`Thread`] it can't start or join the thread, and
/// dropping it has no effect on the OS thread. [`current`](crate::current)
/// hands these out to code running on the thread itself.
#[derive(Clone)]
pub struct ThreadRef {
    inner: Arc<Inner>,
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("native_id", &self.native_id())
            .field("started", &self.is_started())
            .field("running", &self.is_running())
            .field("joined", &self.is_joined())
            .finish()
    }
}

impl ThreadRef {
    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Whether both refer to the same thread.
    pub fn ptr_eq(&self, other: &ThreadRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Process-unique id of the thread, assigned at creation and starting at 1.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The OS-visible id of the current or last launch.
    ///
    /// Some platforms only report it from within the new thread,
    /// so this can be `None` for a moment after [`Thread::start`].
    pub fn native_id(&self) -> Option<NativeId> {
        self.inner.native_id()
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    /// Name the thread. The name is applied to the OS thread on start,
    /// or immediately when called from the thread itself.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        if self.is_current() {
            OsPlatform::set_current_name(&name);
        }
        self.inner.state.lock().name = Some(name);
    }

    fn is_current(&self) -> bool {
        crate::current().map_or(false, |current| current.ptr_eq(self))
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_joined(&self) -> bool {
        self.inner.joined.load(Ordering::Acquire)
    }

    /// Whether a launched closure has yet to return.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn priority(&self) -> Priority {
        self.inner.state.lock().priority
    }

    pub fn os_priority(&self) -> i32 {
        self.inner.state.lock().os_priority
    }

    pub fn policy(&self) -> Policy {
        self.inner.state.lock().policy
    }

    /// Schedule the thread at `priority` under the default policy.
    ///
    /// The setting is remembered and applied on start if the thread isn't
    /// running, otherwise it is applied immediately.
    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.priority == priority {
            return Ok(());
        }

        let policy = Policy::Other;
        let os_priority = priority::to_native(priority, policy)?;
        state.priority = priority;
        state.os_priority = os_priority;
        state.policy = policy;

        if let Some(handle) = self.inner.live(&state) {
            OsPlatform::set_priority(handle, os_priority, policy).map_err(Error::PrioritySet)?;
            tracing::debug!(
                thread_id = self.inner.id,
                ?priority,
                os_priority,
                "thread priority applied"
            );
        }

        Ok(())
    }

    /// Schedule the thread with a native priority value under `policy`.
    ///
    /// [`priority`](Self::priority) then reports the matching level, which
    /// is [`Priority::Highest`] for all non-default policies.
    pub fn set_os_priority(&self, os_priority: i32, policy: Policy) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.os_priority == os_priority && state.policy == policy {
            return Ok(());
        }

        let priority = priority::from_native(os_priority, policy)?;
        state.priority = priority;
        state.os_priority = os_priority;
        state.policy = policy;

        if let Some(handle) = self.inner.live(&state) {
            OsPlatform::set_priority(handle, os_priority, policy).map_err(Error::PrioritySet)?;
            tracing::debug!(
                thread_id = self.inner.id,
                %policy,
                os_priority,
                "thread priority applied"
            );
        }

        Ok(())
    }

    pub fn stack_size(&self) -> usize {
        self.inner.state.lock().stack_size
    }

    /// Request a stack of at least `bytes` for the next launch.
    ///
    /// The size is rounded up to whole pages and to the platform minimum.
    /// Zero selects the OS default. A thread already running keeps its stack.
    pub fn set_stack_size(&self, bytes: usize) {
        self.inner.state.lock().stack_size = normalize_stack_size(bytes);
    }

    /// Bind the thread to the logical `cpu`.
    ///
    /// Threads which aren't running are bound once started.
    /// Fails with [`AffinityError::Unsupported`] on platforms without affinity control.
    pub fn set_affinity(&self, cpu: usize) -> Result<()> {
        affinity::validate(cpu)?;

        let mut state = self.inner.state.lock();
        if let Some(handle) = self.inner.live(&state) {
            affinity::bind(handle, cpu)?;
        }
        state.affinity = Some(cpu);
        drop(state);

        // Give the scheduler a chance to migrate us if we just bound ourselves.
        OsPlatform::yield_now();
        Ok(())
    }

    /// The logical cpu the thread is bound to.
    ///
    /// For a running thread this reads the effective affinity mask from the
    /// OS, so a thread restricted to a single cpu by other means (a one cpu
    /// host, `taskset`, an inherited mask) reports that cpu as well.
    /// `None` if the thread may run on several cpus, if it isn't running and
    /// no binding was requested yet, or if the platform has no affinity support.
    pub fn affinity(&self) -> Result<Option<usize>> {
        let state = self.inner.state.lock();
        match self.inner.live(&state) {
            Some(handle) => Ok(affinity::query(handle)?),
            None => Ok(state.affinity),
        }
    }
}

/// An OS thread, configured before it is started and joined afterwards.
///
/// A `Thread` can be started again once its previous launch has completed.
///
/// Dropping a `Thread` that was started but not joined detaches the OS
/// thread: it keeps running and its resources are released once it exits.
///
/// ```no_run
/// use yaar_thread::{Priority, Thread};
/// use std::time::Duration;
///
/// let thread = Thread::with_name("worker");
/// thread.set_priority(Priority::High)?;
/// thread.start(|| yaar_thread::sleep(Duration::from_millis(10)))?;
/// assert!(thread.join_timeout(Duration::from_secs(1))?);
/// # Ok::<(), yaar_thread::Error>(())
/// ```
pub struct Thread {
    thread: ThreadRef,
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.thread.fmt(f)
    }
}

impl Deref for Thread {
    type Target = ThreadRef;

    fn deref(&self) -> &ThreadRef {
        &self.thread
    }
}

impl AsRef<ThreadRef> for Thread {
    fn as_ref(&self) -> &ThreadRef {
        &self.thread
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let inner = &self.thread.inner;
        let handle = inner.state.lock().handle.take();

        if let Some(handle) = handle {
            match OsPlatform::detach(handle) {
                Ok(()) => tracing::trace!(thread_id = inner.id, "thread detached"),
                Err(err) => tracing::warn!(thread_id = inner.id, %err, "failed to detach thread"),
            }
        }
    }
}

impl Thread {
    pub fn new() -> Self {
        Self::from_name(None)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self::from_name(Some(name.into()))
    }

    fn from_name(name: Option<String>) -> Self {
        Self {
            thread: ThreadRef::from_inner(Arc::new(Inner::new(name))),
        }
    }

    /// A shared view of this thread which can outlive it.
    pub fn to_ref(&self) -> ThreadRef {
        self.thread.clone()
    }

    /// Run `f` on a new OS thread.
    ///
    /// The configured stack size, priority and affinity are applied to the new
    /// thread. Errors returned by `f` and panics are handed to the installed
    /// [`ErrorHandler`](crate::ErrorHandler) instead of propagating.
    ///
    /// Fails with [`Error::AlreadyRunning`] if a previous launch hasn't returned yet.
    /// If applying the priority or affinity fails the thread stays started.
    pub fn start<F, R>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Outcome + 'static,
    {
        let inner = &self.thread.inner;
        let mut state = inner.state.lock();
        if inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        // Reap a previous launch which completed without being joined.
        if let Some(previous) = state.handle.take() {
            if let Err(err) = OsPlatform::join(previous) {
                state.handle = Some(previous);
                inner.running.store(false, Ordering::Release);
                return Err(Error::Join(err));
            }
        }

        let completion = Arc::new(CompletionSignal::new());
        state.completion = completion.clone();
        inner.joined.store(false, Ordering::Release);
        inner.native_id.store(UNKNOWN_NATIVE_ID, Ordering::Release);

        let entry = {
            let inner = inner.clone();
            let name = state.name.clone();
            let completion = completion.clone();
            Box::new(move || trampoline(inner, name, completion, f))
        };

        let (handle, native_id) = match OsPlatform::spawn(state.stack_size, entry) {
            Ok(spawned) => spawned,
            Err(err) => {
                inner.running.store(false, Ordering::Release);
                // Nothing will ever run to set it; release anyone joining a previous launch.
                completion.set();
                return Err(Error::ThreadCreation(err));
            }
        };

        if let Some(native_id) = native_id {
            inner.record_native_id(native_id);
        }

        state.handle = Some(handle);
        inner.started.store(true, Ordering::Release);
        tracing::trace!(
            thread_id = inner.id,
            stack_size = state.stack_size,
            "thread started"
        );

        // Nothing left to configure if the closure already returned.
        let handle = match inner.live(&state) {
            Some(handle) => handle,
            None => return Ok(()),
        };

        if state.policy != Policy::Other || state.priority != Priority::Normal {
            OsPlatform::set_priority(handle, state.os_priority, state.policy)
                .map_err(Error::PrioritySet)?;
            tracing::debug!(
                thread_id = inner.id,
                os_priority = state.os_priority,
                policy = %state.policy,
                "thread priority applied"
            );
        }

        if let Some(cpu) = state.affinity {
            affinity::bind(handle, cpu)?;
        }

        Ok(())
    }

    /// Wait for the closure to return and release the OS thread.
    /// Returns immediately if the thread was never started.
    pub fn join(&self) -> Result<()> {
        self.ensure_not_current()?;
        if !self.is_started() {
            return Ok(());
        }

        let completion = self.thread.inner.state.lock().completion.clone();
        completion.wait();
        self.reap()
    }

    /// Like [`join`](Self::join) but gives up after `timeout`, returning `false`.
    /// The thread can still be joined later.
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool> {
        self.ensure_not_current()?;
        if !self.is_started() {
            return Ok(true);
        }

        let completion = self.thread.inner.state.lock().completion.clone();
        if !completion.wait_timeout(timeout) {
            return Ok(false);
        }

        self.reap().map(|()| true)
    }

    fn ensure_not_current(&self) -> Result<()> {
        if self.is_current() && self.is_running() {
            let err = io::Error::new(io::ErrorKind::Other, "a thread cannot join itself");
            return Err(Error::Join(err));
        }
        Ok(())
    }

    fn reap(&self) -> Result<()> {
        let inner = &self.thread.inner;
        let mut state = inner.state.lock();

        if let Some(handle) = state.handle.take() {
            if let Err(err) = OsPlatform::join(handle) {
                state.handle = Some(handle);
                return Err(Error::Join(err));
            }
            tracing::trace!(thread_id = inner.id, "thread joined");
        }

        inner.joined.store(true, Ordering::Release);
        Ok(())
    }

    pub fn min_os_priority(policy: Policy) -> Result<i32> {
        priority::min_os_priority(policy)
    }

    pub fn max_os_priority(policy: Policy) -> Result<i32> {
        priority::max_os_priority(policy)
    }

    pub fn current() -> Option<ThreadRef> {
        registry::current()
    }

    pub fn current_native_id() -> NativeId {
        registry::current_native_id()
    }

    pub fn sleep(duration: Duration) -> Result<()> {
        crate::sleep(duration)
    }

    pub fn yield_now() {
        crate::yield_now()
    }
}
