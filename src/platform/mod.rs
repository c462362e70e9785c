use crate::priority::Policy;
use std::{fmt, io, time::Duration};

/// The boxed entry point handed to the OS when spawning a thread.
pub(crate) type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Numeric thread id as seen by the OS (tid, mach thread id, Win32 thread id).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NativeId(pub u64);

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a single native timed wait performed by [`Platform::sleep`].
#[derive(Debug)]
pub(crate) enum SleepStatus {
    Elapsed,
    Interrupted,
    Failed(io::Error),
}

/// Everything the thread abstraction needs from the host OS.
///
/// Exactly one implementation, [`OsPlatform`], is compiled in per target.
pub(crate) trait Platform {
    /// Opaque handle to a spawned OS thread, valid until joined or detached.
    type Handle: Copy + Send + Sync + fmt::Debug;

    /// Spawn a thread running `entry`. A `stack_size` of 0 uses the OS default.
    /// Returns the native id as well when the OS reports it at creation time.
    fn spawn(stack_size: usize, entry: Entry) -> io::Result<(Self::Handle, Option<NativeId>)>;

    /// Block until the thread exits and release its resources.
    fn join(handle: Self::Handle) -> io::Result<()>;

    /// Release the thread's resources once it exits, without waiting for it.
    fn detach(handle: Self::Handle) -> io::Result<()>;

    fn set_priority(handle: Self::Handle, os_priority: i32, policy: Policy) -> io::Result<()>;

    /// The inclusive `(min, max)` priority range of the policy, `None` if unsupported.
    fn priority_range(policy: Policy) -> Option<(i32, i32)>;

    /// Whether [`Platform::set_affinity`] can ever succeed on this target.
    fn affinity_supported() -> bool;

    fn set_affinity(handle: Self::Handle, cpu: usize) -> io::Result<()>;

    /// The single cpu the thread is bound to, `None` if it may run on several.
    fn affinity(handle: Self::Handle) -> io::Result<Option<usize>>;

    fn current_native_id() -> NativeId;

    /// Perform one native timed wait, reporting whether a signal cut it short.
    fn sleep(duration: Duration) -> SleepStatus;

    /// Hint to the system to yield the current thread of execution
    fn yield_now();

    /// Best-effort display name for the calling thread.
    fn set_current_name(name: &str);

    /// Block process-directed termination signals on the calling thread.
    fn block_signals();

    /// Keep writes to closed pipes from killing the calling thread's process.
    fn block_broken_pipe();

    /// The minimum size in bytes for custom thread stacks
    fn min_stack_size() -> usize;

    fn page_size() -> usize;

    /// Number of cpus configured in the system, online or not.
    /// Upper bound for the cpu indices accepted by [`Platform::set_affinity`].
    fn configured_cpus() -> Option<usize>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::OsPlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::OsPlatform;

#[cfg(not(any(unix, windows)))]
compile_error!("yaar-thread only supports unix and windows targets");

pub(crate) type OsHandle = <OsPlatform as Platform>::Handle;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_limits_are_sane() {
        let page = OsPlatform::page_size();
        assert!(page.is_power_of_two());
        assert!(OsPlatform::min_stack_size() > 0);
    }

    #[test]
    fn configured_cpus_cover_the_usable_ones() {
        if let Some(configured) = OsPlatform::configured_cpus() {
            assert!(configured >= num_cpus::get());
        }
    }

    #[test]
    fn default_policy_has_a_range() {
        let (min, max) = OsPlatform::priority_range(Policy::Other).unwrap();
        assert!(min <= max);
    }

    #[test]
    fn native_id_is_stable_per_thread() {
        let here = OsPlatform::current_native_id();
        assert_eq!(here, OsPlatform::current_native_id());

        let there = std::thread::spawn(OsPlatform::current_native_id)
            .join()
            .unwrap();
        assert_ne!(here, there);
    }
}
