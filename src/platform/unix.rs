use super::{Entry, NativeId, Platform, SleepStatus};
use crate::priority::Policy;
use libc::{c_int, c_void};
use std::{io, mem, ptr, time::Duration};

#[cfg(target_os = "linux")]
const STACK_MIN: usize = libc::PTHREAD_STACK_MIN;
#[cfg(not(target_os = "linux"))]
const STACK_MIN: usize = 16 * 1024;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// A `pthread_t` which is only ever used while the thread is joinable.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RawThread(libc::pthread_t);

unsafe impl Send for RawThread {}
unsafe impl Sync for RawThread {}

pub(crate) struct OsPlatform;

extern "C" fn thread_start(arg: *mut c_void) -> *mut c_void {
    let entry = unsafe { Box::from_raw(arg as *mut Entry) };
    entry();
    ptr::null_mut()
}

fn check(r: c_int) -> io::Result<()> {
    match r {
        0 => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

fn native_policy(policy: Policy) -> c_int {
    match policy {
        Policy::Other => libc::SCHED_OTHER,
        Policy::Fifo => libc::SCHED_FIFO,
        Policy::RoundRobin => libc::SCHED_RR,
    }
}

#[cfg(target_os = "linux")]
fn spawned_native_id(_thread: libc::pthread_t) -> Option<NativeId> {
    // The kernel tid is only observable from inside the new thread.
    None
}

#[cfg(target_os = "macos")]
fn spawned_native_id(thread: libc::pthread_t) -> Option<NativeId> {
    let mut id = 0u64;
    match unsafe { libc::pthread_threadid_np(thread, &mut id) } {
        0 => Some(NativeId(id)),
        _ => None,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn spawned_native_id(thread: libc::pthread_t) -> Option<NativeId> {
    Some(NativeId(thread as usize as u64))
}

/// Linux limits thread names to 15 bytes. Longer names keep their head and
/// tail around a `~` so that numbered worker names stay distinguishable.
#[cfg(target_os = "linux")]
fn truncate_name(name: &str) -> std::borrow::Cow<'_, str> {
    const MAX: usize = 15;
    const KEEP: usize = 7;

    if name.len() <= MAX {
        return name.into();
    }

    let mut head = KEEP;
    while !name.is_char_boundary(head) {
        head -= 1;
    }

    let mut tail = name.len() - KEEP;
    while !name.is_char_boundary(tail) {
        tail += 1;
    }

    format!("{}~{}", &name[..head], &name[tail..]).into()
}

impl Platform for OsPlatform {
    type Handle = RawThread;

    fn spawn(stack_size: usize, entry: Entry) -> io::Result<(RawThread, Option<NativeId>)> {
        unsafe {
            let mut attr: libc::pthread_attr_t = mem::zeroed();
            check(libc::pthread_attr_init(&mut attr))?;

            if stack_size != 0 {
                if let Err(err) = check(libc::pthread_attr_setstacksize(&mut attr, stack_size)) {
                    let r = libc::pthread_attr_destroy(&mut attr);
                    debug_assert_eq!(r, 0);
                    return Err(err);
                }
            }

            let arg = Box::into_raw(Box::new(entry));
            let mut native: libc::pthread_t = mem::zeroed();
            let created = check(libc::pthread_create(
                &mut native,
                &attr,
                thread_start,
                arg as *mut c_void,
            ));

            let r = libc::pthread_attr_destroy(&mut attr);
            debug_assert_eq!(r, 0);

            if let Err(err) = created {
                // The thread never ran, so the entry is still ours to drop.
                drop(Box::from_raw(arg));
                return Err(err);
            }

            Ok((RawThread(native), spawned_native_id(native)))
        }
    }

    fn join(handle: RawThread) -> io::Result<()> {
        check(unsafe { libc::pthread_join(handle.0, ptr::null_mut()) })
    }

    fn detach(handle: RawThread) -> io::Result<()> {
        check(unsafe { libc::pthread_detach(handle.0) })
    }

    fn set_priority(handle: RawThread, os_priority: i32, policy: Policy) -> io::Result<()> {
        unsafe {
            let mut param: libc::sched_param = mem::zeroed();
            param.sched_priority = os_priority;
            check(libc::pthread_setschedparam(
                handle.0,
                native_policy(policy),
                &param,
            ))
        }
    }

    fn priority_range(policy: Policy) -> Option<(i32, i32)> {
        let policy = native_policy(policy);
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(policy),
                libc::sched_get_priority_max(policy),
            )
        };

        if min == -1 || max == -1 {
            None
        } else {
            Some((min, max))
        }
    }

    fn affinity_supported() -> bool {
        cfg!(target_os = "linux")
    }

    #[cfg(target_os = "linux")]
    fn set_affinity(handle: RawThread, cpu: usize) -> io::Result<()> {
        if cpu >= libc::CPU_SETSIZE as usize {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu, &mut set);
            check(libc::pthread_setaffinity_np(
                handle.0,
                mem::size_of::<libc::cpu_set_t>(),
                &set,
            ))
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn set_affinity(_handle: RawThread, _cpu: usize) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    #[cfg(target_os = "linux")]
    fn affinity(handle: RawThread) -> io::Result<Option<usize>> {
        let set = unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            libc::CPU_ZERO(&mut set);
            check(libc::pthread_getaffinity_np(
                handle.0,
                mem::size_of::<libc::cpu_set_t>(),
                &mut set,
            ))?;
            set
        };

        let mut bound =
            (0..libc::CPU_SETSIZE as usize).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) });
        match (bound.next(), bound.next()) {
            (Some(cpu), None) => Ok(Some(cpu)),
            _ => Ok(None),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn affinity(_handle: RawThread) -> io::Result<Option<usize>> {
        Ok(None)
    }

    #[cfg(target_os = "linux")]
    fn current_native_id() -> NativeId {
        NativeId(unsafe { libc::syscall(libc::SYS_gettid) } as u64)
    }

    #[cfg(target_os = "macos")]
    fn current_native_id() -> NativeId {
        let mut id = 0u64;
        let r = unsafe { libc::pthread_threadid_np(libc::pthread_self(), &mut id) };
        debug_assert_eq!(r, 0);
        NativeId(id)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn current_native_id() -> NativeId {
        NativeId(unsafe { libc::pthread_self() } as usize as u64)
    }

    fn sleep(duration: Duration) -> SleepStatus {
        let mut ts: libc::timespec = unsafe { mem::zeroed() };
        ts.tv_sec = duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t;
        ts.tv_nsec = duration.subsec_nanos() as _;

        if unsafe { libc::nanosleep(&ts, ptr::null_mut()) } == 0 {
            return SleepStatus::Elapsed;
        }

        match io::Error::last_os_error() {
            err if err.kind() == io::ErrorKind::Interrupted => SleepStatus::Interrupted,
            err => SleepStatus::Failed(err),
        }
    }

    fn yield_now() {
        let r = unsafe { libc::sched_yield() };
        debug_assert_eq!(r, 0);
    }

    #[cfg(target_os = "linux")]
    fn set_current_name(name: &str) {
        if let Ok(name) = std::ffi::CString::new(truncate_name(name).as_bytes()) {
            let _ = unsafe { libc::pthread_setname_np(libc::pthread_self(), name.as_ptr()) };
        }
    }

    #[cfg(target_os = "macos")]
    fn set_current_name(name: &str) {
        if let Ok(name) = std::ffi::CString::new(name) {
            let _ = unsafe { libc::pthread_setname_np(name.as_ptr()) };
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn set_current_name(_name: &str) {}

    fn block_signals() {
        block(&[libc::SIGQUIT, libc::SIGTERM, libc::SIGPIPE]);
    }

    fn block_broken_pipe() {
        block(&[libc::SIGPIPE]);
    }

    fn min_stack_size() -> usize {
        STACK_MIN
    }

    fn page_size() -> usize {
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as usize,
            _ => FALLBACK_PAGE_SIZE,
        }
    }

    fn configured_cpus() -> Option<usize> {
        match unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) } {
            count if count > 0 => Some(count as usize),
            _ => None,
        }
    }
}

fn block(signals: &[c_int]) {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        for &signal in signals {
            libc::sigaddset(&mut set, signal);
        }

        let r = libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut());
        debug_assert_eq!(r, 0);
    }
}
