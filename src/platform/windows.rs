use super::{Entry, NativeId, Platform, SleepStatus};
use crate::priority::Policy;
use std::{ffi::OsStr, io, mem, os::windows::ffi::OsStrExt, ptr, time::Duration};
use winapi::{
    shared::{
        basetsd::DWORD_PTR,
        minwindef::{DWORD, FALSE, LPVOID},
    },
    um::{
        handleapi::CloseHandle,
        processthreadsapi::{
            CreateThread, GetCurrentProcess, GetCurrentThread, GetCurrentThreadId,
            SetThreadDescription, SetThreadPriority, SwitchToThread,
        },
        synchapi::{Sleep, WaitForSingleObject},
        sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
        winbase::{
            GetProcessAffinityMask, SetThreadAffinityMask, INFINITE,
            STACK_SIZE_PARAM_IS_A_RESERVATION, WAIT_OBJECT_0,
        },
        winnt::HANDLE,
    },
};

// THREAD_PRIORITY_LOWEST and THREAD_PRIORITY_HIGHEST.
const PRIORITY_MIN: i32 = -2;
const PRIORITY_MAX: i32 = 2;

// Longest finite wait `Sleep` accepts, `INFINITE` itself never returns.
const MAX_SLEEP_MILLIS: DWORD = INFINITE - 1;

// Stacks are reserved in units of the allocation granularity.
const STACK_MIN: usize = 64 * 1024;

/// A thread `HANDLE` which is closed exactly once, by join or detach.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RawThread(HANDLE);

unsafe impl Send for RawThread {}
unsafe impl Sync for RawThread {}

pub(crate) struct OsPlatform;

unsafe extern "system" fn thread_start(arg: LPVOID) -> DWORD {
    let entry = Box::from_raw(arg as *mut Entry);
    entry();
    0
}

/// The `Sleep` argument for `duration`, and whether it had to be capped.
/// Sub-millisecond remainders round up so they are never cut short.
fn sleep_millis(duration: Duration) -> (DWORD, bool) {
    let millis = (duration.as_nanos() + 999_999) / 1_000_000;
    match DWORD::try_from(millis) {
        Ok(millis) if millis <= MAX_SLEEP_MILLIS => (millis, false),
        _ => (MAX_SLEEP_MILLIS, true),
    }
}

fn close(handle: RawThread) -> io::Result<()> {
    match unsafe { CloseHandle(handle.0) } {
        FALSE => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

impl Platform for OsPlatform {
    type Handle = RawThread;

    fn spawn(stack_size: usize, entry: Entry) -> io::Result<(RawThread, Option<NativeId>)> {
        let arg = Box::into_raw(Box::new(entry));
        let flags = if stack_size != 0 {
            STACK_SIZE_PARAM_IS_A_RESERVATION
        } else {
            0
        };

        let mut thread_id: DWORD = 0;
        let handle = unsafe {
            CreateThread(
                ptr::null_mut(),
                stack_size,
                Some(thread_start),
                arg as LPVOID,
                flags,
                &mut thread_id,
            )
        };

        if handle.is_null() {
            let err = io::Error::last_os_error();
            // The thread never ran, so the entry is still ours to drop.
            drop(unsafe { Box::from_raw(arg) });
            return Err(err);
        }

        Ok((RawThread(handle), Some(NativeId(thread_id as u64))))
    }

    fn join(handle: RawThread) -> io::Result<()> {
        if unsafe { WaitForSingleObject(handle.0, INFINITE) } != WAIT_OBJECT_0 {
            return Err(io::Error::last_os_error());
        }
        close(handle)
    }

    fn detach(handle: RawThread) -> io::Result<()> {
        close(handle)
    }

    fn set_priority(handle: RawThread, os_priority: i32, policy: Policy) -> io::Result<()> {
        if policy != Policy::Other {
            return Err(io::ErrorKind::Unsupported.into());
        }

        match unsafe { SetThreadPriority(handle.0, os_priority) } {
            FALSE => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    fn priority_range(policy: Policy) -> Option<(i32, i32)> {
        match policy {
            Policy::Other => Some((PRIORITY_MIN, PRIORITY_MAX)),
            Policy::Fifo | Policy::RoundRobin => None,
        }
    }

    fn affinity_supported() -> bool {
        true
    }

    fn set_affinity(handle: RawThread, cpu: usize) -> io::Result<()> {
        if cpu >= mem::size_of::<DWORD_PTR>() * 8 {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        match unsafe { SetThreadAffinityMask(handle.0, 1 << cpu) } {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    fn affinity(handle: RawThread) -> io::Result<Option<usize>> {
        // There is no getter: swap in the process mask to read the previous one, then restore it.
        let mut process: DWORD_PTR = 0;
        let mut system: DWORD_PTR = 0;
        let r = unsafe { GetProcessAffinityMask(GetCurrentProcess(), &mut process, &mut system) };
        if r == FALSE {
            return Err(io::Error::last_os_error());
        }

        let mask = match unsafe { SetThreadAffinityMask(handle.0, process) } {
            0 => return Err(io::Error::last_os_error()),
            mask => mask,
        };

        if unsafe { SetThreadAffinityMask(handle.0, mask) } == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(match mask.count_ones() {
            1 => Some(mask.trailing_zeros() as usize),
            _ => None,
        })
    }

    fn current_native_id() -> NativeId {
        NativeId(unsafe { GetCurrentThreadId() } as u64)
    }

    fn sleep(duration: Duration) -> SleepStatus {
        let (millis, capped) = sleep_millis(duration);
        unsafe { Sleep(millis) };

        // A capped wait ends early; let the caller resume for the rest.
        if capped {
            SleepStatus::Interrupted
        } else {
            SleepStatus::Elapsed
        }
    }

    fn yield_now() {
        let _ = unsafe { SwitchToThread() };
    }

    fn set_current_name(name: &str) {
        let wide: Vec<u16> = OsStr::new(name).encode_wide().chain(Some(0)).collect();
        let _ = unsafe { SetThreadDescription(GetCurrentThread(), wide.as_ptr()) };
    }

    fn block_signals() {}

    fn block_broken_pipe() {}

    fn min_stack_size() -> usize {
        STACK_MIN
    }

    fn page_size() -> usize {
        system_info().dwPageSize as usize
    }

    fn configured_cpus() -> Option<usize> {
        match system_info().dwNumberOfProcessors {
            0 => None,
            count => Some(count as usize),
        }
    }
}

fn system_info() -> SYSTEM_INFO {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}
