use crate::{
    error::{Error, Result},
    platform::{OsPlatform, Platform, SleepStatus},
};
use std::time::{Duration, Instant};

/// Suspend the calling thread for at least `duration`.
///
/// Waits cut short by signal delivery are resumed for whatever remains of the
/// requested time, so asynchronous signals never shorten the sleep.
pub fn sleep(duration: Duration) -> Result<()> {
    let mut remaining = duration;
    let mut interruptions = 0usize;

    while remaining > Duration::ZERO {
        let started = Instant::now();
        match OsPlatform::sleep(remaining) {
            SleepStatus::Elapsed => break,
            SleepStatus::Interrupted => {
                interruptions += 1;
                remaining = remaining.saturating_sub(started.elapsed());
                tracing::trace!(interruptions, ?remaining, "sleep interrupted");
            }
            SleepStatus::Failed(err) => return Err(Error::Sleep(err)),
        }
    }

    Ok(())
}

/// Hint to the system to yield the current thread of execution
pub fn yield_now() {
    OsPlatform::yield_now()
}
