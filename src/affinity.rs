use crate::{
    error::AffinityError,
    platform::{OsHandle, OsPlatform, Platform},
};

/// Number of logical cpus a thread may be bound to.
pub fn cpu_count() -> usize {
    num_cpus::get()
}

/// Check that `cpu` can be bound to on this host before touching any thread.
///
/// Indices are bounded by the cpus configured in the system, not by those the
/// process may currently use: a restricted process can still name any cpu of
/// its mask, and the OS rejects cpus outside of it.
pub(crate) fn validate(cpu: usize) -> Result<(), AffinityError> {
    if !OsPlatform::affinity_supported() {
        return Err(AffinityError::Unsupported);
    }

    if let Some(count) = OsPlatform::configured_cpus() {
        if cpu >= count {
            return Err(AffinityError::InvalidCpu { cpu, count });
        }
    }

    Ok(())
}

/// Bind a live thread to `cpu`.
pub(crate) fn bind(handle: OsHandle, cpu: usize) -> Result<(), AffinityError> {
    validate(cpu)?;
    OsPlatform::set_affinity(handle, cpu).map_err(AffinityError::Os)?;
    tracing::debug!(cpu, "thread affinity applied");
    Ok(())
}

/// The cpu a live thread is bound to.
///
/// `None` when the thread may run on more than one cpu or when the host
/// has no affinity support at all.
pub(crate) fn query(handle: OsHandle) -> Result<Option<usize>, AffinityError> {
    if !OsPlatform::affinity_supported() {
        return Ok(None);
    }

    OsPlatform::affinity(handle).map_err(AffinityError::Os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_bounds_by_configured_cpus() {
        if !OsPlatform::affinity_supported() {
            assert!(matches!(validate(0), Err(AffinityError::Unsupported)));
            return;
        }

        let configured = OsPlatform::configured_cpus().unwrap();
        validate(0).unwrap();
        validate(configured - 1).unwrap();
        // Every usable cpu index is accepted, whatever the process mask is.
        validate(cpu_count() - 1).unwrap();

        match validate(configured) {
            Err(AffinityError::InvalidCpu { cpu, count }) => {
                assert_eq!(cpu, configured);
                assert_eq!(count, configured);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
