use crate::{
    error::Result,
    fault::Outcome,
    priority::{Policy, Priority},
    thread::Thread,
};

/// Thread configuration, applied in one go by [`build`](Builder::build)
/// or [`spawn`](Builder::spawn).
#[derive(Clone, Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: usize,
    priority: Option<Priority>,
    os_priority: Option<(i32, Policy)>,
    affinity: Option<usize>,
}

impl Builder {
    pub const fn new() -> Self {
        Self {
            name: None,
            stack_size: 0,
            priority: None,
            os_priority: None,
            affinity: None,
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes, 0 for the OS default.
    pub fn stack_size(&mut self, stack_size: usize) -> &mut Self {
        self.stack_size = stack_size;
        self
    }

    pub fn priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = Some(priority);
        self.os_priority = None;
        self
    }

    pub fn os_priority(&mut self, os_priority: i32, policy: Policy) -> &mut Self {
        self.os_priority = Some((os_priority, policy));
        self.priority = None;
        self
    }

    pub fn affinity(&mut self, cpu: usize) -> &mut Self {
        self.affinity = Some(cpu);
        self
    }

    /// Create a configured, unstarted [`Thread`].
    pub fn build(&self) -> Result<Thread> {
        let thread = match self.name.as_ref() {
            Some(name) => Thread::with_name(name.clone()),
            None => Thread::new(),
        };

        thread.set_stack_size(self.stack_size);
        if let Some(priority) = self.priority {
            thread.set_priority(priority)?;
        }
        if let Some((os_priority, policy)) = self.os_priority {
            thread.set_os_priority(os_priority, policy)?;
        }
        if let Some(cpu) = self.affinity {
            thread.set_affinity(cpu)?;
        }

        Ok(thread)
    }

    /// Create a configured [`Thread`] and start it running `f`.
    pub fn spawn<F, R>(&self, f: F) -> Result<Thread>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Outcome + 'static,
    {
        let thread = self.build()?;
        thread.start(f)?;
        Ok(thread)
    }
}
