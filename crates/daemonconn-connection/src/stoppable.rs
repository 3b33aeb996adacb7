use tracing::warn;

use crate::error::{ConnectionError, Result};

/// Something that can be shut down, blocking until it has.
pub trait Stoppable {
    fn stop(&self) -> Result<()>;
}

impl<F> Stoppable for F
where
    F: Fn() -> Result<()>,
{
    fn stop(&self) -> Result<()> {
        self()
    }
}

/// Stops a sequence of members in order.
///
/// A failing member does not prevent the members after it from being
/// stopped. All failures are reported together once every member has run.
#[derive(Default)]
pub struct CompositeStoppable<'a> {
    members: Vec<(&'static str, &'a dyn Stoppable)>,
}

impl<'a> CompositeStoppable<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member; members stop in the order they were added.
    pub fn add(mut self, name: &'static str, member: &'a dyn Stoppable) -> Self {
        self.members.push((name, member));
        self
    }

    pub fn stop(self) -> Result<()> {
        let mut failures = Vec::new();
        for (name, member) in self.members {
            if let Err(err) = member.stop() {
                warn!(member = name, error = %err, "failed to stop");
                failures.push(format!("{name}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConnectionError::ShutdownFailed(failures))
        }
    }
}
