//! Request types for the main-thread host loop.

use crate::host::AnalysisHost;

/// Scheduling class of a marshaled call.
///
/// Ordered by priority: when several jobs are pending, `UiFast` runs before
/// `Write`, which runs before `Read`. Within one class jobs run in submission
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Affinity {
    Read,
    Write,
    UiFast,
}

impl Affinity {
    pub(crate) fn slot(self) -> usize {
        match self {
            Affinity::UiFast => 0,
            Affinity::Write => 1,
            Affinity::Read => 2,
        }
    }
}

/// Boxed job run against the host on the main thread.
pub(crate) type HostJob = Box<dyn FnOnce(&dyn AnalysisHost) + Send + 'static>;

/// Request types for the host loop
pub(crate) enum HostRequest {
    Run { affinity: Affinity, job: HostJob },
    Shutdown,
}
