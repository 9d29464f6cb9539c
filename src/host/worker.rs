//! Caller-side handle for marshaling work onto the host's main thread.

use crate::error::{AffinityError, HostError};
use crate::host::loop_impl::with_installed_host;
use crate::host::request::{Affinity, HostJob, HostRequest};
use crate::host::AnalysisHost;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;
use tracing::warn;

/// Handle for running host calls on the main thread.
///
/// Every call blocks (or suspends) its caller until the job has run and
/// returns the job's own result. When invoked from the main thread itself
/// the job runs inline.
#[derive(Clone)]
pub struct MainThread {
    tx: mpsc::Sender<HostRequest>,
    owner: ThreadId,
}

impl MainThread {
    pub(crate) fn new(tx: mpsc::Sender<HostRequest>, owner: ThreadId) -> Self {
        Self { tx, owner }
    }

    /// Whether the current thread is the host's main thread.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run `f` on the main thread and block until it finishes.
    ///
    /// Must not be called from inside an async task; use [`execute`](Self::execute)
    /// there.
    pub fn execute_sync<T, F>(&self, affinity: Affinity, f: F) -> Result<T, AffinityError>
    where
        F: FnOnce(&dyn AnalysisHost) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_main_thread() {
            return with_installed_host(|host| run_guarded(f, host));
        }
        let rx = self.submit(affinity, f)?;
        rx.blocking_recv()?
    }

    /// Run `f` on the main thread, suspending the calling task until it finishes.
    pub async fn execute<T, F>(&self, affinity: Affinity, f: F) -> Result<T, AffinityError>
    where
        F: FnOnce(&dyn AnalysisHost) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_main_thread() {
            return with_installed_host(|host| run_guarded(f, host));
        }
        let rx = self.submit(affinity, f)?;
        rx.await?
    }

    /// Ask the host loop to stop once the jobs already queued have run.
    pub fn shutdown(&self) -> Result<(), AffinityError> {
        self.tx.send(HostRequest::Shutdown)?;
        Ok(())
    }

    fn submit<T, F>(
        &self,
        affinity: Affinity,
        f: F,
    ) -> Result<oneshot::Receiver<Result<T, AffinityError>>, AffinityError>
    where
        F: FnOnce(&dyn AnalysisHost) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: HostJob = Box::new(move |host| {
            let _ = tx.send(run_guarded(f, host));
        });
        self.tx.send(HostRequest::Run { affinity, job })?;
        Ok(rx)
    }
}

/// Run a job, turning a panic into an error for the caller.
fn run_guarded<T>(
    f: impl FnOnce(&dyn AnalysisHost) -> Result<T, HostError>,
    host: &dyn AnalysisHost,
) -> Result<T, AffinityError> {
    match panic::catch_unwind(AssertUnwindSafe(|| f(host))) {
        Ok(result) => result.map_err(AffinityError::from),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(message = %message, "Main-thread job panicked");
            Err(AffinityError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
