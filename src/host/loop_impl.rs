//! Main-thread host loop.

use crate::error::AffinityError;
use crate::host::request::{Affinity, HostJob, HostRequest};
use crate::host::worker::MainThread;
use crate::host::AnalysisHost;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

thread_local! {
    /// Host installed on this thread by a running [`HostLoop`].
    static INSTALLED_HOST: RefCell<Option<Rc<dyn AnalysisHost>>> = const { RefCell::new(None) };
}

/// Create the executor pair for the calling thread.
///
/// The calling thread becomes the host's main thread: the returned
/// [`HostLoop`] cannot leave it, and [`MainThread`] handles run work inline
/// when invoked from it.
pub fn main_thread_channel() -> (MainThread, HostLoop) {
    let (tx, rx) = mpsc::channel();
    let main = MainThread::new(tx, thread::current().id());
    let host_loop = HostLoop {
        rx,
        _not_send: PhantomData,
    };
    (main, host_loop)
}

/// Consumer side of the main-thread executor. Not `Send`.
pub struct HostLoop {
    rx: mpsc::Receiver<HostRequest>,
    _not_send: PhantomData<Rc<()>>,
}

/// Jobs waiting to run, one FIFO per affinity class.
#[derive(Default)]
struct PendingJobs {
    queues: [VecDeque<HostJob>; 3],
}

impl PendingJobs {
    fn push(&mut self, affinity: Affinity, job: HostJob) {
        self.queues[affinity.slot()].push_back(job);
    }

    fn pop(&mut self) -> Option<HostJob> {
        self.queues.iter_mut().find_map(|queue| queue.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}

impl HostLoop {
    /// Run the host loop on the current (main) thread.
    ///
    /// Blocks until `Shutdown` is received and every job queued before it has
    /// run, or until all [`MainThread`] handles are dropped.
    pub fn run(self, host: Rc<dyn AnalysisHost>) {
        let _installed = InstallGuard::install(host.clone());
        let mut pending = PendingJobs::default();
        let mut shutting_down = false;

        info!("Host loop started");
        loop {
            if pending.is_empty() {
                if shutting_down {
                    break;
                }
                match self.rx.recv() {
                    Ok(req) => accept(req, &mut pending, &mut shutting_down),
                    Err(_) => break,
                }
            }
            // Collect everything already submitted so priorities apply across it.
            while let Ok(req) = self.rx.try_recv() {
                accept(req, &mut pending, &mut shutting_down);
            }
            if let Some(job) = pending.pop() {
                job(host.as_ref());
            }
        }
        info!("Host loop finished");
    }
}

fn accept(req: HostRequest, pending: &mut PendingJobs, shutting_down: &mut bool) {
    match req {
        HostRequest::Run { affinity, job } => {
            debug!(affinity = ?affinity, "Queued main-thread job");
            pending.push(affinity, job);
        }
        HostRequest::Shutdown => {
            info!("Host loop shutting down");
            *shutting_down = true;
        }
    }
}

/// Run `f` against the host installed on the current thread.
pub(crate) fn with_installed_host<T>(
    f: impl FnOnce(&dyn AnalysisHost) -> Result<T, AffinityError>,
) -> Result<T, AffinityError> {
    // Clone out of the slot so `f` may re-enter the shim.
    let host = INSTALLED_HOST.with(|slot| slot.borrow().clone());
    match host {
        Some(host) => f(host.as_ref()),
        None => Err(AffinityError::NoHost),
    }
}

struct InstallGuard {
    previous: Option<Rc<dyn AnalysisHost>>,
}

impl InstallGuard {
    fn install(host: Rc<dyn AnalysisHost>) -> Self {
        let previous = INSTALLED_HOST.with(|slot| slot.borrow_mut().replace(host));
        Self { previous }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        INSTALLED_HOST.with(|slot| *slot.borrow_mut() = previous);
    }
}
