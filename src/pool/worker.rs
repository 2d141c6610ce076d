use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::protocol::{Outcome, Slot};
use super::Lease;
use crate::error::*;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) enum Job {
    Run {
        lease: Lease,
        reply: oneshot::Sender<Lease>,
    },
    Shutdown,
}

/// Handle on a worker thread.
pub(crate) struct Worker {
    sender: Sender<Job>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn a worker and block until it is ready to receive jobs.
    pub(crate) fn spawn(index: usize) -> Result<Self, Error> {
        let (sender, receiver) = channel::unbounded();
        let ready = Arc::new(AtomicBool::new(false));
        let spawner = thread::current();
        let thread = {
            let ready = ready.clone();
            thread::Builder::new()
                .name(format!("jwt-worker-{}", index))
                .spawn(move || run(index, receiver, ready, spawner))
                .map_err(wrap(JWTError::WorkerOperationFailed))?
        };
        while !ready.load(Ordering::Acquire) {
            if thread.is_finished() {
                bail!(JWTError::WorkerOperationFailed);
            }
            thread::park_timeout(READY_POLL_INTERVAL);
        }
        Ok(Worker {
            sender,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn sender(&self) -> &Sender<Job> {
        &self.sender
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(Job::Shutdown);
    }

    pub(crate) fn join(&self) {
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("worker thread terminated abnormally");
            }
        }
    }
}

fn run(index: usize, receiver: Receiver<Job>, ready: Arc<AtomicBool>, spawner: Thread) {
    ready.store(true, Ordering::Release);
    spawner.unpark();
    debug!(worker = index, "worker ready");
    for job in receiver.iter() {
        match job {
            Job::Shutdown => break,
            Job::Run { mut lease, reply } => {
                process(&mut lease);
                // If the caller went away, the lease is dropped here and the slot released.
                let _ = reply.send(lease);
            }
        }
    }
    debug!(worker = index, "worker stopped");
}

fn process(slot: &mut Slot) {
    execute(slot, |slot| {
        let framed = slot.read_request()?;
        let request = framed.request()?;
        request.run()
    })
}

/// Run `operation` on the request held by `slot` and store its result as the reply.
/// Panics are reported as failed operations.
fn execute<F>(slot: &mut Slot, operation: F)
where
    F: FnOnce(&Slot) -> Result<Outcome, Error>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| operation(slot)));
    slot.clear_request();
    let result = result.unwrap_or_else(|panic| {
        let message = panic_message(&*panic);
        warn!(panic = %message, "worker operation panicked");
        Err(Error::msg(message).context(JWTError::WorkerOperationFailed))
    });
    slot.write_reply(&result);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Algorithm;
    use crate::keys::KeyMaterial;
    use crate::pool::protocol::Request;

    #[test]
    fn panics_become_failed_operations() {
        let mut slot = Slot::new(0, 1024);
        execute(&mut slot, |_| panic!("out of cheese"));
        let err = slot.read_reply().unwrap_err();
        assert_eq!(error_kind(&err), Some(JWTError::WorkerOperationFailed));
        assert!(err.chain().any(|cause| cause.to_string() == "out of cheese"));
    }

    #[test]
    fn requests_are_processed_and_wiped() {
        let key = KeyMaterial::from("a-secret-of-some-length");
        let mut slot = Slot::new(0, 1024);
        let request = Request::Sign {
            algorithm: Algorithm::HS256,
            key: &key,
            signing_input: b"header.payload",
        };
        assert!(slot.write_request(&request));
        process(&mut slot);
        assert_eq!(slot.read_reply().unwrap(), request.run().unwrap());
        assert!(slot.read_request().is_err());
    }
}
