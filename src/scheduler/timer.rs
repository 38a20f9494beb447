use std::panic;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, trace};

/// Fixed-rate timer on its own thread.
///
/// Deadlines are computed from the first fire, so a slow callback does not
/// shift later fires. Dropping the timer cancels it.
pub struct PeriodicTimer {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    period: Duration,
}

impl PeriodicTimer {
    /// Starts firing `on_fire` after `initial_delay`, then every `period`.
    /// The delay counts from this call, not from when the thread gets to run.
    pub fn start<F>(
        initial_delay: Duration,
        period: Duration,
        mut on_fire: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let first_deadline = Instant::now() + initial_delay;
        let (cancel, cancelled) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("dial-timer".to_owned())
            .spawn(move || {
                let mut deadline = first_deadline;
                loop {
                    match cancelled.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => {
                            trace!("timer fired");
                            on_fire();
                            deadline += period;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        debug!(?initial_delay, ?period, "periodic timer started");
        Ok(Self {
            cancel: Some(cancel),
            worker: Some(worker),
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stops the timer and waits for an in-flight fire to return. A panic
    /// raised by the callback is resumed on the caller.
    pub fn cancel(&mut self) {
        drop(self.cancel.take());
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if let Err(payload) = worker.join() {
            panic::resume_unwind(payload);
        }
        debug!("periodic timer cancelled");
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        if thread::panicking() {
            drop(self.cancel.take());
            return;
        }
        self.cancel();
    }
}
