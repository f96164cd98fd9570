//! The completion context.
//!
//! Every terminal callback runs on one dedicated thread owned by the
//! [`Dispatcher`], in the order the work was posted. Caller-supplied handlers
//! therefore never run concurrently with each other.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

/// Single-threaded FIFO executor for completion callbacks.
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the dispatcher thread.
    pub fn new(thread_name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("completion callback panicked");
                    }
                }
                debug!("dispatcher drained, exiting");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Whether the calling thread is the dispatcher thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queue `job` behind everything already posted.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(Box::new(job)).is_err() {
                    error!("dispatcher thread is gone, dropping completion");
                }
            }
            None => debug!("dispatcher shut down, dropping completion"),
        }
    }

    /// Run `job` now if already on the dispatcher thread, otherwise post it.
    pub fn deliver<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            job();
        } else {
            self.post(job);
        }
    }

    /// Block until everything posted before this call has run.
    ///
    /// Returns immediately when called from the dispatcher thread itself.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel();
        self.post(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
