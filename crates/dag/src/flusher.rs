//! Flusher task: a single background worker with two counting semaphores
//! (`start`, `done`) and message-passing instead of a shared back-reference
//! to the coordinator.
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

/// A simple counting semaphore built on `Mutex` + `Condvar`, generalized
/// to a counter instead of a boolean flush-completion flag.
struct Semaphore {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.condvar.notify_one();
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.condvar.wait(&mut count);
        }
        *count -= 1;
    }

    /// Non-blocking check: consumes one permit if available.
    fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

/// Single background worker driving the `idle -> flushing -> done -> idle`
/// state machine over one file descriptor.
pub struct Flusher {
    handle: Option<JoinHandle<()>>,
    start: Arc<Semaphore>,
    done: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
}

impl Flusher {
    /// Spawns the background worker. `file` must be a handle to the same
    /// underlying file the coordinator appends to; the flusher only ever
    /// calls `sync_data` on it, never writes.
    pub fn spawn(file: File) -> io::Result<Self> {
        let start = Arc::new(Semaphore::new());
        let done = Arc::new(Semaphore::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let start_worker = Arc::clone(&start);
        let done_worker = Arc::clone(&done);
        let cancel_worker = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("dag-flusher".into())
            .spawn(move || flusher_loop(file, start_worker, done_worker, cancel_worker))?;

        Ok(Self {
            handle: Some(handle),
            start,
            done,
            cancel,
        })
    }

    /// Posts the `start` semaphore, transitioning the flusher from `idle`
    /// to `flushing` for its next wakeup.
    pub fn kickoff(&self) {
        self.start.post();
    }

    /// Non-blocking: true if a flush has completed since the last call.
    pub fn poll_done(&self) -> bool {
        self.done.try_wait()
    }

    /// Blocks until the in-flight flush completes.
    pub fn wait_done(&self) {
        self.done.wait();
    }

    /// Cancels and joins the worker. Cancellation only takes effect at the
    /// worker's `idle` wait point (waiting on `start`), guaranteeing no
    /// partial metadata update is ever interrupted.
    pub fn shutdown(mut self) {
        self.cancel.store(true, Ordering::Release);
        self.start.post();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn flusher_loop(file: File, start: Arc<Semaphore>, done: Arc<Semaphore>, cancel: Arc<AtomicBool>) {
    loop {
        start.wait();
        if cancel.load(Ordering::Acquire) {
            trace!("dag flusher: cancelled while idle");
            return;
        }
        trace!("dag flusher: idle -> flushing");
        if let Err(err) = file.sync_data() {
            // A failed data-sync is fatal. durable_length only ever
            // advances after a successful fdatasync, so there is no safe
            // in-band way to report this back to the coordinator and keep
            // going, the coordinator would have to guess whether the sync
            // actually landed.
            error!("dag flusher: fdatasync failed, aborting process: {err}");
            std::process::abort();
        }
        trace!("dag flusher: flushing -> done");
        done.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flush_cycle_signals_done() {
        let file = tempfile::tempfile().unwrap();
        let flusher = Flusher::spawn(file).unwrap();
        flusher.kickoff();
        flusher.wait_done();
        flusher.shutdown();
    }

    #[test]
    fn poll_done_is_non_blocking_before_kickoff() {
        let file = tempfile::tempfile().unwrap();
        let flusher = Flusher::spawn(file).unwrap();
        assert!(!flusher.poll_done());
        flusher.kickoff();
        // Give the worker a moment; poll_done must eventually observe it
        // without the test itself blocking forever.
        let mut seen = false;
        for _ in 0..1000 {
            if flusher.poll_done() {
                seen = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(seen, "flush never completed");
        flusher.shutdown();
    }
}
