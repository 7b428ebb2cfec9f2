use std::io;
use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// One-shot flag that threads can wait on.
#[derive(Debug, Default)]
struct Latch {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn set(&self) {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until set or `timeout` elapses. Returns whether it was set.
    fn wait_for(&self, timeout: Duration) -> bool {
        let guard = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Sets the latch when the worker thread exits, panics included.
struct SetOnDrop(Arc<Latch>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// A named background thread that runs a closure at a fixed period until
/// cancelled or until the closure breaks.
///
/// Missed periods are skipped rather than replayed back to back.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop: Arc<Latch>,
    done: Arc<Latch>,
    _handle: thread::JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut body: F) -> io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(Latch::default());
        let done = Arc::new(Latch::default());
        let handle = {
            let stop = Arc::clone(&stop);
            let done = SetOnDrop(Arc::clone(&done));
            let task = name.clone();
            thread::Builder::new().name(name.clone()).spawn(move || {
                let _done = done;
                let mut next = Instant::now() + period;
                loop {
                    if stop.wait_for(next.saturating_duration_since(Instant::now())) {
                        break;
                    }
                    if body().is_break() {
                        break;
                    }
                    next += period;
                    let now = Instant::now();
                    if next < now {
                        next = now + period;
                    }
                }
                tracing::debug!(task = %task, "periodic task exited");
            })?
        };
        tracing::debug!(task = %name, ?period, "periodic task started");
        Ok(Self {
            name,
            stop,
            done,
            _handle: handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the task to stop and wait up to `deadline` for it to exit.
    /// Returns whether it exited in time. Safe to call repeatedly.
    pub fn cancel(&self, deadline: Duration) -> bool {
        self.stop.set();
        self.done.wait_for(deadline)
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_set()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop.set();
    }
}
