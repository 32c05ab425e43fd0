// Event loop: offloads work to a rayon pool and runs completions on the
// thread that drives the loop.
//
// `queue_work(work, after)` spawns `work` on the pool. When it finishes, its
// result is parked in a per-job one-shot channel and the job id is posted to
// the loop's notification channel. `run`, `run_once` and `poll` pick up
// notifications and call `after(result)` on the driving thread, which is
// where all session state lives.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::{error, trace};

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pool size; `0` lets rayon pick (one thread per core).
    pub threads: usize,
    pub thread_name_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            thread_name_prefix: "oxiflate-worker".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

type Completion = Box<dyn FnOnce()>;

/// Single-threaded completion queue in front of a worker pool.
///
/// Not `Send`: it must be driven from the thread that queues work.
pub struct EventLoop {
    pool: rayon::ThreadPool,
    done_tx: Sender<u64>,
    done_rx: Receiver<u64>,
    pending: RefCell<HashMap<u64, Completion>>,
    next_id: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Result<Self, WorkerError> {
        Self::with_config(&WorkerConfig::default())
    }

    pub fn with_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let prefix = config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()?;
        let (done_tx, done_rx) = channel::unbounded();
        Ok(Self {
            pool,
            done_tx,
            done_rx,
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` on the pool, then `after` with its result on the thread
    /// driving this loop. A panic in `work` resumes in the driver.
    pub fn queue_work<T, W, A>(&self, work: W, after: A)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        A: FnOnce(T) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let (result_tx, result_rx) = channel::bounded::<std::thread::Result<T>>(1);
        let done = self.done_tx.clone();
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            // Result before notification: the completion reads it right away.
            let _ = result_tx.send(result);
            let _ = done.send(id);
        });

        let completion: Completion = Box::new(move || match result_rx.recv() {
            Ok(Ok(value)) => after(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => error!("work item {id} finished without a result"),
        });
        self.pending.borrow_mut().insert(id, completion);
        trace!("queued work item {id}");
    }

    /// Work items queued whose completion has not run yet.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Block for the next finished item and run its completion. Returns
    /// `false` when nothing is outstanding.
    pub fn run_once(&self) -> bool {
        if self.pending() == 0 {
            return false;
        }
        match self.done_rx.recv() {
            Ok(id) => {
                self.dispatch(id);
                true
            }
            Err(_) => false,
        }
    }

    /// Run completions until nothing is outstanding, including work queued
    /// by the completions themselves.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Run the completions of already finished items without blocking.
    pub fn poll(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.done_rx.try_recv() {
                Ok(id) => {
                    self.dispatch(id);
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    fn dispatch(&self, id: u64) {
        // Released before the call: completions may queue more work.
        let completion = self.pending.borrow_mut().remove(&id);
        if let Some(completion) = completion {
            trace!("completing work item {id}");
            completion();
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("threads", &self.threads())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Work cannot be cancelled; let every completion run.
        if !std::thread::panicking() {
            self.run();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
