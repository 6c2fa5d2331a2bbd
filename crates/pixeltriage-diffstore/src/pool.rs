//! Fixed worker pool draining per-digest/per-pair jobs (spec §4.3 "Worker
//! pool"): a top-level `Get`/`absPath` call becomes N independent job
//! submissions; a bounded response channel with capacity N collects
//! results so the outer call can aggregate the successful subset even if
//! individual workers fail.
//!
//! Grounded on `CommitCoalescer`/`coalescer_pool_worker`
//! (`mcp-agent-mail-storage::lib`), generalized from git-commit batching to
//! plain job dispatch: fixed `std::thread` workers draining a shared
//! `mpsc::Receiver`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Sender<Job>,
    _workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(worker_count: usize, name_prefix: &str) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let rx = Arc::clone(&rx);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("{name_prefix}-{idx}"))
                    .spawn(move || worker_loop(&rx))
                    .expect("failed to spawn diffstore worker"),
            );
        }
        Self { tx, _workers: workers }
    }

    /// Submits a job. Best-effort: if every worker has exited (pool
    /// shutting down), the job is silently dropped rather than panicking.
    pub fn submit(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

fn worker_loop(rx: &Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}
