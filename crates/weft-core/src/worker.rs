//! Parallel diff workers.
//!
//! Workers are plain OS threads fed through channels; a job carries an
//! owned snapshot of the old subtree and the newly built span, so no memory
//! is shared between workers. Results are tagged with the dispatching
//! generation and span position; the scheduler merges them by position and
//! drops anything tagged with a superseded generation.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::diff::{run_job, DiffJob, SubtreeDiff};
use crate::error::CoreError;

pub(crate) struct PoolJob {
    pub generation: u64,
    pub seq: u32,
    pub job: DiffJob,
}

pub(crate) struct PoolResult {
    pub generation: u64,
    pub seq: u32,
    pub diff: SubtreeDiff,
}

/// Fixed-size pool of diff worker threads.
pub(crate) struct DiffPool {
    job_tx: Option<Sender<PoolJob>>,
    result_rx: Receiver<PoolResult>,
    workers: Vec<JoinHandle<()>>,
}

impl DiffPool {
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<PoolJob>();
        let (result_tx, result_rx) = unbounded::<PoolResult>();
        let workers = (0..workers)
            .map(|_| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                thread::spawn(move || worker_loop(jobs, results))
            })
            .collect();
        Self {
            job_tx: Some(job_tx),
            result_rx,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn dispatch(&self, job: PoolJob) -> Result<(), CoreError> {
        self.job_tx
            .as_ref()
            .ok_or(CoreError::PoolDisconnected)?
            .send(job)
            .map_err(|_| CoreError::PoolDisconnected)
    }

    /// Non-blocking poll for a finished job.
    pub fn try_recv(&self) -> Option<PoolResult> {
        self.result_rx.try_recv().ok()
    }

    /// Blocks up to `timeout` for a finished job. `Ok(None)` means the
    /// deadline passed with nothing ready.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<PoolResult>, CoreError> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::PoolDisconnected),
        }
    }
}

impl Drop for DiffPool {
    fn drop(&mut self) {
        // Closing the job channel drains the workers.
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(jobs: Receiver<PoolJob>, results: Sender<PoolResult>) {
    while let Ok(PoolJob {
        generation,
        seq,
        job,
    }) = jobs.recv()
    {
        let diff = run_job(job);
        if results
            .send(PoolResult {
                generation,
                seq,
                diff,
            })
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuiltNode;
    use crate::element::Props;

    #[test]
    fn results_carry_generation_and_position() {
        let pool = DiffPool::new(2);
        for seq in 0..4u32 {
            pool.dispatch(PoolJob {
                generation: 7,
                seq,
                job: DiffJob {
                    index: seq,
                    old: None,
                    new: BuiltNode::for_tests("view", None, Props::default(), Vec::new()),
                },
            })
            .unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 4 {
            let result = pool
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .expect("worker result");
            assert_eq!(result.generation, 7);
            assert_eq!(result.diff.fresh_count, 1);
            seen.push(result.seq);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
