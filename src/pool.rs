//! A fixed-size pool of async workers fed by an unbounded FIFO queue.
//!
//! Submitting never blocks and is never rejected while the pool is running: when every worker
//! is busy, jobs wait in the queue until one frees up. With `size` workers at most `size` jobs
//! run at the same time.

use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error as ThisError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("worker pool is closed")]
    Closed,
}

pub struct WorkerPool<J> {
    queue: UnboundedSender<J>,
    workers: Vec<JoinHandle<()>>,
}

impl<J> WorkerPool<J>
where
    J: Send + 'static,
{
    /// Spawns `size` workers on the current runtime, each running `handler` on one job at a time.
    pub fn new<F, Fut>(size: NonZeroUsize, handler: F) -> WorkerPool<J>
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let workers = (0..size.get())
            .map(|worker| {
                let rx = rx.clone();
                let handler = handler.clone();
                tokio::spawn(work(worker, rx, handler))
            })
            .collect();

        WorkerPool {
            queue: tx,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job. Returns `Error::Closed` (dropping the job) only if every worker is gone.
    pub fn submit(&self, job: J) -> Result<(), Error> {
        self.queue.send(job).map_err(|_| Error::Closed)
    }

    /// Closes the queue and waits until the workers have finished every job submitted so far.
    pub async fn shutdown(self) {
        drop(self.queue);

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
    }
}

async fn work<J, F, Fut>(worker: usize, queue: Arc<Mutex<UnboundedReceiver<J>>>, handler: Arc<F>)
where
    F: Fn(J) -> Fut,
    Fut: Future<Output = ()>,
{
    debug!(worker, "Worker started");

    loop {
        // Only the idle worker holding the lock waits on the queue, the rest wait on the lock.
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        // A panicking job must not take the worker down with it.
        if AssertUnwindSafe(handler(job)).catch_unwind().await.is_err() {
            error!(worker, "Job panicked");
        }
    }

    debug!(worker, "Worker stopped");
}
