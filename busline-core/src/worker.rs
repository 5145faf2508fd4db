//! Worker / job model (spec §4.1, §4.1a).
//!
//! One dedicated OS thread per worker, each running a `tokio`
//! current-thread runtime. Two job priorities — urgent and normal —
//! drained with a biased `select!` so urgent jobs are fully drained
//! between normal jobs, matching spec §4.1's "drains urgent jobs fully
//! between each normal job". Timers are realized as `tokio::time::sleep`
//! futures raced inside the same loop rather than a hand-rolled timer
//! wheel, since the runtime's own reactor already gives us "poll with
//! timeout = nearest timer expiry" for free.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// A unit of work submitted to a worker.
pub enum Job {
    Async(Box<dyn FnOnce() + Send + 'static>),
    Sync {
        body: Box<dyn FnOnce() + Send + 'static>,
        done: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
#[derive(Debug)]
pub struct WorkerHandle {
    urgent_tx: mpsc::UnboundedSender<Job>,
    normal_tx: mpsc::UnboundedSender<Job>,
    discarding: Arc<AtomicBool>,
    thread_id: std::thread::ThreadId,
}

impl WorkerHandle {
    /// True when called from the worker's own thread (spec §4.1: "sync
    /// submission from the target worker's own thread executes inline").
    pub fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn post_async(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.urgent_tx.send(Job::Async(Box::new(job)));
    }

    pub fn post_async_normal(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.normal_tx.send(Job::Async(Box::new(job)));
    }

    /// Runs `job` and waits for completion, subject to `timeout_ms`
    /// (`0` means wait forever, per spec §5). Returns `false` if the
    /// worker was discarding jobs and skipped it, or if the wait timed
    /// out.
    pub async fn post_sync(&self, job: impl FnOnce() + Send + 'static, timeout_ms: u64) -> bool {
        if self.is_current_thread() {
            job();
            return true;
        }
        let (tx, rx) = oneshot::channel();
        if self
            .urgent_tx
            .send(Job::Sync {
                body: Box::new(job),
                done: tx,
            })
            .is_err()
        {
            return false;
        }
        let result = if timeout_ms == 0 {
            rx.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
                Ok(r) => r,
                Err(_) => return false,
            }
        };
        result.unwrap_or(false)
    }

    pub fn begin_discarding(&self) {
        self.discarding.store(true, Ordering::SeqCst);
    }

    /// Exits the discarding state (spec §4.1's `UnlockQueue` job).
    pub fn unlock_queue(&self) {
        self.discarding.store(false, Ordering::SeqCst);
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding.load(Ordering::SeqCst)
    }
}

/// A running worker: an OS thread hosting a current-thread `tokio`
/// runtime draining urgent/normal job queues.
///
/// The job-queue senders are cloned freely into every `WorkerHandle`, so
/// relying on their disconnection to stop the run loop would deadlock
/// `Drop`'s `join` as soon as any handle clone (e.g. one held by an
/// `Endpoint`) outlives the `Worker`. `shutdown_tx` is never cloned out of
/// this struct, so dropping it is an unambiguous stop signal independent
/// of how many `WorkerHandle`s are still alive elsewhere.
pub struct Worker {
    urgent_tx: mpsc::UnboundedSender<Job>,
    normal_tx: mpsc::UnboundedSender<Job>,
    shutdown_tx: Option<watch::Sender<()>>,
    discarding: Arc<AtomicBool>,
    thread_id: std::thread::ThreadId,
    join: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> Self {
        let (urgent_tx, urgent_rx) = mpsc::unbounded_channel::<Job>();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel::<Job>();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let discarding = Arc::new(AtomicBool::new(false));
        let name = name.into();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::thread::ThreadId>();
        let thread_discarding = discarding.clone();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _ = ready_tx.send(std::thread::current().id());
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("worker runtime build");
                rt.block_on(run_loop(urgent_rx, normal_rx, shutdown_rx, thread_discarding));
            })
            .expect("spawn worker thread");
        let thread_id = ready_rx.recv().expect("worker thread reported its id");

        Worker {
            urgent_tx,
            normal_tx,
            shutdown_tx: Some(shutdown_tx),
            discarding,
            thread_id,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            urgent_tx: self.urgent_tx.clone(),
            normal_tx: self.normal_tx.clone(),
            discarding: self.discarding.clone(),
            thread_id: self.thread_id,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Dropping the sender is the signal: the run loop's `changed()`
        // wakes with an error regardless of how many `WorkerHandle` job
        // senders are still alive elsewhere.
        self.shutdown_tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

async fn run_loop(
    mut urgent_rx: mpsc::UnboundedReceiver<Job>,
    mut normal_rx: mpsc::UnboundedReceiver<Job>,
    mut shutdown_rx: watch::Receiver<()>,
    discarding: Arc<AtomicBool>,
) {
    loop {
        // Fully drain urgent jobs before considering a normal one (§4.1).
        loop {
            match urgent_rx.try_recv() {
                Ok(job) => run_job(job, &discarding),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            maybe = urgent_rx.recv() => {
                match maybe {
                    Some(job) => run_job(job, &discarding),
                    None => return,
                }
            }
            maybe = normal_rx.recv() => {
                match maybe {
                    Some(job) => run_job(job, &discarding),
                    None => return,
                }
            }
        }
    }
}

fn run_job(job: Job, discarding: &AtomicBool) {
    match job {
        Job::Async(body) => {
            if discarding.load(Ordering::SeqCst) {
                debug!("worker discarding: dropping async job");
                return;
            }
            body();
        }
        Job::Sync { body, done } => {
            let skipped = discarding.load(Ordering::SeqCst);
            if !skipped {
                body();
            }
            if done.send(!skipped).is_err() {
                warn!("sync job waiter vanished before completion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn async_job_runs_on_worker_thread() {
        let worker = Worker::spawn("test-worker-async");
        let handle = worker.handle();
        let counter = Arc::new(AtomicU32::new(0));
        let c2 = counter.clone();
        handle.post_async(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        handle.post_sync(|| {}, 1000).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sync_job_blocks_until_complete_and_reports_success() {
        let worker = Worker::spawn("test-worker-sync");
        let handle = worker.handle();
        let ok = handle.post_sync(|| {}, 1000).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn discarding_skips_but_still_completes_sync_waiters() {
        let worker = Worker::spawn("test-worker-discard");
        let handle = worker.handle();
        handle.begin_discarding();
        let ran = Arc::new(AtomicBool::new(false));
        let r2 = ran.clone();
        let ok = handle.post_sync(move || r2.store(true, Ordering::SeqCst), 1000).await;
        assert!(!ok);
        assert!(!ran.load(Ordering::SeqCst));
        handle.unlock_queue();
        let ok2 = handle.post_sync(|| {}, 1000).await;
        assert!(ok2);
    }
}
