//! Bounded-parallelism job batch scheduler.
//!
//! `run_batch` feeds every scan target exactly once to a fixed-size worker
//! pool and returns when all targets reported completion or the run's
//! cancellation signal fired. Three kinds of tasks cooperate:
//!
//! - N workers pull targets from a shared queue, dispatch the scan job,
//!   wait for the result (or deadline), clean the job up, and acknowledge
//! - a dispatch task pushes every target onto the queue
//! - a counting task waits for exactly `targets.len()` acknowledgements
//!
//! Every blocking point races the cancellation signal, so cancellation
//! propagates within one scheduling step instead of one timeout period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleetscan_core::metrics as m;

use crate::cluster::ClusterClient;
use crate::job::JobDispatcher;
use crate::state::{FleetRun, ScanTarget};

/// Dispatch every target across `parallelism` workers and block until the
/// batch completes or is cancelled.
pub(crate) async fn run_batch<C: ClusterClient>(
    run: Arc<FleetRun>,
    targets: Vec<ScanTarget>,
    dispatcher: Arc<JobDispatcher<C>>,
    parallelism: usize,
    job_timeout: Duration,
) {
    let total = targets.len();
    if total == 0 {
        return;
    }
    let cancel = run.cancel_token();

    let (queue_tx, queue_rx) = mpsc::channel::<ScanTarget>(1);
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    let (done_tx, mut done_rx) = mpsc::channel::<()>(total);

    let mut workers = Vec::with_capacity(parallelism);
    for worker_id in 0..parallelism {
        workers.push(tokio::spawn(worker(
            worker_id,
            run.clone(),
            queue_rx.clone(),
            done_tx.clone(),
            dispatcher.clone(),
            job_timeout,
            cancel.clone(),
        )));
    }
    drop(done_tx);

    // dispatch task: hand every target to the pool, racing cancellation so
    // dispatch aborts promptly
    let dispatch = {
        let run = run.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for target in targets {
                let image = target.image_name.clone();
                tokio::select! {
                    result = queue_tx.send(target) => {
                        if result.is_err() {
                            return;
                        }
                        run.note_dispatched();
                    }
                    _ = cancel.cancelled() => {
                        debug!(image = %image, "scan run cancelled, dispatch aborted");
                        return;
                    }
                }
            }
            // dropping the sender closes the queue; idle workers exit
        })
    };

    // counting task: exactly `total` acknowledgements complete the batch
    let mut counting = {
        let run = run.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for _ in 0..total {
                tokio::select! {
                    ack = done_rx.recv() => {
                        if ack.is_none() {
                            return;
                        }
                        run.note_completed();
                    }
                    _ = cancel.cancelled() => {
                        debug!("scan run cancelled, no longer waiting for finished jobs");
                        return;
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = &mut counting => {
            info!("all scan jobs finished");
        }
        _ = cancel.cancelled() => {
            info!("scan run cancelled");
            let _ = counting.await;
        }
    }

    // workers finish their in-flight cleanup before the batch returns
    let _ = dispatch.await;
    for handle in workers {
        let _ = handle.await;
    }
}

/// One pool worker: pull a target, run its job, wait, clean up, acknowledge.
async fn worker<C: ClusterClient>(
    worker_id: usize,
    run: Arc<FleetRun>,
    queue: Arc<Mutex<mpsc::Receiver<ScanTarget>>>,
    done_tx: mpsc::Sender<()>,
    dispatcher: Arc<JobDispatcher<C>>,
    job_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let target = {
            let mut rx = queue.lock().await;
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(target) => target,
                    None => {
                        debug!(worker = worker_id, "work queue closed, worker exiting");
                        return;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!(worker = worker_id, "worker halted");
                    return;
                }
            }
        };

        match dispatcher.dispatch(&target).await {
            Ok(job) => {
                wait_for_result(&run, &target, job_timeout, &cancel).await;
                let (completed, success) = run.unit_outcome(&target.image_name).await;
                dispatcher.cleanup(&job, completed, success).await;
            }
            Err(e) => {
                error!(image = %target.image_name, error = %e, "failed to run scan job");
                run.mark_dispatch_failed(&target.image_name, e.to_string())
                    .await;
            }
        }

        tokio::select! {
            result = done_tx.send(()) => {
                if result.is_err() {
                    return;
                }
            }
            _ = cancel.cancelled() => {
                info!(image = %target.image_name, "image scan cancelled");
            }
        }
    }
}

/// Wait for a unit's completion, racing the wake signal, the per-image
/// deadline, and the run's cancellation signal.
///
/// The wait is check-then-wait: completion already recorded when the worker
/// arrives is observed immediately, so a worker that loses the race to the
/// result callback never hangs.
pub(crate) async fn wait_for_result(
    run: &FleetRun,
    target: &ScanTarget,
    job_timeout: Duration,
    cancel: &CancellationToken,
) {
    info!(image = %target.image_name, "waiting for scan result");
    let started = Instant::now();
    let notified = target.notify.notified();
    tokio::pin!(notified);

    if run.is_completed(&target.image_name).await {
        info!(image = %target.image_name, "scan result already recorded");
        return;
    }

    tokio::select! {
        _ = &mut notified => {
            info!(image = %target.image_name, "scan result arrived");
        }
        _ = tokio::time::sleep(job_timeout) => {
            warn!(image = %target.image_name, "scan job timed out");
            run.mark_timed_out(&target.image_name).await;
        }
        _ = cancel.cancelled() => {
            info!(image = %target.image_name, "image scan cancelled while waiting");
        }
    }

    metrics::histogram!(m::UNIT_WAIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
