//! Bounded worker pool. Tasks are pulled from a shared queue by at most
//! `concurrency` threads; results are handed back to the caller's thread as
//! they complete, in whatever order the workers finish. The consumer is the
//! single writer of any shared state, so no further synchronization is
//! required downstream.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

/// One worker per logical CPU by default.
pub(crate) fn default_concurrency() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Run `job` over `tasks` with at most `concurrency` in flight, feeding each
/// result to `consume` on the calling thread. `consume` returning
/// `ControlFlow::Break` stops the pool: queued tasks are abandoned, in-flight
/// ones finish and their results are discarded.
///
/// With `in_band` (or a concurrency of one) everything runs synchronously on
/// the caller's thread; observable only by timing.
pub(crate) fn run_tasks<T, R, F, C>(
    tasks: Vec<T>,
    concurrency: usize,
    in_band: bool,
    job: F,
    mut consume: C,
) where
    T: Send,
    R: Send,
    F: Fn(&T) -> R + Sync,
    C: FnMut(T, R) -> ControlFlow<()>,
{
    if tasks.is_empty() {
        return;
    }

    if in_band || concurrency <= 1 {
        for task in tasks {
            let result = job(&task);
            if consume(task, result).is_break() {
                return;
            }
        }
        return;
    }

    let worker_count = concurrency.min(tasks.len());
    let cancelled = AtomicBool::new(false);
    let queue = Mutex::new(VecDeque::from(tasks));
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            let cancelled = &cancelled;
            let job = &job;
            scope.spawn(move || loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let task = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => break,
                };
                let Some(task) = task else { break };
                let result = job(&task);
                if tx.send((task, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut aborted = false;
        for (task, result) in rx {
            if aborted {
                continue;
            }
            if consume(task, result).is_break() {
                aborted = true;
                cancelled.store(true, Ordering::Relaxed);
            }
        }
    });
}
