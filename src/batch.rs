//! Fixed-size worker pool for batch operations, preserving per-item error
//! isolation and allowing a thread-safe progress callback.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::unbounded;

use crate::Result;

/// Outcome of a batch run: per-item results in original order, plus the
/// wall-clock time the whole batch took.
pub struct BatchOutcome<T> {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<Result<T>>,
    pub total_ms: u128,
}

/// Runs `op` over `items` using `workers` threads, preserving the original
/// item order in the returned results and never letting one item's failure
/// stop the others. `progress(done, total)` is invoked from worker threads
/// after every completed item and must be thread-safe.
pub fn run<I, T, F>(items: Vec<I>, workers: usize, op: F, progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>) -> BatchOutcome<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Result<T> + Send + Sync + 'static,
{
    let start = Instant::now();
    let total = items.len();
    let workers = workers.max(1).min(total.max(1));

    let (work_tx, work_rx) = unbounded::<(usize, I)>();
    let (result_tx, result_rx) = unbounded::<(usize, Result<T>)>();

    for (idx, item) in items.into_iter().enumerate() {
        work_tx.send((idx, item)).expect("receiver outlives this send");
    }
    drop(work_tx);

    let op = Arc::new(op);
    let done = Arc::new(parking_lot::Mutex::new(0usize));
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let op = Arc::clone(&op);
            let progress = progress.clone();
            let done = Arc::clone(&done);
            scope.spawn(move || {
                for (idx, item) in work_rx.iter() {
                    let outcome = op(idx, item);
                    if let Some(cb) = &progress {
                        let mut done = done.lock();
                        *done += 1;
                        cb(*done, total);
                    }
                    result_tx.send((idx, outcome)).expect("receiver outlives this send");
                }
            });
        }
        drop(result_tx);
    });

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
    for (idx, outcome) in result_rx.iter() {
        slots[idx] = Some(outcome);
    }

    let results: Vec<Result<T>> = slots.into_iter().map(|slot| slot.expect("every index was sent exactly once")).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - succeeded;

    BatchOutcome {
        succeeded,
        failed,
        results,
        total_ms: start.elapsed().as_millis(),
    }
}
