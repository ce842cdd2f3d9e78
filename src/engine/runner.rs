//! Package runner: loads a package, dispatches pairing workers, joins
//!
//! One runner invocation processes one package end-to-end. Pairings that
//! already carry a result are skipped, which makes re-running a package
//! idempotent: a fully processed package is a no-op.

use crate::config::ProcessorConfig;
use crate::distance::DistanceMetric;
use crate::engine::worker::{process_pairing, TaskSpec};
use crate::model::PackageDescriptor;
use crate::{ProcessError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of a run, for callers and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Pairings actually processed this run
    pub tasks_run: usize,

    /// Pairings skipped because they already had a result
    pub skipped: usize,

    /// Sum of the processed pairings' estimated unique-id counts
    pub total_items: u64,
}

/// Processes one package: verify, dispatch, join, rewrite descriptor
pub struct PackageRunner {
    input: PathBuf,
    config: ProcessorConfig,
    metric: Arc<dyn DistanceMetric>,
}

impl PackageRunner {
    pub fn new<P: Into<PathBuf>>(
        input: P,
        config: ProcessorConfig,
        metric: Arc<dyn DistanceMetric>,
    ) -> Self {
        Self {
            input: input.into(),
            config,
            metric,
        }
    }

    /// Run the package to completion
    ///
    /// Fails fast on descriptor or parameter problems; task failures are
    /// joined first and the earliest one (in task order) becomes the run's
    /// failure. Completed pairings keep their results either way.
    pub fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;

        info!("started processing");
        info!(
            "multithreaded: {}, maximum k to calculate: {}, distance function: {}",
            self.config.multithreading,
            self.config.max_k,
            self.metric.name()
        );

        info!("opening package {} ...", self.input.display());
        let descriptor = PackageDescriptor::read_from(&self.input)?;

        info!("verifying package ...");
        descriptor.verify()?;

        let package_pairings = descriptor.pairing_count();
        let (tasks, skipped) = self.collect_tasks(&descriptor)?;

        if tasks.is_empty() {
            info!("nothing to do - all results have already been calculated");
            return Ok(RunSummary {
                tasks_run: 0,
                skipped,
                total_items: 0,
            });
        }

        let pool_size = self.pool_size(tasks.len());
        let task_count = tasks.len();
        info!("dispatching {} tasks across {} workers", task_count, pool_size);

        let descriptor = Arc::new(Mutex::new(descriptor));
        let total_items = Arc::new(Mutex::new(0u64));
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let outcomes: Arc<Mutex<Vec<Option<Result<()>>>>> =
            Arc::new(Mutex::new((0..task_count).map(|_| None).collect()));

        let mut handles = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let queue = Arc::clone(&queue);
            let outcomes = Arc::clone(&outcomes);
            let descriptor = Arc::clone(&descriptor);
            let total_items = Arc::clone(&total_items);
            let metric = Arc::clone(&self.metric);
            let k = self.config.max_k;

            handles.push(thread::spawn(move || loop {
                let task = match queue.lock().pop_front() {
                    Some(task) => task,
                    None => break,
                };
                let slot = task.task_id - 1;
                let outcome =
                    run_task(&task, metric.as_ref(), k, task_count, package_pairings, &descriptor, &total_items);
                if let Err(e) = &outcome {
                    error!("problem in pairing {}: {}", task.pairing_index, e);
                }
                outcomes.lock()[slot] = Some(outcome);
            }));
        }

        let mut panicked_worker = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() && panicked_worker.is_none() {
                panicked_worker = Some(worker);
            }
        }

        // shutdown phase: deterministic from here on, the watchdog is a
        // safety net only
        let _watchdog = self.config.shutdown_watchdog.map(ShutdownWatchdog::arm);

        let outcomes = Arc::try_unwrap(outcomes)
            .expect("workers joined")
            .into_inner();
        for outcome in outcomes {
            match outcome {
                Some(result) => result?,
                None => {
                    return Err(ProcessError::WorkerPanic(
                        panicked_worker.unwrap_or_default(),
                    ))
                }
            }
        }
        if let Some(worker) = panicked_worker {
            return Err(ProcessError::WorkerPanic(worker));
        }

        let total_items = *total_items.lock();
        info!("calculated and stored distances for {} items", total_items);

        Ok(RunSummary {
            tasks_run: task_count,
            skipped,
            total_items,
        })
    }

    /// Resolve pairings into task specs, rejecting empty partitions and
    /// skipping pairings that already have a result
    fn collect_tasks(&self, descriptor: &PackageDescriptor) -> Result<(Vec<TaskSpec>, usize)> {
        let mut tasks = Vec::new();
        let mut skipped = 0;

        for (index, pairing) in descriptor.pairings().iter().enumerate() {
            let left = descriptor.partition_entry(pairing.left)?;
            let right = descriptor.partition_entry(pairing.right)?;

            for entry in [left, right] {
                if entry.size < 1 {
                    return Err(ProcessError::EmptyPartition {
                        pairing: index,
                        partition: entry.id,
                    });
                }
            }

            if pairing.has_result() {
                info!(
                    "skipping pairing of partition{:05} with partition{:05} - it already contains a result",
                    pairing.left, pairing.right
                );
                skipped += 1;
                continue;
            }

            tasks.push(TaskSpec {
                pairing_index: index,
                task_id: tasks.len() + 1,
                left_id: left.id,
                left_path: descriptor.partition_path(left.id)?,
                left_size: left.size,
                right_id: right.id,
                right_path: descriptor.partition_path(right.id)?,
                right_size: right.size,
                self_pairing: pairing.is_self_pairing(),
                estimated_unique_ids: pairing.estimated_unique_ids,
                package_dir: descriptor.dir().to_path_buf(),
            });
        }
        Ok((tasks, skipped))
    }

    fn pool_size(&self, task_count: usize) -> usize {
        let workers = if self.config.multithreading {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            1
        };
        workers.min(task_count).max(1)
    }
}

/// One task: score the pairing, pin the result, bump the shared counter
fn run_task(
    task: &TaskSpec,
    metric: &dyn DistanceMetric,
    k: usize,
    total_tasks: usize,
    package_pairings: usize,
    descriptor: &Mutex<PackageDescriptor>,
    total_items: &Mutex<u64>,
) -> Result<()> {
    let handle = process_pairing(task, metric, k, total_tasks, package_pairings)?;
    descriptor.lock().set_result_for(task.pairing_index, handle)?;
    *total_items.lock() += task.estimated_unique_ids;
    info!("pairing {} done.", task.task_id);
    Ok(())
}

/// Safety net for the shutdown phase
///
/// Arms a timer thread that force-exits the process if shutdown has not
/// completed when the timeout elapses; dropping the watchdog disarms it.
/// A clean run closes all resources deterministically, so the timer never
/// fires in healthy operation.
struct ShutdownWatchdog {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownWatchdog {
    fn arm(timeout: Duration) -> Self {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            let (disarmed, condvar) = &*shared;
            let mut disarmed = disarmed.lock();
            if !*disarmed {
                condvar.wait_for(&mut disarmed, timeout);
            }
            if !*disarmed {
                warn!("shutdown stalled for {:?}; exiting", timeout);
                std::process::exit(1);
            }
        });
        Self { state }
    }
}

impl Drop for ShutdownWatchdog {
    fn drop(&mut self) {
        let (disarmed, condvar) = &*self.state;
        *disarmed.lock() = true;
        condvar.notify_all();
    }
}
