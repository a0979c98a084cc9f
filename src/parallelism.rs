//! Randomized trials spread over worker threads.

use crossbeam_channel::TryRecvError;
use log::trace;
use std::thread;

/// Upper bound on the number of independently seeded jobs.
const MAX_JOBS: u64 = 1000;

/// Partial result of a subset of trials.
pub trait Partial {
    fn merge(&mut self, other: Self);
}

/// Runs at least `trials` trials, split into jobs that each get their own
/// generator, so the outcome does not depend on thread scheduling.
///
/// Returns the merged result and the number of trials that were actually run,
/// which is rounded up to a multiple of the number of jobs.
pub fn run_trials<TPartial, TBuilder, TRunner>(
    builder: TBuilder,
    runner: TRunner,
    trials: u64,
) -> (TPartial, u64)
where
    TPartial: Partial + Send,
    TBuilder: Fn() -> TPartial + Send + Copy,
    TRunner: Fn(u64, u64, &mut TPartial) + Send + Copy,
{
    let jobs = trials.clamp(1, MAX_JOBS);
    let (s1, r1) = crossbeam_channel::unbounded();
    for job in 0..jobs {
        s1.send(job).expect("receiver alive");
    }
    drop(s1);
    let trials_per_job = trials.div_ceil(jobs);
    let trials = trials_per_job * jobs;
    let nthreads = num_cpus::get().min(jobs as usize).max(1);
    let mut total = builder();
    trace!(target: "humeval", "randomized, {jobs} jobs, {nthreads} threads");
    thread::scope(|scope| {
        let (s2, r2) = crossbeam_channel::unbounded();
        for _ in 0..nthreads {
            let r1 = r1.clone();
            let s2 = s2.clone();
            scope.spawn(move || {
                let mut thread_total = builder();
                loop {
                    match r1.try_recv() {
                        Ok(job) => runner(job, trials_per_job, &mut thread_total),
                        Err(TryRecvError::Empty) => unreachable!(),
                        Err(TryRecvError::Disconnected) => break,
                    }
                }
                s2.send(thread_total).expect("receiver alive");
            });
        }
        drop(s2);
        while let Ok(thread_total) = r2.recv() {
            total.merge(thread_total);
        }
    });
    (total, trials)
}
