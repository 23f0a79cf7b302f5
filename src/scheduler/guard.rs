//! Per-job reentrancy guard.
//!
//! Admission is a single insert into a lock-guarded set, so two concurrent
//! fires of the same job can never both be admitted. Different jobs never
//! contend beyond the brief set operation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Tracks which job identities currently have a run in flight.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a run of `job` if none is in flight.
    ///
    /// The returned permit marks the job as running until it is dropped, which
    /// happens exactly once on every exit path of the run.
    pub fn try_enter(&self, job: &str) -> Option<RunPermit> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if set.insert(job.to_owned()) {
            Some(RunPermit {
                guard: self.clone(),
                job: job.to_owned(),
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, job: &str) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(job)
    }

    /// Jobs with a run currently in flight, sorted.
    pub fn running(&self) -> Vec<String> {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<String> = set.iter().cloned().collect();
        jobs.sort();
        jobs
    }

    fn leave(&self, job: &str) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(job);
    }
}

/// Proof of admission. Dropping it clears the in-flight marker.
#[derive(Debug)]
pub struct RunPermit {
    guard: RunGuard,
    job: String,
}

impl RunPermit {
    pub fn job(&self) -> &str {
        &self.job
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.leave(&self.job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn second_enter_is_refused_while_first_in_flight() {
        let guard = RunGuard::new();
        let permit = guard.try_enter("slow").expect("first run admitted");
        assert!(guard.try_enter("slow").is_none());
        assert!(guard.is_running("slow"));

        drop(permit);
        assert!(!guard.is_running("slow"));
        assert!(guard.try_enter("slow").is_some());
    }

    #[test]
    fn jobs_are_guarded_independently() {
        let guard = RunGuard::new();
        let _a = guard.try_enter("a").unwrap();
        let _b = guard.try_enter("b").unwrap();
        assert_eq!(guard.running(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn permit_is_released_when_run_panics() {
        let guard = RunGuard::new();
        let inner = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = inner.try_enter("crashy").unwrap();
            panic!("job blew up");
        });
        assert!(result.is_err());
        assert!(!guard.is_running("crashy"));
    }

    #[test]
    fn concurrent_enters_admit_exactly_one() {
        let guard = RunGuard::new();
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let guard = guard.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Hold any permit until every thread has tried.
                    let permit = guard.try_enter("contended");
                    let admitted = permit.is_some();
                    barrier.wait();
                    admitted
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 1);
    }
}
