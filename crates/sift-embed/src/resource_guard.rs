use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::System;

/// Samples system memory and CPU usage and decides whether the worker
/// pool may grow, gating `WorkerPoolProvider::spawn_worker` calls from the
/// orchestrator. Only meaningful for in-process (worker-pool) providers;
/// HTTP providers scale on the remote side.
pub struct ResourceGuard {
    sample_interval: Duration,
    memory_stop_pct: f64,
    memory_resume_pct: f64,
    cpu_guard_pct: f64,
    state: Mutex<GuardState>,
}

struct GuardState {
    system: System,
    last_sampled: Option<Instant>,
    memory_used_pct: f64,
    cpu_used_pct: f64,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::with_thresholds(Duration::from_secs(15), 0.78, 0.70, 0.55)
    }

    pub fn with_thresholds(
        sample_interval: Duration,
        memory_stop_pct: f64,
        memory_resume_pct: f64,
        cpu_guard_pct: f64,
    ) -> Self {
        Self {
            sample_interval,
            memory_stop_pct,
            memory_resume_pct,
            cpu_guard_pct,
            state: Mutex::new(GuardState {
                system: System::new(),
                last_sampled: None,
                memory_used_pct: 0.0,
                cpu_used_pct: 0.0,
            }),
        }
    }

    fn resample_if_due(&self, state: &mut GuardState) {
        let due = state
            .last_sampled
            .is_none_or(|t| t.elapsed() >= self.sample_interval);
        if !due {
            return;
        }
        state.system.refresh_memory();
        state.system.refresh_cpu_usage();
        let total = state.system.total_memory().max(1);
        let used = state.system.used_memory();
        state.memory_used_pct = used as f64 / total as f64;
        state.cpu_used_pct = state.system.global_cpu_usage() as f64 / 100.0;
        state.last_sampled = Some(Instant::now());
    }

    /// Estimated additional memory fraction consumed by one more worker,
    /// assuming each worker's footprint is proportional to current usage
    /// divided by `current_workers` (or a flat guess if none are running).
    fn projected_memory_pct(&self, state: &GuardState, current_workers: usize, extra_workers: usize) -> f64 {
        let per_worker = if current_workers > 0 {
            state.memory_used_pct / current_workers as f64
        } else {
            0.05
        };
        state.memory_used_pct + per_worker * extra_workers as f64
    }

    /// Whether the pool may add one more worker right now.
    pub fn can_scale_up(&self, current_workers: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        self.resample_if_due(&mut state);

        if state.cpu_used_pct >= self.cpu_guard_pct {
            return false;
        }
        let projected_one = self.projected_memory_pct(&state, current_workers, 1);
        let projected_two = self.projected_memory_pct(&state, current_workers, 2);
        projected_one < self.memory_stop_pct && projected_two < self.memory_stop_pct
    }

    /// Whether usage has dropped enough to reclaim a worker instead.
    pub fn should_scale_down(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.resample_if_due(&mut state);
        state.memory_used_pct < self.memory_resume_pct && state.cpu_used_pct < self.cpu_guard_pct
    }
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_samples_without_panicking() {
        let guard = ResourceGuard::new();
        let _ = guard.can_scale_up(1);
        let _ = guard.should_scale_down();
    }
}
