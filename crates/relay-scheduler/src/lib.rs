//! Transcoder job scheduler: tracks per-worker job-type capacity and
//! admits jobs to the least-loaded worker with room for them.
//!
//! Grounded on `rust-srec::scheduler::actor::registry` (a `HashMap<String,
//! Handle>` registry with first-registered tie-breaking) and
//! `rust-srec::pipeline::worker_pool`'s per-type atomic load counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Cpu,
    Gpu,
    Probe,
}

#[derive(Debug, Clone, Copy)]
pub enum HwHint {
    PreferGpu,
    CpuOnly,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no worker has capacity for this job")]
    CapacityExhausted,
    #[error("unknown job id")]
    UnknownJob,
    #[error("unknown worker id")]
    UnknownWorker,
}

/// Capacity limits a worker stream advertises.
#[derive(Debug, Clone, Copy)]
pub struct WorkerLimits {
    pub max_cpu_jobs: usize,
    pub max_gpu_jobs: usize,
    pub max_probe_jobs: usize,
    pub max_total_jobs: usize,
}

impl WorkerLimits {
    /// `max_cpu_jobs` falls back to the detected core count, else to
    /// `max_total_jobs`; `max_gpu_jobs` of `0` (unlimited) is coerced to
    /// `100`; `max_total_jobs` is always required.
    pub fn new(
        max_cpu_jobs: Option<usize>,
        max_gpu_jobs: Option<usize>,
        max_probe_jobs: Option<usize>,
        max_total_jobs: usize,
        detected_cores: usize,
    ) -> Self {
        let max_cpu_jobs = max_cpu_jobs.unwrap_or_else(|| {
            if detected_cores > 0 {
                detected_cores
            } else {
                max_total_jobs
            }
        });
        let max_gpu_jobs = match max_gpu_jobs {
            Some(0) | None => 100,
            Some(n) => n,
        };
        Self {
            max_cpu_jobs,
            max_gpu_jobs,
            max_probe_jobs: max_probe_jobs.unwrap_or(max_total_jobs),
            max_total_jobs,
        }
    }

    fn max_for(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::Cpu => self.max_cpu_jobs,
            JobType::Gpu => self.max_gpu_jobs,
            JobType::Probe => self.max_probe_jobs,
        }
    }
}

#[derive(Default)]
struct LoadCounters {
    cpu: AtomicUsize,
    gpu: AtomicUsize,
    probe: AtomicUsize,
}

impl LoadCounters {
    fn counter(&self, job_type: JobType) -> &AtomicUsize {
        match job_type {
            JobType::Cpu => &self.cpu,
            JobType::Gpu => &self.gpu,
            JobType::Probe => &self.probe,
        }
    }

    fn active_of(&self, job_type: JobType) -> usize {
        self.counter(job_type).load(Ordering::SeqCst)
    }

    fn total_active(&self) -> usize {
        self.cpu.load(Ordering::SeqCst) + self.gpu.load(Ordering::SeqCst) + self.probe.load(Ordering::SeqCst)
    }
}

struct WorkerEntry {
    limits: WorkerLimits,
    load: LoadCounters,
    registered_at: Instant,
    registration_order: u64,
}

impl WorkerEntry {
    fn has_capacity_for(&self, job_type: JobType) -> bool {
        self.load.total_active() < self.limits.max_total_jobs
            && self.load.active_of(job_type) < self.limits.max_for(job_type)
    }

    /// Fraction of `max_for(job_type)` currently in use; lower is less
    /// loaded. A worker with no capacity at all scores `f64::INFINITY` so
    /// it never wins selection.
    fn load_fraction(&self, job_type: JobType) -> f64 {
        if !self.has_capacity_for(job_type) {
            return f64::INFINITY;
        }
        let max = self.limits.max_for(job_type).max(1) as f64;
        self.load.active_of(job_type) as f64 / max
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub session_id: String,
    pub channel_id: String,
    pub source_codec: String,
    pub target_codec: String,
    pub bitrates: Vec<u32>,
    pub preset: String,
    pub encoder_overrides: HashMap<String, String>,
    pub container: String,
}

struct JobAssignment {
    worker_id: String,
    job_type: JobType,
}

/// Registry of worker streams plus the jobs currently admitted to each.
/// Admission picks the worker with capacity for the derived job type
/// whose `load_fraction` is lowest; ties go to whichever worker registered
/// first.
pub struct Scheduler {
    workers: RwLock<HashMap<String, Arc<WorkerEntry>>>,
    jobs: RwLock<HashMap<String, JobAssignment>>,
    next_registration_order: AtomicU32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            next_registration_order: AtomicU32::new(0),
        }
    }

    pub fn register_worker(&self, worker_id: impl Into<String>, limits: WorkerLimits) {
        let order = self.next_registration_order.fetch_add(1, Ordering::SeqCst);
        self.workers.write().insert(
            worker_id.into(),
            Arc::new(WorkerEntry {
                limits,
                load: LoadCounters::default(),
                registered_at: Instant::now(),
                registration_order: order as u64,
            }),
        );
    }

    pub fn has_capacity_for(&self, worker_id: &str, job_type: JobType) -> bool {
        self.workers
            .read()
            .get(worker_id)
            .is_some_and(|w| w.has_capacity_for(job_type))
    }

    fn select_worker(&self, job_type: JobType) -> Option<(String, Arc<WorkerEntry>)> {
        self.workers
            .read()
            .iter()
            .filter(|(_, w)| w.has_capacity_for(job_type))
            .min_by(|(_, a), (_, b)| {
                a.load_fraction(job_type)
                    .partial_cmp(&b.load_fraction(job_type))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.registration_order.cmp(&b.registration_order))
            })
            .map(|(id, w)| (id.clone(), w.clone()))
    }

    /// Picks a worker and job type for `job`. `hw_hint: PreferGpu` tries
    /// GPU capacity first, falling back to CPU; `CpuOnly` never selects
    /// GPU. Probe jobs always use `JobType::Probe`.
    pub fn start_job(
        &self,
        job: Job,
        hw_hint: HwHint,
        is_probe: bool,
    ) -> Result<(String, JobType), SchedulerError> {
        let candidates: Vec<JobType> = if is_probe {
            vec![JobType::Probe]
        } else {
            match hw_hint {
                HwHint::PreferGpu => vec![JobType::Gpu, JobType::Cpu],
                HwHint::CpuOnly => vec![JobType::Cpu],
            }
        };

        for job_type in candidates {
            if let Some((worker_id, worker)) = self.select_worker(job_type) {
                worker.load.counter(job_type).fetch_add(1, Ordering::SeqCst);
                self.jobs.write().insert(
                    job.job_id.clone(),
                    JobAssignment {
                        worker_id: worker_id.clone(),
                        job_type,
                    },
                );
                info!(job_id = %job.job_id, worker_id = %worker_id, ?job_type, "job admitted");
                return Ok((worker_id, job_type));
            }
        }
        Err(SchedulerError::CapacityExhausted)
    }

    pub fn stop_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        let assignment = self
            .jobs
            .write()
            .remove(job_id)
            .ok_or(SchedulerError::UnknownJob)?;
        if let Some(worker) = self.workers.read().get(&assignment.worker_id) {
            worker
                .load
                .counter(assignment.job_type)
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// The worker reported a different encoder than requested (e.g. GPU
    /// hardware fallback to software). Moves the job's accounting to
    /// `new_type` on the same worker without re-running admission.
    pub fn reclassify_job(&self, job_id: &str, new_type: JobType) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write();
        let assignment = jobs.get_mut(job_id).ok_or(SchedulerError::UnknownJob)?;
        if assignment.job_type == new_type {
            return Ok(());
        }
        if let Some(worker) = self.workers.read().get(&assignment.worker_id) {
            worker
                .load
                .counter(assignment.job_type)
                .fetch_sub(1, Ordering::SeqCst);
            worker.load.counter(new_type).fetch_add(1, Ordering::SeqCst);
        }
        assignment.job_type = new_type;
        Ok(())
    }

    /// Closes every job attributed to a worker whose stream dropped.
    /// Returns the job ids that were closed so the caller can notify
    /// sessions to requeue them.
    pub fn on_worker_disconnected(&self, worker_id: &str) -> Vec<String> {
        let mut jobs = self.jobs.write();
        let closed: Vec<String> = jobs
            .iter()
            .filter(|(_, a)| a.worker_id == worker_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &closed {
            jobs.remove(id);
        }
        self.workers.write().remove(worker_id);
        if !closed.is_empty() {
            warn!(worker_id, jobs = closed.len(), "worker disconnected, closing jobs");
        }
        closed
    }

    pub fn active_jobs_for(&self, worker_id: &str) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|a| a.worker_id == worker_id)
            .count()
    }

    pub fn worker_uptime(&self, worker_id: &str) -> Option<std::time::Duration> {
        self.workers.read().get(worker_id).map(|w| w.registered_at.elapsed())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            session_id: "s1".to_string(),
            channel_id: "c1".to_string(),
            source_codec: "h264".to_string(),
            target_codec: "h265".to_string(),
            bitrates: vec![2_000_000],
            preset: "fast".to_string(),
            encoder_overrides: HashMap::new(),
            container: "mpegts".to_string(),
        }
    }

    #[test]
    fn test_scenario_eight_job_type_limits() {
        let scheduler = Scheduler::new();
        scheduler.register_worker(
            "w1",
            WorkerLimits::new(Some(2), Some(1), Some(1), 2, 0),
        );

        let (w, t1) = scheduler.start_job(job("j1"), HwHint::CpuOnly, false).unwrap();
        assert_eq!(w, "w1");
        assert_eq!(t1, JobType::Cpu);

        let (_, t2) = scheduler.start_job(job("j2"), HwHint::CpuOnly, false).unwrap();
        assert_eq!(t2, JobType::Cpu);

        // total cap (2) reached: GPU job rejected even though GPU itself has room
        let result = scheduler.start_job(job("j3"), HwHint::PreferGpu, false);
        assert_eq!(result.unwrap_err(), SchedulerError::CapacityExhausted);

        scheduler.stop_job("j1").unwrap();
        let (_, t4) = scheduler.start_job(job("j4"), HwHint::PreferGpu, false).unwrap();
        assert_eq!(t4, JobType::Gpu);

        assert_eq!(scheduler.active_jobs_for("w1"), 2);
    }

    #[test]
    fn test_prefer_gpu_falls_back_to_cpu_when_gpu_full() {
        let scheduler = Scheduler::new();
        scheduler.register_worker("w1", WorkerLimits::new(Some(4), Some(1), Some(1), 4, 0));

        let (_, t1) = scheduler.start_job(job("j1"), HwHint::PreferGpu, false).unwrap();
        assert_eq!(t1, JobType::Gpu);
        let (_, t2) = scheduler.start_job(job("j2"), HwHint::PreferGpu, false).unwrap();
        assert_eq!(t2, JobType::Cpu);
    }

    #[test]
    fn test_least_loaded_selection_across_workers() {
        let scheduler = Scheduler::new();
        scheduler.register_worker("w1", WorkerLimits::new(Some(10), Some(10), Some(10), 10, 0));
        scheduler.register_worker("w2", WorkerLimits::new(Some(10), Some(10), Some(10), 10, 0));

        scheduler.start_job(job("j1"), HwHint::CpuOnly, false).unwrap();
        scheduler.start_job(job("j2"), HwHint::CpuOnly, false).unwrap();
        // w1 took j1, now at 1/10 load; w2 should take j2 to stay balanced.
        assert_eq!(scheduler.active_jobs_for("w1"), 1);
        assert_eq!(scheduler.active_jobs_for("w2"), 1);
    }

    #[test]
    fn test_reclassify_moves_load_between_types() {
        let scheduler = Scheduler::new();
        scheduler.register_worker("w1", WorkerLimits::new(Some(4), Some(1), Some(1), 4, 0));
        let (_, t1) = scheduler.start_job(job("j1"), HwHint::PreferGpu, false).unwrap();
        assert_eq!(t1, JobType::Gpu);

        scheduler.reclassify_job("j1", JobType::Cpu).unwrap();
        // GPU slot freed; a second GPU job should now be admitted
        let (_, t2) = scheduler.start_job(job("j2"), HwHint::PreferGpu, false).unwrap();
        assert_eq!(t2, JobType::Gpu);
    }

    #[test]
    fn test_worker_disconnect_closes_its_jobs() {
        let scheduler = Scheduler::new();
        scheduler.register_worker("w1", WorkerLimits::new(Some(4), Some(4), Some(4), 4, 0));
        scheduler.start_job(job("j1"), HwHint::CpuOnly, false).unwrap();
        scheduler.start_job(job("j2"), HwHint::CpuOnly, false).unwrap();

        let closed = scheduler.on_worker_disconnected("w1");
        assert_eq!(closed.len(), 2);
        assert_eq!(scheduler.stop_job("j1").unwrap_err(), SchedulerError::UnknownJob);
    }

    #[test]
    fn test_worker_limits_defaults() {
        let limits = WorkerLimits::new(None, None, None, 8, 4);
        assert_eq!(limits.max_cpu_jobs, 4);
        assert_eq!(limits.max_gpu_jobs, 100);
        assert_eq!(limits.max_probe_jobs, 8);
    }
}
