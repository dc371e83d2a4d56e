//! Per-run stage metrics and process-lifetime aggregates.
//!
//! ```ascii
//! run start ──► RunRecorder ──► begin(stage, input) ──► StageTimer
//!                    ▲                                      │ finish(output)
//!                    └──────────── record(StageMetrics) ◄───┘
//!                    │
//!                    └─ finish() ──► PipelineRunReport ──► PerformanceMonitor::record
//!                                                          (MonitorSummary)
//! ```
//!
//! Reports are plain serde values so an external monitoring collaborator can
//! ship them anywhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StageError;

/// Pipeline stage names, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lexical,
    Recall,
    Neural,
    Domain,
    Quality,
    Diversity,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Recall => "recall",
            Self::Neural => "neural",
            Self::Domain => "domain",
            Self::Quality => "quality",
            Self::Diversity => "diversity",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================================================
// Stage Metrics
// ============================================================================

/// What one stage did during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: Stage,
    pub input: usize,
    pub output: usize,
    pub duration_ms: f64,
    /// Stage-specific counters, e.g. `cache_hits`, `batches_failed`.
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    /// The stage stepped aside (recall, threshold or domain bypass).
    #[serde(default)]
    pub bypassed: bool,
    /// Why the stage degraded, if it did.
    #[serde(default)]
    pub degraded: Option<String>,
}

impl StageMetrics {
    /// Output over input. An empty input passes everything.
    pub fn pass_through_rate(&self) -> f64 {
        if self.input == 0 {
            1.0
        } else {
            self.output as f64 / self.input as f64
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn with_counter(mut self, name: &str, value: impl TryInto<u64>) -> Self {
        self.counters
            .insert(name.to_string(), value.try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn with_bypass(mut self, bypassed: bool) -> Self {
        self.bypassed = bypassed;
        self
    }

    pub fn with_degradation(mut self, error: Option<&StageError>) -> Self {
        self.degraded = error.map(|e| e.to_string());
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Timer for a stage in progress.
#[derive(Debug)]
pub struct StageTimer {
    stage: Stage,
    input: usize,
    started: Instant,
}

impl StageTimer {
    pub fn finish(self, output: usize) -> StageMetrics {
        StageMetrics {
            stage: self.stage,
            input: self.input,
            output,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            counters: BTreeMap::new(),
            bypassed: false,
            degraded: None,
        }
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Observability record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunReport {
    pub run_id: Uuid,
    pub query: String,
    pub input_count: usize,
    pub output_count: usize,
    pub duration_ms: f64,
    /// Neural-stage cache hits over lookups; 0 when nothing was looked up.
    pub cache_hit_rate: f64,
    pub stages: Vec<StageMetrics>,
    /// Set when the query or input was rejected before any stage ran.
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl PipelineRunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == stage)
    }

    pub fn degraded_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|m| m.is_degraded())
            .map(|m| m.stage)
            .collect()
    }

    pub fn is_stage_degraded(&self, stage: Stage) -> bool {
        self.stage(stage).map_or(false, StageMetrics::is_degraded)
    }

    pub fn is_degraded(&self) -> bool {
        self.stages.iter().any(StageMetrics::is_degraded)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Collects stage metrics for one run.
#[derive(Debug)]
pub struct RunRecorder {
    run_id: Uuid,
    query: String,
    input_count: usize,
    started: Instant,
    stages: Vec<StageMetrics>,
    validation_error: Option<String>,
}

impl RunRecorder {
    pub fn start(query: &str, input_count: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.to_string(),
            input_count,
            started: Instant::now(),
            stages: Vec::new(),
            validation_error: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn begin(&self, stage: Stage, input: usize) -> StageTimer {
        StageTimer {
            stage,
            input,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, metrics: StageMetrics) {
        tracing::debug!(
            run_id = %self.run_id,
            stage = metrics.stage.as_str(),
            input = metrics.input,
            output = metrics.output,
            duration_ms = metrics.duration_ms,
            bypassed = metrics.bypassed,
            degraded = metrics.is_degraded(),
            "Stage finished"
        );
        self.stages.push(metrics);
    }

    pub fn reject(&mut self, reason: &StageError) {
        self.validation_error = Some(reason.to_string());
    }

    pub fn finish(self, output_count: usize) -> PipelineRunReport {
        let (hits, lookups) = self
            .stages
            .iter()
            .find(|m| m.stage == Stage::Neural)
            .map(|m| (m.counter("cache_hits"), m.input as u64))
            .unwrap_or((0, 0));
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        PipelineRunReport {
            run_id: self.run_id,
            query: self.query,
            input_count: self.input_count,
            output_count,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            cache_hit_rate,
            stages: self.stages,
            validation_error: self.validation_error,
        }
    }
}

// ============================================================================
// Performance Monitor
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct StageAggregate {
    runs: u64,
    pass_through_sum: f64,
    duration_ms_sum: f64,
    degraded: u64,
}

/// Aggregated view of a stage across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub runs: u64,
    pub avg_pass_through_rate: f64,
    pub avg_duration_ms: f64,
    pub degraded_runs: u64,
}

/// Snapshot of everything the monitor has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub total_runs: u64,
    pub degraded_runs: u64,
    pub rejected_runs: u64,
    pub avg_duration_ms: f64,
    pub stages: Vec<StageSummary>,
}

impl fmt::Display for MonitorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runs={} degraded={} rejected={} avg={:.1}ms",
            self.total_runs, self.degraded_runs, self.rejected_runs, self.avg_duration_ms
        )?;
        for stage in &self.stages {
            write!(
                f,
                " {}={:.0}%/{:.1}ms",
                stage.stage,
                stage.avg_pass_through_rate * 100.0,
                stage.avg_duration_ms
            )?;
        }
        Ok(())
    }
}

/// Process-lifetime collector of run reports.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    total_runs: AtomicU64,
    degraded_runs: AtomicU64,
    rejected_runs: AtomicU64,
    total_time_us: AtomicU64,
    stages: Mutex<BTreeMap<Stage, StageAggregate>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, report: &PipelineRunReport) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if report.is_degraded() {
            self.degraded_runs.fetch_add(1, Ordering::Relaxed);
        }
        if report.validation_error.is_some() {
            self.rejected_runs.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_us
            .fetch_add((report.duration_ms * 1000.0) as u64, Ordering::Relaxed);

        let mut stages = self.stages.lock().await;
        for metrics in &report.stages {
            let agg = stages.entry(metrics.stage).or_default();
            agg.runs += 1;
            agg.pass_through_sum += metrics.pass_through_rate();
            agg.duration_ms_sum += metrics.duration_ms;
            if metrics.is_degraded() {
                agg.degraded += 1;
            }
        }
    }

    pub fn total_runs(&self) -> u64 {
        self.total_runs.load(Ordering::Relaxed)
    }

    pub fn degraded_runs(&self) -> u64 {
        self.degraded_runs.load(Ordering::Relaxed)
    }

    pub async fn summary(&self) -> MonitorSummary {
        let total_runs = self.total_runs();
        let avg_duration_ms = if total_runs == 0 {
            0.0
        } else {
            Duration::from_micros(self.total_time_us.load(Ordering::Relaxed)).as_secs_f64()
                * 1000.0
                / total_runs as f64
        };

        let stages = self
            .stages
            .lock()
            .await
            .iter()
            .map(|(stage, agg)| {
                let runs = agg.runs.max(1) as f64;
                StageSummary {
                    stage: *stage,
                    runs: agg.runs,
                    avg_pass_through_rate: agg.pass_through_sum / runs,
                    avg_duration_ms: agg.duration_ms_sum / runs,
                    degraded_runs: agg.degraded,
                }
            })
            .collect();

        MonitorSummary {
            total_runs,
            degraded_runs: self.degraded_runs(),
            rejected_runs: self.rejected_runs.load(Ordering::Relaxed),
            avg_duration_ms,
            stages,
        }
    }

    pub async fn reset(&self) {
        self.total_runs.store(0, Ordering::Relaxed);
        self.degraded_runs.store(0, Ordering::Relaxed);
        self.rejected_runs.store(0, Ordering::Relaxed);
        self.total_time_us.store(0, Ordering::Relaxed);
        self.stages.lock().await.clear();
    }
}
