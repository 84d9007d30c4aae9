//! Pipeline stages and weighted job progress.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where a job is in its lifecycle. Variants are declared in pipeline order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the pipeline to pick the job up
    #[default]
    Queued,
    Initializing,
    Preprocessing,
    Generating,
    Postprocessing,
    Uploading,
    Finalizing,
    /// All stages finished
    Done,
}

impl Stage {
    /// The six processing stages, in execution order.
    pub const PIPELINE: &'static [Stage] = &[
        Stage::Initializing,
        Stage::Preprocessing,
        Stage::Generating,
        Stage::Postprocessing,
        Stage::Uploading,
        Stage::Finalizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Initializing => "initializing",
            Stage::Preprocessing => "preprocessing",
            Stage::Generating => "generating",
            Stage::Postprocessing => "postprocessing",
            Stage::Uploading => "uploading",
            Stage::Finalizing => "finalizing",
            Stage::Done => "done",
        }
    }

    /// The only stage that may follow this one.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Initializing),
            Stage::Initializing => Some(Stage::Preprocessing),
            Stage::Preprocessing => Some(Stage::Generating),
            Stage::Generating => Some(Stage::Postprocessing),
            Stage::Postprocessing => Some(Stage::Uploading),
            Stage::Uploading => Some(Stage::Finalizing),
            Stage::Finalizing => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Estimated wall-clock seconds, used to weight overall progress.
    pub fn estimated_duration_secs(&self) -> u64 {
        match self {
            Stage::Initializing => 2,
            Stage::Preprocessing => 5,
            Stage::Generating => 60,
            Stage::Postprocessing => 10,
            Stage::Uploading => 8,
            Stage::Finalizing => 3,
            Stage::Queued | Stage::Done => 0,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Active,
    Done,
}

/// Sub-progress of a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageProgress {
    pub stage: Stage,
    pub status: StageStatus,
    /// Fraction of the stage completed (0.0-1.0)
    pub fraction: f64,
    pub estimated_duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal stage transition from {from} to {to}")]
pub struct StageTransitionError {
    pub from: Stage,
    pub to: Stage,
}

/// Overall job progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Progress {
    pub stage: Stage,
    /// Weighted overall percentage (0-100), never decreases
    pub percentage: u8,
    pub stages: Vec<StageProgress>,
    pub estimated_time_remaining_secs: u64,
    pub current_operation: String,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        let stages = Stage::PIPELINE
            .iter()
            .map(|stage| StageProgress {
                stage: *stage,
                status: StageStatus::Pending,
                fraction: 0.0,
                estimated_duration_secs: stage.estimated_duration_secs(),
                started_at: None,
                completed_at: None,
            })
            .collect();

        let mut progress = Self {
            stage: Stage::Queued,
            percentage: 0,
            stages,
            estimated_time_remaining_secs: 0,
            current_operation: "Waiting in queue".to_string(),
        };
        progress.recompute();
        progress
    }

    /// Move to the next stage. Skipping or revisiting a stage is rejected.
    pub fn enter_stage(
        &mut self,
        stage: Stage,
        operation: impl Into<String>,
    ) -> Result<(), StageTransitionError> {
        if self.stage.next() != Some(stage) || stage == Stage::Done {
            return Err(StageTransitionError {
                from: self.stage,
                to: stage,
            });
        }

        let now = Utc::now();
        if let Some(current) = self.entry_mut(self.stage) {
            current.status = StageStatus::Done;
            current.fraction = 1.0;
            current.completed_at = Some(now);
        }
        if let Some(next) = self.entry_mut(stage) {
            next.status = StageStatus::Active;
            next.started_at = Some(now);
        }

        self.stage = stage;
        self.current_operation = operation.into();
        self.recompute();
        Ok(())
    }

    /// Report sub-progress of the current stage. Fractions only move forward.
    pub fn update_stage(&mut self, fraction: f64, operation: Option<String>) {
        let stage = self.stage;
        if let Some(entry) = self.entry_mut(stage) {
            let fraction = fraction.clamp(0.0, 1.0);
            if fraction > entry.fraction {
                entry.fraction = fraction;
            }
        }
        if let Some(operation) = operation {
            self.current_operation = operation;
        }
        self.recompute();
    }

    /// Close out the final stage; the job is at 100%.
    pub fn complete(&mut self) -> Result<(), StageTransitionError> {
        if self.stage != Stage::Finalizing {
            return Err(StageTransitionError {
                from: self.stage,
                to: Stage::Done,
            });
        }

        let now = Utc::now();
        if let Some(entry) = self.entry_mut(Stage::Finalizing) {
            entry.status = StageStatus::Done;
            entry.fraction = 1.0;
            entry.completed_at = Some(now);
        }
        self.stage = Stage::Done;
        self.current_operation = "Complete".to_string();
        self.recompute();
        Ok(())
    }

    pub fn stage_entry(&self, stage: Stage) -> Option<&StageProgress> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    fn entry_mut(&mut self, stage: Stage) -> Option<&mut StageProgress> {
        self.stages.iter_mut().find(|s| s.stage == stage)
    }

    fn recompute(&mut self) {
        let total: u64 = self.stages.iter().map(|s| s.estimated_duration_secs).sum();
        if total == 0 {
            return;
        }

        let done: f64 = self
            .stages
            .iter()
            .map(|s| s.estimated_duration_secs as f64 * s.fraction)
            .sum();
        let percentage = ((done / total as f64) * 100.0).floor().clamp(0.0, 100.0) as u8;
        self.percentage = self.percentage.max(percentage);

        let remaining: f64 = self
            .stages
            .iter()
            .map(|s| s.estimated_duration_secs as f64 * (1.0 - s.fraction))
            .sum();
        self.estimated_time_remaining_secs = remaining.ceil() as u64;
    }
}
