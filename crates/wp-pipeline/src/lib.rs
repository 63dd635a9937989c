//! # wp-pipeline
//!
//! The canonical stage sequence and the append-only tracker that records
//! each work item's trip through it.
//!
//! A [`PipelineRun`] holds one [`StageRecord`] per attempt at a stage. A
//! work item counts as complete only when every [`Stage`] has a completed
//! record; [`StageTracker::completeness`] reports which stages are missing
//! and [`StageTracker::next_stage`] where to pick up after an interruption.

pub mod error;
pub mod run;
pub mod stage;
pub mod tracker;

pub use error::StageError;
pub use run::{Completeness, PipelineRun, StageRecord, StageStatus};
pub use stage::Stage;
pub use tracker::StageTracker;
