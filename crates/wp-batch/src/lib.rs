//! # wp-batch
//!
//! Batch coordination for Waypoint: an ordered list of work items driven
//! through the canonical stage sequence, one item and one stage at a time,
//! with durable checkpoints so an interrupted batch resumes where it stopped.
//!
//! - [`BatchCoordinator`] runs the batch, retrying failed stages up to the
//!   configured limit and routing every tool action through the
//!   authorization pipeline.
//! - [`CheckpointManager`] writes sequence-numbered, versioned snapshots and
//!   recovers from the newest one that parses, then the batch state file,
//!   then a fresh start.
//! - [`BatchEvent`]s describe every boundary crossed and every fallback taken.

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod state;

pub use checkpoint::{
    BatchStateFile, Checkpoint, CheckpointManager, LoadedCheckpoint, Recovery, RecoverySource,
};
pub use coordinator::{
    BatchCoordinator, BatchSummary, ResumeReport, StageContext, StageExecutor, StageFailure,
};
pub use error::{BatchError, CheckpointError};
pub use events::{read_event_log, BatchEvent, EventDispatcher, LogSink, NotificationSink};
pub use state::{BatchState, BatchStatus, ItemStatus, WorkItem};
