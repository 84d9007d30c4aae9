//! In-memory job queue and progress fan-out.
//!
//! This crate provides:
//! - A priority job queue that also serves as the job store
//! - Per-job progress broadcasting with ordered, close-on-terminal delivery

pub mod broadcaster;
pub mod error;
pub mod queue;

pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig, QueueStatus};
