//! Stage executors for the harvest pipeline.
//!
//! Each stage is idempotent: it returns immediately when its target is
//! already in the checkpoint's completed set, and on success it appends
//! the target and triggers a checkpoint save. Failures below the
//! checkpoint layer never cross a stage boundary as errors — they come
//! back as [`StageOutcome::Deferred`] and the target stays eligible for
//! the next run.

mod content;
mod detail;
mod discovery;
mod listing;
mod relations;

pub use content::ContentStage;
pub use detail::DetailStage;
pub use discovery::DiscoveryStage;
pub use listing::ListingStage;
pub use relations::RelationsStage;

/// Result of one idempotent unit of stage work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Work performed, persisted, and checkpointed.
    Completed,
    /// The checkpoint already contained this target; nothing was done.
    AlreadyComplete,
    /// Work could not finish. The target stays unmarked so the next run
    /// retries it; the reason is carried for logging/aggregation.
    Deferred { reason: String },
    /// Cancellation observed before the unit could complete; the target
    /// stays unmarked.
    Interrupted,
}

impl StageOutcome {
    pub(crate) fn deferred(err: impl std::fmt::Display) -> Self {
        StageOutcome::Deferred {
            reason: err.to_string(),
        }
    }
}
