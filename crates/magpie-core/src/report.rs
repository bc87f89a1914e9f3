use crate::pipeline::RunSummary;

/// The four per-author stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Detail,
    Listing,
    Content,
    Relations,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Detail => "detail",
            StageKind::Listing => "listing",
            StageKind::Content => "content",
            StageKind::Relations => "relations",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    RunStarted {
        topics: usize,
        target_authors: usize,
    },
    TopicStarted {
        topic: &'a str,
    },
    TopicSkipped {
        topic: &'a str,
    },
    TopicCompleted {
        topic: &'a str,
        new_handles: usize,
    },
    SelectionReady {
        selected: usize,
        shortfall: usize,
    },
    StageSkipped {
        stage: StageKind,
        author: &'a str,
    },
    StageCompleted {
        stage: StageKind,
        author: &'a str,
    },
    StageDeferred {
        stage: StageKind,
        author: &'a str,
        reason: &'a str,
    },
    AuthorFinished {
        author: &'a str,
    },
    Interrupted,
    RunFinished {
        summary: &'a RunSummary,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl HarvestReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::RunStarted {
                topics,
                target_authors,
            } => {
                tracing::info!(%topics, %target_authors, "Harvest run started");
            }
            HarvestEvent::TopicStarted { topic } => {
                tracing::info!(%topic, "Collecting authors from topic");
            }
            HarvestEvent::TopicSkipped { topic } => {
                tracing::debug!(%topic, "Topic already completed, skipping");
            }
            HarvestEvent::TopicCompleted { topic, new_handles } => {
                tracing::info!(%topic, %new_handles, "Topic completed");
            }
            HarvestEvent::SelectionReady {
                selected,
                shortfall,
            } => {
                if shortfall > 0 {
                    tracing::warn!(%selected, %shortfall, "Fewer unique authors than the target");
                } else {
                    tracing::info!(%selected, "Author selection ready");
                }
            }
            HarvestEvent::StageSkipped { stage, author } => {
                tracing::debug!(%stage, %author, "Stage already checkpointed, skipping");
            }
            HarvestEvent::StageCompleted { stage, author } => {
                tracing::info!(%stage, %author, "Stage completed");
            }
            HarvestEvent::StageDeferred {
                stage,
                author,
                reason,
            } => {
                tracing::warn!(%stage, %author, %reason, "Stage deferred to a future run");
            }
            HarvestEvent::AuthorFinished { author } => {
                tracing::info!(%author, "All stages done for author");
            }
            HarvestEvent::Interrupted => {
                tracing::info!("Interrupt received, stopping after the in-flight unit");
            }
            HarvestEvent::RunFinished { summary } => {
                tracing::info!(
                    authors = %summary.authors_processed,
                    completed = %summary.stages_completed,
                    skipped = %summary.stages_skipped,
                    deferred = %summary.deferred.len(),
                    interrupted = %summary.interrupted,
                    "Harvest run finished"
                );
            }
        }
    }
}
