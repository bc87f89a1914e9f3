use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::report::{HarvestEvent, HarvestReporter, StageKind};
use crate::stages::{
    ContentStage, DetailStage, DiscoveryStage, ListingStage, RelationsStage, StageOutcome,
};
use crate::traits::{ContentSource, ProfileStore};

/// One stage deferred to a future run, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredStage {
    pub stage: StageKind,
    pub author: String,
    pub reason: String,
}

/// Aggregate of one pipeline run. Deferred work is collected, not fatal.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Size of the selection after discovery.
    pub selected: usize,
    /// Authors whose four stages were all attempted this run.
    pub authors_processed: usize,
    pub stages_completed: usize,
    pub stages_skipped: usize,
    pub deferred: Vec<DeferredStage>,
    pub interrupted: bool,
}

/// Sequences the harvest: load checkpoint → discovery → per selected
/// author, detail → listing → content → relations, strictly one author
/// at a time.
///
/// Completed work is never repeated: every stage consults the checkpoint
/// before doing anything, and every checkpoint save happens after the
/// persistence write it accounts for. Cancellation stops the pipeline
/// from *starting* new units; the in-flight unit finishes or fails on
/// its own, which keeps the checkpoint consistent with completed stages
/// only.
pub struct HarvestPipeline<S, P, C> {
    source: S,
    store: P,
    checkpoints: C,
    config: HarvestConfig,
}

impl<S, P, C> HarvestPipeline<S, P, C>
where
    S: ContentSource,
    P: ProfileStore,
    C: CheckpointStore,
{
    pub fn new(source: S, store: P, checkpoints: C, config: HarvestConfig) -> Self {
        Self {
            source,
            store,
            checkpoints,
            config,
        }
    }

    pub async fn run<R: HarvestReporter>(
        &self,
        topics: &[String],
        cancel: CancellationToken,
        reporter: &R,
    ) -> Result<RunSummary, HarvestError> {
        let mut state = self.checkpoints.load()?;
        reporter.report(HarvestEvent::RunStarted {
            topics: topics.len(),
            target_authors: self.config.target_authors,
        });

        let mut summary = RunSummary::default();

        let discovery = DiscoveryStage::new(
            self.source.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        let outcome = discovery
            .run(topics, &mut state, &self.checkpoints, &cancel, reporter)
            .await?;
        summary.selected = state.selected_authors.len();
        if outcome == StageOutcome::Interrupted {
            return Ok(self.finish_interrupted(summary, reporter));
        }

        let detail = DetailStage::new(
            self.source.clone(),
            self.store.clone(),
            self.config.retry.clone(),
        );
        let listing = ListingStage::new(
            self.source.clone(),
            self.store.clone(),
            self.config.retry.clone(),
            self.config.posts_per_author,
        );
        let content = ContentStage::new(
            self.source.clone(),
            self.store.clone(),
            self.config.retry.clone(),
        );
        let relations = RelationsStage::new(
            self.source.clone(),
            self.store.clone(),
            self.config.retry.clone(),
            self.config.pacing.clone(),
            self.config.follower_cap,
        );

        for username in state.selected_authors.clone() {
            if cancel.is_cancelled() {
                return Ok(self.finish_interrupted(summary, reporter));
            }

            let outcome = detail
                .run(&username, &mut state, &self.checkpoints)
                .await?;
            summary.record(StageKind::Detail, &username, &outcome, reporter);

            let outcome = listing
                .run(&username, &mut state, &self.checkpoints)
                .await?;
            summary.record(StageKind::Listing, &username, &outcome, reporter);

            let outcome = content
                .run(&username, &mut state, &self.checkpoints)
                .await?;
            summary.record(StageKind::Content, &username, &outcome, reporter);

            let outcome = relations
                .run(&username, &mut state, &self.checkpoints, &cancel)
                .await?;
            if outcome == StageOutcome::Interrupted {
                return Ok(self.finish_interrupted(summary, reporter));
            }
            summary.record(StageKind::Relations, &username, &outcome, reporter);

            summary.authors_processed += 1;
            reporter.report(HarvestEvent::AuthorFinished { author: &username });
        }

        reporter.report(HarvestEvent::RunFinished { summary: &summary });
        Ok(summary)
    }

    fn finish_interrupted<R: HarvestReporter>(
        &self,
        mut summary: RunSummary,
        reporter: &R,
    ) -> RunSummary {
        summary.interrupted = true;
        reporter.report(HarvestEvent::Interrupted);
        reporter.report(HarvestEvent::RunFinished { summary: &summary });
        summary
    }
}

impl RunSummary {
    fn record<R: HarvestReporter>(
        &mut self,
        stage: StageKind,
        author: &str,
        outcome: &StageOutcome,
        reporter: &R,
    ) {
        match outcome {
            StageOutcome::Completed => {
                self.stages_completed += 1;
                reporter.report(HarvestEvent::StageCompleted { stage, author });
            }
            StageOutcome::AlreadyComplete => {
                self.stages_skipped += 1;
                reporter.report(HarvestEvent::StageSkipped { stage, author });
            }
            StageOutcome::Deferred { reason } => {
                reporter.report(HarvestEvent::StageDeferred {
                    stage,
                    author,
                    reason,
                });
                self.deferred.push(DeferredStage {
                    stage,
                    author: author.to_string(),
                    reason: reason.clone(),
                });
            }
            // Interruption is handled by the pipeline loop directly.
            StageOutcome::Interrupted => {}
        }
    }
}
