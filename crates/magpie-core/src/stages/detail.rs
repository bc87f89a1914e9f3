use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::error::HarvestError;
use crate::parse;
use crate::retry::{BackoffPolicy, retry};
use crate::stages::StageOutcome;
use crate::traits::{ContentSource, ProfileStore};

/// Fetches one author's full profile and upserts it.
///
/// A payload whose result node is not an author (deleted or repurposed
/// handle) is a skip, not a failure; either way the author is only
/// marked detailed after a successful upsert.
pub struct DetailStage<S, P> {
    source: S,
    store: P,
    retry: BackoffPolicy,
}

impl<S, P> DetailStage<S, P>
where
    S: ContentSource,
    P: ProfileStore,
{
    pub fn new(source: S, store: P, retry: BackoffPolicy) -> Self {
        Self {
            source,
            store,
            retry,
        }
    }

    pub async fn run<C: CheckpointStore>(
        &self,
        username: &str,
        state: &mut CheckpointState,
        checkpoints: &C,
    ) -> Result<StageOutcome, HarvestError> {
        if state.is_detailed(username) {
            return Ok(StageOutcome::AlreadyComplete);
        }

        let payload = match retry(&self.retry, || self.source.author_detail(username)).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%username, error = %e, "Author detail fetch failed");
                return Ok(StageOutcome::deferred(e));
            }
        };

        let author = match parse::author_detail(&payload) {
            Ok(author) => author,
            Err(e) => {
                tracing::debug!(%username, error = %e, "Author detail payload skipped");
                return Ok(StageOutcome::deferred(e));
            }
        };

        if let Err(e) = self.store.upsert_author(&author).await {
            tracing::warn!(%username, error = %e, "Author upsert failed");
            return Ok(StageOutcome::deferred(e));
        }

        state.mark_detailed(username);
        checkpoints.save(state)?;
        Ok(StageOutcome::Completed)
    }
}
