use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::Pacing;
use crate::error::HarvestError;
use crate::models::FollowEdge;
use crate::pager::Pager;
use crate::parse;
use crate::retry::{BackoffPolicy, retry};
use crate::stages::StageOutcome;
use crate::traits::{ContentSource, ProfileStore};

/// Walks one author's follower collection and records follow edges.
///
/// Accepts at most `cap` new edges per author regardless of how many
/// followers exist remotely, deduplicating against already-stored
/// relations before counting. Page errors are waited out and the same
/// page retried for as long as the process lives; only cancellation
/// breaks that loop. An author with a stored follower count of zero is
/// marked complete without a single remote call.
pub struct RelationsStage<S, P> {
    source: S,
    store: P,
    retry: BackoffPolicy,
    pacing: Pacing,
    cap: usize,
}

impl<S, P> RelationsStage<S, P>
where
    S: ContentSource,
    P: ProfileStore,
{
    pub fn new(source: S, store: P, retry: BackoffPolicy, pacing: Pacing, cap: usize) -> Self {
        Self {
            source,
            store,
            retry,
            pacing,
            cap,
        }
    }

    pub async fn run<C: CheckpointStore>(
        &self,
        username: &str,
        state: &mut CheckpointState,
        checkpoints: &C,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, HarvestError> {
        if state.is_follower_fetched(username) {
            return Ok(StageOutcome::AlreadyComplete);
        }

        let author = match self.store.find_author_by_handle(username).await {
            Ok(Some(author)) => author,
            Ok(None) => {
                // Nothing to hang edges off; complete the stage empty.
                tracing::debug!(%username, "No stored profile, no followers to crawl");
                state.mark_follower_fetched(username);
                checkpoints.save(state)?;
                return Ok(StageOutcome::Completed);
            }
            Err(e) => return Ok(StageOutcome::deferred(e)),
        };

        if author.follower_count == 0 {
            state.mark_follower_fetched(username);
            checkpoints.save(state)?;
            return Ok(StageOutcome::Completed);
        }

        tracing::info!(%username, followers = author.follower_count, cap = self.cap, "Crawling followers");

        let mut pager = Pager::new();
        let mut accepted = 0usize;

        'pages: while accepted < self.cap {
            let fetched = pager
                .next_page(|cursor| async move {
                    let payload = retry(&self.retry, || {
                        self.source.followers_page(username, cursor.as_ref())
                    })
                    .await?;
                    parse::followers_page(&payload)
                })
                .await;

            let page = match fetched {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        %username,
                        error = %e,
                        wait_s = self.pacing.follower_retry_wait.as_secs(),
                        "Follower page failed, will retry the same page"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(self.pacing.follower_retry_wait) => continue,
                        () = cancel.cancelled() => return Ok(StageOutcome::Interrupted),
                    }
                }
            };

            for follower in &page.items {
                if accepted >= self.cap {
                    break 'pages;
                }
                if follower.id == author.id {
                    continue;
                }
                let edge = FollowEdge {
                    followed_id: author.id.clone(),
                    follower_id: follower.id.clone(),
                };
                match self.store.relation_exists(&edge).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => return Ok(StageOutcome::deferred(e)),
                }
                if let Err(e) = self.store.upsert_follower(follower).await {
                    return Ok(StageOutcome::deferred(e));
                }
                if let Err(e) = self.store.upsert_relation(&edge).await {
                    return Ok(StageOutcome::deferred(e));
                }
                accepted += 1;
            }

            if pager.exhausted() {
                break;
            }
            tokio::time::sleep(self.pacing.follower_page_delay).await;
        }

        tracing::debug!(%username, %accepted, "Follower crawl done");
        state.mark_follower_fetched(username);
        checkpoints.save(state)?;
        Ok(StageOutcome::Completed)
    }
}
