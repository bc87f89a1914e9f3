use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::error::HarvestError;
use crate::parse;
use crate::retry::{BackoffPolicy, retry};
use crate::stages::StageOutcome;
use crate::traits::{ContentSource, ProfileStore};

/// Fetches one author's recent post listing and upserts the summaries.
///
/// The remote listing is truncated client-side to `posts_per_author`
/// items; bodies are left for the content stage. Upserts preserve any
/// body a previous run already attached.
pub struct ListingStage<S, P> {
    source: S,
    store: P,
    retry: BackoffPolicy,
    posts_per_author: usize,
}

impl<S, P> ListingStage<S, P>
where
    S: ContentSource,
    P: ProfileStore,
{
    pub fn new(source: S, store: P, retry: BackoffPolicy, posts_per_author: usize) -> Self {
        Self {
            source,
            store,
            retry,
            posts_per_author,
        }
    }

    pub async fn run<C: CheckpointStore>(
        &self,
        username: &str,
        state: &mut CheckpointState,
        checkpoints: &C,
    ) -> Result<StageOutcome, HarvestError> {
        if state.is_listed(username) {
            return Ok(StageOutcome::AlreadyComplete);
        }

        // The stored profile (when detail already ran) provides the owner
        // id for payloads that omit the creator per post.
        let known = match self.store.find_author_by_handle(username).await {
            Ok(author) => author,
            Err(e) => {
                tracing::warn!(%username, error = %e, "Author lookup failed");
                return Ok(StageOutcome::deferred(e));
            }
        };

        let payload = match retry(&self.retry, || self.source.author_posts(username)).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%username, error = %e, "Post listing fetch failed");
                return Ok(StageOutcome::deferred(e));
            }
        };

        let fallback_id = known.as_ref().map(|a| a.id.as_str());
        let mut posts = match parse::author_posts(&payload, fallback_id) {
            Ok(posts) => posts,
            Err(e) => {
                tracing::debug!(%username, error = %e, "Post listing payload skipped");
                return Ok(StageOutcome::deferred(e));
            }
        };
        posts.truncate(self.posts_per_author);

        for post in &posts {
            if let Err(e) = self.store.upsert_post(post).await {
                tracing::warn!(%username, post = %post.id, error = %e, "Post upsert failed");
                return Ok(StageOutcome::deferred(e));
            }
        }

        tracing::debug!(%username, posts = posts.len(), "Post listing stored");
        state.mark_listed(username);
        checkpoints.save(state)?;
        Ok(StageOutcome::Completed)
    }
}
