use futures::future::join_all;

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::error::HarvestError;
use crate::parse;
use crate::retry::{BackoffPolicy, retry};
use crate::stages::StageOutcome;
use crate::traits::{ContentSource, ProfileStore};

/// Fetches full bodies for every post of one author still lacking one.
///
/// The fan-out is all-or-nothing: one backoff-wrapped fetch per missing
/// body runs concurrently (bounded by the author's own post count), every
/// item is attempted, and bodies are persisted only when the whole batch
/// succeeded. A single failure discards the batch and leaves the stage
/// incomplete, so the next run retries all of it.
pub struct ContentStage<S, P> {
    source: S,
    store: P,
    retry: BackoffPolicy,
}

impl<S, P> ContentStage<S, P>
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
        if state.is_content_fetched(username) {
            return Ok(StageOutcome::AlreadyComplete);
        }

        let author = match self.store.find_author_by_handle(username).await {
            Ok(Some(author)) => author,
            Ok(None) => {
                tracing::debug!(%username, "No stored profile yet, content deferred");
                return Ok(StageOutcome::Deferred {
                    reason: format!("author `{username}` not in store"),
                });
            }
            Err(e) => return Ok(StageOutcome::deferred(e)),
        };

        let posts = match self.store.list_posts_by_author(&author.id).await {
            Ok(posts) => posts,
            Err(e) => return Ok(StageOutcome::deferred(e)),
        };
        let missing: Vec<_> = posts.into_iter().filter(|p| p.body.is_none()).collect();

        if missing.is_empty() {
            state.mark_content_fetched(username);
            checkpoints.save(state)?;
            return Ok(StageOutcome::Completed);
        }

        let fetches = missing.iter().map(|post| {
            let source = &self.source;
            let policy = &self.retry;
            async move {
                let payload = retry(policy, || source.post_body(&post.id)).await?;
                let body = parse::post_body(&payload)?;
                Ok::<(String, String), HarvestError>((post.id.clone(), body))
            }
        });

        // Every item is attempted even when one of them has failed.
        let results = join_all(fetches).await;
        let total = results.len();

        let mut bodies = Vec::with_capacity(total);
        let mut failed = 0usize;
        for (post, result) in missing.iter().zip(results) {
            match result {
                Ok(pair) => bodies.push(pair),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(%username, post = %post.id, error = %e, "Body fetch failed");
                }
            }
        }

        if failed > 0 {
            let abort = HarvestError::BatchAborted { failed, total };
            tracing::warn!(%username, %abort, "Discarding body batch");
            return Ok(StageOutcome::deferred(abort));
        }

        for (post_id, body) in &bodies {
            if let Err(e) = self.store.set_post_body(post_id, body).await {
                tracing::warn!(%username, post = %post_id, error = %e, "Body persist failed");
                return Ok(StageOutcome::deferred(e));
            }
        }

        tracing::debug!(%username, bodies = bodies.len(), "Post bodies stored");
        state.mark_content_fetched(username);
        checkpoints.save(state)?;
        Ok(StageOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn stage(source: MockSource, store: MockStore) -> ContentStage<MockSource, MockStore> {
        ContentStage::new(source, store, BackoffPolicy::immediate(2))
    }

    fn seeded_store() -> MockStore {
        let store = MockStore::with_author(make_author("a1", "ada", 5));
        store.seed_post(make_post("p1", "a1", None));
        store.seed_post(make_post("p2", "a1", None));
        store.seed_post(make_post("p3", "a1", None));
        store
    }

    #[tokio::test]
    async fn fetches_all_missing_bodies_then_checkpoints() {
        let source = MockSource::new();
        source.stub_body("p1", Ok(body_payload(&["one"])));
        source.stub_body("p2", Ok(body_payload(&["two"])));
        source.stub_body("p3", Ok(body_payload(&["three"])));
        let store = seeded_store();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source, store.clone())
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(store.find_post("p1").unwrap().body.as_deref(), Some("one"));
        assert_eq!(store.find_post("p3").unwrap().body.as_deref(), Some("three"));
        assert!(state.is_content_fetched("ada"));
    }

    #[tokio::test]
    async fn one_failure_discards_the_whole_batch() {
        // p2 exhausts its retries; no body at all may be persisted and a
        // later run must retry all three.
        let source = MockSource::new();
        source.stub_body("p1", Ok(body_payload(&["one"])));
        source.stub_body("p2", Err(HarvestError::Network("reset".into())));
        source.stub_body("p2", Err(HarvestError::Network("reset".into())));
        source.stub_body("p3", Ok(body_payload(&["three"])));
        let store = seeded_store();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source.clone(), store.clone())
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();

        match outcome {
            StageOutcome::Deferred { reason } => assert!(reason.contains("1 of 3")),
            other => panic!("expected Deferred, got {other:?}"),
        }
        assert!(store.posts().iter().all(|p| p.body.is_none()));
        assert!(!state.is_content_fetched("ada"));
        assert_eq!(checkpoints.save_count(), 0);
        // All three were attempted despite the failure.
        assert_eq!(source.call_count("body:p1"), 1);
        assert_eq!(source.call_count("body:p2"), 2);
        assert_eq!(source.call_count("body:p3"), 1);

        // The retry run fetches all three again.
        source.stub_body("p1", Ok(body_payload(&["one"])));
        source.stub_body("p2", Ok(body_payload(&["two"])));
        source.stub_body("p3", Ok(body_payload(&["three"])));
        let retry_outcome = stage(source, store.clone())
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();
        assert_eq!(retry_outcome, StageOutcome::Completed);
        assert!(store.posts().iter().all(|p| p.body.is_some()));
    }

    #[tokio::test]
    async fn already_filled_bodies_are_not_refetched() {
        let source = MockSource::new();
        source.stub_body("p2", Ok(body_payload(&["two"])));
        let store = MockStore::with_author(make_author("a1", "ada", 5));
        store.seed_post(make_post("p1", "a1", Some("have it")));
        store.seed_post(make_post("p2", "a1", None));
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source.clone(), store)
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(source.call_count("body:p1"), 0);
        assert_eq!(source.call_count("body:p2"), 1);
    }

    #[tokio::test]
    async fn no_missing_bodies_completes_without_remote_calls() {
        let source = MockSource::new();
        let store = MockStore::with_author(make_author("a1", "ada", 5));
        store.seed_post(make_post("p1", "a1", Some("done")));
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source.clone(), store)
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(source.total_calls(), 0);
        assert!(state.is_content_fetched("ada"));
    }

    #[tokio::test]
    async fn unknown_author_defers() {
        let source = MockSource::new();
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source, store)
            .run("ada", &mut state, &checkpoints)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Deferred { .. }));
        assert!(!state.is_content_fetched("ada"));
    }
}
