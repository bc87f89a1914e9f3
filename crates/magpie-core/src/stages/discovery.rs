use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::pager::Pager;
use crate::parse::{self, DiscoveredAuthor};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::retry::retry;
use crate::stages::StageOutcome;
use crate::traits::{ContentSource, ProfileStore};

/// Walks every pending topic's author pages and builds the selection.
///
/// Handles are deduplicated process-wide in first-seen order across all
/// topics, taken in the order supplied; the selection grows append-only
/// up to the configured target, so handles chosen by an earlier run are
/// never displaced. Page fetches that exhaust their backoff are waited
/// out and retried for as long as the process lives. Selected handles
/// with a known id get a stub row so later stages can hang records off
/// them.
pub struct DiscoveryStage<S, P> {
    source: S,
    store: P,
    config: HarvestConfig,
}

impl<S, P> DiscoveryStage<S, P>
where
    S: ContentSource,
    P: ProfileStore,
{
    pub fn new(source: S, store: P, config: HarvestConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub async fn run<C, R>(
        &self,
        topics: &[String],
        state: &mut CheckpointState,
        checkpoints: &C,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<StageOutcome, HarvestError>
    where
        C: CheckpointStore,
        R: HarvestReporter,
    {
        let pending: Vec<&String> = topics
            .iter()
            .filter(|t| !state.is_topic_complete(t))
            .collect();
        if pending.is_empty() {
            for topic in topics {
                reporter.report(HarvestEvent::TopicSkipped { topic });
            }
            self.report_selection(state, reporter);
            return Ok(StageOutcome::AlreadyComplete);
        }

        // Dedup set seeded with handles selected by earlier runs, so a
        // handle seen again under a new topic is not counted twice.
        let mut seen: HashSet<String> = state.selected_authors.iter().cloned().collect();

        for topic in topics {
            if state.is_topic_complete(topic) {
                reporter.report(HarvestEvent::TopicSkipped { topic });
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(StageOutcome::Interrupted);
            }

            reporter.report(HarvestEvent::TopicStarted { topic });
            let discovered = match self.walk_topic(topic, &mut seen, cancel).await? {
                Some(d) => d,
                None => return Ok(StageOutcome::Interrupted),
            };

            // Selection is filled in first-seen order as topics finish,
            // so no discovered handle is lost once its topic is marked
            // complete.
            let new_handles = discovered.len();
            for author in discovered {
                if state.selected_authors.len() >= self.config.target_authors {
                    break;
                }
                state.select_author(&author.username);
                if let Some(id) = &author.id {
                    if let Err(e) = self.store.upsert_author_stub(id, &author.username).await {
                        // Detail resolves the row later either way.
                        tracing::warn!(username = %author.username, error = %e, "Stub upsert failed");
                    }
                }
            }

            state.mark_topic_complete(topic);
            checkpoints.save(state)?;
            reporter.report(HarvestEvent::TopicCompleted { topic, new_handles });
        }

        self.report_selection(state, reporter);
        Ok(StageOutcome::Completed)
    }

    /// Walk one topic to exhaustion. Returns the topic's newly seen
    /// handles, or `None` when cancellation cut the walk short.
    async fn walk_topic(
        &self,
        topic: &str,
        seen: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<DiscoveredAuthor>>, HarvestError> {
        let mut pager = Pager::new();
        let mut discovered = Vec::new();

        loop {
            let fetched = pager
                .next_page(|cursor| async move {
                    let payload = retry(&self.config.retry, || {
                        self.source.topic_authors_page(topic, cursor.as_ref())
                    })
                    .await?;
                    parse::topic_authors_page(&payload)
                })
                .await;

            let page = match fetched {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        %topic,
                        error = %e,
                        wait_s = self.config.pacing.topic_retry_wait.as_secs(),
                        "Topic page failed, will retry the same page"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(self.config.pacing.topic_retry_wait) => continue,
                        () = cancel.cancelled() => return Ok(None),
                    }
                }
            };

            for author in page.items {
                if seen.insert(author.username.clone()) {
                    discovered.push(author);
                }
            }

            if pager.exhausted() {
                break;
            }
            tokio::time::sleep(self.config.pacing.topic_page_delay).await;
        }

        tracing::debug!(%topic, new_handles = discovered.len(), "Topic exhausted");
        Ok(Some(discovered))
    }

    fn report_selection<R: HarvestReporter>(&self, state: &CheckpointState, reporter: &R) {
        let selected = state.selected_authors.len();
        reporter.report(HarvestEvent::SelectionReady {
            selected,
            shortfall: self.config.target_authors.saturating_sub(selected),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn stage(source: MockSource, store: MockStore, target: usize) -> DiscoveryStage<MockSource, MockStore> {
        DiscoveryStage::new(source, store, test_config().with_target_authors(target))
    }

    #[tokio::test]
    async fn collects_across_pages_and_topics() {
        let source = MockSource::new();
        source.stub_topic_page(
            "rust",
            Ok(topic_page_payload(&[("a1", "ada"), ("a2", "grace")], Some("c1"))),
        );
        source.stub_topic_page("rust", Ok(topic_page_payload(&[("a3", "joan")], None)));
        source.stub_topic_page("ai", Ok(topic_page_payload(&[("a4", "mary")], None)));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source, store.clone(), 10)
            .run(
                &topics(&["rust", "ai"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(state.selected_authors, vec!["ada", "grace", "joan", "mary"]);
        assert!(state.is_topic_complete("rust"));
        assert!(state.is_topic_complete("ai"));
        // One stub row per selected handle with a known id.
        assert_eq!(store.author_count(), 4);
    }

    #[tokio::test]
    async fn duplicate_handle_across_topics_counts_once_in_first_seen_order() {
        let source = MockSource::new();
        source.stub_topic_page(
            "rust",
            Ok(topic_page_payload(&[("a1", "ada"), ("a2", "grace")], None)),
        );
        source.stub_topic_page(
            "ai",
            Ok(topic_page_payload(&[("a1", "ada"), ("a3", "joan")], None)),
        );
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        stage(source, store, 10)
            .run(
                &topics(&["rust", "ai"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(state.selected_authors, vec!["ada", "grace", "joan"]);
    }

    #[tokio::test]
    async fn selection_stops_at_the_target_but_topics_still_complete() {
        let source = MockSource::new();
        source.stub_topic_page(
            "rust",
            Ok(topic_page_payload(&[("a1", "ada"), ("a2", "grace"), ("a3", "joan")], None)),
        );
        source.stub_topic_page("ai", Ok(topic_page_payload(&[("a4", "mary")], None)));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        stage(source.clone(), store, 2)
            .run(
                &topics(&["rust", "ai"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(state.selected_authors, vec!["ada", "grace"]);
        // All topics were still walked to exhaustion.
        assert!(state.is_topic_complete("ai"));
        assert_eq!(source.call_count("topic:ai"), 1);
    }

    #[tokio::test]
    async fn shortfall_is_reported_not_an_error() {
        let source = MockSource::new();
        source.stub_topic_page("rust", Ok(topic_page_payload(&[("a1", "ada")], None)));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let reporter = MockReporter::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source, store, 50)
            .run(
                &topics(&["rust"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(state.selected_authors.len(), 1);
        assert!(
            reporter
                .events()
                .iter()
                .any(|e| e == "SelectionReady(selected=1, shortfall=49)")
        );
    }

    #[tokio::test]
    async fn completed_topics_are_not_refetched() {
        let source = MockSource::new();
        source.stub_topic_page("ai", Ok(topic_page_payload(&[("a4", "mary")], None)));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();
        state.mark_topic_complete("rust");
        state.select_author("ada");

        stage(source.clone(), store, 10)
            .run(
                &topics(&["rust", "ai"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(source.call_count("topic:rust"), 0);
        // Earlier selection is preserved, new handles appended after it.
        assert_eq!(state.selected_authors, vec!["ada", "mary"]);
    }

    #[tokio::test]
    async fn all_topics_done_is_already_complete() {
        let source = MockSource::new();
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();
        state.mark_topic_complete("rust");
        state.select_author("ada");

        let outcome = stage(source.clone(), store, 10)
            .run(
                &topics(&["rust"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::AlreadyComplete);
        assert_eq!(source.total_calls(), 0);
        assert_eq!(checkpoints.save_count(), 0);
    }

    #[tokio::test]
    async fn page_error_retries_the_same_page_indefinitely() {
        let source = MockSource::new();
        // Backoff (2 attempts) exhausts twice; the stage keeps retrying
        // the same page until it succeeds.
        for _ in 0..4 {
            source.stub_topic_page("rust", Err(HarvestError::Network("flap".into())));
        }
        source.stub_topic_page("rust", Ok(topic_page_payload(&[("a1", "ada")], None)));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let mut state = CheckpointState::default();

        let outcome = stage(source.clone(), store, 10)
            .run(
                &topics(&["rust"]),
                &mut state,
                &checkpoints,
                &CancellationToken::new(),
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(source.call_count("topic:rust"), 5);
        assert_eq!(state.selected_authors, vec!["ada"]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_before_starting_a_topic() {
        let source = MockSource::new();
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = CheckpointState::default();

        let outcome = stage(source.clone(), store, 10)
            .run(
                &topics(&["rust"]),
                &mut state,
                &checkpoints,
                &cancel,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Interrupted);
        assert_eq!(source.total_calls(), 0);
        assert!(!state.is_topic_complete("rust"));
        assert_eq!(checkpoints.save_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_error_wait_interrupts_cleanly() {
        let source = MockSource::new();
        source.stub_topic_page("rust", Err(HarvestError::Network("down".into())));
        source.stub_topic_page("rust", Err(HarvestError::Network("down".into())));
        let store = MockStore::empty();
        let checkpoints = MemoryCheckpoints::new();
        let cancel = CancellationToken::new();

        let mut config = test_config();
        config.pacing.topic_retry_wait = std::time::Duration::from_secs(60);
        let stage = DiscoveryStage::new(source, store, config);

        let run_topics = topics(&["rust"]);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut state = CheckpointState::default();
            let outcome = stage
                .run(
                    &run_topics,
                    &mut state,
                    &checkpoints,
                    &task_cancel,
                    &MockReporter::new(),
                )
                .await;
            (outcome, state)
        });

        // Let the stage burn its backoff attempts and enter the error
        // wait, then interrupt.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let (outcome, state) = handle.await.unwrap();

        assert_eq!(outcome.unwrap(), StageOutcome::Interrupted);
        assert!(!state.is_topic_complete("rust"));
    }
}
