//! Test utilities: mock implementations of the pipeline's trait seams.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks
//! use `Arc<Mutex<_>>` for interior mutability, allowing assertions on
//! recorded calls. Remote responses are scripted per endpoint; asking a
//! mock for an unscripted response panics, so a miswired test fails
//! fast instead of looping on a retry policy.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::{HarvestConfig, Pacing};
use crate::error::HarvestError;
use crate::models::{AuthorRecord, Cursor, FollowEdge, FollowerProfile, PostRecord};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::retry::BackoffPolicy;
use crate::traits::{ContentSource, ProfileStore};

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

type ResponseQueues = Arc<Mutex<HashMap<String, VecDeque<Result<Value, HarvestError>>>>>;

/// Mock remote source with per-endpoint scripted response queues.
///
/// Queue keys are `topic:<t>`, `detail:<u>`, `posts:<u>`, `body:<p>`,
/// `followers:<u>`; each call pops the front of its key's queue.
#[derive(Clone, Default)]
pub struct MockSource {
    responses: ResponseQueues,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn stub(&self, key: String, response: Result<Value, HarvestError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub fn stub_topic_page(&self, topic: &str, response: Result<Value, HarvestError>) {
        self.stub(format!("topic:{topic}"), response);
    }

    pub fn stub_detail(&self, username: &str, response: Result<Value, HarvestError>) {
        self.stub(format!("detail:{username}"), response);
    }

    pub fn stub_posts(&self, username: &str, response: Result<Value, HarvestError>) {
        self.stub(format!("posts:{username}"), response);
    }

    pub fn stub_body(&self, post_id: &str, response: Result<Value, HarvestError>) {
        self.stub(format!("body:{post_id}"), response);
    }

    pub fn stub_followers(&self, username: &str, response: Result<Value, HarvestError>) {
        self.stub(format!("followers:{username}"), response);
    }

    fn pop(&self, key: &str) -> Result<Value, HarvestError> {
        self.calls.lock().unwrap().push(key.to_string());
        self.responses
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted response left for `{key}`"))
    }

    /// How often the endpoint behind `key` was called.
    pub fn call_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == key)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ContentSource for MockSource {
    async fn topic_authors_page(
        &self,
        topic: &str,
        _after: Option<&Cursor>,
    ) -> Result<Value, HarvestError> {
        self.pop(&format!("topic:{topic}"))
    }

    async fn author_detail(&self, username: &str) -> Result<Value, HarvestError> {
        self.pop(&format!("detail:{username}"))
    }

    async fn author_posts(&self, username: &str) -> Result<Value, HarvestError> {
        self.pop(&format!("posts:{username}"))
    }

    async fn post_body(&self, post_id: &str) -> Result<Value, HarvestError> {
        self.pop(&format!("body:{post_id}"))
    }

    async fn followers_page(
        &self,
        username: &str,
        _from: Option<&Cursor>,
    ) -> Result<Value, HarvestError> {
        self.pop(&format!("followers:{username}"))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    authors: Vec<AuthorRecord>,
    posts: Vec<PostRecord>,
    relations: Vec<FollowEdge>,
    author_upsert_error: Option<HarvestError>,
}

/// In-memory [`ProfileStore`] with idempotent-by-id semantics matching
/// the real database layer.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_author(author: AuthorRecord) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().authors.push(author);
        store
    }

    pub fn seed_post(&self, post: PostRecord) {
        self.inner.lock().unwrap().posts.push(post);
    }

    pub fn seed_relation(&self, followed_id: &str, follower_id: &str) {
        self.inner.lock().unwrap().relations.push(FollowEdge {
            followed_id: followed_id.to_string(),
            follower_id: follower_id.to_string(),
        });
    }

    /// Make the next `upsert_author` call fail with the given error.
    pub fn fail_next_author_upsert(&self, error: HarvestError) {
        self.inner.lock().unwrap().author_upsert_error = Some(error);
    }

    pub fn author_count(&self) -> usize {
        self.inner.lock().unwrap().authors.len()
    }

    pub fn post_count(&self) -> usize {
        self.inner.lock().unwrap().posts.len()
    }

    pub fn relation_count(&self) -> usize {
        self.inner.lock().unwrap().relations.len()
    }

    pub fn find_author(&self, id: &str) -> Option<AuthorRecord> {
        self.inner
            .lock()
            .unwrap()
            .authors
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn find_post(&self, id: &str) -> Option<PostRecord> {
        self.inner
            .lock()
            .unwrap()
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn relations(&self) -> Vec<FollowEdge> {
        self.inner.lock().unwrap().relations.clone()
    }
}

impl ProfileStore for MockStore {
    async fn upsert_author(&self, author: &AuthorRecord) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.author_upsert_error.take() {
            return Err(e);
        }
        if let Some(existing) = inner.authors.iter_mut().find(|a| a.id == author.id) {
            *existing = author.clone();
        } else {
            inner.authors.push(author.clone());
        }
        Ok(())
    }

    async fn upsert_author_stub(&self, id: &str, username: &str) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.authors.iter().any(|a| a.id == id) {
            return Ok(());
        }
        inner.authors.push(stub_author(id, username));
        Ok(())
    }

    async fn upsert_follower(&self, follower: &FollowerProfile) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.authors.iter().any(|a| a.id == follower.id) {
            return Ok(());
        }
        let mut record = stub_author(&follower.id, &follower.username);
        record.name = follower.name.clone();
        record.bio = follower.bio.clone();
        inner.authors.push(record);
        Ok(())
    }

    async fn upsert_post(&self, post: &PostRecord) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.posts.iter_mut().find(|p| p.id == post.id) {
            let kept_body = existing.body.take();
            *existing = post.clone();
            if existing.body.is_none() {
                existing.body = kept_body;
            }
        } else {
            inner.posts.push(post.clone());
        }
        Ok(())
    }

    async fn set_post_body(&self, post_id: &str, body: &str) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.posts.iter_mut().find(|p| p.id == post_id) {
            Some(post) => {
                post.body = Some(body.to_string());
                Ok(())
            }
            None => Err(HarvestError::Database(format!("unknown post `{post_id}`"))),
        }
    }

    async fn upsert_relation(&self, edge: &FollowEdge) -> Result<(), HarvestError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.relations.contains(edge) {
            inner.relations.push(edge.clone());
        }
        Ok(())
    }

    async fn relation_exists(&self, edge: &FollowEdge) -> Result<bool, HarvestError> {
        Ok(self.inner.lock().unwrap().relations.contains(edge))
    }

    async fn find_author_by_handle(
        &self,
        username: &str,
    ) -> Result<Option<AuthorRecord>, HarvestError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .authors
            .iter()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn find_author_by_id(&self, id: &str) -> Result<Option<AuthorRecord>, HarvestError> {
        Ok(self.find_author(id))
    }

    async fn find_post_by_id(&self, id: &str) -> Result<Option<PostRecord>, HarvestError> {
        Ok(self.find_post(id))
    }

    async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<PostRecord>, HarvestError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpoints
// ---------------------------------------------------------------------------

/// In-memory [`CheckpointStore`] shared across "runs" through clones,
/// with a save counter for ordering assertions.
#[derive(Clone, Default)]
pub struct MemoryCheckpoints {
    state: Arc<Mutex<CheckpointState>>,
    saves: Arc<Mutex<u32>>,
    load_error: Arc<Mutex<Option<HarvestError>>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(state: CheckpointState) -> Self {
        let store = Self::default();
        *store.state.lock().unwrap() = state;
        store
    }

    pub fn fail_next_load(&self, error: HarvestError) {
        *self.load_error.lock().unwrap() = Some(error);
    }

    pub fn snapshot(&self) -> CheckpointState {
        self.state.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> u32 {
        *self.saves.lock().unwrap()
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn load(&self) -> Result<CheckpointState, HarvestError> {
        if let Some(e) = self.load_error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.snapshot())
    }

    fn save(&self, state: &CheckpointState) -> Result<(), HarvestError> {
        *self.state.lock().unwrap() = state.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    fn reset(&self) -> Result<(), HarvestError> {
        *self.state.lock().unwrap() = CheckpointState::default();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporters
// ---------------------------------------------------------------------------

/// Compact label for an event, e.g. `StageCompleted(detail:ada)`.
pub fn event_label(event: &HarvestEvent<'_>) -> String {
    match event {
        HarvestEvent::RunStarted { .. } => "RunStarted".into(),
        HarvestEvent::TopicStarted { topic } => format!("TopicStarted({topic})"),
        HarvestEvent::TopicSkipped { topic } => format!("TopicSkipped({topic})"),
        HarvestEvent::TopicCompleted { topic, new_handles } => {
            format!("TopicCompleted({topic}, new={new_handles})")
        }
        HarvestEvent::SelectionReady {
            selected,
            shortfall,
        } => format!("SelectionReady(selected={selected}, shortfall={shortfall})"),
        HarvestEvent::StageSkipped { stage, author } => format!("StageSkipped({stage}:{author})"),
        HarvestEvent::StageCompleted { stage, author } => {
            format!("StageCompleted({stage}:{author})")
        }
        HarvestEvent::StageDeferred { stage, author, .. } => {
            format!("StageDeferred({stage}:{author})")
        }
        HarvestEvent::AuthorFinished { author } => format!("AuthorFinished({author})"),
        HarvestEvent::Interrupted => "Interrupted".into(),
        HarvestEvent::RunFinished { .. } => "RunFinished".into(),
    }
}

/// Reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl HarvestReporter for MockReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        self.events.lock().unwrap().push(event_label(&event));
    }
}

/// Reporter that cancels a token when a given event label shows up,
/// for interruption-mid-run tests.
pub struct CancellingReporter {
    cancel: CancellationToken,
    trigger: String,
}

impl CancellingReporter {
    pub fn new(cancel: CancellationToken, trigger: &str) -> Self {
        Self {
            cancel,
            trigger: trigger.to_string(),
        }
    }
}

impl HarvestReporter for CancellingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        if event_label(&event) == self.trigger {
            self.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn stub_author(id: &str, username: &str) -> AuthorRecord {
    AuthorRecord {
        id: id.to_string(),
        username: username.to_string(),
        name: None,
        bio: None,
        about_raw: None,
        about_text: None,
        image_id: None,
        custom_domain: None,
        is_book_author: false,
        follower_count: 0,
        following_count: 0,
        meta: None,
    }
}

pub fn make_author(id: &str, username: &str, follower_count: i64) -> AuthorRecord {
    let mut author = stub_author(id, username);
    author.follower_count = follower_count;
    author
}

pub fn make_post(id: &str, author_id: &str, body: Option<&str>) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        author_id: author_id.to_string(),
        title: format!("title of {id}"),
        subtitle: None,
        published_at: None,
        clap_count: 0,
        response_count: 0,
        reading_time: 0.0,
        collection_id: None,
        body: body.map(str::to_string),
    }
}

pub fn zero_pacing() -> Pacing {
    Pacing {
        topic_page_delay: Duration::ZERO,
        follower_page_delay: Duration::ZERO,
        topic_retry_wait: Duration::ZERO,
        follower_retry_wait: Duration::ZERO,
    }
}

/// Config with no waits and a two-attempt retry budget.
pub fn test_config() -> HarvestConfig {
    HarvestConfig {
        target_authors: 5,
        posts_per_author: 10,
        follower_cap: 30,
        retry: BackoffPolicy::immediate(2),
        pacing: zero_pacing(),
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

pub fn topic_page_payload(authors: &[(&str, &str)], next: Option<&str>) -> Value {
    let edges: Vec<Value> = authors
        .iter()
        .map(|(id, username)| {
            json!({"node": {"__typename": "Author", "id": id, "username": username}})
        })
        .collect();
    json!({
        "data": {"topicAuthors": {
            "edges": edges,
            "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next}
        }}
    })
}

pub fn detail_payload(id: &str, username: &str, follower_count: i64) -> Value {
    json!({
        "data": {"authorResult": {
            "__typename": "Author",
            "id": id,
            "username": username,
            "name": format!("Name of {username}"),
            "bio": "bio",
            "imageId": "img-1",
            "verifications": {"isBookAuthor": false},
            "socialStats": {"followerCount": follower_count, "followingCount": 0},
            "about": null
        }}
    })
}

pub fn tombstone_payload(username: &str) -> Value {
    json!({
        "data": {"authorResult": {"__typename": "Tombstone", "username": username}}
    })
}

pub fn posts_payload(author_id: &str, post_ids: &[&str]) -> Value {
    let posts: Vec<Value> = post_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "creator": {"id": author_id},
                "title": format!("title of {id}"),
                "firstPublishedAt": 1_700_000_000_000i64,
                "previewContent": {"subtitle": "sub"},
                "clapCount": 1,
                "postResponses": {"count": 0},
                "readingTime": 2.0,
                "collection": null
            })
        })
        .collect();
    json!({"data": {"authorResult": {"latestPosts": {"posts": posts}}}})
}

pub fn body_payload(paragraphs: &[&str]) -> Value {
    let paragraphs: Vec<Value> = paragraphs.iter().map(|t| json!({"text": t})).collect();
    json!({"data": {"post": {"content": {"bodyModel": {"paragraphs": paragraphs}}}}})
}

pub fn followers_payload(followers: &[FollowerProfile], next: Option<&str>) -> Value {
    let users: Vec<Value> = followers
        .iter()
        .map(|f| {
            json!({
                "__typename": "Author",
                "id": f.id,
                "username": f.username,
                "name": f.name,
                "bio": f.bio,
            })
        })
        .collect();
    let next = match next {
        Some(cursor) => json!({"from": cursor}),
        None => Value::Null,
    };
    json!({
        "data": {"authorResult": {"followers": {
            "users": users,
            "pagingInfo": {"next": next}
        }}}
    })
}
