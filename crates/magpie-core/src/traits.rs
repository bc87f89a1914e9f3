use std::future::Future;

use serde_json::Value;

use crate::error::HarvestError;
use crate::models::{AuthorRecord, Cursor, FollowEdge, FollowerProfile, PostRecord};

/// The remote paginated API the pipeline harvests from.
///
/// Each call returns the raw JSON payload; stages parse it into domain
/// records via [`crate::parse`]. Implementations do not retry — the
/// stages wrap every call in the backoff fetcher.
pub trait ContentSource: Send + Sync + Clone {
    /// One page of authors recommended for a topic.
    fn topic_authors_page(
        &self,
        topic: &str,
        after: Option<&Cursor>,
    ) -> impl Future<Output = Result<Value, HarvestError>> + Send;

    /// Full profile for one author handle.
    fn author_detail(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Value, HarvestError>> + Send;

    /// The author's recent post listing (summaries, no bodies).
    fn author_posts(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Value, HarvestError>> + Send;

    /// Full body of one post.
    fn post_body(&self, post_id: &str)
    -> impl Future<Output = Result<Value, HarvestError>> + Send;

    /// One page of the author's followers.
    fn followers_page(
        &self,
        username: &str,
        from: Option<&Cursor>,
    ) -> impl Future<Output = Result<Value, HarvestError>> + Send;
}

/// Persistence collaborator for harvested records.
///
/// All upserts are idempotent on the record's external identity, so
/// re-running a stage never duplicates rows.
pub trait ProfileStore: Send + Sync + Clone {
    /// Insert or update a full author profile.
    fn upsert_author(
        &self,
        author: &AuthorRecord,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Insert a bare id+handle row if absent; never clobbers a profile
    /// that the detail stage already filled in.
    fn upsert_author_stub(
        &self,
        id: &str,
        username: &str,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Insert a follower's partial profile if absent.
    fn upsert_follower(
        &self,
        follower: &FollowerProfile,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Insert or update a post summary; an existing body is preserved.
    fn upsert_post(
        &self,
        post: &PostRecord,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Attach a lazily fetched body to an existing post.
    fn set_post_body(
        &self,
        post_id: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Record a follow edge; inserting the same pair twice is a no-op.
    fn upsert_relation(
        &self,
        edge: &FollowEdge,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    fn relation_exists(
        &self,
        edge: &FollowEdge,
    ) -> impl Future<Output = Result<bool, HarvestError>> + Send;

    fn find_author_by_handle(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<AuthorRecord>, HarvestError>> + Send;

    fn find_author_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<AuthorRecord>, HarvestError>> + Send;

    fn find_post_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<PostRecord>, HarvestError>> + Send;

    fn list_posts_by_author(
        &self,
        author_id: &str,
    ) -> impl Future<Output = Result<Vec<PostRecord>, HarvestError>> + Send;
}
