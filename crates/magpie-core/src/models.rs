use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An author profile as harvested from the remote API.
///
/// Identity is the stable external `id` plus the unique `username` handle.
/// Discovery creates a bare stub (id + handle); the detail stage fills in
/// the rest. Rows are never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    /// Raw rich-text `about` document, as returned by the API.
    pub about_raw: Option<String>,
    /// Plain text flattened from `about_raw`.
    pub about_text: Option<String>,
    pub image_id: Option<String>,
    /// Live custom domain, when the author has one configured.
    pub custom_domain: Option<String>,
    pub is_book_author: bool,
    pub follower_count: i64,
    pub following_count: i64,
    /// Opaque metadata blob passed through to storage.
    pub meta: Option<serde_json::Value>,
}

/// A post owned by an author. The `body` is fetched lazily by the
/// content stage; the listing stage creates rows without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub clap_count: i64,
    pub response_count: i64,
    pub reading_time: f64,
    pub collection_id: Option<String>,
    pub body: Option<String>,
}

/// Directed follow relationship: `followed_id` is followed by
/// `follower_id`. Unique on the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub followed_id: String,
    pub follower_id: String,
}

/// The slice of a follower's profile carried on a followers page,
/// enough to create a stub author row for the edge target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerProfile {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub bio: Option<String>,
}

/// Opaque pagination continuation token. Never persisted: a crash
/// mid-pagination restarts that entity's stage from page one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a remote collection. `next` is `None` when the remote
/// reported no further page (hasNext = false or a missing cursor).
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }

    pub fn with_next(items: Vec<T>, next: Cursor) -> Self {
        Self {
            items,
            next: Some(next),
        }
    }
}

/// Convert the API's epoch-milliseconds timestamps to absolute time.
/// Zero and out-of-range values map to `None`.
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_conversion() {
        let ts = timestamp_from_millis(1_700_000_000_000).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
        assert!(timestamp_from_millis(0).is_none());
        assert!(timestamp_from_millis(-5).is_none());
    }

    #[test]
    fn page_constructors() {
        let p: Page<u32> = Page::last(vec![1, 2]);
        assert!(p.next.is_none());

        let p = Page::with_next(vec![1], Cursor::from("abc"));
        assert_eq!(p.next.unwrap().as_str(), "abc");
    }
}
