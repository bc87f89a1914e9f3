//! Typed views over the raw JSON payloads of the remote API.
//!
//! Every stage hands the raw `serde_json::Value` it fetched to exactly one
//! of these functions and works with domain records from there on; raw
//! payloads never cross the stage boundary. A payload that does not have
//! the expected shape yields [`HarvestError::Payload`], which stages treat
//! as a skip rather than a failure.

use serde_json::Value;

use crate::error::HarvestError;
use crate::models::{AuthorRecord, Cursor, FollowerProfile, Page, PostRecord, timestamp_from_millis};

/// Node type tag the API uses for author entities.
const AUTHOR_TYPENAME: &str = "Author";

/// A handle discovered on a topic page. The id can be absent; the detail
/// stage resolves it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAuthor {
    pub id: Option<String>,
    pub username: String,
}

/// Parse one page of a topic's recommended-authors connection.
///
/// Edges whose node is not an author are silently skipped; the page
/// itself must carry `edges` and `pageInfo`.
pub fn topic_authors_page(payload: &Value) -> Result<Page<DiscoveredAuthor>, HarvestError> {
    let connection = field(payload, &["data", "topicAuthors"])?;
    let edges = array(connection, "edges")?;

    let mut items = Vec::new();
    for edge in edges {
        let Some(node) = edge.get("node") else {
            continue;
        };
        if typename(node) != Some(AUTHOR_TYPENAME) {
            continue;
        }
        let Some(username) = text(node, "username") else {
            continue;
        };
        items.push(DiscoveredAuthor {
            id: text(node, "id").map(str::to_string),
            username: username.to_string(),
        });
    }

    let page_info = field(connection, &["pageInfo"])?;
    let has_next = page_info
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next = if has_next {
        text(page_info, "endCursor").map(Cursor::from)
    } else {
        None
    };

    Ok(Page { items, next })
}

/// Parse a full author profile. Errors when the result node is missing
/// or is not an author (deleted accounts come back as a tombstone type).
pub fn author_detail(payload: &Value) -> Result<AuthorRecord, HarvestError> {
    let author = field(payload, &["data", "authorResult"])?;
    match typename(author) {
        Some(AUTHOR_TYPENAME) => {}
        Some(other) => {
            return Err(HarvestError::Payload(format!(
                "author result has type {other}, expected {AUTHOR_TYPENAME}"
            )));
        }
        None => return Err(HarvestError::Payload("author result has no type tag".into())),
    }

    let id = required_text(author, "id")?;
    let username = required_text(author, "username")?;

    let about_raw = text(author, "about").map(str::to_string);
    let about_text = about_raw.as_deref().map(flatten_about);

    let custom_domain = author
        .get("customDomainState")
        .and_then(|s| s.get("live"))
        .and_then(|l| l.get("domain"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AuthorRecord {
        id: id.to_string(),
        username: username.to_string(),
        name: text(author, "name").map(str::to_string),
        bio: text(author, "bio").map(str::to_string),
        about_raw,
        about_text,
        image_id: text(author, "imageId").map(str::to_string),
        custom_domain,
        is_book_author: author
            .get("verifications")
            .and_then(|v| v.get("isBookAuthor"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        follower_count: social_stat(author, "followerCount"),
        following_count: social_stat(author, "followingCount"),
        meta: author.get("authorMeta").filter(|m| !m.is_null()).cloned(),
    })
}

/// Parse an author's post listing into summary records (no bodies).
/// `fallback_author_id` covers payloads whose posts omit the creator.
pub fn author_posts(
    payload: &Value,
    fallback_author_id: Option<&str>,
) -> Result<Vec<PostRecord>, HarvestError> {
    let posts = field(payload, &["data", "authorResult", "latestPosts"])?;
    let posts = array(posts, "posts")?;
    posts
        .iter()
        .map(|p| post_summary(p, fallback_author_id))
        .collect()
}

fn post_summary(post: &Value, fallback_author_id: Option<&str>) -> Result<PostRecord, HarvestError> {
    let id = required_text(post, "id")?;
    let title = required_text(post, "title")?;
    let author_id = post
        .get("creator")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .or(fallback_author_id)
        .ok_or_else(|| HarvestError::Payload(format!("post `{id}` has no creator id")))?;

    Ok(PostRecord {
        id: id.to_string(),
        author_id: author_id.to_string(),
        title: title.to_string(),
        subtitle: post
            .get("previewContent")
            .and_then(|p| p.get("subtitle"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        published_at: post
            .get("firstPublishedAt")
            .and_then(Value::as_i64)
            .and_then(timestamp_from_millis),
        clap_count: post.get("clapCount").and_then(Value::as_i64).unwrap_or(0),
        response_count: post
            .get("postResponses")
            .and_then(|r| r.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        reading_time: post
            .get("readingTime")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        collection_id: post
            .get("collection")
            .filter(|c| !c.is_null())
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        body: None,
    })
}

/// Parse a post's full body into plain text: paragraph texts joined by
/// blank lines, empty paragraphs dropped.
pub fn post_body(payload: &Value) -> Result<String, HarvestError> {
    let body_model = field(payload, &["data", "post", "content", "bodyModel"])?;
    let paragraphs = array(body_model, "paragraphs")?;

    let texts: Vec<&str> = paragraphs
        .iter()
        .filter_map(|p| text(p, "text"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    Ok(texts.join("\n\n"))
}

/// Parse one page of an author's followers connection. Non-author items
/// are skipped. The next cursor lives under `pagingInfo.next.from`.
pub fn followers_page(payload: &Value) -> Result<Page<FollowerProfile>, HarvestError> {
    let connection = field(payload, &["data", "authorResult", "followers"])?;
    let users = array(connection, "users")?;

    let mut items = Vec::new();
    for user in users {
        if typename(user) != Some(AUTHOR_TYPENAME) {
            continue;
        }
        let (Some(id), Some(username)) = (text(user, "id"), text(user, "username")) else {
            continue;
        };
        items.push(FollowerProfile {
            id: id.to_string(),
            username: username.to_string(),
            name: text(user, "name").map(str::to_string),
            bio: text(user, "bio").map(str::to_string),
        });
    }

    let next = connection
        .get("pagingInfo")
        .and_then(|p| p.get("next"))
        .filter(|n| !n.is_null())
        .and_then(|n| n.get("from"))
        .and_then(Value::as_str)
        .map(Cursor::from);

    Ok(Page { items, next })
}

/// Flatten the rich-text `about` document to plain text.
///
/// The document is a JSON array of nodes carrying `text` and nested
/// `children`; texts are collected depth-first and joined with spaces.
/// Input that is not valid JSON is passed through unchanged.
pub fn flatten_about(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let Ok(doc) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };

    let mut texts = Vec::new();
    collect_text(&doc, &mut texts);
    texts.join(" ").trim().to_string()
}

fn collect_text(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Array(nodes) => {
            for n in nodes {
                collect_text(n, out);
            }
        }
        Value::Object(map) => {
            if let Some(t) = map.get("text").and_then(Value::as_str) {
                out.push(t.to_string());
            }
            if let Some(children) = map.get("children") {
                collect_text(children, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Shape helpers
// ---------------------------------------------------------------------------

fn field<'a>(value: &'a Value, path: &[&str]) -> Result<&'a Value, HarvestError> {
    let mut current = value;
    for key in path {
        current = current
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| HarvestError::Payload(format!("missing field `{}`", path.join("."))))?;
    }
    Ok(current)
}

fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, HarvestError> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| HarvestError::Payload(format!("`{key}` is not an array")))
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn required_text<'a>(value: &'a Value, key: &str) -> Result<&'a str, HarvestError> {
    text(value, key).ok_or_else(|| HarvestError::Payload(format!("missing string field `{key}`")))
}

fn typename(value: &Value) -> Option<&str> {
    text(value, "__typename")
}

fn social_stat(author: &Value, key: &str) -> i64 {
    author
        .get("socialStats")
        .and_then(|s| s.get(key))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}
