use chrono::{DateTime, Utc};
use magpie_core::error::HarvestError;
use magpie_core::models::{AuthorRecord, FollowEdge, FollowerProfile, PostRecord};
use magpie_core::traits::ProfileStore;
use sqlx::{PgPool, Pool, Postgres};

/// PostgreSQL-backed [`ProfileStore`].
///
/// Every write is an idempotent upsert keyed on the record's external
/// id, so a re-run after a crash between a persistence write and its
/// checkpoint save never duplicates rows.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: Pool<Postgres>,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Table sizes, for the `status` command.
    pub async fn counts(&self) -> Result<StoreCounts, HarvestError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM authors),
                (SELECT COUNT(*) FROM posts),
                (SELECT COUNT(*) FROM posts WHERE body IS NOT NULL),
                (SELECT COUNT(*) FROM follows)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(StoreCounts {
            authors: row.0,
            posts: row.1,
            posts_with_body: row.2,
            follows: row.3,
        })
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub authors: i64,
    pub posts: i64,
    pub posts_with_body: i64,
    pub follows: i64,
}

fn db_err(e: sqlx::Error) -> HarvestError {
    HarvestError::Database(e.to_string())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct AuthorRow {
    id: String,
    username: String,
    name: Option<String>,
    bio: Option<String>,
    about_raw: Option<String>,
    about_text: Option<String>,
    image_id: Option<String>,
    custom_domain: Option<String>,
    is_book_author: bool,
    follower_count: i64,
    following_count: i64,
    meta: Option<serde_json::Value>,
}

impl From<AuthorRow> for AuthorRecord {
    fn from(row: AuthorRow) -> Self {
        AuthorRecord {
            id: row.id,
            username: row.username,
            name: row.name,
            bio: row.bio,
            about_raw: row.about_raw,
            about_text: row.about_text,
            image_id: row.image_id,
            custom_domain: row.custom_domain,
            is_book_author: row.is_book_author,
            follower_count: row.follower_count,
            following_count: row.following_count,
            meta: row.meta,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: String,
    author_id: String,
    title: String,
    subtitle: Option<String>,
    published_at: Option<DateTime<Utc>>,
    clap_count: i64,
    response_count: i64,
    reading_time: f64,
    collection_id: Option<String>,
    body: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        PostRecord {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            subtitle: row.subtitle,
            published_at: row.published_at,
            clap_count: row.clap_count,
            response_count: row.response_count,
            reading_time: row.reading_time,
            collection_id: row.collection_id,
            body: row.body,
        }
    }
}

const AUTHOR_COLUMNS: &str = "id, username, name, bio, about_raw, about_text, image_id, \
     custom_domain, is_book_author, follower_count, following_count, meta";

const POST_COLUMNS: &str = "id, author_id, title, subtitle, published_at, clap_count, \
     response_count, reading_time, collection_id, body";

impl ProfileStore for PgProfileStore {
    async fn upsert_author(&self, author: &AuthorRecord) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO authors (id, username, name, bio, about_raw, about_text, image_id,
                                 custom_domain, is_book_author, follower_count, following_count, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                name = EXCLUDED.name,
                bio = EXCLUDED.bio,
                about_raw = EXCLUDED.about_raw,
                about_text = EXCLUDED.about_text,
                image_id = EXCLUDED.image_id,
                custom_domain = EXCLUDED.custom_domain,
                is_book_author = EXCLUDED.is_book_author,
                follower_count = EXCLUDED.follower_count,
                following_count = EXCLUDED.following_count,
                meta = EXCLUDED.meta,
                updated_at = NOW()
            "#,
        )
        .bind(&author.id)
        .bind(&author.username)
        .bind(&author.name)
        .bind(&author.bio)
        .bind(&author.about_raw)
        .bind(&author.about_text)
        .bind(&author.image_id)
        .bind(&author.custom_domain)
        .bind(author.is_book_author)
        .bind(author.follower_count)
        .bind(author.following_count)
        .bind(&author.meta)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_author_stub(&self, id: &str, username: &str) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO authors (id, username)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_follower(&self, follower: &FollowerProfile) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO authors (id, username, name, bio)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&follower.id)
        .bind(&follower.username)
        .bind(&follower.name)
        .bind(&follower.bio)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_post(&self, post: &PostRecord) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, author_id, title, subtitle, published_at, clap_count,
                               response_count, reading_time, collection_id, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                author_id = EXCLUDED.author_id,
                title = EXCLUDED.title,
                subtitle = EXCLUDED.subtitle,
                published_at = EXCLUDED.published_at,
                clap_count = EXCLUDED.clap_count,
                response_count = EXCLUDED.response_count,
                reading_time = EXCLUDED.reading_time,
                collection_id = EXCLUDED.collection_id,
                body = COALESCE(EXCLUDED.body, posts.body),
                updated_at = NOW()
            "#,
        )
        .bind(&post.id)
        .bind(&post.author_id)
        .bind(&post.title)
        .bind(&post.subtitle)
        .bind(post.published_at)
        .bind(post.clap_count)
        .bind(post.response_count)
        .bind(post.reading_time)
        .bind(&post.collection_id)
        .bind(&post.body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_post_body(&self, post_id: &str, body: &str) -> Result<(), HarvestError> {
        let result = sqlx::query("UPDATE posts SET body = $2, updated_at = NOW() WHERE id = $1")
            .bind(post_id)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(HarvestError::Database(format!("unknown post `{post_id}`")));
        }
        Ok(())
    }

    async fn upsert_relation(&self, edge: &FollowEdge) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            INSERT INTO follows (followed_id, follower_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&edge.followed_id)
        .bind(&edge.follower_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn relation_exists(&self, edge: &FollowEdge) -> Result<bool, HarvestError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE followed_id = $1 AND follower_id = $2)",
        )
        .bind(&edge.followed_id)
        .bind(&edge.follower_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.0)
    }

    async fn find_author_by_handle(
        &self,
        username: &str,
    ) -> Result<Option<AuthorRecord>, HarvestError> {
        let row = sqlx::query_as::<_, AuthorRow>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn find_author_by_id(&self, id: &str) -> Result<Option<AuthorRecord>, HarvestError> {
        let row = sqlx::query_as::<_, AuthorRow>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn find_post_by_id(&self, id: &str) -> Result<Option<PostRecord>, HarvestError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<PostRecord>, HarvestError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = $1
             ORDER BY published_at DESC NULLS LAST, id"
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
