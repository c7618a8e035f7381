use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Filters accepted by the post index.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub category: Option<Category>,
    pub keyword: Option<String>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Like,
    Dislike,
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<PostSummary>>;
    async fn create_post(&self, new: NewPost, author_ip: &str) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    /// Separate from `get_post` so edit/detail fetches can skip the bump.
    async fn increment_view_count(&self, id: Id) -> RepoResult<()>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    async fn set_attachment(
        &self,
        id: Id,
        file_name: &str,
        file_path: &str,
        file_size: i64,
    ) -> RepoResult<Post>;
    async fn add_reaction(&self, id: Id, reaction: Reaction) -> RepoResult<Post>;
    async fn soft_delete_post(&self, id: Id) -> RepoResult<()>;
    async fn restore_post(&self, id: Id) -> RepoResult<()>;
    /// Live posts in id order with full columns, for the CSV export.
    async fn export_posts(&self) -> RepoResult<Vec<Post>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list_comments(&self, post_id: Id, include_deleted: bool) -> RepoResult<Vec<Comment>>;
    async fn count_comments(&self, post_id: Id) -> RepoResult<i64>;
    async fn create_comment(&self, new: NewComment, author_ip: &str) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn update_comment(&self, id: Id, upd: UpdateComment) -> RepoResult<Comment>;
    async fn soft_delete_comment(&self, id: Id) -> RepoResult<()>;
    async fn restore_comment(&self, id: Id) -> RepoResult<()>;
}

pub trait Repo: PostRepo + CommentRepo {}

impl<T> Repo for T where T: PostRepo + CommentRepo {}

/// Comments sort parent-first: thread groups in parent-id order, the parent
/// leading its replies, replies oldest first.
pub fn comment_sort_key(c: &Comment) -> (Id, bool, chrono::DateTime<Utc>, Id) {
    (
        c.parent_id.unwrap_or(c.id),
        c.parent_id.is_some(),
        c.created_at,
        c.id,
    )
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("CORKBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("CORKBOARD_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!(
                            "[inmem] Failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "[inmem] No snapshot at '{}': {e}. Starting empty.",
                        path.display()
                    );
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn live_comment_count(state: &State, post_id: Id) -> i64 {
            state
                .comments
                .values()
                .filter(|c| c.post_id == post_id && c.deleted_at.is_none())
                .count() as i64
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<PostSummary>> {
            let s = self.state.read().unwrap();
            let keyword = filter.keyword.as_ref().map(|k| k.to_lowercase());
            let mut posts: Vec<&Post> = s
                .posts
                .values()
                .filter(|p| filter.include_deleted || p.deleted_at.is_none())
                .filter(|p| filter.category.map_or(true, |c| p.category == c))
                .filter(|p| {
                    keyword
                        .as_ref()
                        .map_or(true, |k| p.title.to_lowercase().contains(k))
                })
                .collect();
            // notice pinned first, then newest first
            posts.sort_by(|a, b| {
                let a_plain = a.category != Category::Notice;
                let b_plain = b.category != Category::Notice;
                a_plain
                    .cmp(&b_plain)
                    .then(b.created_at.cmp(&a.created_at))
                    .then(b.id.cmp(&a.id))
            });
            Ok(posts
                .into_iter()
                .map(|p| PostSummary::from_post(p, Self::live_comment_count(&s, p.id)))
                .collect())
        }

        async fn create_post(&self, new: NewPost, author_ip: &str) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                category: new.category,
                title: new.title,
                content: new.content,
                author: new.author,
                author_ip: author_ip.to_string(),
                file_name: None,
                file_path: None,
                file_size: None,
                view_count: 0,
                like_count: 0,
                dislike_count: 0,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            s.posts.insert(id, post.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(post)
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn increment_view_count(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            post.view_count += 1;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            post.category = upd.category;
            post.title = upd.title;
            post.content = upd.content;
            post.author = upd.author;
            post.updated_at = Utc::now();
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_attachment(
            &self,
            id: Id,
            file_name: &str,
            file_path: &str,
            file_size: i64,
        ) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            post.file_name = Some(file_name.to_string());
            post.file_path = Some(file_path.to_string());
            post.file_size = Some(file_size);
            post.updated_at = Utc::now();
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn add_reaction(&self, id: Id, reaction: Reaction) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            match reaction {
                Reaction::Like => post.like_count += 1,
                Reaction::Dislike => post.dislike_count += 1,
            }
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_some() {
                return Err(RepoError::NotFound); // already deleted
            }
            post.deleted_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn restore_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if post.deleted_at.is_none() {
                return Err(RepoError::NotFound); // nothing to restore
            }
            post.deleted_at = None;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn export_posts(&self) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut posts: Vec<Post> = s
                .posts
                .values()
                .filter(|p| p.deleted_at.is_none())
                .cloned()
                .collect();
            posts.sort_by_key(|p| p.id);
            Ok(posts)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(
            &self,
            post_id: Id,
            include_deleted: bool,
        ) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Comment> = s
                .comments
                .values()
                .filter(|c| c.post_id == post_id)
                .filter(|c| include_deleted || c.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by_key(comment_sort_key);
            Ok(v)
        }

        async fn count_comments(&self, post_id: Id) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            Ok(Self::live_comment_count(&s, post_id))
        }

        async fn create_comment(&self, new: NewComment, author_ip: &str) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&new.post_id) {
                return Err(RepoError::NotFound);
            }
            if let Some(parent_id) = new.parent_id {
                if !s.comments.contains_key(&parent_id) {
                    return Err(RepoError::NotFound);
                }
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id: new.post_id,
                parent_id: new.parent_id,
                content: new.content,
                author: new.author,
                author_ip: author_ip.to_string(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_comment(&self, id: Id, upd: UpdateComment) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            if comment.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            comment.content = upd.content;
            comment.updated_at = Utc::now();
            let updated = comment.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            if comment.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            comment.deleted_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn restore_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            if comment.deleted_at.is_none() {
                return Err(RepoError::NotFound);
            }
            comment.deleted_at = None;
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const POST_COLUMNS: &str = "id, category, title, content, author, author_ip, \
         file_name, file_path, file_size, view_count, like_count, dislike_count, \
         created_at, updated_at, deleted_at";

    const COMMENT_COLUMNS: &str =
        "id, post_id, parent_id, content, author, author_ip, created_at, updated_at, deleted_at";

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<PostSummary>> {
            let recs = sqlx::query_as::<_, PostSummary>(
                r#"
                SELECT p.id, p.category, p.title, p.author,
                       p.view_count, p.like_count, p.dislike_count,
                       (SELECT COUNT(*) FROM comments c
                         WHERE c.post_id = p.id AND c.deleted_at IS NULL) AS comment_count,
                       (p.file_path IS NOT NULL) AS has_attachment,
                       p.created_at, p.deleted_at
                FROM posts p
                WHERE ($1 OR p.deleted_at IS NULL)
                  AND ($2::text IS NULL OR p.category = $2)
                  AND ($3::text IS NULL OR p.title ILIKE '%' || $3 || '%')
                ORDER BY (p.category = 'notice') DESC, p.created_at DESC, p.id DESC
                "#,
            )
            .bind(filter.include_deleted)
            .bind(filter.category)
            .bind(filter.keyword)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(recs)
        }

        async fn create_post(&self, new: NewPost, author_ip: &str) -> RepoResult<Post> {
            let sql = format!(
                "INSERT INTO posts (category, title, content, author, author_ip) \
                 VALUES ($1,$2,$3,$4,$5) RETURNING {POST_COLUMNS}"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(new.category)
                .bind(&new.title)
                .bind(&new.content)
                .bind(&new.author)
                .bind(author_ip)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn increment_view_count(&self, id: Id) -> RepoResult<()> {
            let res =
                sqlx::query("UPDATE posts SET view_count = view_count + 1 WHERE id = $1 AND deleted_at IS NULL")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let sql = format!(
                "UPDATE posts SET category = $2, title = $3, content = $4, author = $5, \
                 updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {POST_COLUMNS}"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .bind(upd.category)
                .bind(&upd.title)
                .bind(&upd.content)
                .bind(&upd.author)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn set_attachment(
            &self,
            id: Id,
            file_name: &str,
            file_path: &str,
            file_size: i64,
        ) -> RepoResult<Post> {
            let sql = format!(
                "UPDATE posts SET file_name = $2, file_path = $3, file_size = $4, \
                 updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {POST_COLUMNS}"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .bind(file_name)
                .bind(file_path)
                .bind(file_size)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn add_reaction(&self, id: Id, reaction: Reaction) -> RepoResult<Post> {
            let column = match reaction {
                Reaction::Like => "like_count",
                Reaction::Dislike => "dislike_count",
            };
            let sql = format!(
                "UPDATE posts SET {column} = {column} + 1 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {POST_COLUMNS}"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn soft_delete_post(&self, id: Id) -> RepoResult<()> {
            let res =
                sqlx::query("UPDATE posts SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn restore_post(&self, id: Id) -> RepoResult<()> {
            let res =
                sqlx::query("UPDATE posts SET deleted_at = NULL WHERE id = $1 AND deleted_at IS NOT NULL")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn export_posts(&self) -> RepoResult<Vec<Post>> {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE deleted_at IS NULL ORDER BY id ASC"
            );
            sqlx::query_as::<_, Post>(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(
            &self,
            post_id: Id,
            include_deleted: bool,
        ) -> RepoResult<Vec<Comment>> {
            let sql = format!(
                "SELECT {COMMENT_COLUMNS} FROM comments \
                 WHERE post_id = $1 AND ($2 OR deleted_at IS NULL) \
                 ORDER BY COALESCE(parent_id, id), (parent_id IS NOT NULL), created_at, id"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(post_id)
                .bind(include_deleted)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn count_comments(&self, post_id: Id) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM comments WHERE post_id = $1 AND deleted_at IS NULL",
            )
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn create_comment(&self, new: NewComment, author_ip: &str) -> RepoResult<Comment> {
            let sql = format!(
                "INSERT INTO comments (post_id, parent_id, content, author, author_ip) \
                 VALUES ($1,$2,$3,$4,$5) RETURNING {COMMENT_COLUMNS}"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(new.post_id)
                .bind(new.parent_id)
                .bind(&new.content)
                .bind(&new.author)
                .bind(author_ip)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn update_comment(&self, id: Id, upd: UpdateComment) -> RepoResult<Comment> {
            let sql = format!(
                "UPDATE comments SET content = $2, updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {COMMENT_COLUMNS}"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .bind(&upd.content)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<()> {
            let res =
                sqlx::query("UPDATE comments SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn restore_comment(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE comments SET deleted_at = NULL WHERE id = $1 AND deleted_at IS NOT NULL",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }
}
