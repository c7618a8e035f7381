use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_AUTHOR_LEN: usize = 50;

/// Post category. Stored as lowercase text; `notice` posts sort ahead of
/// everything else in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "text", rename_all = "lowercase")
)]
pub enum Category {
    Notice,
    Free,
    Question,
    Survey,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Notice => "notice",
            Category::Free => "free",
            Category::Question => "question",
            Category::Survey => "survey",
        }
    }

    /// Case-insensitive parse for values arriving as free-form text
    /// (CSV cells) rather than through serde.
    pub fn parse(value: &str) -> Option<Category> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notice" => Some(Category::Notice),
            "free" => Some(Category::Free),
            "question" => Some(Category::Question),
            "survey" => Some(Category::Survey),
            _ => None,
        }
    }
}

// ---------------- Entities ----------------
// Never serialized to clients directly: `author_ip` and `file_path` are
// audit/server data. Responses go through the view types below.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Post {
    pub id: Id,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub author: String,
    pub author_ip: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>, // storage-relative name of the attachment
    pub file_size: Option<i64>,
    pub view_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>, // set on replies, None on top-level comments
    pub content: String,
    pub author: String,
    pub author_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

// ---------------- Request payloads ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub category: Category,
    pub title: String,
    pub content: String,
    pub author: String,
}

/// Full-field edit: every column is replaced, so every field is required.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub category: Category,
    pub title: String,
    pub content: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateComment {
    pub content: String,
}

// ---------------- Response views ----------------

/// List row: the columns an index page needs plus the derived comment
/// count and attachment presence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct PostSummary {
    pub id: Id,
    pub category: Category,
    pub title: String,
    pub author: String,
    pub view_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub comment_count: i64,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PostSummary {
    pub fn from_post(post: &Post, comment_count: i64) -> Self {
        PostSummary {
            id: post.id,
            category: post.category,
            title: post.title.clone(),
            author: post.author.clone(),
            view_count: post.view_count,
            like_count: post.like_count,
            dislike_count: post.dislike_count,
            comment_count,
            has_attachment: post.file_path.is_some(),
            created_at: post.created_at,
            deleted_at: post.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentView {
    pub id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Comment> for CommentView {
    fn from(c: Comment) -> Self {
        CommentView {
            id: c.id,
            post_id: c.post_id,
            parent_id: c.parent_id,
            content: c.content,
            author: c.author,
            created_at: c.created_at,
            updated_at: c.updated_at,
            deleted_at: c.deleted_at,
        }
    }
}

/// Detail view: the post with its comments inlined. Also the response
/// shape for create/update, with whatever comments the post has.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetail {
    pub id: Id,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub author: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub view_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub comment_count: i64,
    pub comments: Vec<CommentView>,
}

impl PostDetail {
    pub fn new(post: Post, comment_count: i64, comments: Vec<CommentView>) -> Self {
        PostDetail {
            id: post.id,
            category: post.category,
            title: post.title,
            content: post.content,
            author: post.author,
            file_name: post.file_name,
            file_size: post.file_size,
            view_count: post.view_count,
            like_count: post.like_count,
            dislike_count: post.dislike_count,
            created_at: post.created_at,
            updated_at: post.updated_at,
            deleted_at: post.deleted_at,
            comment_count,
            comments,
        }
    }
}

// ---------------- Validation ----------------

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl NewPost {
    pub fn validate(&self) -> Result<(), String> {
        if blank(&self.title) {
            return Err("title must not be empty".into());
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(format!("title exceeds {MAX_TITLE_LEN} characters"));
        }
        if blank(&self.content) {
            return Err("content must not be empty".into());
        }
        if blank(&self.author) {
            return Err("author must not be empty".into());
        }
        if self.author.chars().count() > MAX_AUTHOR_LEN {
            return Err(format!("author exceeds {MAX_AUTHOR_LEN} characters"));
        }
        Ok(())
    }
}

impl UpdatePost {
    pub fn validate(&self) -> Result<(), String> {
        // Same rules as creation: the edit replaces every field.
        NewPost {
            category: self.category,
            title: self.title.clone(),
            content: self.content.clone(),
            author: self.author.clone(),
        }
        .validate()
    }
}

impl NewComment {
    pub fn validate(&self) -> Result<(), String> {
        if blank(&self.content) {
            return Err("content must not be empty".into());
        }
        if blank(&self.author) {
            return Err("author must not be empty".into());
        }
        if self.author.chars().count() > MAX_AUTHOR_LEN {
            return Err(format!("author exceeds {MAX_AUTHOR_LEN} characters"));
        }
        Ok(())
    }
}

impl UpdateComment {
    pub fn validate(&self) -> Result<(), String> {
        if blank(&self.content) {
            return Err("content must not be empty".into());
        }
        Ok(())
    }
}
