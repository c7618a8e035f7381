use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::HttpRequest;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;

use crate::auth::Auth;
use crate::bulk::{self, ImportReport};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{PostFilter, Reaction, Repo};
use crate::storage::{AttachmentStore, AttachmentStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{id}/like").route(web::post().to(like_post)))
            .service(web::resource("/posts/{id}/dislike").route(web::post().to(dislike_post)))
            .service(
                web::resource("/posts/{id}/attachment")
                    .route(web::post().to(upload_attachment))
                    .route(web::get().to(download_attachment)),
            )
            .service(web::resource("/posts/{id}/comments").route(web::get().to(list_comments)))
            .service(web::resource("/comments").route(web::post().to(create_comment)))
            .service(
                web::resource("/comments/{id}")
                    .route(web::put().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            // Admin endpoints
            .service(
                web::resource("/admin/posts/{id}/restore")
                    .route(web::post().to(admin_restore_post)),
            )
            .service(
                web::resource("/admin/comments/{id}/restore")
                    .route(web::post().to(admin_restore_comment)),
            )
            .service(web::resource("/admin/posts/import").route(web::post().to(import_posts_csv)))
            .service(web::resource("/admin/posts/export").route(web::get().to(export_posts_csv))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

const UPLOAD_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
];

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn is_admin(auth: &Option<Auth>) -> bool {
    auth.as_ref().map(|a| a.0.is_admin()).unwrap_or(false)
}

async fn post_detail(
    data: &web::Data<AppState>,
    post: Post,
    include_deleted: bool,
) -> Result<PostDetail, ApiError> {
    let comment_count = data.repo.count_comments(post.id).await?;
    let comments = data.repo.list_comments(post.id, include_deleted).await?;
    Ok(PostDetail::new(
        post,
        comment_count,
        comments.into_iter().map(CommentView::from).collect(),
    ))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListPostsQuery {
    pub category: Option<Category>,
    pub q: Option<String>,
    pub include_deleted: Option<u8>,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(
        ("category" = Option<Category>, Query, description = "Restrict to one category"),
        ("q" = Option<String>, Query, description = "Case-insensitive title keyword"),
        ("include_deleted" = Option<u8>, Query, description = "Admin only: include soft-deleted")
    ),
    responses(
        (status = 200, description = "List posts, notices first then newest first", body = [PostSummary])
    )
)]
pub async fn list_posts(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<ListPostsQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let filter = PostFilter {
        category: q.category,
        keyword: q.q.filter(|s| !s.trim().is_empty()),
        include_deleted: is_admin(&auth) && q.include_deleted == Some(1),
    };
    let posts = data.repo.list_posts(filter).await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = PostDetail),
        (status = 400, description = "Validation failed"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_post(&ip) {
            return Err(ApiError::RateLimited);
        }
    }
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let post = data.repo.create_post(new, &ip).await?;
    Ok(HttpResponse::Created().json(PostDetail::new(post, 0, Vec::new())))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(
        ("id" = Id, Path, description = "Post id"),
        ("include_deleted" = Option<u8>, Query, description = "Admin only: include soft-deleted")
    ),
    responses(
        (status = 200, description = "Post with comments; bumps the view count", body = PostDetail),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let want_deleted = req.query_string().contains("include_deleted=1");
    let include_deleted = is_admin(&auth) && want_deleted;
    let mut post = data.repo.get_post(id).await?;
    if post.deleted_at.is_some() && !include_deleted {
        return Err(ApiError::NotFound);
    }
    // reads count only against live posts
    if post.deleted_at.is_none() {
        data.repo.increment_view_count(id).await?;
        post.view_count += 1;
    }
    let detail = post_detail(&data, post, include_deleted).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{id}",
    request_body = UpdatePost,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = PostDetail),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn update_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let upd = payload.into_inner();
    upd.validate().map_err(ApiError::Validation)?;
    let post = data.repo.update_post(id, upd).await?;
    let detail = post_detail(&data, post, false).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post soft-deleted"),
        (status = 404, description = "Post not found or already deleted")
    )
)]
pub async fn delete_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo.soft_delete_post(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"})))
}

async fn react(data: web::Data<AppState>, id: Id, reaction: Reaction) -> Result<HttpResponse, ApiError> {
    let post = data.repo.add_reaction(id, reaction).await?;
    let comment_count = data.repo.count_comments(id).await?;
    Ok(HttpResponse::Ok().json(PostSummary::from_post(&post, comment_count)))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/like",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Like recorded", body = PostSummary),
        (status = 404, description = "Post not found")
    )
)]
pub async fn like_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    react(data, path.into_inner(), Reaction::Like).await
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/dislike",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Dislike recorded", body = PostSummary),
        (status = 404, description = "Post not found")
    )
)]
pub async fn dislike_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    react(data, path.into_inner(), Reaction::Dislike).await
}

// ---------------- Attachments -----------------------------------

struct UploadedFile {
    file_name: Option<String>,
    declared_mime: Option<String>,
    bytes: Vec<u8>,
}

/// Pull the first `file` field out of a multipart payload, enforcing the
/// size cap while streaming.
async fn read_upload(payload: &mut Multipart) -> Result<Option<UploadedFile>, ApiError> {
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if let Some(name) = field.content_disposition().get_name() {
            if name != "file" {
                continue;
            }
        } else {
            continue;
        }
        let file_name = field
            .content_disposition()
            .get_filename()
            .map(|s| s.to_string());
        let declared_mime = field.content_type().map(|m| m.to_string());
        let mut field_stream = field;
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Some(UploadedFile { file_name, declared_mime, bytes }));
    }
    Ok(None)
}

/// Content sniffing first, the client's declared type as a fallback.
fn resolve_mime(bytes: &[u8], declared: Option<&str>) -> String {
    if let Some(t) = infer::get(bytes) {
        return t.mime_type().to_string();
    }
    if let Some(d) = declared {
        if d != "application/octet-stream" {
            return d.to_string();
        }
    }
    if std::str::from_utf8(bytes).is_ok() {
        return "text/plain".into();
    }
    "application/octet-stream".into()
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/attachment",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Attachment stored", body = PostDetail),
        (status = 404, description = "Post not found"),
        (status = 413, description = "Payload too large"),
        (status = 415, description = "Unsupported media type"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn upload_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let ip = client_ip(&req);
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_upload(&ip) {
            return Err(ApiError::RateLimited);
        }
    }
    let post = data.repo.get_post(id).await?;
    if post.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }

    let Some(upload) = read_upload(&mut payload).await? else {
        return Err(ApiError::Validation("multipart field 'file' is required".into()));
    };
    if upload.bytes.is_empty() {
        return Err(ApiError::Validation("file is empty".into()));
    }
    let mime = resolve_mime(&upload.bytes, upload.declared_mime.as_deref());
    if !ALLOWED_MIME.contains(&mime.as_str()) {
        return Err(ApiError::UnsupportedMediaType(mime));
    }

    let original_name = upload.file_name.as_deref().unwrap_or("file");
    let stored = data
        .attachment_store
        .save(original_name, &upload.bytes)
        .await
        .map_err(|e| {
            log::error!("attachment save error: {e}");
            ApiError::Internal
        })?;
    // a replaced attachment keeps its old file on disk
    let post = data
        .repo
        .set_attachment(id, &stored.file_name, &stored.file_path, stored.file_size)
        .await?;
    let detail = post_detail(&data, post, false).await?;
    Ok(HttpResponse::Created().json(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/attachment",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Attachment bytes, original filename in Content-Disposition"),
        (status = 404, description = "No attachment or post not found")
    )
)]
pub async fn download_attachment(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let want_deleted = req.query_string().contains("include_deleted=1");
    let post = data.repo.get_post(id).await?;
    if post.deleted_at.is_some() && !(is_admin(&auth) && want_deleted) {
        return Err(ApiError::NotFound);
    }
    let (Some(file_path), Some(file_name)) = (post.file_path.as_deref(), post.file_name.as_deref())
    else {
        return Err(ApiError::NotFound);
    };
    let bytes = match data.attachment_store.load(file_path).await {
        Ok(b) => b,
        Err(AttachmentStoreError::NotFound) => return Err(ApiError::NotFound),
        Err(e) => {
            log::error!("attachment load error: {e}");
            return Err(ApiError::Internal);
        }
    };
    let encoded = urlencoding::encode(file_name);
    Ok(HttpResponse::Ok()
        .insert_header(("Content-Type", "application/octet-stream"))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{encoded}\"; filename*=UTF-8''{encoded}"),
        ))
        .insert_header(("X-Content-Type-Options", "nosniff"))
        .body(bytes))
}

// ---------------- Comments --------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/comments",
    params(
        ("id" = Id, Path, description = "Post id"),
        ("include_deleted" = Option<u8>, Query, description = "Admin only: include soft-deleted")
    ),
    responses(
        (status = 200, description = "Comments, each parent followed by its replies", body = [CommentView]),
        (status = 404, description = "Post not found")
    )
)]
pub async fn list_comments(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let want_deleted = req.query_string().contains("include_deleted=1");
    let include_deleted = is_admin(&auth) && want_deleted;
    let post = data.repo.get_post(post_id).await?;
    if post.deleted_at.is_some() && !include_deleted {
        return Err(ApiError::NotFound);
    }
    let comments = data.repo.list_comments(post_id, include_deleted).await?;
    let views: Vec<CommentView> = comments.into_iter().map(CommentView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments",
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment created", body = CommentView),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Post or parent comment not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_comment(&ip) {
            return Err(ApiError::RateLimited);
        }
    }
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let post = data.repo.get_post(new.post_id).await?;
    if post.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }
    if let Some(parent_id) = new.parent_id {
        let parent = data.repo.get_comment(parent_id).await?;
        if parent.deleted_at.is_some() {
            return Err(ApiError::NotFound);
        }
        if parent.post_id != new.post_id {
            return Err(ApiError::Validation(
                "parent comment belongs to a different post".into(),
            ));
        }
        // one level of nesting only
        if parent.parent_id.is_some() {
            return Err(ApiError::Validation("replies cannot be nested further".into()));
        }
    }
    let comment = data.repo.create_comment(new, &ip).await?;
    Ok(HttpResponse::Created().json(CommentView::from(comment)))
}

#[utoipa::path(
    put,
    path = "/api/v1/comments/{id}",
    request_body = UpdateComment,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment updated", body = CommentView),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn update_comment(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateComment>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    upd.validate().map_err(ApiError::Validation)?;
    let comment = data.repo.update_comment(path.into_inner(), upd).await?;
    Ok(HttpResponse::Ok().json(CommentView::from(comment)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment soft-deleted"),
        (status = 404, description = "Comment not found or already deleted")
    )
)]
pub async fn delete_comment(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo.soft_delete_comment(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"})))
}

// ---------------- Admin handlers --------------------------------
macro_rules! ensure_admin { ($auth:expr) => { if !$auth.0.is_admin() { return Err(ApiError::Forbidden); } }; }

pub async fn admin_restore_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> { ensure_admin!(auth); data.repo.restore_post(path.into_inner()).await?; Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"}))) }
pub async fn admin_restore_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> { ensure_admin!(auth); data.repo.restore_comment(path.into_inner()).await?; Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"}))) }

#[utoipa::path(
    post,
    path = "/api/v1/admin/posts/import",
    responses(
        (status = 200, description = "Import finished, per-row outcome in the report", body = ImportReport),
        (status = 400, description = "Not a usable CSV file"),
        (status = 403, description = "Forbidden - Admins only")
    )
)]
pub async fn import_posts_csv(
    auth: Auth,
    req: HttpRequest,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let ip = client_ip(&req);

    let Some(upload) = read_upload(&mut payload).await? else {
        return Err(ApiError::Validation("multipart field 'file' is required".into()));
    };
    let Some(file_name) = upload.file_name else {
        return Err(ApiError::Validation("file name required".into()));
    };
    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(ApiError::Validation("only .csv files are accepted".into()));
    }

    let parsed = bulk::parse_import(&upload.bytes).map_err(|e| ApiError::Validation(e.to_string()))?;
    let mut report = ImportReport {
        success_count: 0,
        fail_count: parsed.errors.len(),
        errors: parsed.errors,
    };
    for (row, post) in parsed.rows {
        match data.repo.create_post(post, &ip).await {
            Ok(_) => report.success_count += 1,
            Err(e) => {
                log::error!("csv import insert failed: {e}");
                report.fail_count += 1;
                report.errors.push(format!("row {row}: storage error"));
            }
        }
    }
    log::info!(
        "csv import '{}': {} imported, {} failed",
        file_name,
        report.success_count,
        report.fail_count
    );
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/posts/export",
    responses(
        (status = 200, description = "CSV of all live posts (UTF-8 with BOM)"),
        (status = 403, description = "Forbidden - Admins only")
    )
)]
pub async fn export_posts_csv(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let posts = data.repo.export_posts().await?;
    let body = bulk::export_csv(&posts).map_err(|e| {
        log::error!("csv export failed: {e}");
        ApiError::Internal
    })?;
    let filename = bulk::export_filename(chrono::Utc::now());
    Ok(HttpResponse::Ok()
        .insert_header(("Content-Type", "text/csv; charset=UTF-8"))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(body))
}
