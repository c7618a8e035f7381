use crate::models::{
    Category, CommentView, NewComment, NewPost, PostDetail, PostSummary, UpdateComment, UpdatePost,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::like_post,
        crate::routes::dislike_post,
        crate::routes::upload_attachment,
        crate::routes::download_attachment,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::update_comment,
        crate::routes::delete_comment,
        crate::routes::import_posts_csv,
        crate::routes::export_posts_csv,
    ),
    components(schemas(
        Category, PostSummary, PostDetail, CommentView,
        NewPost, UpdatePost, NewComment, UpdateComment,
        crate::bulk::ImportReport
    )),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "comments", description = "Comment operations"),
        (name = "admin", description = "Admin bulk operations"),
    )
)]
pub struct ApiDoc;
