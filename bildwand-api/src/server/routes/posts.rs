use crate::blob::FsBlobStore;
use crate::server::{
    RequestOrigin, Result, ServerError, ServerRouter,
    json::Json,
    payload::{Pagination, SuccessBody},
};
use axum::{extract::{Query, State}, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use bildwand_common::model::{
    Id, ModelValidationError,
    post::{Comment, CommentMarker, CreatePost, NewComment, Post, PostMarker, PostPatch, PostStatus},
    text::{AltText, AuthorName, CaptionText, CommentBody},
};
use bildwand_db::store::ContentStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_PAGE_LIMIT: u64 = 100;
pub const MAX_PAGE_LIMIT: u64 = 100;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_get(get_post)
        .typed_post(create_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_post(add_comment)
        .typed_delete(remove_comment)
        .typed_post(like_post)
}

#[derive(Clone, Debug, Serialize)]
pub struct PostResponse {
    #[serde(flatten)]
    pub post: Post,
    #[serde(rename = "shareUrl")]
    pub share_url: String,
}

impl PostResponse {
    pub fn new(post: Post, origin: &RequestOrigin) -> Self {
        let share_url = origin.share_url(post.id);
        Self { post, share_url }
    }
}

/// Turn an optional author field into a validated name. Empty input counts
/// as absent and falls back to the anonymous default downstream.
pub fn parse_author(author: Option<String>) -> Result<Option<AuthorName>> {
    author
        .filter(|name| !name.trim().is_empty())
        .map(|name| AuthorName::new(name).map_err(ModelValidationError::from))
        .transpose()
        .map_err(ServerError::from)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct ListPostsPath();

/// Page parameters arrive as free-form text; anything unparsable falls back
/// to the defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
}

fn normalize_page(query: &ListQuery) -> (u64, u64, u64) {
    let page = query
        .page
        .as_deref()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(1)
        .max(1);
    let limit = query
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let skip = (page - 1) * limit;

    (page, limit, skip)
}

async fn list_posts(
    ListPostsPath(): ListPostsPath,
    Query(query): Query<ListQuery>,
    origin: RequestOrigin,
    State(store): State<Arc<dyn ContentStore>>,
) -> Result<Json<SuccessBody<Vec<PostResponse>>>> {
    let (page, limit, skip) = normalize_page(&query);

    let posts = store.list_page(skip, limit).await?;
    let has_more = posts.len() as u64 == limit;
    let posts = posts
        .into_iter()
        .map(|post| PostResponse::new(post, &origin))
        .collect();

    Ok(Json(SuccessBody::new(posts).with_pagination(Pagination {
        page,
        limit,
        has_more,
    })))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct GetPostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    GetPostPath { id }: GetPostPath,
    origin: RequestOrigin,
    State(store): State<Arc<dyn ContentStore>>,
) -> Result<Json<SuccessBody<PostResponse>>> {
    let post = store
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(SuccessBody::new(PostResponse::new(post, &origin))))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct CreatePostPath();

#[derive(Debug, Deserialize)]
struct CreatePostBody {
    caption: String,
    author: Option<String>,
}

async fn create_post(
    CreatePostPath(): CreatePostPath,
    origin: RequestOrigin,
    State(store): State<Arc<dyn ContentStore>>,
    Json(body): Json<CreatePostBody>,
) -> Result<(StatusCode, Json<SuccessBody<PostResponse>>)> {
    let caption = CaptionText::new(body.caption).map_err(ModelValidationError::from)?;
    let author = parse_author(body.author)?.unwrap_or_default();

    let post = store
        .create_post(&CreatePost {
            caption: caption.into_inner(),
            alt_text: None,
            image_url: None,
            author,
            status: PostStatus::Completed,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessBody::new(PostResponse::new(post, &origin)).with_message("Post created")),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct UpdatePostPath {
    id: Id<PostMarker>,
}

#[derive(Debug, Deserialize)]
struct UpdatePostBody {
    caption: Option<String>,
    alt: Option<String>,
    author: Option<String>,
}

async fn update_post(
    UpdatePostPath { id }: UpdatePostPath,
    origin: RequestOrigin,
    State(store): State<Arc<dyn ContentStore>>,
    Json(body): Json<UpdatePostBody>,
) -> Result<Json<SuccessBody<PostResponse>>> {
    let caption = body
        .caption
        .map(|caption| CaptionText::new(caption).map_err(ModelValidationError::from))
        .transpose()?;
    let alt_text = body
        .alt
        .map(|alt| AltText::new(alt).map_err(ModelValidationError::from))
        .transpose()?;
    let author = body
        .author
        .map(|author| AuthorName::new(author).map_err(ModelValidationError::from))
        .transpose()?;

    let patch = PostPatch {
        caption: caption.map(CaptionText::into_inner),
        alt_text: alt_text.map(AltText::into_inner),
        image_url: None,
        author: author.map(AuthorName::into_inner),
        status: None,
    };

    if patch.is_empty() {
        return Err(ServerError::EmptyUpdate);
    }

    let matched = store.update_post(id, &patch).await?;
    if matched == 0 {
        return Err(ServerError::PostByIdNotFound(id));
    }

    let post = store
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(
        SuccessBody::new(PostResponse::new(post, &origin)).with_message("Post updated"),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct DeletePostPath {
    id: Id<PostMarker>,
}

#[derive(Copy, Clone, Debug, Serialize)]
struct DeletedPost {
    id: Id<PostMarker>,
    deleted: bool,
}

async fn delete_post(
    DeletePostPath { id }: DeletePostPath,
    State(store): State<Arc<dyn ContentStore>>,
    State(blobs): State<FsBlobStore>,
) -> Result<Json<SuccessBody<DeletedPost>>> {
    let post = store
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    // The image blob goes with its post. A failed file deletion must not
    // block removing the record.
    if let Some(blob_name) = post.image_url.as_deref().and_then(blob_name_from_url) {
        if let Err(err) = blobs.delete(blob_name).await {
            warn!(post_id = %id, blob = %blob_name, error = %err, "Could not delete post image");
        }
    }

    let deleted = store.delete_post(id).await?;
    if deleted == 0 {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(Json(
        SuccessBody::new(DeletedPost { id, deleted: true }).with_message("Post deleted"),
    ))
}

fn blob_name_from_url(image_url: &str) -> Option<&str> {
    image_url.rsplit('/').next().filter(|name| !name.is_empty())
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct CommentsPath {
    id: Id<PostMarker>,
}

#[derive(Debug, Deserialize)]
struct NewCommentBody {
    author: String,
    body: String,
}

async fn add_comment(
    CommentsPath { id }: CommentsPath,
    State(store): State<Arc<dyn ContentStore>>,
    Json(body): Json<NewCommentBody>,
) -> Result<(StatusCode, Json<SuccessBody<Comment>>)> {
    let author = AuthorName::new(body.author).map_err(ModelValidationError::from)?;
    let body = CommentBody::new(body.body).map_err(ModelValidationError::from)?;

    let comment = store
        .add_comment(id, &NewComment { author, body })
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessBody::new(comment).with_message("Comment added")),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments/{comment_id}", rejection(ServerError))]
struct CommentPath {
    id: Id<PostMarker>,
    comment_id: Id<CommentMarker>,
}

#[derive(Copy, Clone, Debug, Serialize)]
struct DeletedComment {
    id: Id<CommentMarker>,
    deleted: bool,
}

async fn remove_comment(
    CommentPath { id, comment_id }: CommentPath,
    State(store): State<Arc<dyn ContentStore>>,
) -> Result<Json<SuccessBody<DeletedComment>>> {
    let removed = store.remove_comment(id, comment_id).await?;
    if removed == 0 {
        return Err(ServerError::CommentByIdNotFound(comment_id));
    }

    Ok(Json(
        SuccessBody::new(DeletedComment {
            id: comment_id,
            deleted: true,
        })
        .with_message("Comment removed"),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/like", rejection(ServerError))]
struct LikePath {
    id: Id<PostMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LikeAction {
    Like,
    Unlike,
}

#[derive(Debug, Deserialize)]
struct LikeBody {
    action: LikeAction,
}

#[derive(Copy, Clone, Debug, Serialize)]
struct LikeOutcome {
    action: LikeAction,
    delta: i64,
}

async fn like_post(
    LikePath { id }: LikePath,
    State(store): State<Arc<dyn ContentStore>>,
    Json(body): Json<LikeBody>,
) -> Result<Json<SuccessBody<LikeOutcome>>> {
    let delta = match body.action {
        LikeAction::Like => 1,
        LikeAction::Unlike => -1,
    };

    let matched = store.adjust_likes(id, delta).await?;
    if matched == 0 {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(Json(
        SuccessBody::new(LikeOutcome {
            action: body.action,
            delta,
        })
        .with_message("Like counter updated"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> ListQuery {
        ListQuery {
            page: page.map(ToOwned::to_owned),
            limit: limit.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn pagination_defaults() {
        assert_eq!(normalize_page(&query(None, None)), (1, 100, 0));
    }

    #[test]
    fn pagination_skip_is_contiguous_across_pages() {
        let (_, limit, first_skip) = normalize_page(&query(Some("1"), Some("10")));
        let (_, _, second_skip) = normalize_page(&query(Some("2"), Some("10")));

        assert_eq!(first_skip, 0);
        assert_eq!(second_skip, first_skip + limit);
    }

    #[test]
    fn pagination_clamps_out_of_range_values() {
        assert_eq!(normalize_page(&query(Some("0"), Some("0"))), (1, 1, 0));
        assert_eq!(normalize_page(&query(Some("2"), Some("999"))), (2, 100, 100));
    }

    #[test]
    fn pagination_ignores_garbage() {
        assert_eq!(normalize_page(&query(Some("abc"), Some("-5"))), (1, 100, 0));
    }

    #[test]
    fn author_parsing_treats_blank_as_absent() {
        assert_eq!(parse_author(None).unwrap(), None);
        assert_eq!(parse_author(Some("   ".to_owned())).unwrap(), None);
        assert_eq!(
            parse_author(Some("Ana".to_owned())).unwrap(),
            Some(AuthorName::new("Ana").unwrap())
        );
        assert!(parse_author(Some("x".repeat(51))).is_err());
    }

    #[test]
    fn blob_name_comes_from_the_last_url_segment() {
        assert_eq!(
            blob_name_from_url("http://localhost:3000/uploads/42.png"),
            Some("42.png")
        );
        assert_eq!(blob_name_from_url("http://localhost:3000/uploads/"), None);
    }
}
