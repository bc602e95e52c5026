use crate::record::DbDataError;
use async_trait::async_trait;
use bildwand_common::model::{
    Id, ModelValidationError,
    post::{Comment, CommentMarker, CreatePost, NewComment, Post, PostMarker, PostPatch},
};
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] DbDataError),
    #[error("A post row disappeared while it was being updated")]
    VanishedRecord,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<ModelValidationError> for DbError {
    fn from(value: ModelValidationError) -> Self {
        DbError::Data(value.into())
    }
}

/// Durable storage of posts and their comments.
///
/// `update_*`/`delete_*`/`remove_*` report how many rows matched instead of
/// failing on a well-formed but absent identifier, so callers can tell "not
/// found" apart from a storage failure.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert a new post. The store assigns the identifier and both
    /// timestamps and returns the stored record.
    async fn create_post(&self, post: &CreatePost) -> Result<Post>;

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>>;

    /// Apply the patch's set fields and refresh `updated_at`. Returns the
    /// number of matched posts (zero or one).
    async fn update_post(&self, id: Id<PostMarker>, patch: &PostPatch) -> Result<u64>;

    /// Returns the number of deleted posts (zero or one). Comments are
    /// removed with their post.
    async fn delete_post(&self, id: Id<PostMarker>) -> Result<u64>;

    /// A page of posts, newest first.
    async fn list_page(&self, skip: u64, limit: u64) -> Result<Vec<Post>>;

    /// Attach a comment to a post. Returns the stored comment, or `None` when
    /// the post does not exist.
    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        comment: &NewComment,
    ) -> Result<Option<Comment>>;

    /// Returns the number of removed comments (zero or one).
    async fn remove_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
    ) -> Result<u64>;

    /// Add `delta` to the post's like counter, clamping at zero. Returns the
    /// number of matched posts.
    async fn adjust_likes(&self, post_id: Id<PostMarker>, delta: i64) -> Result<u64>;
}
