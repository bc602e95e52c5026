use bildwand_common::model::post::{Comment, Post, PostStatus};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum DbDataError {
    #[error("Unknown post status: {0:?}")]
    Status(String),
    #[error("Negative like counter")]
    NegativeLikes,
    #[error(transparent)]
    Model(#[from] bildwand_common::model::ModelValidationError),
}

#[derive(Clone, Eq, PartialEq, Debug, sqlx::FromRow)]
pub struct PostRecord {
    pub post_snowflake: i64,
    pub caption: String,
    pub alt_text: Option<String>,
    pub image_url: Option<String>,
    pub author: String,
    pub likes: i64,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, sqlx::FromRow)]
pub struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub author: String,
    pub body: String,
    pub created_at: OffsetDateTime,
}

impl PostRecord {
    pub fn into_post(self, comments: Vec<CommentRecord>) -> Result<Post, DbDataError> {
        let status = PostStatus::parse(&self.status).ok_or(DbDataError::Status(self.status))?;
        let likes = u64::try_from(self.likes).map_err(|_| DbDataError::NegativeLikes)?;

        Ok(Post {
            id: self.post_snowflake.cast_unsigned().into(),
            caption: self.caption,
            alt_text: self.alt_text,
            image_url: self.image_url,
            author: self.author,
            likes,
            comments: comments.into_iter().map(Comment::from).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            status,
        })
    }
}

impl From<CommentRecord> for Comment {
    fn from(value: CommentRecord) -> Self {
        Comment {
            id: value.comment_snowflake.cast_unsigned().into(),
            author: value.author,
            body: value.body,
            created_at: value.created_at,
        }
    }
}
