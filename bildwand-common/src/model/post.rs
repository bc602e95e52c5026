use crate::model::{
    Id,
    text::{AuthorName, CommentBody},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// Lifecycle of a post. `Processing` is transient: a post stays in it only
/// while captioning is in flight and either reaches `Completed` or is cleaned
/// up. Text-only posts are created `Completed` directly.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Processing,
    #[default]
    Completed,
}

impl PostStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Processing => "processing",
            PostStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(PostStatus::Processing),
            "completed" => Some(PostStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    pub caption: String,
    #[serde(rename = "alt")]
    pub alt_text: Option<String>,
    pub image_url: Option<String>,
    pub author: String,
    pub likes: u64,
    pub comments: Vec<Comment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub status: PostStatus,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Data for a new post. The store assigns the ID and timestamps; likes start
/// at zero with no comments.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct CreatePost {
    pub caption: String,
    pub alt_text: Option<String>,
    pub image_url: Option<String>,
    pub author: AuthorName,
    pub status: PostStatus,
}

/// Field-level update of a post. `None` fields are left untouched; the store
/// refreshes `updated_at` on any match.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostPatch {
    pub caption: Option<String>,
    pub alt_text: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub status: Option<PostStatus>,
}

impl PostPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caption.is_none()
            && self.alt_text.is_none()
            && self.image_url.is_none()
            && self.author.is_none()
            && self.status.is_none()
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewComment {
    pub author: AuthorName,
    pub body: CommentBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [PostStatus::Processing, PostStatus::Completed] {
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostStatus::parse("archived"), None);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(PostPatch::default().is_empty());
        let patch = PostPatch {
            caption: Some("hello".to_owned()),
            ..PostPatch::default()
        };
        assert!(!patch.is_empty());
    }
}
