//! Validated text fields for user-supplied content.
//!
//! Each newtype checks its bound in `new`; deserialization goes through the
//! same check, so a value that exists is always within bounds.

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

pub const AUTHOR_NAME_MAX_LEN: usize = 50;
pub const CAPTION_TEXT_MAX_LEN: usize = 1000;
pub const COMMENT_BODY_MAX_LEN: usize = 500;
pub const ALT_TEXT_MAX_LEN: usize = 200;

pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

macro_rules! validated_text {
    ($name:ident, $error:ident, $max_len:ident, $message:literal, require_content = $require:literal) => {
        #[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        #[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
        #[error($message)]
        pub struct $error(String);

        impl $name {
            pub fn new(text: impl Into<String>) -> Result<Self, $error> {
                let text = text.into();
                let trimmed = text.trim();
                if ($require && trimmed.is_empty()) || trimmed.chars().count() > $max_len {
                    return Err($error(text));
                }
                Ok(Self(trimmed.to_owned()))
            }

            #[must_use]
            pub fn get(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let inner = String::deserialize(deserializer)?;
                $name::new(inner).map_err(|err| {
                    Error::invalid_value(Unexpected::Str(&err.0), &stringify!($name))
                })
            }
        }
    };
}

validated_text!(
    AuthorName,
    InvalidAuthorNameError,
    AUTHOR_NAME_MAX_LEN,
    "The author name must be non-empty and at most 50 characters: {0:?}",
    require_content = true
);

validated_text!(
    CaptionText,
    InvalidCaptionTextError,
    CAPTION_TEXT_MAX_LEN,
    "The caption must be non-empty and at most 1000 characters: {0:?}",
    require_content = true
);

validated_text!(
    CommentBody,
    InvalidCommentBodyError,
    COMMENT_BODY_MAX_LEN,
    "The comment body must be non-empty and at most 500 characters: {0:?}",
    require_content = true
);

validated_text!(
    AltText,
    InvalidAltTextError,
    ALT_TEXT_MAX_LEN,
    "The alt text must be at most 200 characters: {0:?}",
    require_content = false
);

impl Default for AuthorName {
    fn default() -> Self {
        Self(ANONYMOUS_AUTHOR.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_name_is_trimmed() {
        let name = AuthorName::new("  Ana  ").unwrap();
        assert_eq!(name.get(), "Ana");
    }

    #[test]
    fn author_name_rejects_empty_and_oversized() {
        assert!(AuthorName::new("   ").is_err());
        assert!(AuthorName::new("x".repeat(51)).is_err());
        assert!(AuthorName::new("x".repeat(50)).is_ok());
    }

    #[test]
    fn default_author_is_anonymous() {
        assert_eq!(AuthorName::default().get(), ANONYMOUS_AUTHOR);
    }

    #[test]
    fn caption_bounds() {
        assert!(CaptionText::new("").is_err());
        assert!(CaptionText::new("a".repeat(1000)).is_ok());
        assert!(CaptionText::new("a".repeat(1001)).is_err());
    }

    #[test]
    fn comment_body_bounds() {
        assert!(CommentBody::new(" ").is_err());
        assert!(CommentBody::new("a".repeat(500)).is_ok());
        assert!(CommentBody::new("a".repeat(501)).is_err());
    }

    #[test]
    fn alt_text_may_be_empty() {
        assert!(AltText::new("").is_ok());
        assert!(AltText::new("a".repeat(201)).is_err());
    }

    #[test]
    fn multibyte_length_counts_characters() {
        assert!(AuthorName::new("ä".repeat(50)).is_ok());
        assert!(AuthorName::new("ä".repeat(51)).is_err());
    }
}
