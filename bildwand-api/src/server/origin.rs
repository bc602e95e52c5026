//! Where the request came from, as seen by the client.
//!
//! Share links and (absent a configured base URL) image links are built from
//! the inbound request's scheme and host, so a post shared from behind a
//! proxy points back at the address the client actually used.

use crate::server::ServerError;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use bildwand_common::model::{Id, post::PostMarker};

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct RequestOrigin {
    scheme: String,
    host: String,
}

impl RequestOrigin {
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// `{scheme}://{host}`, without a trailing slash.
    #[must_use]
    pub fn base(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Canonical shareable link for a post.
    #[must_use]
    pub fn share_url(&self, id: Id<PostMarker>) -> String {
        format!("{}/posts/{id}", self.base())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestOrigin {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or(ServerError::MissingHost)?
            .to_owned();

        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http")
            .to_owned();

        Ok(Self::new(scheme, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_url_embeds_the_post_id() {
        let origin = RequestOrigin::new("https", "bildwand.example");
        let id = Id::<PostMarker>::from(99_u64);

        assert_eq!(origin.share_url(id), "https://bildwand.example/posts/99");
        // Recomputing yields the same value.
        assert_eq!(origin.share_url(id), origin.share_url(id));
    }

    #[test]
    fn base_has_no_trailing_slash() {
        let origin = RequestOrigin::new("http", "localhost:3000");
        assert_eq!(origin.base(), "http://localhost:3000");
    }
}
