use crate::blob::FsBlobStore;
use crate::ingest::{IngestError, IngestPipeline};
use crate::server::payload::ErrorBody;
use axum::{
    Router,
    extract::{
        FromRef, Request,
        multipart::MultipartError,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bildwand_common::model::{
    Id, ModelValidationError,
    post::{CommentMarker, PostMarker},
};
use bildwand_db::store::{ContentStore, DbError};
use json::Json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod json;
mod origin;
mod payload;
mod routes;

pub use origin::RequestOrigin;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn ContentStore>,
    pub blobs: FsBlobStore,
    pub pipeline: Arc<IngestPipeline>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Multipart body rejected: {0}")]
    Multipart(#[from] MultipartError),
    #[error("The Host header was missing or unreadable")]
    MissingHost,
    #[error(transparent)]
    Validation(#[from] ModelValidationError),
    #[error("At least one field must be provided for an update")]
    EmptyUpdate,
    #[error("Only JPEG, JPG, PNG, GIF and WEBP images are allowed, got {0:?}")]
    UnsupportedImageType(String),
    #[error("The uploaded file exceeds the 5 MB limit")]
    UploadTooLarge,
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentByIdNotFound(Id<CommentMarker>),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::CommentByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::JsonRejection(_)
            | ServerError::Multipart(_)
            | ServerError::MissingHost
            | ServerError::Validation(_)
            | ServerError::EmptyUpdate
            | ServerError::UnsupportedImageType(_)
            | ServerError::Ingest(IngestError::NoFileProvided) => StatusCode::BAD_REQUEST,
            ServerError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::JsonResponse(_) | ServerError::Database(_) | ServerError::Ingest(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short error label for the response payload.
    fn label(&self) -> &'static str {
        match self {
            ServerError::UnknownRoute(_) => "Route not found",
            ServerError::PostByIdNotFound(_) | ServerError::PathRejection(_) => "Post not found",
            ServerError::CommentByIdNotFound(_) => "Comment not found",
            ServerError::JsonRejection(_)
            | ServerError::Validation(_)
            | ServerError::EmptyUpdate
            | ServerError::MissingHost => "Validation error",
            ServerError::Multipart(_) => "Invalid upload",
            ServerError::UnsupportedImageType(_) => "Invalid file type",
            ServerError::UploadTooLarge => "File too large",
            ServerError::Ingest(IngestError::NoFileProvided) => "File not found",
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::Ingest(_) => "Internal server error",
        }
    }

    /// Client-facing message. Server-side failures get a generic message;
    /// their detail only goes to the log.
    fn message(&self) -> String {
        if self.status().is_server_error() {
            "Something went wrong on the server".to_owned()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error_response = ErrorBody {
            success: false,
            error: self.label(),
            message: self.message(),
        };
        (status, Json(error_response)).into_response()
    }
}
