use crate::blob::FsBlobStore;
use crate::ingest::{IngestPipeline, StagedUpload};
use crate::server::{
    RequestOrigin, Result, ServerError, ServerRouter,
    json::Json,
    payload::SuccessBody,
    routes::posts::{PostResponse, parse_author},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_IMAGE_TYPES: [&str; 5] = ["jpeg", "jpg", "png", "gif", "webp"];

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(upload_image)
        // Leave headroom over the blob limit for multipart framing; the exact
        // bound on the image itself is enforced in the handler.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/upload", rejection(ServerError))]
struct UploadPath();

async fn upload_image(
    UploadPath(): UploadPath,
    origin: RequestOrigin,
    State(blobs): State<FsBlobStore>,
    State(pipeline): State<Arc<IngestPipeline>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SuccessBody<PostResponse>>)> {
    let mut upload = None;
    let mut author = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(ToOwned::to_owned);
        match name.as_deref() {
            Some("image") => {
                let original_name = field.file_name().unwrap_or_default().to_owned();
                let content_type = field.content_type().unwrap_or_default().to_owned();
                let bytes = field.bytes().await?;

                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(ServerError::UploadTooLarge);
                }
                let extension = validate_image(&original_name, &content_type)?;

                let staged_path = blobs
                    .stage(&bytes, &extension)
                    .await
                    .map_err(|err| crate::ingest::IngestError::Storage(err.into()))?;

                upload = Some(StagedUpload {
                    staged_path,
                    original_name,
                    content_type,
                });
            }
            Some("author") => {
                author = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let author = parse_author(author)?;
    let post = pipeline.ingest(upload, author, &origin.base()).await?;

    Ok((
        StatusCode::CREATED,
        Json(
            SuccessBody::new(PostResponse::new(post, &origin))
                .with_message("Image uploaded and processed"),
        ),
    ))
}

/// Both the file extension and the declared MIME subtype must belong to the
/// allowed raster formats. Returns the lowercased extension.
fn validate_image(file_name: &str, content_type: &str) -> Result<String> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase)
        .unwrap_or_default();
    let subtype = content_type
        .strip_prefix("image/")
        .unwrap_or_default()
        .to_lowercase();

    if ALLOWED_IMAGE_TYPES.contains(&extension.as_str())
        && ALLOWED_IMAGE_TYPES.contains(&subtype.as_str())
    {
        Ok(extension)
    } else {
        Err(ServerError::UnsupportedImageType(format!(
            "{file_name} ({content_type})"
        )))
    }
}
