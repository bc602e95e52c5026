//! The image-ingestion pipeline.
//!
//! One ingestion turns a staged upload plus a placeholder record into a
//! completed, captioned post. Three independently failing resources are
//! involved (database, filesystem, captioning service) and no transaction
//! spans them, so every step that leaves durable state behind registers a
//! compensating action. On failure the committed actions are undone in
//! reverse, best-effort: a cleanup error is logged and never replaces the
//! error that triggered it.

use crate::blob::{BlobError, FsBlobStore};
use crate::caption::{CaptionGenerator, fallback_caption};
use bildwand_common::model::{
    Id,
    post::{CreatePost, Post, PostMarker, PostPatch, PostStatus},
    text::AuthorName,
};
use bildwand_db::store::{ContentStore, DbError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

const PLACEHOLDER_CAPTION: &str = "Generating caption…";
const PLACEHOLDER_ALT: &str = "Generating alt text…";

/// An upload the handler has already written to a temporary file, plus the
/// request metadata the pipeline needs.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StagedUpload {
    pub staged_path: PathBuf,
    pub original_name: String,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum StorageCause {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No image file was provided")]
    NoFileProvided,
    #[error("A storage operation failed")]
    Storage(#[source] StorageCause),
    #[error("The post could not be finalized")]
    Completion(#[source] DbError),
}

/// A durable side effect the pipeline has performed, paired with how to undo
/// it. Undoing is deletion in both cases; the variants exist so the unwind
/// log names what it was cleaning up.
#[derive(Clone, Eq, PartialEq, Debug)]
enum Committed {
    StagedFile(PathBuf),
    Blob(String),
}

#[derive(Debug, Default)]
struct Compensation {
    committed: Vec<Committed>,
}

impl Compensation {
    fn commit(&mut self, action: Committed) {
        self.committed.push(action);
    }

    /// Undo every committed action, most recent first. Deletions are
    /// idempotent, so unwinding a step that never completed is harmless.
    async fn unwind(self, blobs: &FsBlobStore) {
        for action in self.committed.into_iter().rev() {
            let outcome = match &action {
                Committed::Blob(name) => blobs.delete(name).await,
                Committed::StagedFile(path) => blobs.delete_path(path).await,
            };

            if let Err(err) = outcome {
                warn!(?action, error = %err, "Compensation step failed");
            }
        }
    }
}

pub struct IngestPipeline {
    store: Arc<dyn ContentStore>,
    blobs: FsBlobStore,
    captioner: Arc<dyn CaptionGenerator>,
    public_base_url: Option<String>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn ContentStore>,
        blobs: FsBlobStore,
        captioner: Arc<dyn CaptionGenerator>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            store,
            blobs,
            captioner,
            public_base_url,
        }
    }

    /// Run one ingestion: placeholder record, blob materialization,
    /// captioning, finalization. Returns the finalized post.
    pub async fn ingest(
        &self,
        upload: Option<StagedUpload>,
        author: Option<AuthorName>,
        request_base: &str,
    ) -> Result<Post, IngestError> {
        // Nothing has touched storage yet, so rejecting here needs no cleanup.
        let Some(upload) = upload else {
            return Err(IngestError::NoFileProvided);
        };

        let mut compensation = Compensation::default();
        compensation.commit(Committed::StagedFile(upload.staged_path.clone()));

        let placeholder = CreatePost {
            caption: PLACEHOLDER_CAPTION.to_owned(),
            alt_text: Some(PLACEHOLDER_ALT.to_owned()),
            image_url: None,
            author: author.unwrap_or_default(),
            status: PostStatus::Processing,
        };

        let mut post = match self.store.create_post(&placeholder).await {
            Ok(post) => post,
            Err(err) => {
                compensation.unwind(&self.blobs).await;
                return Err(IngestError::Storage(err.into()));
            }
        };

        info!(post_id = %post.id, "Created placeholder post");

        let blob_name = blob_name_for(post.id, &upload.original_name);
        if let Err(err) = self.blobs.promote(&upload.staged_path, &blob_name).await {
            // The placeholder stays behind in `processing`: the staged file's
            // location is not stable across retries, and out-of-band cleanup
            // can still reconcile the record.
            compensation.unwind(&self.blobs).await;
            return Err(IngestError::Storage(err.into()));
        }
        compensation.commit(Committed::Blob(blob_name.clone()));

        let base = self
            .public_base_url
            .as_deref()
            .unwrap_or(request_base)
            .trim_end_matches('/');
        let image_url = format!("{base}/uploads/{blob_name}");

        // The blob is already the authoritative copy; a failed read-back only
        // degrades the caption, it must not lose the image.
        let caption = match self.blobs.read(&blob_name).await {
            Ok(bytes) => self.captioner.describe(&bytes, &upload.content_type).await,
            Err(err) => {
                warn!(post_id = %post.id, error = %err, "Blob read-back failed, using fallback caption");
                fallback_caption()
            }
        };

        let patch = PostPatch {
            caption: Some(caption.caption.clone()),
            alt_text: Some(caption.alt_text.clone()),
            image_url: Some(image_url.clone()),
            author: None,
            status: Some(PostStatus::Completed),
        };

        // On failure the record itself is NOT deleted: the update's outcome
        // is unknown, and a stranded `processing` record is recoverable where
        // a deleted one is not.
        let finalize_failure = match self.store.update_post(post.id, &patch).await {
            Ok(matched) if matched > 0 => None,
            Ok(_) => Some(DbError::VanishedRecord),
            Err(err) => Some(err),
        };

        if let Some(err) = finalize_failure {
            compensation.unwind(&self.blobs).await;
            return Err(IngestError::Completion(err));
        }

        info!(post_id = %post.id, blob = %blob_name, "Finalized ingested post");

        post.caption = caption.caption;
        post.alt_text = Some(caption.alt_text);
        post.image_url = Some(image_url);
        post.status = PostStatus::Completed;
        post.updated_at = OffsetDateTime::now_utc();

        Ok(post)
    }
}

/// Final blob name: the post identifier plus the upload's original
/// extension, lowercased. A missing extension leaves the bare identifier.
fn blob_name_for(id: Id<PostMarker>, original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase);

    match extension {
        Some(extension) => format!("{id}.{extension}"),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bildwand_common::model::post::{Comment, CommentMarker, NewComment};
    use bildwand_db::store::Result as DbResult;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        posts: Mutex<Vec<Post>>,
        next_id: AtomicU64,
        fail_create: bool,
        fail_update: bool,
    }

    impl MemoryStore {
        fn failing_create() -> Self {
            Self {
                fail_create: true,
                ..Self::default()
            }
        }

        fn failing_update() -> Self {
            Self {
                fail_update: true,
                ..Self::default()
            }
        }

        fn snapshot(&self) -> Vec<Post> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentStore for MemoryStore {
        async fn create_post(&self, post: &CreatePost) -> DbResult<Post> {
            if self.fail_create {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let now = OffsetDateTime::now_utc();
            let post = Post {
                id: id.into(),
                caption: post.caption.clone(),
                alt_text: post.alt_text.clone(),
                image_url: post.image_url.clone(),
                author: post.author.get().to_owned(),
                likes: 0,
                comments: Vec::new(),
                created_at: now,
                updated_at: now,
                status: post.status,
            };
            self.posts.lock().unwrap().push(post.clone());
            Ok(post)
        }

        async fn fetch_post(&self, id: Id<PostMarker>) -> DbResult<Option<Post>> {
            Ok(self
                .posts
                .lock()
                .unwrap()
                .iter()
                .find(|post| post.id == id)
                .cloned())
        }

        async fn update_post(&self, id: Id<PostMarker>, patch: &PostPatch) -> DbResult<u64> {
            if self.fail_update {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }

            let mut posts = self.posts.lock().unwrap();
            let Some(post) = posts.iter_mut().find(|post| post.id == id) else {
                return Ok(0);
            };

            if let Some(caption) = &patch.caption {
                post.caption = caption.clone();
            }
            if let Some(alt_text) = &patch.alt_text {
                post.alt_text = Some(alt_text.clone());
            }
            if let Some(image_url) = &patch.image_url {
                post.image_url = Some(image_url.clone());
            }
            if let Some(author) = &patch.author {
                post.author = author.clone();
            }
            if let Some(status) = patch.status {
                post.status = status;
            }
            post.updated_at = OffsetDateTime::now_utc();
            Ok(1)
        }

        async fn delete_post(&self, id: Id<PostMarker>) -> DbResult<u64> {
            let mut posts = self.posts.lock().unwrap();
            let before = posts.len();
            posts.retain(|post| post.id != id);
            Ok((before - posts.len()) as u64)
        }

        async fn list_page(&self, skip: u64, limit: u64) -> DbResult<Vec<Post>> {
            let mut posts = self.snapshot();
            posts.sort_by(|a, b| u64::from(b.id).cmp(&u64::from(a.id)));
            Ok(posts
                .into_iter()
                .skip(skip as usize)
                .take(limit as usize)
                .collect())
        }

        async fn add_comment(
            &self,
            post_id: Id<PostMarker>,
            comment: &NewComment,
        ) -> DbResult<Option<Comment>> {
            let mut posts = self.posts.lock().unwrap();
            let Some(post) = posts.iter_mut().find(|post| post.id == post_id) else {
                return Ok(None);
            };

            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let comment = Comment {
                id: id.into(),
                author: comment.author.get().to_owned(),
                body: comment.body.get().to_owned(),
                created_at: OffsetDateTime::now_utc(),
            };
            post.comments.push(comment.clone());
            Ok(Some(comment))
        }

        async fn remove_comment(
            &self,
            post_id: Id<PostMarker>,
            comment_id: Id<CommentMarker>,
        ) -> DbResult<u64> {
            let mut posts = self.posts.lock().unwrap();
            let Some(post) = posts.iter_mut().find(|post| post.id == post_id) else {
                return Ok(0);
            };

            let before = post.comments.len();
            post.comments.retain(|comment| comment.id != comment_id);
            Ok((before - post.comments.len()) as u64)
        }

        async fn adjust_likes(&self, post_id: Id<PostMarker>, delta: i64) -> DbResult<u64> {
            let mut posts = self.posts.lock().unwrap();
            let Some(post) = posts.iter_mut().find(|post| post.id == post_id) else {
                return Ok(0);
            };

            post.likes = post.likes.saturating_add_signed(delta);
            Ok(1)
        }
    }

    struct FixedCaptioner;

    #[async_trait]
    impl CaptionGenerator for FixedCaptioner {
        async fn describe(&self, _image: &[u8], _content_type: &str) -> crate::caption::Caption {
            crate::caption::Caption {
                caption: "A test image".to_owned(),
                alt_text: "Test alt".to_owned(),
            }
        }
    }

    struct Setup {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        blobs: FsBlobStore,
        pipeline: IngestPipeline,
    }

    async fn setup_with(store: MemoryStore, captioner: Arc<dyn CaptionGenerator>) -> Setup {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::open(dir.path()).await.unwrap();
        let store = Arc::new(store);
        let pipeline = IngestPipeline::new(store.clone(), blobs.clone(), captioner, None);

        Setup {
            _dir: dir,
            store,
            blobs,
            pipeline,
        }
    }

    async fn stage_upload(blobs: &FsBlobStore) -> StagedUpload {
        let staged_path = blobs.stage(b"fake-image-bytes", "png").await.unwrap();
        StagedUpload {
            staged_path,
            original_name: "holiday.PNG".to_owned(),
            content_type: "image/png".to_owned(),
        }
    }

    fn uploads_dir_entries(blobs: &FsBlobStore) -> Vec<String> {
        std::fs::read_dir(blobs.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_any_side_effect() {
        let setup = setup_with(MemoryStore::default(), Arc::new(FixedCaptioner)).await;

        let result = setup.pipeline.ingest(None, None, "http://localhost").await;

        assert!(matches!(result, Err(IngestError::NoFileProvided)));
        assert!(setup.store.snapshot().is_empty());
        assert!(uploads_dir_entries(&setup.blobs).is_empty());
    }

    #[tokio::test]
    async fn happy_path_finalizes_the_post() {
        let setup = setup_with(MemoryStore::default(), Arc::new(FixedCaptioner)).await;
        let upload = stage_upload(&setup.blobs).await;
        let author = AuthorName::new("Ana").unwrap();

        let post = setup
            .pipeline
            .ingest(Some(upload), Some(author), "http://localhost:3000")
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Completed);
        assert_eq!(post.caption, "A test image");
        assert_eq!(post.alt_text.as_deref(), Some("Test alt"));
        assert_eq!(post.author, "Ana");

        let blob_name = format!("{}.png", post.id);
        assert_eq!(
            post.image_url.as_deref(),
            Some(format!("http://localhost:3000/uploads/{blob_name}").as_str())
        );

        // The blob is in place under its final name and the staged file is gone.
        assert_eq!(uploads_dir_entries(&setup.blobs), vec![blob_name.clone()]);
        assert_eq!(
            setup.blobs.read(&blob_name).await.unwrap(),
            b"fake-image-bytes"
        );

        // The stored record was finalized, not just the returned value.
        let stored = setup.store.snapshot().pop().unwrap();
        assert_eq!(stored.status, PostStatus::Completed);
        assert_eq!(stored.caption, "A test image");
    }

    #[tokio::test]
    async fn anonymous_author_is_defaulted() {
        let setup = setup_with(MemoryStore::default(), Arc::new(FixedCaptioner)).await;
        let upload = stage_upload(&setup.blobs).await;

        let post = setup
            .pipeline
            .ingest(Some(upload), None, "http://localhost")
            .await
            .unwrap();

        assert_eq!(post.author, "Anonymous");
    }

    #[tokio::test]
    async fn captioning_degradation_still_completes_the_post() {
        // StaticCaptioner stands in for an unreachable service: describe is
        // total either way, so the pipeline must finish with fallback text.
        let setup = setup_with(
            MemoryStore::default(),
            Arc::new(crate::caption::StaticCaptioner),
        )
        .await;
        let upload = stage_upload(&setup.blobs).await;

        let post = setup
            .pipeline
            .ingest(Some(upload), None, "http://localhost")
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Completed);
        assert!(!post.caption.is_empty());
        assert!(!post.alt_text.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_failure_aborts_with_storage_error() {
        let setup = setup_with(MemoryStore::failing_create(), Arc::new(FixedCaptioner)).await;
        let upload = stage_upload(&setup.blobs).await;

        let result = setup
            .pipeline
            .ingest(Some(upload), None, "http://localhost")
            .await;

        assert!(matches!(result, Err(IngestError::Storage(_))));
        assert!(setup.store.snapshot().is_empty());
        // The staged file was cleaned up.
        assert!(uploads_dir_entries(&setup.blobs).is_empty());
    }

    #[tokio::test]
    async fn completion_failure_compensates_the_blob_but_keeps_the_record() {
        let setup = setup_with(MemoryStore::failing_update(), Arc::new(FixedCaptioner)).await;
        let upload = stage_upload(&setup.blobs).await;

        let result = setup
            .pipeline
            .ingest(Some(upload), None, "http://localhost")
            .await;

        assert!(matches!(result, Err(IngestError::Completion(_))));

        // The blob was deleted by compensation...
        assert!(uploads_dir_entries(&setup.blobs).is_empty());

        // ...but the placeholder record survives in `processing` for manual
        // follow-up.
        let stored = setup.store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, PostStatus::Processing);
    }

    #[test]
    fn blob_name_derives_from_id_and_lowercased_extension() {
        let id = Id::<PostMarker>::from(42_u64);

        assert_eq!(blob_name_for(id, "holiday.PNG"), "42.png");
        assert_eq!(blob_name_for(id, "photo.jpeg"), "42.jpeg");
        assert_eq!(blob_name_for(id, "extensionless"), "42");
    }
}
