use crate::record::{CommentRecord, PostRecord};
use crate::store::{ContentStore, DbError, Result};
use async_trait::async_trait;
use bildwand_common::model::{
    BildwandSnowflakeGenerator, Id,
    post::{Comment, CommentMarker, CreatePost, NewComment, Post, PostMarker, PostPatch, PostStatus},
};
use bildwand_common::snowflake::{ProcessId, WorkerId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, query, query_as};
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;

pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<BildwandSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator = Mutex::new(BildwandSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn connect(
        database_url: &str,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool, worker_id, process_id))
    }

    fn generate_snowflake(&self) -> u64 {
        self.snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .get()
    }

    async fn fetch_comments(&self, post_snowflakes: &[i64]) -> Result<Vec<CommentRecord>> {
        let records = query_as::<_, CommentRecord>(
            "
            SELECT
                comment_snowflake,
                post_snowflake,
                author,
                body,
                created_at
            FROM
                posts.comments
            WHERE
                post_snowflake = ANY($1)
            ORDER BY
                comment_snowflake
            ",
        )
        .bind(post_snowflakes)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn touch_post(&self, post_snowflake: i64, at: OffsetDateTime) -> Result<()> {
        query("UPDATE posts.posts SET updated_at = $2 WHERE post_snowflake = $1")
            .bind(post_snowflake)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ContentStore for DbClient {
    async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let post_snowflake = self.generate_snowflake();
        let now = OffsetDateTime::now_utc();

        query(
            "
            INSERT INTO posts.posts
                (post_snowflake, caption, alt_text, image_url, author, likes, status,
                 created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, 0, $6, $7, $7)
            ",
        )
        .bind(post_snowflake.cast_signed())
        .bind(&post.caption)
        .bind(post.alt_text.as_deref())
        .bind(post.image_url.as_deref())
        .bind(post.author.get())
        .bind(post.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Post {
            id: post_snowflake.into(),
            caption: post.caption.clone(),
            alt_text: post.alt_text.clone(),
            image_url: post.image_url.clone(),
            author: post.author.get().to_owned(),
            likes: 0,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            status: post.status,
        })
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                post_snowflake, caption, alt_text, image_url, author, likes, status,
                created_at, updated_at
            FROM
                posts.posts
            WHERE
                post_snowflake = $1
            ",
        )
        .bind(id.snowflake().get().cast_signed())
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let comments = self.fetch_comments(&[record.post_snowflake]).await?;
        let post = record.into_post(comments).map_err(DbError::Data)?;
        Ok(Some(post))
    }

    async fn update_post(&self, id: Id<PostMarker>, patch: &PostPatch) -> Result<u64> {
        let result = query(
            "
            UPDATE posts.posts
            SET
                caption = COALESCE($2, caption),
                alt_text = COALESCE($3, alt_text),
                image_url = COALESCE($4, image_url),
                author = COALESCE($5, author),
                status = COALESCE($6, status),
                updated_at = $7
            WHERE
                post_snowflake = $1
            ",
        )
        .bind(id.snowflake().get().cast_signed())
        .bind(patch.caption.as_deref())
        .bind(patch.alt_text.as_deref())
        .bind(patch.image_url.as_deref())
        .bind(patch.author.as_deref())
        .bind(patch.status.map(PostStatus::as_str))
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_post(&self, id: Id<PostMarker>) -> Result<u64> {
        let result = query("DELETE FROM posts.posts WHERE post_snowflake = $1")
            .bind(id.snowflake().get().cast_signed())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_page(&self, skip: u64, limit: u64) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT
                post_snowflake, caption, alt_text, image_url, author, likes, status,
                created_at, updated_at
            FROM
                posts.posts
            ORDER BY
                post_snowflake DESC
            OFFSET $1
            LIMIT $2
            ",
        )
        .bind(skip.cast_signed())
        .bind(limit.cast_signed())
        .fetch_all(&self.pool)
        .await?;

        let snowflakes: Vec<i64> = records.iter().map(|record| record.post_snowflake).collect();
        let mut comments = self.fetch_comments(&snowflakes).await?;

        let mut posts = Vec::with_capacity(records.len());
        for record in records {
            let (own, rest): (Vec<_>, Vec<_>) = comments
                .into_iter()
                .partition(|comment| comment.post_snowflake == record.post_snowflake);
            comments = rest;
            posts.push(record.into_post(own).map_err(DbError::Data)?);
        }

        Ok(posts)
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        comment: &NewComment,
    ) -> Result<Option<Comment>> {
        let comment_snowflake = self.generate_snowflake();
        let post_snowflake = post_id.snowflake().get().cast_signed();
        let now = OffsetDateTime::now_utc();

        // The guard keeps orphaned comments out without a separate existence
        // check racing against post deletion.
        let result = query(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, author, body, created_at)
            SELECT
                $1, $2, $3, $4, $5
            WHERE EXISTS
                (SELECT 1 FROM posts.posts WHERE post_snowflake = $2)
            ",
        )
        .bind(comment_snowflake.cast_signed())
        .bind(post_snowflake)
        .bind(comment.author.get())
        .bind(comment.body.get())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.touch_post(post_snowflake, now).await?;

        Ok(Some(Comment {
            id: comment_snowflake.into(),
            author: comment.author.get().to_owned(),
            body: comment.body.get().to_owned(),
            created_at: now,
        }))
    }

    async fn remove_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
    ) -> Result<u64> {
        let post_snowflake = post_id.snowflake().get().cast_signed();

        let result = query(
            "
            DELETE FROM posts.comments
            WHERE
                comment_snowflake = $1 AND post_snowflake = $2
            ",
        )
        .bind(comment_id.snowflake().get().cast_signed())
        .bind(post_snowflake)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.touch_post(post_snowflake, OffsetDateTime::now_utc())
                .await?;
        }

        Ok(result.rows_affected())
    }

    async fn adjust_likes(&self, post_id: Id<PostMarker>, delta: i64) -> Result<u64> {
        let result = query(
            "
            UPDATE posts.posts
            SET
                likes = GREATEST(likes + $2, 0),
                updated_at = $3
            WHERE
                post_snowflake = $1
            ",
        )
        .bind(post_id.snowflake().get().cast_signed())
        .bind(delta)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
