pub mod post;
pub mod text;

use crate::{
    model::text::{
        InvalidAltTextError, InvalidAuthorNameError, InvalidCaptionTextError,
        InvalidCommentBodyError,
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    AuthorName(#[from] InvalidAuthorNameError),
    #[error(transparent)]
    CaptionText(#[from] InvalidCaptionTextError),
    #[error(transparent)]
    CommentBody(#[from] InvalidCommentBodyError),
    #[error(transparent)]
    AltText(#[from] InvalidAltTextError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct BildwandEpoch;
impl Epoch for BildwandEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type BildwandSnowflake = Snowflake<BildwandEpoch>;
pub type BildwandSnowflakeGenerator = SnowflakeGenerator<BildwandEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(BildwandSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: BildwandSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> BildwandSnowflake {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<BildwandSnowflake> for Id<Marker> {
    fn from(value: BildwandSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for BildwandSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(BildwandSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
