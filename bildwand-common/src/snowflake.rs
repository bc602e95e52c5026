//! Module for working with snowflake IDs.
//!
//! See <https://discord.com/developers/docs/reference#snowflakes>

use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::{Duration, UtcDateTime};

pub const TIMESTAMP_OFFSET: u64 = 22;
pub const WORKER_ID_OFFSET: u64 = 17;
pub const WORKER_ID_LENGTH: u64 = 5;
pub const PROCESS_ID_OFFSET: u64 = 12;
pub const PROCESS_ID_LENGTH: u64 = 5;
pub const INCREMENT_LENGTH: u64 = 12;

pub trait Epoch {
    const EPOCH_TIME: UtcDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Snowflake part was out of range for creation: {0}")]
pub struct SnowflakePartOutOfRangeError(u16);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct WorkerId(u8);

impl WorkerId {
    #[must_use]
    pub fn new(id: u8) -> Option<Self> {
        (u64::from(id) < 1 << WORKER_ID_LENGTH).then_some(Self(id))
    }

    #[must_use]
    pub fn new_unchecked(id: u8) -> Self {
        Self::new(id).expect("WorkerId out of range.")
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct ProcessId(u8);

impl ProcessId {
    #[must_use]
    pub fn new(id: u8) -> Option<Self> {
        (u64::from(id) < 1 << PROCESS_ID_LENGTH).then_some(Self(id))
    }

    #[must_use]
    pub fn new_unchecked(id: u8) -> Self {
        Self::new(id).expect("ProcessId out of range.")
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for WorkerId {
    type Error = SnowflakePartOutOfRangeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(SnowflakePartOutOfRangeError(value.into()))
    }
}

impl TryFrom<u8> for ProcessId {
    type Error = SnowflakePartOutOfRangeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(SnowflakePartOutOfRangeError(value.into()))
    }
}

#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Snowflake<SnowflakeEpoch>(u64, #[serde(skip)] PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn worker_id(self) -> WorkerId {
        #[allow(clippy::cast_possible_truncation)]
        WorkerId((self.0 >> WORKER_ID_OFFSET) as u8 & ((1 << WORKER_ID_LENGTH) - 1))
    }

    #[must_use]
    pub fn process_id(self) -> ProcessId {
        #[allow(clippy::cast_possible_truncation)]
        ProcessId((self.0 >> PROCESS_ID_OFFSET) as u8 & ((1 << PROCESS_ID_LENGTH) - 1))
    }

    /// The creation time encoded in the ID's upper bits.
    #[must_use]
    pub fn timestamp(self) -> UtcDateTime
    where
        SnowflakeEpoch: Epoch,
    {
        let millis = self.0 >> TIMESTAMP_OFFSET;
        SnowflakeEpoch::EPOCH_TIME + Duration::milliseconds(millis.cast_signed())
    }
}

impl<SnowflakeEpoch> Display for Snowflake<SnowflakeEpoch> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<SnowflakeEpoch> From<u64> for Snowflake<SnowflakeEpoch> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<SnowflakeEpoch> From<Snowflake<SnowflakeEpoch>> for u64 {
    fn from(value: Snowflake<SnowflakeEpoch>) -> Self {
        value.get()
    }
}

#[derive_where(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct SnowflakeGenerator<SnowflakeEpoch> {
    worker_id: WorkerId,
    process_id: ProcessId,
    next_increment: u16,
    phantom_data: PhantomData<SnowflakeEpoch>,
}

impl<SnowflakeEpoch> SnowflakeGenerator<SnowflakeEpoch> {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            worker_id,
            process_id,
            next_increment: 0,
            phantom_data: PhantomData,
        }
    }

    #[must_use]
    pub fn worker_id(self) -> WorkerId {
        self.worker_id
    }

    #[must_use]
    pub fn process_id(self) -> ProcessId {
        self.process_id
    }

    pub fn generate_at(&mut self, time: UtcDateTime) -> Snowflake<SnowflakeEpoch>
    where
        SnowflakeEpoch: Epoch,
    {
        // Times before the epoch clamp to zero rather than wrapping.
        let millis = (time - SnowflakeEpoch::EPOCH_TIME).whole_milliseconds();
        let millis = u64::try_from(millis).unwrap_or(0);

        let increment = u64::from(self.next_increment);
        self.next_increment = (self.next_increment + 1) % (1 << INCREMENT_LENGTH);

        let snowflake = millis << TIMESTAMP_OFFSET
            | u64::from(self.worker_id.get()) << WORKER_ID_OFFSET
            | u64::from(self.process_id.get()) << PROCESS_ID_OFFSET
            | increment;

        Snowflake::new(snowflake)
    }

    pub fn generate(&mut self) -> Snowflake<SnowflakeEpoch>
    where
        SnowflakeEpoch: Epoch,
    {
        self.generate_at(UtcDateTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
    struct TestEpoch;
    impl Epoch for TestEpoch {
        const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
    }

    fn generator() -> SnowflakeGenerator<TestEpoch> {
        SnowflakeGenerator::new(WorkerId::new_unchecked(3), ProcessId::new_unchecked(7))
    }

    #[test]
    fn parts_round_trip() {
        let mut generator = generator();
        let snowflake = generator.generate_at(utc_datetime!(2025-06-01 12:00));

        assert_eq!(snowflake.worker_id(), WorkerId::new_unchecked(3));
        assert_eq!(snowflake.process_id(), ProcessId::new_unchecked(7));
        assert_eq!(snowflake.timestamp(), utc_datetime!(2025-06-01 12:00));
    }

    #[test]
    fn later_times_sort_higher() {
        let mut generator = generator();
        let earlier = generator.generate_at(utc_datetime!(2025-03-01 00:00));
        let later = generator.generate_at(utc_datetime!(2025-03-01 00:00:01));

        assert!(later.get() > earlier.get());
    }

    #[test]
    fn same_millisecond_ids_are_distinct() {
        let mut generator = generator();
        let time = utc_datetime!(2025-03-01 00:00);
        let first = generator.generate_at(time);
        let second = generator.generate_at(time);

        assert_ne!(first, second);
        assert!(second.get() > first.get());
    }

    #[test]
    fn worker_id_bounds() {
        assert!(WorkerId::new(31).is_some());
        assert!(WorkerId::new(32).is_none());
        assert!(ProcessId::new(32).is_none());
    }
}
