//! Batched partition offsets.

use crate::message::Message;
use std::collections::{BTreeMap, HashMap};

/// Offset and commit metadata recorded for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetInfo {
    pub offset: i64,
    pub metadata: String,
}

/// A collection of partition offsets to be marked or reset together.
///
/// Marking only moves an offset forward, resetting only moves it back.
/// Offsets are those of processed messages, not the next offset to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetStash {
    offsets: BTreeMap<(String, i32), OffsetInfo>,
}

impl OffsetStash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_offset(&mut self, message: &Message, metadata: &str) -> bool {
        self.mark_partition_offset(&message.topic, message.partition, message.offset, metadata)
    }

    /// Returns whether the stash changed.
    pub fn mark_partition_offset(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> bool {
        self.update(topic, partition, offset, metadata, |current| offset >= current)
    }

    pub fn reset_offset(&mut self, message: &Message, metadata: &str) -> bool {
        self.reset_partition_offset(&message.topic, message.partition, message.offset, metadata)
    }

    /// Returns whether the stash changed.
    pub fn reset_partition_offset(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> bool {
        self.update(topic, partition, offset, metadata, |current| offset <= current)
    }

    fn update(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
        accept: impl Fn(i64) -> bool,
    ) -> bool {
        let key = (topic.to_string(), partition);
        match self.offsets.get_mut(&key) {
            Some(info) if !accept(info.offset) => false,
            Some(info) => {
                info.offset = offset;
                info.metadata = metadata.to_string();
                true
            }
            None => {
                self.offsets.insert(
                    key,
                    OffsetInfo {
                        offset,
                        metadata: metadata.to_string(),
                    },
                );
                true
            }
        }
    }

    /// Put an entry back exactly as it was, bypassing the ordering rules.
    pub(crate) fn restore(&mut self, topic: &str, partition: i32, previous: Option<OffsetInfo>) {
        let key = (topic.to_string(), partition);
        match previous {
            Some(info) => {
                self.offsets.insert(key, info);
            }
            None => {
                self.offsets.remove(&key);
            }
        }
    }

    pub fn get(&self, topic: &str, partition: i32) -> Option<&OffsetInfo> {
        self.offsets.get(&(topic.to_string(), partition))
    }

    /// Stashed offsets keyed by `"topic/partition"`.
    pub fn offsets(&self) -> HashMap<String, i64> {
        self.offsets
            .iter()
            .map(|((topic, partition), info)| (format!("{topic}/{partition}"), info.offset))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, &OffsetInfo)> {
        self.offsets
            .iter()
            .map(|((topic, partition), info)| (topic.as_str(), *partition, info))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
