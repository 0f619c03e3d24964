//! Partition assignment types.
//!
//! A [`PartitionAssignment`] is what the broker proposes to a consumer on
//! rebalance. It is rebuilt on every rebalance and never retained by the
//! consumer; authoritative partition and offset state stays in the broker
//! client.

use std::fmt;

/// Starting position for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOffset {
    /// Earliest offset still available in the log.
    Beginning,
    /// Offset of the next record to be produced.
    End,
    /// Offset committed by the consumer group.
    Stored,
    /// No offset chosen; the broker's reset policy applies.
    Invalid,
    /// Explicit offset.
    Offset(i64),
}

impl fmt::Display for PartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionOffset::Beginning => write!(f, "beginning"),
            PartitionOffset::End => write!(f, "end"),
            PartitionOffset::Stored => write!(f, "stored"),
            PartitionOffset::Invalid => write!(f, "invalid"),
            PartitionOffset::Offset(o) => write!(f, "{o}"),
        }
    }
}

/// A single (topic, partition) pair with its starting offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: PartitionOffset,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: PartitionOffset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

/// The set of partitions handed to a consumer at rebalance time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub partitions: Vec<TopicPartition>,
}

impl PartitionAssignment {
    pub fn new(partitions: Vec<TopicPartition>) -> Self {
        Self { partitions }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPartition> {
        self.partitions.iter()
    }

    /// Returns a copy with every partition's offset replaced by `offset`.
    ///
    /// Built as a whole new assignment so callers never observe a partially
    /// rewritten set.
    pub fn with_offset(&self, offset: PartitionOffset) -> Self {
        Self {
            partitions: self
                .partitions
                .iter()
                .map(|tp| TopicPartition {
                    offset,
                    ..tp.clone()
                })
                .collect(),
        }
    }
}

impl FromIterator<TopicPartition> for PartitionAssignment {
    fn from_iter<I: IntoIterator<Item = TopicPartition>>(iter: I) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}
