//! Partition assignment handling.
//!
//! The broker client calls an [`OnAssign`] strategy whenever it is handed a
//! new set of partitions, and applies whatever the strategy returns in a
//! single `assign` call. The strategy installed by consumers applies the
//! subscription's offset policy.

use crate::config::OffsetPolicy;
use kafka_types::{PartitionAssignment, PartitionOffset};
use std::sync::Arc;
use tracing::info;

/// Strategy invoked with the broker's proposed assignment; returns the
/// assignment to apply.
pub type OnAssign = Arc<dyn Fn(PartitionAssignment) -> PartitionAssignment + Send + Sync>;

/// Rewrite a proposed assignment according to `policy`.
///
/// `Earliest` moves every partition to the beginning of the log; `Latest`
/// keeps the broker's proposal. Either every partition is rewritten or none
/// is.
pub fn apply_offset_policy(
    policy: OffsetPolicy,
    assignment: PartitionAssignment,
) -> PartitionAssignment {
    match policy {
        OffsetPolicy::Earliest => assignment.with_offset(PartitionOffset::Beginning),
        OffsetPolicy::Latest => assignment,
    }
}

/// Build the assignment strategy for a subscription.
pub fn offset_reset_strategy(topic_pattern: &str, policy: OffsetPolicy) -> OnAssign {
    let topic_pattern = topic_pattern.to_string();
    Arc::new(move |proposed: PartitionAssignment| {
        let revised = apply_offset_policy(policy, proposed);
        info!(
            topic = %topic_pattern,
            partitions = revised.len(),
            policy = policy.as_reset_str(),
            "partitions assigned"
        );
        revised
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_types::TopicPartition;

    fn proposed() -> PartitionAssignment {
        [100, 200, 300]
            .into_iter()
            .enumerate()
            .map(|(p, offset)| {
                TopicPartition::new("org.chicago.cta.weather.v1", p as i32, PartitionOffset::Offset(offset))
            })
            .collect()
    }

    #[test]
    fn test_earliest_rewrites_all_partitions() {
        let strategy = offset_reset_strategy("org.chicago.cta.weather.v1", OffsetPolicy::Earliest);
        let revised = strategy(proposed());

        let offsets: Vec<_> = revised.iter().map(|tp| tp.offset).collect();
        assert_eq!(offsets, vec![PartitionOffset::Beginning; 3]);
        let partitions: Vec<_> = revised.iter().map(|tp| tp.partition).collect();
        assert_eq!(partitions, vec![0, 1, 2]);
    }

    #[test]
    fn test_latest_keeps_proposal() {
        let strategy = offset_reset_strategy("org.chicago.cta.weather.v1", OffsetPolicy::Latest);
        assert_eq!(strategy(proposed()), proposed());
    }

    #[test]
    fn test_empty_assignment() {
        let revised = apply_offset_policy(OffsetPolicy::Earliest, PartitionAssignment::default());
        assert!(revised.is_empty());
    }
}
