//! Partition assignment computed by the group leader.
//!
//! ```rust
//! use kaflink::assignment::{AssignmentStrategy, TopicPartition};
//! use std::collections::BTreeMap;
//!
//! let members = vec!["consumer-1".to_string(), "consumer-2".to_string()];
//! let topics = BTreeMap::from([("orders".to_string(), vec![0, 1, 2, 3])]);
//!
//! let assignments = AssignmentStrategy::RoundRobin.assign(&members, &topics);
//! assert_eq!(
//!     assignments["consumer-1"],
//!     vec![TopicPartition::new("orders", 0), TopicPartition::new("orders", 2)]
//! );
//! ```

use kaflink_protocol::consumer_protocol::{MemberAssignment, TopicAssignment, ROUND_ROBIN_PROTOCOL};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Partition assignment strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentStrategy {
    /// Deal partitions to members in turn
    #[default]
    RoundRobin,
}

impl AssignmentStrategy {
    /// Protocol name registered in JoinGroup
    pub fn name(self) -> &'static str {
        match self {
            AssignmentStrategy::RoundRobin => ROUND_ROBIN_PROTOCOL,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            ROUND_ROBIN_PROTOCOL => Some(AssignmentStrategy::RoundRobin),
            _ => None,
        }
    }

    /// Assign every partition of `topic_partitions` to exactly one member.
    ///
    /// Every member appears in the result, possibly with nothing assigned.
    /// The result depends only on member order and the topic map.
    pub fn assign(
        self,
        members: &[String],
        topic_partitions: &BTreeMap<String, Vec<i32>>,
    ) -> BTreeMap<String, Vec<TopicPartition>> {
        match self {
            AssignmentStrategy::RoundRobin => round_robin_assign(members, topic_partitions),
        }
    }
}

fn round_robin_assign(
    members: &[String],
    topic_partitions: &BTreeMap<String, Vec<i32>>,
) -> BTreeMap<String, Vec<TopicPartition>> {
    let mut assignments: BTreeMap<String, Vec<TopicPartition>> = members
        .iter()
        .map(|member| (member.clone(), Vec::new()))
        .collect();
    if members.is_empty() {
        return assignments;
    }

    // Topics come out of the map sorted; partitions are sorted per topic
    let pairs = topic_partitions.iter().flat_map(|(topic, partitions)| {
        let mut sorted = partitions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        sorted
            .into_iter()
            .map(move |partition| TopicPartition::new(topic.clone(), partition))
    });

    for (index, pair) in pairs.enumerate() {
        let member = &members[index % members.len()];
        if let Some(assigned) = assignments.get_mut(member) {
            assigned.push(pair);
        }
    }

    assignments
}

/// Group a member's partitions by topic for the SyncGroup payload
pub fn to_member_assignment(partitions: &[TopicPartition]) -> MemberAssignment {
    let mut by_topic: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for tp in partitions {
        by_topic.entry(tp.topic.as_str()).or_default().push(tp.partition);
    }

    MemberAssignment {
        version: 0,
        partition_assignments: by_topic
            .into_iter()
            .map(|(topic, partitions)| TopicAssignment {
                topic: topic.to_string(),
                partitions,
            })
            .collect(),
        user_data: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn members(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("consumer{i}")).collect()
    }

    #[test]
    fn test_round_robin_assignment() {
        let topics = BTreeMap::from([("topic1".to_string(), vec![0, 1, 2, 3, 4])]);
        let assignments = AssignmentStrategy::RoundRobin.assign(&members(3), &topics);

        assert_eq!(assignments.len(), 3);
        assert_eq!(assignments["consumer1"].len(), 2);
        assert_eq!(assignments["consumer2"].len(), 2);
        assert_eq!(assignments["consumer3"].len(), 1);
        assert_eq!(
            assignments["consumer1"],
            vec![TopicPartition::new("topic1", 0), TopicPartition::new("topic1", 3)]
        );
    }

    #[test]
    fn test_pairs_ordered_by_topic_then_partition() {
        let topics = BTreeMap::from([
            ("b".to_string(), vec![1, 0]),
            ("a".to_string(), vec![0]),
        ]);
        let assignments = AssignmentStrategy::RoundRobin.assign(&members(2), &topics);

        // Flattened order: a/0, b/0, b/1
        assert_eq!(
            assignments["consumer1"],
            vec![TopicPartition::new("a", 0), TopicPartition::new("b", 1)]
        );
        assert_eq!(assignments["consumer2"], vec![TopicPartition::new("b", 0)]);
    }

    #[test]
    fn test_more_members_than_partitions() {
        let topics = BTreeMap::from([("t".to_string(), vec![0])]);
        let assignments = AssignmentStrategy::RoundRobin.assign(&members(3), &topics);
        assert_eq!(assignments["consumer1"].len(), 1);
        assert!(assignments["consumer2"].is_empty());
        assert!(assignments["consumer3"].is_empty());
    }

    #[test]
    fn test_no_members() {
        let topics = BTreeMap::from([("t".to_string(), vec![0, 1])]);
        assert!(AssignmentStrategy::RoundRobin.assign(&[], &topics).is_empty());
    }

    #[test]
    fn test_member_assignment_groups_topics() {
        let assignment = to_member_assignment(&[
            TopicPartition::new("b", 2),
            TopicPartition::new("a", 0),
            TopicPartition::new("b", 5),
        ]);
        assert_eq!(assignment.partition_assignments.len(), 2);
        assert_eq!(assignment.partition_assignments[0].topic, "a");
        assert_eq!(assignment.partition_assignments[1].partitions, vec![2, 5]);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(AssignmentStrategy::RoundRobin.name(), "roundrobin");
        assert_eq!(
            AssignmentStrategy::from_name("roundrobin"),
            Some(AssignmentStrategy::RoundRobin)
        );
        assert_eq!(AssignmentStrategy::from_name("sticky"), None);
    }

    fn topic_map() -> impl Strategy<Value = BTreeMap<String, Vec<i32>>> {
        proptest::collection::btree_map("[a-e]{1,3}", 0usize..12, 0..5)
            .prop_map(|m| m.into_iter().map(|(t, n)| (t, (0..n as i32).collect())).collect())
    }

    proptest! {
        #[test]
        fn prop_round_robin_covers_each_partition_once(member_count in 1usize..8, topics in topic_map()) {
            let members = members(member_count);
            let assignments = AssignmentStrategy::RoundRobin.assign(&members, &topics);

            let expected: HashSet<TopicPartition> = topics
                .iter()
                .flat_map(|(t, ps)| ps.iter().map(move |p| TopicPartition::new(t.clone(), *p)))
                .collect();

            let mut seen = HashSet::new();
            for assigned in assignments.values() {
                for tp in assigned {
                    prop_assert!(seen.insert(tp.clone()), "{} assigned twice", tp);
                }
            }
            prop_assert_eq!(seen, expected);

            let counts: Vec<usize> = assignments.values().map(Vec::len).collect();
            let max = counts.iter().copied().max().unwrap_or(0);
            let min = counts.iter().copied().min().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }

        #[test]
        fn prop_round_robin_is_deterministic(member_count in 1usize..6, topics in topic_map()) {
            let members = members(member_count);
            prop_assert_eq!(
                AssignmentStrategy::RoundRobin.assign(&members, &topics),
                AssignmentStrategy::RoundRobin.assign(&members, &topics)
            );
        }
    }
}
