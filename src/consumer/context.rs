//! Subscription state and the rdkafka callbacks that maintain it
//!
//! [`SubscriptionState`] records the requested topics and the partitions
//! currently assigned to this consumer. [`BridgeConsumerContext`] receives
//! rebalance, error and log callbacks from librdkafka's background thread and
//! applies them to the shared state.

use parking_lot::Mutex;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, TopicPartitionList};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Requested topics plus the partitions currently assigned
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    topics: Vec<String>,
    assigned: BTreeSet<(String, i32)>,
    rebalance_count: u64,
}

impl SubscriptionState {
    /// Creates state for the given topic set with nothing assigned yet.
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            ..Default::default()
        }
    }

    /// Handles a partition assignment.
    ///
    /// Adds to the current set, which covers both eager (full) and
    /// cooperative (incremental) assignments.
    pub fn on_assign(&mut self, partitions: &[(String, i32)]) {
        self.assigned.extend(partitions.iter().cloned());
        self.rebalance_count += 1;
    }

    /// Handles a partition revocation.
    pub fn on_revoke(&mut self, partitions: &[(String, i32)]) {
        for partition in partitions {
            self.assigned.remove(partition);
        }
        self.rebalance_count += 1;
    }

    /// Drops every assignment, used when the client is released.
    pub fn clear(&mut self) {
        self.assigned.clear();
    }

    /// Topics requested at subscribe time.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Currently assigned partitions in (topic, partition) order.
    pub fn assigned_partitions(&self) -> Vec<(String, i32)> {
        self.assigned.iter().cloned().collect()
    }

    /// Whether the partition is currently assigned to this consumer.
    pub fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assigned.contains(&(topic.to_string(), partition))
    }

    /// Number of assignment and revocation events applied.
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count
    }
}

/// rdkafka context for the bridge's consumer
pub struct BridgeConsumerContext {
    state: Arc<Mutex<SubscriptionState>>,
    member_id: String,
    transport_errors: AtomicU64,
}

impl BridgeConsumerContext {
    /// Creates a context that records into `state`.
    pub fn new(state: Arc<Mutex<SubscriptionState>>, member_id: impl Into<String>) -> Self {
        Self {
            state,
            member_id: member_id.into(),
            transport_errors: AtomicU64::new(0),
        }
    }

    /// Number of client-level errors reported so far.
    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    /// Applies a revocation to the shared state.
    pub fn handle_revoke(&self, partitions: &[(String, i32)]) {
        let mut state = self.state.lock();
        state.on_revoke(partitions);
        info!(
            member_id = %self.member_id,
            revoked = ?partitions,
            remaining = ?state.assigned_partitions(),
            "Partitions revoked"
        );
    }

    /// Applies an assignment to the shared state.
    pub fn handle_assign(&self, partitions: &[(String, i32)]) {
        let mut state = self.state.lock();
        state.on_assign(partitions);
        info!(
            member_id = %self.member_id,
            partitions = ?state.assigned_partitions(),
            "Partitions assigned"
        );
    }
}

fn partition_pairs(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

impl ClientContext for BridgeConsumerContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(target: "librdkafka", facility = fac, "{}", log_message),
            RDKafkaLogLevel::Warning => warn!(target: "librdkafka", facility = fac, "{}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(target: "librdkafka", facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Debug => debug!(target: "librdkafka", facility = fac, "{}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, reason, "Kafka client error");
    }
}

impl ConsumerContext for BridgeConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => self.handle_revoke(&partition_pairs(tpl)),
            Rebalance::Assign(tpl) => {
                trace!(count = tpl.count(), "Partition assignment pending");
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "Kafka rebalance error");
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            self.handle_assign(&partition_pairs(tpl));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => trace!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}
