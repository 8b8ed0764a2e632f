//! Broker port and an in-process partitioned implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{BrokerError, Result};

/// Number of partitions created for a topic on first use.
pub const DEFAULT_PARTITIONS: usize = 3;

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: String,
    pub headers: BTreeMap<String, String>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

/// A message as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: String,
    pub headers: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// One partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub partition: i32,
    /// Offset the next published message will get.
    pub end_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub name: String,
    pub partitions: usize,
    pub partition_infos: Vec<PartitionInfo>,
}

/// Position of a consumer group on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOffset {
    pub topic: String,
    pub partition: i32,
    /// Next offset delivered after a restart.
    pub committed_offset: i64,
    pub end_offset: i64,
    /// Messages not yet committed.
    pub lag: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroupInfo {
    pub group_id: String,
    /// Sorted by topic, then partition.
    pub offsets: Vec<GroupOffset>,
}

/// At-least-once, partitioned message broker.
///
/// Messages with the same key always land on the same partition and are
/// delivered to a consumer group in publish order. A group only advances
/// past a message once it is committed.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata>;

    /// Fetches up to `max` messages of `topic` not yet fetched by `group`.
    async fn poll(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Message>>;

    /// Marks `message` and everything before it on its partition as consumed
    /// by `group`.
    async fn commit(&self, group: &str, message: &Message) -> Result<()>;

    /// Moves the fetch position of `group` on `topic` back to its last
    /// commit. Client-side; succeeds while the broker is unreachable.
    async fn seek_to_committed(&self, group: &str, topic: &str) -> Result<()>;

    /// Names of every topic, sorted.
    async fn list_topics(&self) -> Result<Vec<String>>;

    async fn describe_topic(&self, topic: &str) -> Result<Option<TopicInfo>>;

    /// Ids of every group that has polled or committed, sorted.
    async fn list_consumer_groups(&self) -> Result<Vec<String>>;

    async fn describe_consumer_group(&self, group: &str) -> Result<Option<ConsumerGroupInfo>>;
}

#[derive(Debug, Default)]
struct GroupOffsets {
    /// Next offset to fetch, per partition.
    fetched: Vec<i64>,
    /// Next offset to deliver after a restart, per partition.
    committed: Vec<i64>,
}

impl GroupOffsets {
    fn for_partitions(partitions: usize) -> Self {
        Self {
            fetched: vec![0; partitions],
            committed: vec![0; partitions],
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Message>>>,
    groups: HashMap<(String, String), GroupOffsets>,
}

impl BrokerState {
    fn partitions_mut(&mut self, topic: &str, count: usize) -> &mut Vec<Vec<Message>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count])
    }
}

/// In-process broker with a fixed partition count per topic.
///
/// Supports simulated outages ([`InMemoryBroker::set_available`]) and
/// consumer restarts ([`InMemoryBroker::rewind`]).
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    partitions: usize,
    available: Arc<AtomicBool>,
    round_robin: Arc<AtomicUsize>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    /// Creates a broker whose topics have `partitions` partitions each.
    pub fn new(partitions: usize) -> Self {
        Self {
            state: Arc::default(),
            partitions: partitions.max(1),
            available: Arc::new(AtomicBool::new(true)),
            round_robin: Arc::default(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Switches the broker on or off. While off every call fails with
    /// [`BrokerError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Moves every fetch position of `group` back to its last commit, so
    /// uncommitted messages are delivered again.
    pub async fn rewind(&self, group: &str) {
        let mut state = self.state.write().await;
        for ((g, _), offsets) in state.groups.iter_mut() {
            if g == group {
                offsets.fetched.clone_from(&offsets.committed);
            }
        }
    }

    /// Every message published to `topic`, partition by partition.
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Stable partition for a key.
    pub fn partition_for(&self, key: &str) -> usize {
        (fnv1a(key.as_bytes()) % self.partitions as u64) as usize
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("broker is offline".to_string()))
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata> {
        self.ensure_available()?;

        let partition = match &record.key {
            Some(key) => self.partition_for(key),
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partitions,
        };

        let mut state = self.state.write().await;
        let log = &mut state.partitions_mut(&record.topic, self.partitions)[partition];
        let offset = log.len() as i64;
        let partition = partition as i32;
        log.push(Message {
            topic: record.topic,
            partition,
            offset,
            key: record.key,
            value: record.value,
            headers: record.headers,
            timestamp: Utc::now(),
        });

        Ok(RecordMetadata { partition, offset })
    }

    async fn poll(&self, group: &str, topic: &str, max: usize) -> Result<Vec<Message>> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let partitions = self.partitions;
        let BrokerState { topics, groups } = &mut *state;

        let Some(logs) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        let offsets = groups
            .entry((group.to_string(), topic.to_string()))
            .or_insert_with(|| GroupOffsets::for_partitions(partitions));

        let mut batch = Vec::new();
        for (partition, log) in logs.iter().enumerate() {
            let start = offsets.fetched[partition] as usize;
            let take = max.saturating_sub(batch.len());
            let fetched: Vec<Message> = log.iter().skip(start).take(take).cloned().collect();
            offsets.fetched[partition] += fetched.len() as i64;
            batch.extend(fetched);
        }

        Ok(batch)
    }

    async fn commit(&self, group: &str, message: &Message) -> Result<()> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let partitions = self.partitions;
        let index = usize::try_from(message.partition)
            .ok()
            .filter(|p| *p < partitions)
            .ok_or_else(|| BrokerError::UnknownPartition {
                topic: message.topic.clone(),
                partition: message.partition,
            })?;

        let offsets = state
            .groups
            .entry((group.to_string(), message.topic.clone()))
            .or_insert_with(|| GroupOffsets::for_partitions(partitions));
        let next = message.offset + 1;
        if offsets.committed[index] < next {
            offsets.committed[index] = next;
        }
        if offsets.fetched[index] < next {
            offsets.fetched[index] = next;
        }
        Ok(())
    }

    async fn seek_to_committed(&self, group: &str, topic: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(offsets) = state
            .groups
            .get_mut(&(group.to_string(), topic.to_string()))
        {
            offsets.fetched.clone_from(&offsets.committed);
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut topics: Vec<String> = state.topics.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn describe_topic(&self, topic: &str) -> Result<Option<TopicInfo>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state.topics.get(topic).map(|logs| TopicInfo {
            name: topic.to_string(),
            partitions: logs.len(),
            partition_infos: logs
                .iter()
                .enumerate()
                .map(|(partition, log)| PartitionInfo {
                    partition: partition as i32,
                    end_offset: log.len() as i64,
                })
                .collect(),
        }))
    }

    async fn list_consumer_groups(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut groups: Vec<String> = state.groups.keys().map(|(g, _)| g.clone()).collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn describe_consumer_group(&self, group: &str) -> Result<Option<ConsumerGroupInfo>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let mut offsets = Vec::new();
        for ((g, topic), positions) in &state.groups {
            if g != group {
                continue;
            }
            let logs = state.topics.get(topic);
            for (partition, committed) in positions.committed.iter().enumerate() {
                let end = logs
                    .and_then(|logs| logs.get(partition))
                    .map_or(0, |log| log.len() as i64);
                offsets.push(GroupOffset {
                    topic: topic.clone(),
                    partition: partition as i32,
                    committed_offset: *committed,
                    end_offset: end,
                    lag: (end - committed).max(0),
                });
            }
        }
        if offsets.is_empty() {
            return Ok(None);
        }
        offsets.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        Ok(Some(ConsumerGroupInfo {
            group_id: group.to_string(),
            offsets,
        }))
    }
}
