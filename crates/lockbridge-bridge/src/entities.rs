//! Topics and discovery entities of variable-length device lists.
//!
//! Entry `n` of a list lives on `<base><list suffix>/<n>`, e.g.
//! `lockbridge/lock/keypad/codes/3`, with a discovery registration next to
//! it. When a list shrinks, the data topics and registrations past its new
//! end are cleared with retained empty payloads, so the hub never keeps
//! orphaned entities.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use lockbridge_core::{DynamicEntry, DynamicList, TopicPath};
use lockbridge_network::BrokerClient;
use tracing::{debug, info};

use crate::Result;
use crate::discovery::DiscoveryContext;

/// What one list update published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListChange {
    pub previous_len: usize,
    pub len: usize,
    /// Entries (re)published.
    pub updated: usize,
    /// Indices seen for the first time and registered.
    pub announced: usize,
    /// Indices cleared because the list shrank.
    pub removed: usize,
}

impl ListChange {
    pub fn len_changed(&self) -> bool {
        self.previous_len != self.len
    }
}

#[derive(Debug, Default)]
struct ListState {
    published: usize,
    announced: BTreeSet<usize>,
}

/// Publishes dynamic lists and keeps their discovery entities in step.
#[derive(Debug)]
pub struct EntityLifecycleManager {
    base: TopicPath,
    discovery: Option<DiscoveryContext>,
    lists: HashMap<DynamicList, ListState>,
}

impl EntityLifecycleManager {
    /// Without a discovery context only the data topics are managed.
    pub fn new(base: TopicPath, discovery: Option<DiscoveryContext>) -> Self {
        Self {
            base,
            discovery,
            lists: HashMap::new(),
        }
    }

    /// Number of entries of `list` currently published.
    pub fn published(&self, list: DynamicList) -> usize {
        self.lists.get(&list).map_or(0, |state| state.published)
    }

    /// Seed the published length, e.g. from the count stored before a
    /// restart, so that entries left over from then are removed too.
    pub fn restore(&mut self, list: DynamicList, published: usize) {
        let state = self.lists.entry(list).or_default();
        state.published = state.published.max(published);
    }

    /// Publish the fixed entities of the device.
    ///
    /// Returns the number of registrations published.
    pub async fn announce_device<B: BrokerClient>(&self, broker: &B) -> Result<usize> {
        let Some(discovery) = &self.discovery else {
            return Ok(0);
        };
        let registrations = discovery.device_entities()?;
        for registration in &registrations {
            broker
                .publish_retained(&registration.topic, registration.payload()?)
                .await?;
        }
        info!(
            "Announced {} entities for {}",
            registrations.len(),
            discovery.uid()
        );
        Ok(registrations.len())
    }

    /// Publish `entries` as the new content of their list.
    ///
    /// Every entry is republished. An index seen for the first time is also
    /// registered. Indices between the new and the previous length are
    /// cleared, data topic and registration alike.
    ///
    /// If a publish fails the previous length is kept, so the next update
    /// clears the same indices again.
    pub async fn sync_list<B, E>(&mut self, broker: &B, entries: &[E]) -> Result<ListChange>
    where
        B: BrokerClient,
        E: DynamicEntry,
    {
        let list = E::LIST;
        let discovery = self.discovery.as_ref();
        let state = self.lists.entry(list).or_default();
        let mut change = ListChange {
            previous_len: state.published,
            len: entries.len(),
            ..ListChange::default()
        };

        for (index, entry) in entries.iter().enumerate() {
            let topic = self.base.indexed(list.topic_suffix(), index)?;
            broker
                .publish_retained(&topic, serde_json::to_vec(entry)?)
                .await?;
            change.updated += 1;

            if let Some(discovery) = discovery
                && !state.announced.contains(&index)
            {
                let registration = discovery.entry(list, index, entry.display_name())?;
                broker
                    .publish_retained(&registration.topic, registration.payload()?)
                    .await?;
                state.announced.insert(index);
                change.announced += 1;
            }
        }

        for index in entries.len()..state.published {
            let topic = self.base.indexed(list.topic_suffix(), index)?;
            broker.publish_retained(&topic, Bytes::new()).await?;
            if let Some(discovery) = discovery {
                broker
                    .publish_retained(&discovery.entry_topic(list, index)?, Bytes::new())
                    .await?;
            }
            state.announced.remove(&index);
            change.removed += 1;
            info!("Removed {} entry {}", list, index);
        }

        state.published = entries.len();
        debug!(
            "{} list: {} entries, {} announced, {} removed",
            list, change.len, change.announced, change.removed
        );
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_core::{DeviceKind, KeypadCode, TimeControlEntry};
    use lockbridge_hardware::types::DeviceInfo;
    use lockbridge_network::mock::MockBroker;

    const DATA: &str = "lockbridge/lock/keypad/codes";
    const DISCOVERY: &str = "homeassistant/sensor/3f2a91";

    fn manager(with_discovery: bool) -> EntityLifecycleManager {
        let base = TopicPath::new("lockbridge/lock").unwrap();
        let discovery = with_discovery.then(|| {
            DiscoveryContext::new(
                TopicPath::new("homeassistant").unwrap(),
                base.clone(),
                "3f2a91",
                DeviceKind::Lock,
                &DeviceInfo::new("Front door", "Smart Lock 3.0"),
            )
        });
        EntityLifecycleManager::new(base, discovery)
    }

    fn codes(count: u32) -> Vec<KeypadCode> {
        (0..count)
            .map(|id| KeypadCode {
                code_id: id + 1,
                name: format!("user{id}"),
                enabled: true,
                created: None,
                lock_count: 0,
                time_limited: false,
            })
            .collect()
    }

    fn data_topic(index: usize) -> String {
        format!("{DATA}/{index}")
    }

    fn discovery_topic(index: usize) -> String {
        format!("{DISCOVERY}/keypad_{index}/config")
    }

    #[tokio::test]
    async fn test_shrink_removes_only_tail() {
        let broker = MockBroker::new();
        let mut entities = manager(true);
        entities.sync_list(&broker, &codes(5)).await.unwrap();
        broker.clear();

        let change = entities.sync_list(&broker, &codes(2)).await.unwrap();

        assert_eq!(change.updated, 2);
        assert_eq!(change.removed, 3);
        assert_eq!(change.announced, 0);
        assert!(change.len_changed());
        for index in 0..2 {
            let publications = broker.publications_to(&data_topic(index));
            assert_eq!(publications.len(), 1);
            assert!(!publications[0].payload.is_empty());
            assert!(broker.publications_to(&discovery_topic(index)).is_empty());
        }
        for index in 2..5 {
            let data = broker.publications_to(&data_topic(index));
            let registration = broker.publications_to(&discovery_topic(index));
            assert_eq!(data.len(), 1);
            assert_eq!(registration.len(), 1);
            assert!(data[0].payload.is_empty() && data[0].retain);
            assert!(registration[0].payload.is_empty() && registration[0].retain);
        }
        assert!(broker.publications_to(&data_topic(5)).is_empty());
    }

    #[tokio::test]
    async fn test_first_sight_registers_once() {
        let broker = MockBroker::new();
        let mut entities = manager(true);

        let first = entities.sync_list(&broker, &codes(2)).await.unwrap();
        let second = entities.sync_list(&broker, &codes(3)).await.unwrap();

        assert_eq!(first.announced, 2);
        assert_eq!(second.announced, 1);
        assert_eq!(broker.publications_to(&discovery_topic(0)).len(), 1);
        assert_eq!(broker.publications_to(&data_topic(0)).len(), 2);
        assert!(broker.retained(&discovery_topic(2)).is_some());
    }

    #[tokio::test]
    async fn test_regrown_index_is_registered_again() {
        let broker = MockBroker::new();
        let mut entities = manager(true);
        entities.sync_list(&broker, &codes(2)).await.unwrap();
        entities.sync_list(&broker, &codes(1)).await.unwrap();
        assert!(broker.retained(&discovery_topic(1)).is_none());

        let change = entities.sync_list(&broker, &codes(2)).await.unwrap();

        assert_eq!(change.announced, 1);
        assert!(broker.retained(&discovery_topic(1)).is_some());
    }

    #[tokio::test]
    async fn test_restored_length_clears_entries_from_before_restart() {
        let broker = MockBroker::new();
        let mut entities = manager(true);
        entities.restore(DynamicList::KeypadCodes, 4);

        let change = entities.sync_list(&broker, &codes(1)).await.unwrap();

        assert_eq!(change.previous_len, 4);
        assert_eq!(change.removed, 3);
        assert_eq!(entities.published(DynamicList::KeypadCodes), 1);
        assert_eq!(broker.publications_to(&discovery_topic(3)).len(), 1);
    }

    #[tokio::test]
    async fn test_lists_are_independent() {
        let broker = MockBroker::new();
        let mut entities = manager(false);
        entities.sync_list(&broker, &codes(3)).await.unwrap();

        let entries: Vec<TimeControlEntry> = Vec::new();
        let change = entities.sync_list(&broker, &entries).await.unwrap();

        assert_eq!(change, ListChange::default());
        assert_eq!(entities.published(DynamicList::KeypadCodes), 3);
        assert!(broker.publications().iter().all(|p| p.topic.starts_with(DATA)));
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_previous_length() {
        let broker = MockBroker::new();
        let mut entities = manager(false);
        entities.sync_list(&broker, &codes(3)).await.unwrap();

        broker.set_connected(false);
        assert!(entities.sync_list(&broker, &codes(0)).await.is_err());
        assert_eq!(entities.published(DynamicList::KeypadCodes), 3);

        broker.set_connected(true);
        let change = entities.sync_list(&broker, &codes(0)).await.unwrap();
        assert_eq!(change.removed, 3);
    }

    #[tokio::test]
    async fn test_announce_device_without_discovery() {
        let broker = MockBroker::new();
        assert_eq!(manager(false).announce_device(&broker).await.unwrap(), 0);
        assert_eq!(manager(true).announce_device(&broker).await.unwrap(), 2);
        assert!(broker.retained("homeassistant/lock/3f2a91/lock/config").is_some());
    }
}
