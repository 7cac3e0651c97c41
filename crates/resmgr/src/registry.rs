use std::collections::HashMap;

use chrono::{DateTime, Utc};
use models::ResourceType;

/// Binds an event id to the resource allocated for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_id: String,
    pub resource_id: String,
    pub cloud_account: String,
    pub pool_name: String,
    pub resource_type: ResourceType,
    pub allocated_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        event_id: impl Into<String>,
        resource_id: impl Into<String>,
        cloud_account: impl Into<String>,
        pool_name: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            resource_id: resource_id.into(),
            cloud_account: cloud_account.into(),
            pool_name: pool_name.into(),
            resource_type,
            allocated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventRegistry {
    records: HashMap<String, EventRecord>,
}

impl EventRegistry {
    pub fn get(&self, event_id: &str) -> Option<&EventRecord> {
        self.records.get(event_id)
    }

    /// Hands back the record already bound to the event id, if there is one, and leaves it in
    /// place.
    pub fn insert(&mut self, record: EventRecord) -> Result<(), EventRecord> {
        if let Some(existing) = self.records.get(&record.event_id) {
            return Err(existing.clone());
        }
        self.records.insert(record.event_id.clone(), record);
        Ok(())
    }

    pub fn remove(&mut self, event_id: &str) -> Option<EventRecord> {
        self.records.remove(event_id)
    }

    /// Puts back a record taken out by [`EventRegistry::remove`].
    pub fn restore(&mut self, record: EventRecord) {
        self.records.insert(record.event_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_binds_once() {
        let mut registry = EventRegistry::default();
        let first = EventRecord::new("e1", "vdu-1", "acct1", "pool", ResourceType::Compute);
        let second = EventRecord::new("e1", "vdu-2", "acct1", "pool", ResourceType::Compute);

        assert!(registry.insert(first).is_ok());
        let existing = registry.insert(second).unwrap_err();
        assert_eq!(existing.resource_id, "vdu-1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_and_restore() {
        let mut registry = EventRegistry::default();
        registry
            .insert(EventRecord::new("e1", "vl-1", "acct1", "links", ResourceType::Network))
            .unwrap();

        let record = registry.remove("e1").unwrap();
        assert!(registry.is_empty());
        registry.restore(record);
        assert_eq!(registry.get("e1").map(|r| r.pool_name.as_str()), Some("links"));
    }
}
