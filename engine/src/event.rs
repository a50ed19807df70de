//! Replication events exchanged between replicas.

use crate::error::{Error, Result};
use crate::rpc::Method;
use crate::{CollectionName, DbName, Key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Put,
    Deleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Added, EventKind::Put, EventKind::Deleted];

    /// Notification method carrying this kind of event.
    pub fn method(self) -> Method {
        match self {
            EventKind::Added => Method::RecordAdded,
            EventKind::Put => Method::RecordPut,
            EventKind::Deleted => Method::RecordDeleted,
        }
    }

    pub fn from_method(method: Method) -> Option<EventKind> {
        match method {
            Method::RecordAdded => Some(EventKind::Added),
            Method::RecordPut => Some(EventKind::Put),
            Method::RecordDeleted => Some(EventKind::Deleted),
            _ => None,
        }
    }
}

/// Where a change came from.
///
/// Never serialized: a change decoded from a frame is always remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Made through this replica's own API
    Local,
    /// Received from another replica
    Remote,
}

/// The wire payload of a record notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChange {
    pub db: DbName,
    pub collection: CollectionName,
    /// Record body; absent for deletions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    /// Record key; absent when it is carried by the record itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    pub when: DateTime<Utc>,
}

impl RecordChange {
    pub fn new(db: impl Into<DbName>, collection: impl Into<CollectionName>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            record: None,
            key: None,
            when: Utc::now(),
        }
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }
}

/// A record change together with its kind and origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationEvent {
    pub kind: EventKind,
    pub origin: Origin,
    pub change: RecordChange,
}

impl ReplicationEvent {
    pub fn local(kind: EventKind, change: RecordChange) -> Self {
        Self {
            kind,
            origin: Origin::Local,
            change,
        }
    }

    pub fn remote(kind: EventKind, change: RecordChange) -> Self {
        Self {
            kind,
            origin: Origin::Remote,
            change,
        }
    }

    /// Decode a received notification. The result is always remote.
    pub fn from_params(method: Method, params: &[Value]) -> Result<Self> {
        let kind = EventKind::from_method(method)
            .ok_or_else(|| Error::InvalidParams(format!("{method} is not a record notification")))?;
        let change = params
            .first()
            .ok_or_else(|| Error::InvalidParams(format!("{method} without a change")))?;
        let change: RecordChange = serde_json::from_value(change.clone())
            .map_err(|e| Error::InvalidParams(e.to_string()))?;
        Ok(Self::remote(kind, change))
    }

    /// Encode the change as notification params.
    pub fn to_params(&self) -> Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(&self.change)?])
    }

    pub fn method(&self) -> Method {
        self.kind.method()
    }
}
