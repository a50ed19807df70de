//! The closed set of methods spoken by rtdb peers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A method name on the wire.
///
/// Registration is keyed by this enum, so a handler or listener can never be
/// bound to a name the protocol does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Client → server call returning every database schema.
    Schema,
    /// Client → server call asking for a filtered snapshot pushed as puts.
    Notify,
    /// Server → client call reading the first record matching a query.
    Get,
    /// Server → client call reading every record matching a query.
    Select,
    /// Notification: a record was added.
    RecordAdded,
    /// Notification: a record was put (inserted or replaced).
    RecordPut,
    /// Notification: a record was deleted.
    RecordDeleted,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Method; 7] = [
        Method::Schema,
        Method::Notify,
        Method::Get,
        Method::Select,
        Method::RecordAdded,
        Method::RecordPut,
        Method::RecordDeleted,
    ];

    /// The wire name of this method.
    pub fn name(self) -> &'static str {
        match self {
            Method::Schema => "RTSDB_GET_SCHEMA",
            Method::Notify => "RTSDB_NOTIFY",
            Method::Get => "RTSDB_GET",
            Method::Select => "RTSDB_SELECT",
            Method::RecordAdded => "DB_RECORD_ADD",
            Method::RecordPut => "DB_RECORD_PUT",
            Method::RecordDeleted => "DB_RECORD_DELETE",
        }
    }

    /// Look up a method by its wire name.
    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Method::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown method: {name}")))
    }
}
