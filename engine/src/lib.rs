//! # rtdb Engine
//!
//! Protocol and query core shared by the rtdb client and server.
//!
//! Two replicas of a collection (a client-resident local store and a
//! server-resident document store) talk JSON-RPC 2.0 over one persistent
//! socket. This crate holds everything both sides agree on; it never opens
//! a socket itself.
//!
//! ## Core Concepts
//!
//! ### RPC
//!
//! An [`RpcPeer`] correlates outbound calls with their responses and
//! dispatches inbound calls to a [`Handlers`] table and notifications to a
//! [`Listeners`] registry. Every method is a variant of [`Method`].
//!
//! ### Replication events
//!
//! A write to a collection is a [`ReplicationEvent`]: a [`RecordChange`]
//! plus its [`EventKind`] and [`Origin`]. Only local events are sent out;
//! events decoded from the wire are always remote, which is what stops a
//! change from echoing back and forth.
//!
//! ### Queries
//!
//! A [`Query`] carries a [`Filter`] and a [`SortExpression`]. Both compile
//! two ways:
//! - in process, to a [`Predicate`] and stable sort passes over records
//! - natively, to a document query object ([`to_document_query`],
//!   [`to_document_sort`])
//!
//! ## Quick Start
//!
//! ```rust
//! use rtdb_engine::{Comparator, FilterTerm, Query, SortNode};
//! use serde_json::json;
//!
//! let query = Query::new("app", "users")
//!     .with_filter(FilterTerm::new("age", Comparator::Ge, 18))
//!     .with_sort(SortNode::asc("name"));
//!
//! let rows = query
//!     .apply(vec![
//!         json!({"name": "zoe", "age": 40}),
//!         json!({"name": "tim", "age": 9}),
//!         json!({"name": "ada", "age": 36}),
//!     ])
//!     .unwrap();
//! assert_eq!(rows[0]["name"], "ada");
//! assert_eq!(rows.len(), 2);
//!
//! let native = query.to_find_options().unwrap();
//! assert_eq!(native.query, json!({"age": {"$gte": 18}}));
//! ```

pub mod dialect;
pub mod error;
pub mod event;
pub mod filter;
pub mod key;
pub mod memory;
pub mod query;
pub mod rpc;
pub mod schema;
pub mod sort;
pub mod store;
pub mod value;

// Re-export main types at crate root
pub use dialect::{
    apply_document_sort, key_query, matches_document_query, to_document_query, to_document_sort,
};
pub use error::{Error, Result};
pub use event::{EventKind, Origin, RecordChange, ReplicationEvent};
pub use filter::{Comparator, Composition, Filter, FilterExpression, FilterNode, FilterTerm, Predicate};
pub use key::{Key, KeyPath, KeyRange};
pub use memory::{MemoryCollection, MemoryStoreFactory};
pub use query::{FindOptions, Query};
pub use rpc::{
    FrameSink, Handlers, Inbound, Listeners, Message, Method, RequestId, RpcConfig, RpcError,
    RpcPeer,
};
pub use schema::{CollectionSchema, DbSchema, IndexSchema, DEFAULT_KEY_PATH};
pub use sort::{SortExpression, SortNode};
pub use store::{LocalStore, LocalStoreFactory};

/// Type aliases for clarity
pub type DbName = String;
pub type CollectionName = String;
