//! # OMCI Core
//!
//! Entity database for the OMCI synchronization engine.
//!
//! This crate provides:
//! - A per-device hierarchical store of managed-entity classes, instances
//!   and attributes ([`EntityDatabase`])
//! - Pluggable persistence: volatile, write-through key-value, and lazy
//!   write-behind ([`Persistence`])
//! - The managed-entity capability catalog used to validate notifications
//! - MIB templates used to seed a device without a full upload
//!
//! ## Layout
//!
//! ```text
//! device
//! ├── header (created, modified, last sync, MIB data sync, alarm sequence)
//! └── classes
//!     └── class_id
//!         └── instances
//!             └── instance_id -> { created, modified, attributes }
//! ```
//!
//! Attribute values are stored as the strings an [`AttributeCodec`]
//! produces and decoded on the way out.
//!
//! ## Key Invariants
//!
//! - An instance exists in the database iff the modeled ME exists
//! - Deleting the last instance of a class deletes the class
//! - `set` reports whether anything actually changed
//! - A MIB reset clears the tree but keeps device bookkeeping
//!
//! [`AttributeCodec`]: omci_codec::AttributeCodec

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod database;
mod error;
mod persistence;
mod query;
mod record;
mod stats;
mod template;
mod types;

pub use catalog::{class_ids, ClassCapabilities, MeCatalog, MessageType};
pub use config::{DatabaseConfig, PersistenceMode};
pub use database::{DatabaseKind, EntityDatabase};
pub use error::{DatabaseError, DatabaseResult};
pub use persistence::{
    FlushOutcome, KvPersistence, LazyMetadata, LazyPersistence, Persistence, VolatilePersistence,
};
pub use query::{ClassView, DeviceView, InstanceView, QueryResult};
pub use record::{ClassRecord, DeviceHeader, DeviceRecord, InstanceRecord, RECORD_VERSION};
pub use stats::{DatabaseStatistics, OperationStats};
pub use template::{MibTemplate, TemplateKey, TemplateStore};
pub use types::{next_sequence, now_millis, validate_class_id, validate_instance_id, Timestamp};
