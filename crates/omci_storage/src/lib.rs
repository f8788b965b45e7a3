//! # OMCI Storage
//!
//! Key-value store abstraction used to persist OMCI entity databases.
//!
//! Stores are **opaque byte stores** keyed by `/`-separated string paths.
//! They do not interpret the blobs they hold; the entity database decides
//! what a device or class record looks like on disk.
//!
//! ## Design Principles
//!
//! - Stores offer get / set / delete / list-by-prefix / watch, nothing more
//! - Last writer wins per key; there are no transactions
//! - Must be `Send + Sync` so one store can back many devices
//!
//! ## Available Stores
//!
//! - [`InMemoryKvStore`] - For testing and volatile deployments
//! - [`FileKvStore`] - One file per key inside a locked directory
//!
//! ## Example
//!
//! ```rust
//! use omci_storage::{InMemoryKvStore, KvStore};
//!
//! let store = InMemoryKvStore::new();
//! store.set("omci_mibs/onu-1", b"blob").unwrap();
//! assert_eq!(store.get("omci_mibs/onu-1").unwrap(), Some(b"blob".to_vec()));
//! assert_eq!(store.keys("omci_mibs/").unwrap(), vec!["omci_mibs/onu-1".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod kv;
mod memory;
mod watch;

pub use error::{StorageError, StorageResult};
pub use file::FileKvStore;
pub use kv::{join_key, validate_key, KvStore};
pub use memory::InMemoryKvStore;
pub use watch::{KvEvent, KvEventKind, WatchRegistry};
