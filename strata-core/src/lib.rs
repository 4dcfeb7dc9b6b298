//! Strata Core Library
//!
//! This crate provides the storage-facing half of the strata block-stream
//! executor: block types, segment math, the object-store abstraction, the
//! store engine and the per-segment caches of module outputs and index keys.
//!
//! # Overview
//!
//! Every artifact is addressed by a module hash and a segment of the chain.
//! Stores are snapshotted as full KV files (from the module initial block) or
//! partial files (one segment), outputs are cached per block id, and block
//! index modules leave one bitmap per key.
//!
//! # Key Components
//!
//! - **Block**: Block ranges, segment boundaries and the [`Segmenter`]
//! - **Storage**: The [`ObjectStore`] trait with memory, local and metered stores
//! - **Store**: Policy-gated key/value stores, their merge and their blobs
//! - **Execout**: Exec-output files, the rotating writer and the file walker
//! - **Index**: Block index files and block filter queries
//!
//! # Example
//!
//! ```ignore
//! use strata_core::prelude::*;
//!
//! let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
//! let config = Arc::new(StoreConfig::new(
//!     "store_counts", "abc123", 0, UpdatePolicy::Add, ValueType::BigInt, &base,
//! ));
//! let mut store = config.new_full_kv();
//! store.add_bigint(0, "total", 1.into())?;
//! let (file, writer) = store.save(10);
//! writer.write().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod error;
pub mod execout;
pub mod index;
pub mod pb;
pub mod prelude;
pub mod storage;
pub mod store;
pub mod types;

// Re-export key types at crate root for convenience
pub use block::{BlockRange, Segmenter};
pub use error::{ErrorKind, Result, StrataError};
pub use execout::{ExecOutputBuffer, ExecOutputConfig, ExecOutputFile, ExecOutputWriter};
pub use index::{BlockIndex, IndexFile, IndexWriter};
pub use pb::Clock;
pub use storage::{MemoryStore, ObjectStore};
pub use store::{FullKv, PartialKv, StoreConfig, UpdatePolicy, ValueType};
pub use types::{Block, BlockEvent, BlockNum, Cursor, ForkStep};
