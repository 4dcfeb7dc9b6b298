//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use strata_core::prelude::*;
//! ```

// Core types
pub use crate::types::{Block, BlockEvent, BlockNum, Cursor, ForkStep};
pub use crate::block::{is_boundary, next_boundary, previous_boundary, BlockRange, Segmenter};

// Error handling
pub use crate::error::{ErrorKind, Result, ResultExt, StrataError};

// Storage
pub use crate::storage::{retry, LocalStore, MemoryStore, MeteredStore, ObjectStore, RetryConfig};

// Stores
pub use crate::store::{
    BaseStore, FileInfo, FullKv, KvStore, PartialKv, StoreConfig, StoreHandle, StoreLimits,
    StoreMap, StoreWriter, UpdatePolicy, ValueType,
};

// Caches
pub use crate::execout::{
    ExecOutputBuffer, ExecOutputConfig, ExecOutputFile, ExecOutputWriter, FileWalker,
};
pub use crate::index::{BlockIndex, Expression, IndexFile, IndexWriter};

// Messages
pub use crate::pb::{Clock, StoreDelta};

pub use std::sync::Arc;
