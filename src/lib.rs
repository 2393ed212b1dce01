//! # persist-dict
//!
//! Persistent, process-shareable string mappings with two interchangeable backends:
//!
//! - **File backend**: one file per key in a directory, writers serialized by
//!   per-key advisory lock files
//! - **SQL backend**: one row per key in an `SQLite` table, writes wrapped in
//!   transactions
//!
//! Both implement [`MappingStore`], so callers pick a backend at construction
//! time and never again.
//!
//! ```no_run
//! use persist_dict::{FileBackend, MappingStore};
//!
//! # async fn demo() -> persist_dict::error::StorageResult<()> {
//! let store = FileBackend::open("./dict")?;
//! store.set("greeting", "hello").await?;
//! assert_eq!(store.get("greeting").await?, "hello");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod storage;
pub mod telemetry;

pub use error::{StorageError, StorageResult};
pub use storage::{FileBackend, Keys, MappingStore, SqlBackend, open_store};
