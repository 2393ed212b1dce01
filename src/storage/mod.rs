//! Storage layer module.
//!
//! This module provides the [`MappingStore`] abstraction and its two backends,
//! allowing either to be used without changing call sites.

pub mod factory;
pub mod file;
pub mod sql;
pub mod traits;

pub use factory::open_store;
pub use file::FileBackend;
pub use sql::SqlBackend;
pub use traits::{DynMappingStore, Keys, MappingStore};
