//! File registry and content service.
//!
//! Tracks conversation files under a single storage root, keeps a SQLite
//! catalogue of them in step with the disk, and validates JSON documents
//! against the conversation tree and draft shapes.

pub mod atomic;
pub mod index;
pub mod paths;
pub mod schema;
pub mod storage;
pub mod validate;

pub use index::FileRegistry;
pub use paths::PathResolver;
pub use schema::{FileRecord, FileRef, FixMode, StructureStatus};
pub use storage::{FileContent, FileStore};
pub use validate::Verdict;
