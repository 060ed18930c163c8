//! Data transfer objects (DTOs) for API responses and session events.
//!
//! These structs are serialized to JSON for frontend consumption.
//! - `revision`: Revision, FileChange, RevisionSlot for log rows
//! - `blame`: BlameRecord, BlameQuery, BlameEvent for per-line attribution
//! - `events`: RevisionCountEvent, SearchEvent pushed to log subscribers
//! - `repository`: RepositoryInfo, RefMap, LogQuery

pub mod blame;
pub mod events;
pub mod repository;
pub mod revision;

pub use blame::*;
pub use events::*;
pub use repository::*;
pub use revision::*;
