pub mod batch;
pub mod blame;
pub mod blame_session;
pub mod cache;
pub mod prefetch;
pub mod process;
pub mod registry;
pub mod repository;
pub mod revision_list;
pub mod search;
pub mod sequence;
pub mod session;
pub mod show;

#[cfg(test)]
pub(crate) mod testing;

pub use blame_session::BlameSession;
pub use cache::CacheRegistry;
pub use process::GitCli;
pub use registry::{SessionRegistry, SubscriberGuard};
pub use repository::{GitRepository, SharedRepo};
pub use session::LogSession;
