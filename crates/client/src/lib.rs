//! skiff-client: fleet sync client
//!
//! Mirrors the file sets of its subscribed groups from the
//! distribution server onto local disk. Files are fetched by content
//! hash over HTTP and verified before they replace anything. A
//! long-lived TCP stream carries periodic status reports up and version
//! change notifications down; a jittered polling loop backstops the
//! stream.

pub mod config;
pub mod events;
pub mod interval;
pub mod sync;

pub use config::Config;
pub use sync::FileSync;
