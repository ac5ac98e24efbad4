//! skiff-server: distribution server
//!
//! Serves versioned file sets to fleet clients: file bytes by content
//! hash over HTTP, set listings and reload over HTTP, and the
//! bidirectional report/notification stream over TCP.

pub mod config;
pub mod files;
pub mod http;
pub mod notify;
pub mod rpc;

pub use config::Config;
pub use files::FileSetService;
pub use notify::NotifyRegistry;
