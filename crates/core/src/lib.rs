//! skiff-core: Core engine for fleet file distribution
//!
//! Provides content hashing, the persistent hash cache, versioned file
//! sets, the concurrent walk/hash pipeline, definition resolution, and
//! the wire protocol shared by server and client.

pub mod cache;
pub mod definition;
pub mod hash;
pub mod protocol;
pub mod resolver;
pub mod set;
pub mod walk;

pub use cache::HashCache;
pub use definition::Definition;
pub use hash::{ContentHash, Hasher};
pub use protocol::{Message, ProtocolReader, ProtocolWriter};
pub use resolver::{ResolvedSets, resolve};
pub use set::{FileSet, VersionedSet};
pub use walk::hash_tree;
