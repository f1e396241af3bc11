pub mod blob;
pub mod error;
pub mod memory;
pub mod path;
pub mod tree;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::{BlobError, BlobResult, RemoteError, RemoteResult};
pub use memory::MemoryTree;
pub use path::TreePath;
pub use tree::{RemoteTree, Snapshot, TreeSubscription};
