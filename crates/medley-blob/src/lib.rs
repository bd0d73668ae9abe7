//! Attachment storage for Medley.
//!
//! Records carry large attachments by reference: the value stored in the
//! view is a [`BlobRef`], the blake3 address of the bytes kept here. Two
//! backends implement [`BlobStore`]:
//!
//! - [`MemoryBlobStore`]: a size-capped map, for tests and ephemeral nodes.
//! - [`FileBlobStore`]: one file per blob under a 2-level fan-out directory.

mod error;
mod file;
mod memory;
mod traits;


pub use error::BlobError;
pub use file::FileBlobStore;
pub use medley_types::BlobRef;
pub use memory::MemoryBlobStore;
pub use traits::BlobStore;
