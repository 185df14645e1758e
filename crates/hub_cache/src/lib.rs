#![deny(missing_docs)]

//! A local, content-addressed cache for artifacts fetched from a remote
//! model/dataset/code hub.
//!
//! The cache mirrors the hub directory layout shared across independent
//! client implementations, so multiple tools on one machine can reuse the
//! same downloaded bytes:
//!
//! ```text
//! <cache root>/
//!   models--<namespace>--<name>/
//!     blobs/<etag>                       one file per distinct content version
//!     refs/<ref name>                    branch name -> revision, one small file
//!     snapshots/<revision>/<filename>    links into blobs/
//! ```
//!
//! Bytes enter the cache exclusively through [`ContentCache::store_file`] and
//! [`ContentCache::store_data`]. Both deduplicate on the content validator
//! token (an HTTP `ETag`), serialize concurrent writers of the same blob with
//! a cross-process [`PathLock`], and write through a temporary file so that a
//! reader never observes a partially written blob. Lookups are lock-free.

use std::path::PathBuf;

mod content_cache;
mod etag;
mod path_lock;
mod repo;
mod task;
mod validation;

pub use content_cache::{CacheError, ContentCache};
pub use etag::normalize_etag;
pub use path_lock::PathLock;
pub use repo::{RepoId, RepoKind};
pub use validation::ComponentError;

/// Determines the default cache directory for hub artifacts.
///
/// This is the standard cache directory provided by the platform
/// (`dirs::cache_dir()`) with `huggingface/hub` appended, matching the layout
/// other hub clients share.
pub fn default_cache_dir() -> anyhow::Result<PathBuf> {
    dirs::cache_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine cache directory for current platform"))
        .map(|mut p| {
            p.push("huggingface");
            p.push("hub");
            p
        })
}
