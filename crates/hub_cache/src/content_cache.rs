//! The content-addressed storage engine. See [`ContentCache`].

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    etag::normalize_etag,
    path_lock::PathLock,
    repo::{RepoId, RepoKind},
    task::run_blocking,
    validation::{validate_relative_path, validate_single_segment, ComponentError},
};

/// Subdirectory of a repo directory holding the content-addressed blobs.
const BLOBS_DIR: &str = "blobs";
/// Subdirectory mapping mutable ref names to revisions.
const REFS_DIR: &str = "refs";
/// Subdirectory holding the per-revision snapshot trees.
const SNAPSHOTS_DIR: &str = "snapshots";

/// An error returned by the operations of the [`ContentCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An externally supplied `etag`, `revision`, `filename`, ref name or
    /// repository id failed validation. Guaranteed to be reported before any
    /// filesystem mutation.
    #[error("invalid {field} '{value}': {source}")]
    InvalidComponent {
        /// Which argument was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        source: ComponentError,
    },

    /// An underlying filesystem operation failed.
    #[error("{0}")]
    Io(String, #[source] std::io::Error),

    /// The lock file could not be created or locked.
    #[error("{0}")]
    Lock(String, #[source] std::io::Error),
}

fn invalid<'a>(
    field: &'static str,
    value: &'a str,
) -> impl FnOnce(ComponentError) -> CacheError + 'a {
    move |source| CacheError::InvalidComponent {
        field,
        value: value.to_string(),
        source,
    }
}

/// The source of the bytes for a store operation.
enum BlobSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A local, content-addressed cache of hub artifacts rooted at a single
/// directory.
///
/// Each `(repository, kind)` pair owns one directory below the root with
/// three subdirectories: `blobs/` (one file per distinct content validator
/// token), `refs/` (one small file per mutable ref, content = revision) and
/// `snapshots/{revision}/{filename}` (links into `blobs/`).
///
/// The cache root may be shared by unrelated processes. Writers of the same
/// blob are serialized with a [`PathLock`]; writers of distinct blobs never
/// contend. Lookups are lock-free and only ever observe a blob that is fully
/// absent or fully written.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Constructs a new [`ContentCache`] rooted at the specified directory.
    ///
    /// The directory tree below the root is created lazily on the first store
    /// operation; constructing the cache performs no I/O.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding everything cached for a repository.
    pub fn repo_dir(&self, repo: &RepoId, kind: RepoKind) -> PathBuf {
        self.root.join(repo.dir_name(kind))
    }

    /// Returns the directory holding the content-addressed blobs of a
    /// repository.
    pub fn blobs_dir(&self, repo: &RepoId, kind: RepoKind) -> PathBuf {
        self.repo_dir(repo, kind).join(BLOBS_DIR)
    }

    /// Returns the directory holding the refs of a repository.
    pub fn refs_dir(&self, repo: &RepoId, kind: RepoKind) -> PathBuf {
        self.repo_dir(repo, kind).join(REFS_DIR)
    }

    /// Returns the directory holding the snapshot trees of a repository.
    pub fn snapshots_dir(&self, repo: &RepoId, kind: RepoKind) -> PathBuf {
        self.repo_dir(repo, kind).join(SNAPSHOTS_DIR)
    }

    /// Resolves a ref name to the revision it points at.
    ///
    /// Returns `Ok(None)` if no such ref exists; callers use this to
    /// distinguish a branch name from a literal revision string. The ref file
    /// contents are trimmed, so a trailing newline written by another client
    /// is tolerated.
    pub async fn resolve_revision(
        &self,
        repo: &RepoId,
        kind: RepoKind,
        name: &str,
    ) -> Result<Option<String>, CacheError> {
        if validate_repo(repo).is_err() || validate_relative_path(name).is_err() {
            return Ok(None);
        }

        let ref_path = self.refs_dir(repo, kind).join(name);
        match fs_err::tokio::read_to_string(&ref_path).await {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(
                format!("failed to read ref '{}'", ref_path.display()),
                e,
            )),
        }
    }

    /// Points the ref `name` at `commit`, creating it if needed.
    ///
    /// The ref file is replaced atomically and holds the exact commit string,
    /// no trailing newline. Concurrent updates of the same ref race
    /// last-write-wins; refs are advisory pointers re-fetched from the remote
    /// source of truth on the next resolution miss.
    pub async fn update_ref(
        &self,
        repo: &RepoId,
        kind: RepoKind,
        name: &str,
        commit: &str,
    ) -> Result<(), CacheError> {
        validate_repo(repo)?;
        validate_relative_path(name).map_err(invalid("ref", name))?;
        validate_single_segment(commit).map_err(invalid("revision", commit))?;

        let ref_path = self.refs_dir(repo, kind).join(name);
        let commit = commit.to_string();
        run_blocking(move || write_ref(&ref_path, &commit)).await
    }

    /// Returns the path of the blob cached for `etag`, or `None` when the
    /// cache holds no such blob.
    ///
    /// Lock-free; an invalid `etag` also reports a miss.
    pub async fn cached_blob_path(
        &self,
        repo: &RepoId,
        kind: RepoKind,
        etag: &str,
    ) -> Option<PathBuf> {
        let token = normalize_etag(etag);
        if validate_repo(repo).is_err() || validate_single_segment(token).is_err() {
            return None;
        }

        let blob_path = self.blobs_dir(repo, kind).join(token);
        exists(&blob_path).await.then_some(blob_path)
    }

    /// Returns the snapshot path cached for `(revision, filename)`, or `None`
    /// when the cache holds no such entry.
    ///
    /// `revision` may be a ref name; a name that does not resolve through the
    /// refs table is treated as a literal revision string. A ref pointing at
    /// a revision whose snapshot was never materialized reports a miss, not
    /// an error. Lock-free; a concurrent in-flight store may be observed as
    /// either a miss or a hit.
    pub async fn cached_file_path(
        &self,
        repo: &RepoId,
        kind: RepoKind,
        revision: &str,
        filename: &str,
    ) -> Option<PathBuf> {
        if validate_repo(repo).is_err() || validate_relative_path(filename).is_err() {
            return None;
        }

        let revision = match self.resolve_revision(repo, kind, revision).await {
            Ok(Some(resolved)) => resolved,
            _ => revision.to_string(),
        };
        // Whether resolved through a ref file or passed literally, the
        // revision must be a plain directory name.
        validate_single_segment(&revision).ok()?;

        let snapshot_path = self
            .snapshots_dir(repo, kind)
            .join(&revision)
            .join(filename);
        exists(&snapshot_path).await.then_some(snapshot_path)
    }

    /// Stores the contents of an existing file under `(revision, filename)`
    /// for the given repository, deduplicated on the normalized `etag`.
    ///
    /// If a blob for the token already exists, no bytes are rewritten; the
    /// snapshot entry `snapshots/{revision}/{filename}` is linked to the blob
    /// either way, and `ref_name` (if supplied) is pointed at `revision`.
    /// Writers of the same blob are serialized across threads and processes;
    /// a reader never observes a partially written blob.
    ///
    /// Returns the path of the snapshot entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_file(
        &self,
        source: &Path,
        repo: &RepoId,
        kind: RepoKind,
        revision: &str,
        filename: &str,
        etag: &str,
        ref_name: Option<&str>,
    ) -> Result<PathBuf, CacheError> {
        self.store(
            BlobSource::File(source.to_path_buf()),
            repo,
            kind,
            revision,
            filename,
            etag,
            ref_name,
        )
        .await
    }

    /// Stores an in-memory buffer under `(revision, filename)` for the given
    /// repository. Identical contract to [`ContentCache::store_file`], with
    /// the bytes coming from memory instead of an existing file.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_data(
        &self,
        data: impl Into<Vec<u8>>,
        repo: &RepoId,
        kind: RepoKind,
        revision: &str,
        filename: &str,
        etag: &str,
        ref_name: Option<&str>,
    ) -> Result<PathBuf, CacheError> {
        self.store(
            BlobSource::Bytes(data.into()),
            repo,
            kind,
            revision,
            filename,
            etag,
            ref_name,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn store(
        &self,
        source: BlobSource,
        repo: &RepoId,
        kind: RepoKind,
        revision: &str,
        filename: &str,
        etag: &str,
        ref_name: Option<&str>,
    ) -> Result<PathBuf, CacheError> {
        // Validate every supplied component before touching the filesystem.
        validate_repo(repo)?;
        let token = normalize_etag(etag);
        validate_single_segment(token).map_err(invalid("etag", etag))?;
        validate_single_segment(revision).map_err(invalid("revision", revision))?;
        validate_relative_path(filename).map_err(invalid("filename", filename))?;
        if let Some(name) = ref_name {
            validate_relative_path(name).map_err(invalid("ref", name))?;
        }

        let blobs_dir = self.blobs_dir(repo, kind);
        let blob_path = blobs_dir.join(token);
        let snapshot_path = self
            .snapshots_dir(repo, kind)
            .join(revision)
            .join(filename);

        // The lock file sits next to the blob, so the blobs directory must
        // exist before the lock can be taken.
        {
            let blobs_dir = blobs_dir.clone();
            run_blocking(move || {
                fs_err::create_dir_all(&blobs_dir).map_err(|e| {
                    CacheError::Io(
                        format!("failed to create blobs directory '{}'", blobs_dir.display()),
                        e,
                    )
                })
            })
            .await?;
        }

        let _lock = PathLock::acquire(&blob_path).await?;

        // Inside the lock: write the blob once, then link the snapshot entry
        // to it. A failure while linking leaves the written blob intact and
        // reusable by a later retry.
        {
            let blob_path = blob_path.clone();
            let snapshot_path = snapshot_path.clone();
            run_blocking(move || {
                write_blob(&blobs_dir, &blob_path, source)?;
                link_snapshot_entry(&blob_path, &snapshot_path)
            })
            .await?;
        }

        if let Some(name) = ref_name {
            self.update_ref(repo, kind, name, revision).await?;
        }

        Ok(snapshot_path)
    }
}

/// Validates both halves of a repository id; they become path components of
/// the repo directory name just like the other supplied values.
fn validate_repo(repo: &RepoId) -> Result<(), CacheError> {
    validate_single_segment(repo.namespace()).map_err(invalid("namespace", repo.namespace()))?;
    validate_single_segment(repo.name()).map_err(invalid("name", repo.name()))?;
    Ok(())
}

async fn exists(path: &Path) -> bool {
    fs_err::tokio::metadata(path).await.is_ok()
}

/// Writes `source` into `blob_path`, skipping the write entirely when the
/// blob already exists. The bytes go through a temporary file in the blobs
/// directory and are renamed into place, so a concurrent reader observes the
/// blob either fully absent or fully written.
fn write_blob(blobs_dir: &Path, blob_path: &Path, source: BlobSource) -> Result<(), CacheError> {
    if blob_path.exists() {
        tracing::debug!(
            "blob '{}' already cached, skipping write",
            blob_path.display()
        );
        return Ok(());
    }

    let mut temp = tempfile::Builder::new().tempfile_in(blobs_dir).map_err(|e| {
        CacheError::Io(
            format!(
                "failed to create temporary file in '{}'",
                blobs_dir.display()
            ),
            e,
        )
    })?;

    match source {
        BlobSource::File(path) => {
            let mut reader = fs_err::File::open(&path).map_err(|e| {
                CacheError::Io(format!("failed to open source file '{}'", path.display()), e)
            })?;
            std::io::copy(&mut reader, temp.as_file_mut()).map_err(|e| {
                CacheError::Io(format!("failed to copy '{}' into cache", path.display()), e)
            })?;
        }
        BlobSource::Bytes(bytes) => {
            temp.as_file_mut().write_all(&bytes).map_err(|e| {
                CacheError::Io("failed to write buffer into cache".to_string(), e)
            })?;
        }
    }
    temp.as_file_mut()
        .flush()
        .map_err(|e| CacheError::Io("failed to flush blob".to_string(), e))?;

    // Persist the blob, ignoring AlreadyExists from a writer that does not
    // participate in the lock protocol.
    match temp.persist_noclobber(blob_path) {
        Ok(_) => {
            tracing::debug!("stored blob '{}'", blob_path.display());
            Ok(())
        }
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CacheError::Io(
            format!("failed to persist blob '{}'", blob_path.display()),
            e.error,
        )),
    }
}

/// Makes `snapshot_path` resolve to the bytes of `blob_path`, hard linking
/// where the filesystem allows it and copying otherwise. An entry that
/// already exists is left in place.
fn link_snapshot_entry(blob_path: &Path, snapshot_path: &Path) -> Result<(), CacheError> {
    let parent = snapshot_path
        .parent()
        .expect("snapshot entries always have a parent directory");
    fs_err::create_dir_all(parent).map_err(|e| {
        CacheError::Io(
            format!("failed to create snapshot directory '{}'", parent.display()),
            e,
        )
    })?;

    match fs_err::hard_link(blob_path, snapshot_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            tracing::debug!(
                "failed to hardlink '{}': {e}, falling back to copying",
                snapshot_path.display()
            );
            copy_snapshot_entry(blob_path, snapshot_path, parent)
        }
    }
}

/// Copy fallback for filesystems without hard-link support. The copy goes
/// through a temporary file in the snapshot directory so a reader never sees
/// a partially copied entry.
fn copy_snapshot_entry(
    blob_path: &Path,
    snapshot_path: &Path,
    parent: &Path,
) -> Result<(), CacheError> {
    let mut temp = tempfile::Builder::new().tempfile_in(parent).map_err(|e| {
        CacheError::Io(
            format!("failed to create temporary file in '{}'", parent.display()),
            e,
        )
    })?;
    let mut reader = fs_err::File::open(blob_path).map_err(|e| {
        CacheError::Io(format!("failed to open blob '{}'", blob_path.display()), e)
    })?;
    std::io::copy(&mut reader, temp.as_file_mut()).map_err(|e| {
        CacheError::Io(
            format!("failed to copy blob '{}'", blob_path.display()),
            e,
        )
    })?;
    temp.persist(snapshot_path).map_err(|e| {
        CacheError::Io(
            format!(
                "failed to persist snapshot entry '{}'",
                snapshot_path.display()
            ),
            e.error,
        )
    })?;
    Ok(())
}

/// Writes `commit` as the exact contents of the ref file, replacing any
/// previous value atomically.
fn write_ref(ref_path: &Path, commit: &str) -> Result<(), CacheError> {
    let parent = ref_path
        .parent()
        .expect("ref files always have a parent directory");
    fs_err::create_dir_all(parent).map_err(|e| {
        CacheError::Io(
            format!("failed to create refs directory '{}'", parent.display()),
            e,
        )
    })?;

    let mut temp = tempfile::Builder::new().tempfile_in(parent).map_err(|e| {
        CacheError::Io(
            format!("failed to create temporary file in '{}'", parent.display()),
            e,
        )
    })?;
    temp.as_file_mut()
        .write_all(commit.as_bytes())
        .map_err(|e| CacheError::Io(format!("failed to write ref '{}'", ref_path.display()), e))?;
    temp.persist(ref_path).map_err(|e| {
        CacheError::Io(
            format!("failed to persist ref '{}'", ref_path.display()),
            e.error,
        )
    })?;
    Ok(())
}
