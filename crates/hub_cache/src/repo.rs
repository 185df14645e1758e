use std::fmt::{Display, Formatter};

/// The kind of artifact repository stored on the hub.
///
/// The kind determines the prefix of the repository's cache directory.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum RepoKind {
    /// A model repository (`models--` prefix).
    Model,
    /// A dataset repository (`datasets--` prefix).
    Dataset,
    /// A space repository (`spaces--` prefix).
    Space,
}

impl RepoKind {
    /// Returns the directory prefix used for repositories of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            RepoKind::Model => "models",
            RepoKind::Dataset => "datasets",
            RepoKind::Space => "spaces",
        }
    }
}

impl Display for RepoKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Identifies a repository on the hub by namespace and name.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RepoId {
    namespace: String,
    name: String,
}

impl RepoId {
    /// Constructs a new [`RepoId`] from a namespace (user or organization)
    /// and a repository name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The namespace (user or organization) of the repository.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name of the repository.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the on-disk directory name of this repository for the given
    /// kind, e.g. `models--user--repo`.
    pub(crate) fn dir_name(&self, kind: RepoKind) -> String {
        format!("{}--{}--{}", kind.prefix(), self.namespace, self.name)
    }
}

impl Display for RepoId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
