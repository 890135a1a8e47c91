//! Where generated configurations are saved.

use std::path::{Path, PathBuf};

/// Maps logical names to paths under a managed root.
pub trait Store {
    /// Path for the revision called `name`.
    fn path_for(&self, name: &str) -> PathBuf;
}

/// [`Store`] rooted at a directory; revisions live under
/// `<root>/configurations/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The managed root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Store for DirStore {
    /// Leading and trailing `/` are dropped, so an absolute source path
    /// such as `/etc/nixos/configuration.nix` mirrors below the root.
    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join("configurations")
            .join(name.trim_matches('/'))
    }
}
