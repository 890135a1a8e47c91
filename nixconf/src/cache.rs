//! Evaluation cache.
//!
//! Extracting the option schema runs the evaluator over the whole module
//! system, which takes seconds. [`EvaluationCache`] keeps the last result
//! together with a [`SourceKey`] of the configuration it was computed
//! from and of the evaluator settings used, and recomputes only when the
//! key changes.

use std::{
    fmt, fs,
    path::Path,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use sha2::{Digest, Sha256};

use crate::{error::Result, tree::OptionTree};

/// Hash of a configuration source's path and content, and of the context
/// it is evaluated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(String);

impl SourceKey {
    /// Hash the file at `path` evaluated under `context`, typically
    /// [`crate::EvaluatorConfig::fingerprint`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be read.
    pub fn of(path: &Path, context: &str) -> Result<Self> {
        let content = fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(context.as_bytes());
        hasher.update([0]);
        hasher.update(&content);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-entry cache keyed by a configuration source and its evaluation
/// context.
///
/// Values are handed out as clones, so callers may mutate what they get
/// without affecting the cached copy.
#[derive(Debug, Default)]
pub struct EvaluationCache<T> {
    slot: Mutex<Option<(SourceKey, T)>>,
}

impl<T: Clone> EvaluationCache<T> {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value for `source` under `context` or compute and
    /// store it.
    ///
    /// The source is re-hashed on every call. A stale entry is evicted
    /// before `compute` runs; if `compute` fails the cache stays empty.
    ///
    /// # Errors
    ///
    /// Propagates hashing and `compute` failures.
    pub fn get_or_try_insert_with<F>(&self, source: &Path, context: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let key = SourceKey::of(source, context)?;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        match slot.as_ref() {
            Some((cached, value)) if *cached == key => {
                debug!("evaluation cache hit for {}", source.display());
                return Ok(value.clone());
            }
            Some((cached, _)) => {
                info!(
                    "{} or its evaluator changed ({} -> {}), evicting cached evaluation",
                    source.display(),
                    &cached.as_str()[..12],
                    &key.as_str()[..12]
                );
                *slot = None;
            }
            None => debug!("evaluation cache miss for {}", source.display()),
        }

        let value = compute()?;
        *slot = Some((key, value.clone()));
        Ok(value)
    }

    /// Drop the cached entry.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            debug!("evaluation cache invalidated");
        }
    }

    /// Key of the cached entry, if any.
    pub fn key(&self) -> Option<SourceKey> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(key, _)| key.clone())
    }
}

/// The process-wide option tree cache, created on first use.
pub fn shared_tree_cache() -> Arc<EvaluationCache<OptionTree>> {
    static CACHE: OnceLock<Arc<EvaluationCache<OptionTree>>> = OnceLock::new();
    CACHE
        .get_or_init(|| Arc::new(EvaluationCache::new()))
        .clone()
}
