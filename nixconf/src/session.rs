//! An editing session over one configuration file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::Value;

use crate::{
    apply::Applier,
    attribute::Attribute,
    cache::{EvaluationCache, shared_tree_cache},
    config::EditorConfig,
    error::Result,
    nix::{ConfigParser, Evaluator, NixEvaluator, NixSourceParser},
    store::Store,
    tree::{Baseline, OptionTree},
};

/// Ties the editor configuration to its collaborators.
///
/// Built from an [`EditorConfig`] with the Nix collaborators and the
/// process-wide tree cache; each piece can be swapped with the `with_*`
/// builders.
pub struct Session {
    config: EditorConfig,
    evaluator: Box<dyn Evaluator>,
    parser: Box<dyn ConfigParser>,
    store: Box<dyn Store>,
    applier: Applier,
    cache: Arc<EvaluationCache<OptionTree>>,
}

impl Session {
    /// Session with the default collaborators.
    pub fn new(config: EditorConfig) -> Self {
        Self {
            evaluator: Box::new(NixEvaluator::new(&config.evaluator)),
            parser: Box::new(NixSourceParser),
            store: Box::new(config.store()),
            applier: Applier::default(),
            cache: shared_tree_cache(),
            config,
        }
    }

    /// Replace the evaluator.
    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replace the source parser.
    pub fn with_parser(mut self, parser: Box<dyn ConfigParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the revision store.
    pub fn with_store(mut self, store: Box<dyn Store>) -> Self {
        self.store = store;
        self
    }

    /// Replace the serializer/injector pipeline.
    pub fn with_applier(mut self, applier: Applier) -> Self {
        self.applier = applier;
        self
    }

    /// Use a private cache instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<EvaluationCache<OptionTree>>) -> Self {
        self.cache = cache;
        self
    }

    /// The editor configuration.
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// The evaluator, for evaluating edited expressions.
    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    /// The configuration file being edited.
    pub fn source(&self) -> &Path {
        &self.config.configuration_path
    }

    /// Option tree of the current source, from the cache when neither the
    /// source nor the evaluator settings changed. The returned tree is a
    /// private copy.
    ///
    /// # Errors
    ///
    /// Evaluator, parser and schema failures.
    pub fn option_tree(&self) -> Result<OptionTree> {
        let source = self.source();
        let context = self.config.evaluator.fingerprint();
        self.cache.get_or_try_insert_with(source, &context, || {
            let records = self.evaluator.option_records(source)?;
            let configured = self.parser.configured_values(source)?;
            OptionTree::from_records(&records, &configured, self.evaluator.as_ref())
        })
    }

    /// Rebuild the option tree regardless of the cache.
    ///
    /// # Errors
    ///
    /// Same as [`Session::option_tree`].
    pub fn reload(&self) -> Result<OptionTree> {
        self.cache.invalidate();
        self.option_tree()
    }

    /// Where apply writes.
    pub fn save_path(&self) -> PathBuf {
        if self.config.overwrite_source {
            self.config.configuration_path.clone()
        } else {
            self.store.path_for(&self.source().to_string_lossy())
        }
    }

    /// Write `edits` to [`Session::save_path`].
    ///
    /// # Errors
    ///
    /// See [`Applier::apply`].
    pub fn apply(&self, edits: &BTreeMap<Attribute, Value>) -> Result<PathBuf> {
        let destination = self.save_path();
        info!("applying {} edit(s) to {}", edits.len(), destination.display());
        self.applier.apply(self.source(), &destination, edits)
    }

    /// Write the changes of `tree` relative to `baseline` to
    /// [`Session::save_path`].
    ///
    /// # Errors
    ///
    /// See [`Applier::apply_changes`].
    pub fn apply_changes(&self, tree: &OptionTree, baseline: &Baseline) -> Result<PathBuf> {
        let destination = self.save_path();
        info!("applying changes to {}", destination.display());
        self.applier
            .apply_changes(self.source(), &destination, tree, baseline)
    }
}
