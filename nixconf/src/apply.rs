//! Writing edited definitions back to a configuration file.
//!
//! Every edit is turned into expression text before anything touches the
//! filesystem, so a value that cannot be serialized aborts the whole
//! apply and no partial output is ever written.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    attribute::Attribute,
    definition::OptionDefinition,
    error::{Error, Result},
    nix::{ExpressionSerializer, Injector, NixInjector, NixSerializer},
    tree::{Baseline, OptionTree},
};

/// Serializes edits, injects them into the source and saves the result.
pub struct Applier {
    serializer: Box<dyn ExpressionSerializer>,
    injector: Box<dyn Injector>,
}

impl Default for Applier {
    fn default() -> Self {
        Self::new(Box::new(NixSerializer), Box::new(NixInjector))
    }
}

impl Applier {
    /// Applier with the given collaborators.
    pub fn new(serializer: Box<dyn ExpressionSerializer>, injector: Box<dyn Injector>) -> Self {
        Self {
            serializer,
            injector,
        }
    }

    /// The serializer used for object definitions.
    pub fn serializer(&self) -> &dyn ExpressionSerializer {
        self.serializer.as_ref()
    }

    /// Write `source` with each attribute in `edits` set to its value.
    ///
    /// # Arguments
    ///
    /// * `source` - Configuration file to start from.
    /// * `destination` - Output file; missing parent directories are created.
    /// * `edits` - Attribute → evaluated value.
    ///
    /// # Errors
    ///
    /// * [`Error::Apply`] naming the first attribute whose value cannot be
    ///   serialized. Nothing is written.
    /// * Injection and I/O failures.
    pub fn apply(
        &self,
        source: &Path,
        destination: &Path,
        edits: &BTreeMap<Attribute, Value>,
    ) -> Result<PathBuf> {
        let mut expressions = BTreeMap::new();
        for (attribute, value) in edits {
            let definition = OptionDefinition::from_object_with(value.clone(), self.serializer())
                .map_err(|source| Error::Apply {
                    attribute: attribute.clone(),
                    source,
                })?;
            expressions.insert(attribute.clone(), definition.expression().map(str::to_string));
        }
        self.write(source, destination, &expressions)
    }

    /// Write every leaf of `tree` whose definition differs from `baseline`.
    ///
    /// Expression definitions are written verbatim, objects are
    /// serialized, and undefined definitions remove the assignment.
    ///
    /// # Errors
    ///
    /// Same as [`Applier::apply`].
    pub fn apply_changes(
        &self,
        source: &Path,
        destination: &Path,
        tree: &OptionTree,
        baseline: &Baseline,
    ) -> Result<PathBuf> {
        let expressions = tree
            .iter_changes(baseline)
            .map(|change| -> Result<(Attribute, Option<String>)> {
                let text = change
                    .current
                    .expression_string(self.serializer())
                    .map_err(|source| Error::Apply {
                        attribute: change.attribute.clone(),
                        source,
                    })?;
                Ok((change.attribute.clone(), text.map(|t| t.into_owned())))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        self.write(source, destination, &expressions)
    }

    fn write(
        &self,
        source: &Path,
        destination: &Path,
        expressions: &BTreeMap<Attribute, Option<String>>,
    ) -> Result<PathBuf> {
        let original = fs::read_to_string(source)?;
        let updated = self.injector.inject(&original, expressions)?;

        let Some(file_name) = destination.file_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file path", destination.display()),
            )
            .into());
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = destination.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        fs::write(&temp, updated)?;
        fs::rename(&temp, destination)?;

        info!(
            "wrote {} change(s) to {}",
            expressions.len(),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        nix::testing::FakeEvaluator,
        tree::{Configured, OptionSchema, Schema},
        types::OptionType,
    };
    use serde_json::json;

    fn attr(s: &str) -> Attribute {
        s.parse().unwrap()
    }

    fn setup(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("configuration.nix");
        fs::write(&source, text).unwrap();
        (dir, source)
    }

    #[test]
    fn test_apply_rewrites_only_edited_attributes() {
        let (dir, source) = setup("{\n  foo.baz = 1;\n  foo.bar = \"old\";\n}\n");
        let destination = dir.path().join("out/nested/configuration.nix");
        let edits = BTreeMap::from([(attr("foo.bar"), json!("newvalue"))]);

        let saved = Applier::default()
            .apply(&source, &destination, &edits)
            .unwrap();
        assert_eq!(saved, destination);
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "{\n  foo.baz = 1;\n  foo.bar = \"newvalue\";\n}\n"
        );
        // the source itself is untouched
        assert!(fs::read_to_string(&source).unwrap().contains("\"old\""));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let (dir, source) = setup("{ a = 1; }");
        let destination = dir.path().join("out.nix");
        let edits = BTreeMap::from([
            (attr("a"), json!(2)),
            (attr("b"), json!({"_type": "derivation"})),
        ]);

        match Applier::default().apply(&source, &destination, &edits) {
            Err(Error::Apply { attribute, source }) => {
                assert_eq!(attribute, attr("b"));
                assert!(source.reason.contains("derivation"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!destination.exists());
    }

    #[test]
    fn test_apply_changes() {
        let (dir, source) = setup("{\n  a = 1;\n  b = \"x\";\n  c = true;\n}\n");
        let schema: Schema = [
            ("a", "signed integer"),
            ("b", "string"),
            ("c", "boolean"),
            ("d", "list of string"),
        ]
        .into_iter()
        .map(|(a, t)| (attr(a), OptionSchema::new(t.parse::<OptionType>().unwrap())))
        .collect();
        let configured: Configured = [("a", "1"), ("b", "\"x\""), ("c", "true")]
            .into_iter()
            .map(|(a, t)| (attr(a), t.to_string()))
            .collect();
        let mut tree = OptionTree::build(schema, &configured, &FakeEvaluator::default());
        let baseline = tree.baseline();

        tree.set_definition(&attr("a"), OptionDefinition::from_expression("lib.mkForce 2"))
            .unwrap();
        tree.set_definition(&attr("b"), OptionDefinition::undefined())
            .unwrap();
        tree.set_definition(&attr("d"), OptionDefinition::from_object(json!(["vim"])))
            .unwrap();

        let destination = dir.path().join("store/configuration.nix");
        Applier::default()
            .apply_changes(&source, &destination, &tree, &baseline)
            .unwrap();
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "{\n  a = lib.mkForce 2;\n  c = true;\n  d = [ \"vim\" ];\n}\n"
        );
    }

    #[test]
    fn test_apply_without_changes_copies_source() {
        let (dir, source) = setup("# untouched\n{ a = 1; }\n");
        let destination = dir.path().join("copy.nix");
        Applier::default()
            .apply(&source, &destination, &BTreeMap::new())
            .unwrap();
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "# untouched\n{ a = 1; }\n"
        );
    }
}
