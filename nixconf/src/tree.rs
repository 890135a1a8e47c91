//! The option tree.
//!
//! An [`OptionTree`] merges the option schema (type, default and
//! description of every option) with the values configured in a source
//! file. It is stored flat: leaves are keyed by [`Attribute`], and the
//! branch structure is an index of child segments and leaf counts built
//! alongside, so there are no parent/child object references.
//!
//! ```text
//! networking                      branch, 3 leaves
//! ├── hostName                    leaf  (string)
//! └── firewall                    branch, 2 leaves
//!     ├── enable                  leaf  (boolean)
//!     └── allowedTCPPorts         leaf  (list of signed integer)
//! ```
//!
//! Each leaf has two independent states. Its schema either declares a
//! default or not ([`OptionDefault`]), and its active definition is either
//! [`OptionDefinition::Undefined`] (fall back to the default) or defined.
//! The definitions loaded from the source form the *baseline* that
//! [`OptionTree::iter_changes`] diffs against.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

use serde_json::Value;

use crate::{
    attribute::Attribute,
    definition::{EvaluationError, OptionDefinition},
    error::{Error, Result},
    nix::{Evaluator, OptionRecord},
    types::{OptionType, UnsupportedTypeError},
};

/// Declared default of an option.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OptionDefault {
    /// The schema declares no default. Distinct from a declared `null`.
    #[default]
    NoDefault,
    /// The declared default.
    Declared(OptionDefinition),
}

impl OptionDefault {
    /// The declared definition, if any.
    pub fn definition(&self) -> Option<&OptionDefinition> {
        match self {
            OptionDefault::NoDefault => None,
            OptionDefault::Declared(definition) => Some(definition),
        }
    }
}

/// Schema entry for one option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSchema {
    /// Declared type.
    pub option_type: OptionType,
    /// Declared default.
    pub default: OptionDefault,
    /// Documentation text.
    pub description: Option<String>,
}

impl OptionSchema {
    /// Schema with a type and nothing else.
    pub fn new(option_type: OptionType) -> Self {
        Self {
            option_type,
            default: OptionDefault::NoDefault,
            description: None,
        }
    }

    /// Set the declared default.
    pub fn with_default(mut self, default: OptionDefinition) -> Self {
        self.default = OptionDefault::Declared(default);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Convert an evaluator record.
    ///
    /// `literalExpression` defaults become expression definitions, other
    /// defaults object definitions.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedTypeError`] for an unknown type description.
    pub fn from_record(record: &OptionRecord) -> Result<Self, UnsupportedTypeError> {
        Ok(Self {
            option_type: OptionType::from_descriptor(&record.type_descriptor)?,
            default: match &record.default {
                None => OptionDefault::NoDefault,
                Some(value) => OptionDefault::Declared(default_definition(value)),
            },
            description: record.description.as_ref().map(description_text),
        })
    }
}

fn default_definition(value: &Value) -> OptionDefinition {
    let marker = value.get("_type").and_then(Value::as_str);
    match (marker, value.get("text").and_then(Value::as_str)) {
        (Some("literalExpression" | "literalExample"), Some(text)) => {
            OptionDefinition::from_expression(text)
        }
        _ => OptionDefinition::from_object(value.clone()),
    }
}

fn description_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other
            .get("text")
            .and_then(Value::as_str)
            .map_or_else(|| other.to_string(), str::to_string),
    }
}

/// Option schema keyed by attribute.
pub type Schema = BTreeMap<Attribute, OptionSchema>;

/// Raw configured expression text keyed by attribute.
pub type Configured = BTreeMap<Attribute, String>;

/// Definitions to diff against, keyed by attribute. Missing entries are
/// undefined.
pub type Baseline = BTreeMap<Attribute, OptionDefinition>;

/// Parse an evaluator option listing into a schema.
///
/// # Errors
///
/// The first malformed option name or unsupported type aborts parsing.
pub fn parse_schema(records: &BTreeMap<String, OptionRecord>) -> Result<Schema> {
    records
        .iter()
        .map(|(name, record)| -> Result<(Attribute, OptionSchema)> {
            Ok((name.parse()?, OptionSchema::from_record(record)?))
        })
        .collect()
}

/// One option of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    schema: OptionSchema,
    configured: OptionDefinition,
    definition: OptionDefinition,
    evaluation_error: Option<EvaluationError>,
}

impl Leaf {
    fn new(schema: OptionSchema) -> Self {
        Self {
            schema,
            configured: OptionDefinition::Undefined,
            definition: OptionDefinition::Undefined,
            evaluation_error: None,
        }
    }

    /// Schema entry.
    pub fn schema(&self) -> &OptionSchema {
        &self.schema
    }

    /// Declared type.
    pub fn option_type(&self) -> &OptionType {
        &self.schema.option_type
    }

    /// Definition loaded from the source.
    pub fn configured(&self) -> &OptionDefinition {
        &self.configured
    }

    /// Active definition.
    pub fn definition(&self) -> &OptionDefinition {
        &self.definition
    }

    /// Why the configured expression could not be evaluated.
    pub fn evaluation_error(&self) -> Option<&EvaluationError> {
        self.evaluation_error.as_ref()
    }
}

/// A leaf whose active definition differs from the baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Change<'a> {
    /// The option.
    pub attribute: &'a Attribute,
    /// Baseline definition.
    pub baseline: &'a OptionDefinition,
    /// Active definition.
    pub current: &'a OptionDefinition,
}

/// Schema merged with configured state.
#[derive(Debug, Clone, Default)]
pub struct OptionTree {
    leaves: BTreeMap<Attribute, Leaf>,
    children: BTreeMap<Attribute, BTreeSet<String>>,
    leaf_counts: BTreeMap<Attribute, usize>,
    /// Leaves with `<name>` placeholder segments.
    templates: Vec<Attribute>,
}

fn is_placeholder(segment: &str) -> bool {
    segment == "*" || (segment.starts_with('<') && segment.ends_with('>'))
}

/// Type found `rest` segments below a value of type `ty`.
fn descend(ty: &OptionType, rest: &[String]) -> Option<OptionType> {
    let Some((first, tail)) = rest.split_first() else {
        return Some(ty.clone());
    };
    match ty {
        OptionType::AttrsOf(elem) => descend(elem, tail),
        OptionType::Attrs { fields, .. } => descend(fields.get(first)?, tail),
        OptionType::Submodule(options) => {
            options.get(&Attribute::new(rest.iter().cloned())).cloned()
        }
        OptionType::Either(alternatives) => alternatives.iter().find_map(|t| descend(t, rest)),
        _ => None,
    }
}

impl OptionTree {
    /// Build a tree from a schema and the configured expression text.
    ///
    /// Every configured expression is evaluated once. A failure is logged
    /// and recorded on its leaf, which keeps the raw text as its
    /// definition; other leaves are unaffected.
    ///
    /// `configured` may hold a set literal and its members side by side.
    /// An option bound as a whole takes the set text and its members are
    /// not loaded again. A set that is not an option itself only groups
    /// its members. Members no option covers are collected into the
    /// deepest option above them, which is then loaded from a set literal
    /// of those members. Anything else no option covers is skipped.
    pub fn build(schema: Schema, configured: &Configured, evaluator: &dyn Evaluator) -> Self {
        let mut tree = Self::default();
        for (attribute, option) in schema {
            tree.insert_leaf(attribute, Leaf::new(option));
        }

        let mut loaded = BTreeSet::new();
        let mut failed = 0usize;
        let mut collected: BTreeMap<Attribute, Vec<(Attribute, &str)>> = BTreeMap::new();
        for (attribute, text) in configured {
            if attribute.ancestors().any(|a| loaded.contains(&a)) {
                trace!("`{attribute}` is part of an option loaded as a whole");
                continue;
            }
            if !tree.leaves.contains_key(attribute) {
                let grouping = configured
                    .range(attribute..)
                    .nth(1)
                    .is_some_and(|(next, _)| attribute.is_ancestor_of(next));
                if grouping {
                    continue;
                }
                match tree.resolve_schema(attribute) {
                    Some(schema) => tree.insert_leaf(attribute.clone(), Leaf::new(schema)),
                    None => {
                        match tree.owner(attribute) {
                            Some(owner) => {
                                let rel = attribute.strip_prefix(&owner).unwrap_or_default();
                                collected
                                    .entry(owner)
                                    .or_default()
                                    .push((Attribute::new(rel.iter().cloned()), text.as_str()));
                            }
                            None => debug!("`{attribute}` is not a known option, skipping"),
                        }
                        continue;
                    }
                }
            }
            if !tree.load(attribute, text, evaluator) {
                failed += 1;
            }
            loaded.insert(attribute.clone());
        }

        for (owner, members) in collected {
            if !tree.leaves.contains_key(&owner) {
                let Some(schema) = tree.resolve_schema(&owner) else {
                    continue;
                };
                tree.insert_leaf(owner.clone(), Leaf::new(schema));
            }
            debug!("`{owner}` collects {} nested binding(s)", members.len());
            let bindings: Vec<String> = members
                .iter()
                .map(|(rel, text)| format!("{} = {text};", rel.to_nix()))
                .collect();
            if !tree.load(&owner, &format!("{{ {} }}", bindings.join(" ")), evaluator) {
                failed += 1;
            }
            loaded.insert(owner);
        }

        info!(
            "option tree built: {} options, {} configured, {failed} failed to evaluate",
            tree.leaves.len(),
            loaded.len()
        );
        tree
    }

    /// Evaluate `text` as the configured definition of an existing leaf.
    /// Returns whether evaluation succeeded.
    fn load(&mut self, attribute: &Attribute, text: &str, evaluator: &dyn Evaluator) -> bool {
        let expression = OptionDefinition::from_expression(text);
        let (definition, error) = match expression.evaluate(evaluator) {
            Ok(definition) => (definition, None),
            Err(err) => {
                warn!("`{attribute}`: {err}");
                (expression, Some(err))
            }
        };
        let ok = error.is_none();
        if let Some(leaf) = self.leaves.get_mut(attribute) {
            leaf.configured = definition.clone();
            leaf.definition = definition;
            leaf.evaluation_error = error;
        }
        ok
    }

    /// [`parse_schema`] then [`OptionTree::build`].
    ///
    /// # Errors
    ///
    /// Schema errors abort construction; no partial tree is returned.
    pub fn from_records(
        records: &BTreeMap<String, OptionRecord>,
        configured: &Configured,
        evaluator: &dyn Evaluator,
    ) -> Result<Self> {
        Ok(Self::build(parse_schema(records)?, configured, evaluator))
    }

    fn insert_leaf(&mut self, attribute: Attribute, leaf: Leaf) {
        if attribute.segments().iter().any(|s| is_placeholder(s)) {
            self.templates.push(attribute.clone());
        }
        for (depth, ancestor) in attribute.ancestors().enumerate() {
            self.children
                .entry(ancestor.clone())
                .or_default()
                .insert(attribute.segments()[depth].clone());
            *self.leaf_counts.entry(ancestor).or_default() += 1;
        }
        *self.leaf_counts.entry(attribute.clone()).or_default() += 1;
        self.leaves.insert(attribute, leaf);
    }

    /// Schema for an attribute that is not a leaf yet: a matching
    /// placeholder template, or the element type of the nearest open
    /// attribute set above it.
    fn resolve_schema(&self, attribute: &Attribute) -> Option<OptionSchema> {
        let template = self.templates.iter().find(|t| {
            t.len() == attribute.len()
                && t.segments()
                    .iter()
                    .zip(attribute.segments())
                    .all(|(t, a)| t == a || is_placeholder(t))
        });
        if let Some(leaf) = template.and_then(|t| self.leaves.get(t)) {
            return Some(leaf.schema.clone());
        }

        let ancestors: Vec<_> = attribute.ancestors().collect();
        let (ancestor, leaf) = ancestors
            .iter()
            .rev()
            .find_map(|a| self.leaves.get(a).map(|leaf| (a, leaf)))?;
        descend(leaf.option_type(), &attribute.segments()[ancestor.len()..]).map(OptionSchema::new)
    }

    /// Deepest proper ancestor that is a leaf or could become one.
    fn owner(&self, attribute: &Attribute) -> Option<Attribute> {
        let ancestors: Vec<_> = attribute.ancestors().filter(|a| !a.is_root()).collect();
        ancestors
            .into_iter()
            .rev()
            .find(|a| self.leaves.contains_key(a) || self.resolve_schema(a).is_some())
    }

    /// Whether `attribute` is a leaf, a branch or a list element of this
    /// tree.
    pub fn contains(&self, attribute: &Attribute) -> bool {
        attribute.is_root()
            || self.leaf_counts.contains_key(attribute)
            || self.get_element(attribute).is_some()
    }

    /// The leaf at `attribute`.
    pub fn leaf(&self, attribute: &Attribute) -> Option<&Leaf> {
        self.leaves.get(attribute)
    }

    /// Declared type of a leaf, or the element type of a list element.
    pub fn get_type(&self, attribute: &Attribute) -> Option<&OptionType> {
        self.leaf(attribute)
            .map(Leaf::option_type)
            .or_else(|| self.get_element(attribute).map(|(ty, _)| ty))
    }

    /// Element `attribute.name()` of the list option above it, with the
    /// element type, taken from the option's active definition.
    ///
    /// `networking.firewall.allowedTCPPorts.1` is the second port.
    pub fn get_element(&self, attribute: &Attribute) -> Option<(&OptionType, &Value)> {
        let leaf = self.leaf(&attribute.parent()?)?;
        let OptionType::ListOf(element) = leaf.option_type() else {
            return None;
        };
        let index: usize = attribute.name()?.parse().ok()?;
        Some((element.as_ref(), leaf.definition.obj()?.as_array()?.get(index)?))
    }

    /// Declared type of a leaf as a type description.
    pub fn get_type_string(&self, attribute: &Attribute) -> Option<String> {
        self.get_type(attribute).map(ToString::to_string)
    }

    /// Description of a leaf.
    pub fn get_description(&self, attribute: &Attribute) -> Option<&str> {
        self.leaf(attribute)?.schema.description.as_deref()
    }

    /// Declared default of a leaf.
    pub fn get_default(&self, attribute: &Attribute) -> Option<&OptionDefault> {
        self.leaf(attribute).map(|leaf| &leaf.schema.default)
    }

    /// Active definition; undefined for anything that is not a leaf.
    pub fn get_definition(&self, attribute: &Attribute) -> &OptionDefinition {
        self.leaf(attribute)
            .map_or(OptionDefinition::undefined_ref(), Leaf::definition)
    }

    /// Definition loaded from the source.
    pub fn get_configured_definition(&self, attribute: &Attribute) -> &OptionDefinition {
        self.leaf(attribute)
            .map_or(OptionDefinition::undefined_ref(), Leaf::configured)
    }

    /// Effective definition: the active one if defined, otherwise the
    /// declared default.
    pub fn get_option_value(&self, attribute: &Attribute) -> Option<&OptionDefinition> {
        let leaf = self.leaf(attribute)?;
        if leaf.definition.is_undefined() {
            leaf.schema.default.definition()
        } else {
            Some(&leaf.definition)
        }
    }

    /// Replace the active definition of an option.
    ///
    /// An attribute below an open attribute set (`attribute set of T`),
    /// or matching a `<name>` template, becomes a new leaf. Setting such
    /// an attribute to undefined before it exists does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAttribute`] when no option covers
    /// `attribute`.
    pub fn set_definition(
        &mut self,
        attribute: &Attribute,
        definition: OptionDefinition,
    ) -> Result<()> {
        if !self.leaves.contains_key(attribute) {
            let schema = self
                .resolve_schema(attribute)
                .ok_or_else(|| Error::UnknownAttribute(attribute.clone()))?;
            if definition.is_undefined() {
                return Ok(());
            }
            debug!("adding `{attribute}` of type {}", schema.option_type);
            self.insert_leaf(attribute.clone(), Leaf::new(schema));
        }

        let Some(leaf) = self.leaves.get_mut(attribute) else {
            return Err(Error::UnknownAttribute(attribute.clone()));
        };
        if let Some(value) = definition.obj() {
            if !leaf.schema.option_type.matches(value) {
                warn!(
                    "`{attribute}` set to {value}, which is not a {}",
                    leaf.schema.option_type
                );
            }
        }
        leaf.definition = definition;
        Ok(())
    }

    /// Immediate children, most leaves first, then by name.
    ///
    /// The children of a list option with an evaluated definition are its
    /// elements, in list order. See [`OptionTree::get_element`].
    pub fn children(&self, attribute: &Attribute) -> Vec<Attribute> {
        if let Some(leaf) = self.leaf(attribute) {
            if let (OptionType::ListOf(_), Some(Value::Array(items))) =
                (leaf.option_type(), leaf.definition.obj())
            {
                return (0..items.len())
                    .map(|index| attribute.child(index.to_string()))
                    .collect();
            }
        }
        let Some(segments) = self.children.get(attribute) else {
            return Vec::new();
        };
        let mut children: Vec<_> = segments
            .iter()
            .map(|segment| attribute.child(segment.clone()))
            .collect();
        children.sort_by_cached_key(|child| {
            (
                Reverse(self.get_leaf_count(child)),
                child.name().map(str::to_string),
            )
        });
        children
    }

    /// Number of leaves at or below `attribute`.
    pub fn get_leaf_count(&self, attribute: &Attribute) -> usize {
        if attribute.is_root() {
            return self.leaves.len();
        }
        self.leaf_counts.get(attribute).copied().unwrap_or(0)
    }

    /// Follow single-child chains down from `attribute`.
    ///
    /// Stops at the first node with zero or several children, or at an
    /// open attribute set, whose children are user-defined names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAttribute`] if `attribute` is not in the tree.
    pub fn next_branching_point(&self, attribute: &Attribute) -> Result<Attribute> {
        if !self.contains(attribute) {
            return Err(Error::UnknownAttribute(attribute.clone()));
        }
        let mut current = attribute.clone();
        loop {
            if self
                .get_type(&current)
                .is_some_and(|ty| ty.attrs_element().is_some())
            {
                return Ok(current);
            }
            match self.children.get(&current) {
                Some(segments) if segments.len() == 1 => {
                    if let Some(only) = segments.first() {
                        current = current.child(only.clone());
                    }
                }
                _ => return Ok(current),
            }
        }
    }

    /// Leaves whose active definition differs from `baseline`.
    ///
    /// The iterator borrows the tree; calling again starts over.
    pub fn iter_changes<'a>(
        &'a self,
        baseline: &'a Baseline,
    ) -> impl Iterator<Item = Change<'a>> + 'a {
        self.leaves.iter().filter_map(move |(attribute, leaf)| {
            let base = baseline
                .get(attribute)
                .unwrap_or(OptionDefinition::undefined_ref());
            base.differs_from(&leaf.definition).then_some(Change {
                attribute,
                baseline: base,
                current: &leaf.definition,
            })
        })
    }

    /// Leaves whose active definition differs from what was loaded.
    pub fn changes(&self) -> impl Iterator<Item = Change<'_>> {
        self.leaves.iter().filter_map(|(attribute, leaf)| {
            leaf.configured
                .differs_from(&leaf.definition)
                .then_some(Change {
                    attribute,
                    baseline: &leaf.configured,
                    current: &leaf.definition,
                })
        })
    }

    /// Snapshot of the loaded definitions.
    pub fn baseline(&self) -> Baseline {
        self.leaves
            .iter()
            .filter(|(_, leaf)| !leaf.configured.is_undefined())
            .map(|(attribute, leaf)| (attribute.clone(), leaf.configured.clone()))
            .collect()
    }

    /// Evaluation failure recorded for a leaf during build.
    pub fn evaluation_error(&self, attribute: &Attribute) -> Option<&EvaluationError> {
        self.leaf(attribute)?.evaluation_error()
    }

    /// Every recorded evaluation failure.
    pub fn evaluation_errors(&self) -> impl Iterator<Item = (&Attribute, &EvaluationError)> {
        self.leaves
            .iter()
            .filter_map(|(attribute, leaf)| Some((attribute, leaf.evaluation_error()?)))
    }

    /// Every leaf attribute in order.
    pub fn iter_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.leaves.keys()
    }
}
