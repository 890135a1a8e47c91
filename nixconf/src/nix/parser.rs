//! Configured values as written in the source file.

use std::{collections::BTreeMap, fs, path::Path};

use super::syntax::parse_module;
use crate::{attribute::Attribute, error::Result};

/// Extracts the raw expression text bound to each attribute.
pub trait ConfigParser {
    /// Attribute → exact expression text in `source`, for every binding.
    /// A set literal bound to a path appears both as a whole and through
    /// each of its members.
    ///
    /// # Errors
    ///
    /// I/O failures and source text that does not parse.
    fn configured_values(&self, source: &Path) -> Result<BTreeMap<Attribute, String>>;
}

/// [`ConfigParser`] for Nix module files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixSourceParser;

impl NixSourceParser {
    /// Same as [`ConfigParser::configured_values`] on already loaded text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Syntax`] for text that does not parse.
    pub fn parse_str(&self, text: &str) -> Result<BTreeMap<Attribute, String>> {
        let body = parse_module(text)?;
        let mut values = BTreeMap::new();
        for (attribute, binding) in body.walk() {
            if values
                .insert(attribute.clone(), text[binding.value.clone()].to_string())
                .is_some()
            {
                warn!("`{attribute}` is bound more than once; keeping the last binding");
            }
        }
        Ok(values)
    }
}

impl ConfigParser for NixSourceParser {
    fn configured_values(&self, source: &Path) -> Result<BTreeMap<Attribute, String>> {
        let text = fs::read_to_string(source)?;
        self.parse_str(&text)
    }
}
