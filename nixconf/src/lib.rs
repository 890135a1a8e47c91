//! # nixconf
//!
//! Typed option tree for NixOS configuration files.
//!
//! nixconf loads the option schema of a NixOS system, merges it with the
//! definitions found in a `configuration.nix`, and lets callers browse and
//! edit the result before writing it back with the rest of the file left
//! byte-for-byte intact.
//!
//! ## Features
//!
//! - Dot-path attributes with quoting ([`Attribute`])
//! - Option type descriptors parsed into a closed type model ([`OptionType`])
//! - Definitions as either expression text or evaluated values
//!   ([`OptionDefinition`])
//! - Flat option tree with branch navigation and change tracking
//!   ([`OptionTree`])
//! - Content-addressed evaluation cache ([`cache::EvaluationCache`])
//! - Targeted source rewriting with atomic writes ([`apply::Applier`])
//! - TOML and JSON editor configuration ([`EditorConfig`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nixconf::{Attribute, EditorConfig, OptionDefinition, Session};
//!
//! let mut config = EditorConfig::default();
//! config.apply_env();
//! let session = Session::new(config);
//!
//! let mut tree = session.option_tree().unwrap();
//! let baseline = tree.baseline();
//! let host: Attribute = "networking.hostName".parse().unwrap();
//! tree.set_definition(&host, OptionDefinition::from_object("box")).unwrap();
//! let saved = session.apply_changes(&tree, &baseline).unwrap();
//! println!("saved to {}", saved.display());
//! ```
//!
//! ## Modules
//!
//! - [`attribute`] - Dot-path option names
//! - [`types`] - Option type model
//! - [`definition`] - Option definitions
//! - [`tree`] - The option tree
//! - [`nix`] - Evaluator, parser, serializer and injector
//! - [`cache`] - Evaluation cache
//! - [`apply`] - Write-back pipeline
//! - [`store`] - Output locations
//! - [`config`] - Editor configuration
//! - [`session`] - Everything wired together

#[macro_use]
extern crate log;

pub mod apply;
pub mod attribute;
pub mod cache;
pub mod config;
pub mod definition;
pub mod error;
pub mod nix;
pub mod session;
pub mod store;
pub mod tree;
pub mod types;

pub use attribute::{Attribute, MalformedAttributeError};
pub use config::{EditorConfig, EvaluatorConfig};
pub use definition::{EvaluationError, OptionDefinition, SerializationError};
pub use error::{Error, Result};
pub use session::Session;
pub use tree::{OptionDefault, OptionSchema, OptionTree};
pub use types::{Capability, OptionType, UnsupportedTypeError};

pub use serde_json::Value;
