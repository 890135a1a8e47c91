//! Nix-specific collaborators.
//!
//! The option model only talks to the outside world through the traits
//! re-exported here:
//!
//! - [`Evaluator`]: schema extraction and expression evaluation
//!   ([`NixEvaluator`] runs `nix-instantiate`)
//! - [`ConfigParser`]: raw expression text per attribute ([`NixSourceParser`])
//! - [`ExpressionSerializer`]: values back to text ([`NixSerializer`])
//! - [`Injector`]: targeted source rewriting ([`NixInjector`])

pub mod command;
pub mod evaluator;
pub mod injector;
pub mod parser;
pub mod serializer;
pub mod syntax;

pub use evaluator::{Evaluator, NixEvaluator, OptionRecord};
pub use injector::{Injector, NixInjector};
pub use parser::{ConfigParser, NixSourceParser};
pub use serializer::{ExpressionSerializer, NixSerializer};
