//! Option definitions.
//!
//! An [`OptionDefinition`] is what the configuration says about one option:
//! nothing at all, a raw expression that has not been evaluated, or an
//! evaluated value (together with the expression it came from, if known).
//! Conversions between the two defined forms are explicit because both
//! directions need an external collaborator: an [`Evaluator`] to go from
//! text to value and an [`ExpressionSerializer`] to go back.

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

use crate::nix::{Evaluator, ExpressionSerializer};

/// An expression the evaluator rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to evaluate `{expression}`: {diagnostic}")]
pub struct EvaluationError {
    /// The expression text as written in the configuration.
    pub expression: String,
    /// The evaluator's message.
    pub diagnostic: String,
}

/// A value with no source-syntax representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value has no literal form: {reason}")]
pub struct SerializationError {
    /// Why the value cannot be written.
    pub reason: String,
}

/// The definition of one option.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OptionDefinition {
    /// No definition; the option falls back to its default.
    #[default]
    Undefined,
    /// Raw expression text, not evaluated yet.
    Expression(String),
    /// Evaluated value.
    Object {
        /// The value.
        value: Value,
        /// Source text the value was evaluated from, when known.
        expression: Option<String>,
    },
}

static UNDEFINED: OptionDefinition = OptionDefinition::Undefined;

impl OptionDefinition {
    /// The undefined definition.
    pub fn undefined() -> Self {
        Self::Undefined
    }

    /// Shared reference to the undefined definition.
    pub(crate) fn undefined_ref() -> &'static Self {
        &UNDEFINED
    }

    /// Wrap raw expression text. Nothing is evaluated.
    pub fn from_expression(text: impl Into<String>) -> Self {
        Self::Expression(text.into())
    }

    /// Wrap an evaluated value; serialization is deferred until the
    /// expression text is requested.
    pub fn from_object(value: impl Into<Value>) -> Self {
        Self::Object {
            value: value.into(),
            expression: None,
        }
    }

    /// Wrap an evaluated value and serialize it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the value has no literal form.
    pub fn from_object_with(
        value: impl Into<Value>,
        serializer: &dyn ExpressionSerializer,
    ) -> Result<Self, SerializationError> {
        let value = value.into();
        let expression = serializer.serialize(&value)?;
        Ok(Self::Object {
            value,
            expression: Some(expression),
        })
    }

    /// Whether this is [`OptionDefinition::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// The evaluated value, if present.
    pub fn obj(&self) -> Option<&Value> {
        match self {
            Self::Object { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The expression text, if present without serializing.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Expression(text) => Some(text),
            Self::Object { expression, .. } => expression.as_deref(),
            Self::Undefined => None,
        }
    }

    /// Expression text, serializing the value if no text is attached.
    ///
    /// Returns `Ok(None)` for an undefined definition.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the value has no literal form.
    pub fn expression_string(
        &self,
        serializer: &dyn ExpressionSerializer,
    ) -> Result<Option<Cow<'_, str>>, SerializationError> {
        match self {
            Self::Undefined => Ok(None),
            Self::Expression(text) => Ok(Some(Cow::Borrowed(text))),
            Self::Object {
                expression: Some(text),
                ..
            } => Ok(Some(Cow::Borrowed(text))),
            Self::Object {
                value,
                expression: None,
            } => serializer.serialize(value).map(|s| Some(Cow::Owned(s))),
        }
    }

    /// Convert to the expression form, serializing an object if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the value has no literal form.
    pub fn to_expression_form(
        &self,
        serializer: &dyn ExpressionSerializer,
    ) -> Result<Self, SerializationError> {
        Ok(match self.expression_string(serializer)? {
            Some(text) => Self::Expression(text.into_owned()),
            None => Self::Undefined,
        })
    }

    /// Evaluate an expression definition into an object definition.
    ///
    /// Object and undefined definitions are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] with the expression text and the
    /// evaluator's diagnostic when evaluation fails.
    pub fn evaluate(&self, evaluator: &dyn Evaluator) -> Result<Self, EvaluationError> {
        match self {
            Self::Expression(text) => {
                let value = evaluator.eval_expression(text)?;
                Ok(Self::Object {
                    value,
                    expression: Some(text.clone()),
                })
            }
            _ => Ok(self.clone()),
        }
    }

    /// Whether two definitions differ for change tracking.
    ///
    /// Two unevaluated expressions compare by text, two values by
    /// structure, and otherwise by text when both carry it. A value and an
    /// expression with no common representation count as different, as
    /// does any defined/undefined mismatch.
    pub fn differs_from(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => false,
            (Self::Undefined, _) | (_, Self::Undefined) => true,
            (Self::Expression(a), Self::Expression(b)) => a != b,
            (Self::Object { value: a, .. }, Self::Object { value: b, .. }) => a != b,
            _ => match (self.expression(), other.expression()) {
                (Some(a), Some(b)) => a != b,
                _ => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nix::{NixSerializer, testing::FakeEvaluator};
    use serde_json::json;

    #[test]
    fn test_undefined_carries_nothing() {
        let d = OptionDefinition::undefined();
        assert!(d.is_undefined());
        assert_eq!(d.obj(), None);
        assert_eq!(d.expression(), None);
        assert_eq!(d.expression_string(&NixSerializer).unwrap(), None);
        assert_eq!(d.evaluate(&FakeEvaluator::default()).unwrap(), d);
    }

    #[test]
    fn test_from_object_is_lazy() {
        let d = OptionDefinition::from_object("myvalue");
        assert_eq!(d.obj(), Some(&json!("myvalue")));
        assert_eq!(d.expression(), None);
        assert_eq!(
            d.expression_string(&NixSerializer).unwrap().as_deref(),
            Some("\"myvalue\"")
        );

        let eager = OptionDefinition::from_object_with(json!([80, 443]), &NixSerializer).unwrap();
        assert_eq!(eager.expression(), Some("[ 80 443 ]"));
    }

    #[test]
    fn test_from_object_unserializable() {
        let err = OptionDefinition::from_object_with(
            json!({"_type": "derivation", "name": "hello"}),
            &NixSerializer,
        )
        .unwrap_err();
        assert!(err.reason.contains("derivation"));
    }

    #[test]
    fn test_evaluate_expression() {
        let d = OptionDefinition::from_expression("[ 80 443 ]");
        assert_eq!(d.obj(), None);
        let evaluated = d.evaluate(&FakeEvaluator::default()).unwrap();
        assert_eq!(evaluated.obj(), Some(&json!([80, 443])));
        assert_eq!(evaluated.expression(), Some("[ 80 443 ]"));
    }

    #[test]
    fn test_evaluate_failure_keeps_text_and_diagnostic() {
        let evaluator = FakeEvaluator::default().fail("pkgs.vim", "undefined variable 'pkgs'");
        let err = OptionDefinition::from_expression("pkgs.vim")
            .evaluate(&evaluator)
            .unwrap_err();
        assert_eq!(err.expression, "pkgs.vim");
        assert_eq!(err.diagnostic, "undefined variable 'pkgs'");
    }

    #[test]
    fn test_serialize_then_evaluate_roundtrip() {
        let evaluator = FakeEvaluator::default();
        for v in [
            json!(null),
            json!(true),
            json!(-12),
            json!(2.5),
            json!("with \"quotes\" and ${dollar}\n"),
            json!([1, -2, [3], {"a": "b"}]),
            json!({"services.x": {"enable": true}, "ports": []}),
        ] {
            let expr = OptionDefinition::from_object(v.clone())
                .to_expression_form(&NixSerializer)
                .unwrap();
            assert!(matches!(expr, OptionDefinition::Expression(_)));
            let back = expr.evaluate(&evaluator).unwrap();
            assert_eq!(back.obj(), Some(&v));
        }
    }

    #[test]
    fn test_differs_from() {
        let undefined = OptionDefinition::undefined();
        let expr = OptionDefinition::from_expression("[ 80 443 ]");
        let spaced = OptionDefinition::from_expression("[80 443]");
        let obj = OptionDefinition::from_object(json!([80, 443]));
        let evaluated = OptionDefinition::Object {
            value: json!([80, 443]),
            expression: Some("[ 80 443 ]".to_string()),
        };

        assert!(!undefined.differs_from(&OptionDefinition::undefined()));
        assert!(undefined.differs_from(&expr));
        assert!(obj.differs_from(&undefined));
        assert!(!expr.differs_from(&expr.clone()));
        assert!(expr.differs_from(&spaced));
        // values compare structurally regardless of their source text
        assert!(!obj.differs_from(&evaluated));
        // text is the common ground between an expression and a value
        assert!(!expr.differs_from(&evaluated));
        assert!(spaced.differs_from(&evaluated));
        assert!(expr.differs_from(&obj));
    }
}
