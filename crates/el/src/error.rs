/// A validator rejected a value while an expression was being invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {message}")]
pub struct ValidationFailure {
    pub message: String,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while parsing or evaluating expressions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ElError {
    /// A `${`/`#{` placeholder is never closed.
    #[error("EL Expression Unbalanced: ... {fragment}")]
    Unbalanced { fragment: String },

    /// The evaluator could not make sense of an expression body.
    #[error("syntax error in '{expression}': {message}")]
    Syntax { expression: String, message: String },

    /// Composite attribute lookups such as `#{cc.attrs.action(1)}` may not
    /// take arguments inside template text.
    #[error("the expression '{expression}' is not legal: composite component attribute lookups may not take arguments")]
    CompositeArgumentsNotLegal { expression: String },

    #[error("method not found: {expression}")]
    MethodNotFound { expression: String },

    #[error("function '{prefix}:{name}' not found")]
    FunctionNotFound { prefix: String, name: String },

    #[error("property not writable: {expression}")]
    PropertyNotWritable { expression: String },

    #[error(transparent)]
    Validation(ValidationFailure),

    /// Generic evaluation failure, optionally carrying what caused it.
    #[error("{message}")]
    Evaluation {
        message: String,
        #[source]
        cause: Option<Box<ElError>>,
    },
}

impl ElError {
    pub fn evaluation(message: impl Into<String>) -> Self {
        ElError::Evaluation {
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap `cause` in an evaluation failure.
    pub fn wrap(message: impl Into<String>, cause: ElError) -> Self {
        ElError::Evaluation {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, ElError::MethodNotFound { .. })
    }

    /// The validation failure behind this error, looking through one
    /// `Evaluation` wrapper.
    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            ElError::Validation(failure) => Some(failure),
            ElError::Evaluation {
                cause: Some(cause), ..
            } => match cause.as_ref() {
                ElError::Validation(failure) => Some(failure),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn unbalanced_message_names_fragment() {
        let err = ElError::Unbalanced {
            fragment: "#{foo".to_string(),
        };
        assert_eq!(err.to_string(), "EL Expression Unbalanced: ... #{foo");
    }

    #[test]
    fn validation_found_through_one_wrapper() {
        let err = ElError::wrap("invoke failed", ElError::Validation(ValidationFailure::new("bad")));
        assert_eq!(err.validation_failure().map(|v| v.message.as_str()), Some("bad"));
        assert!(err.source().is_some());

        let nested = ElError::wrap("outer", err);
        assert!(nested.validation_failure().is_none());
    }

    #[test]
    fn method_not_found_is_not_looked_through() {
        let direct = ElError::MethodNotFound {
            expression: "#{a.b}".to_string(),
        };
        assert!(direct.is_method_not_found());
        assert!(!ElError::wrap("x", direct).is_method_not_found());
    }
}
