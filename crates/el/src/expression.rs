//! Expression contracts shared by every evaluator and decorator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::ElContext;
use crate::error::ElError;
use crate::value::Value;

/// Where an expression was authored: document path, line and column.
///
/// Template text parsed with an alias gets line and column `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: String,
    pub line: i32,
    pub column: i32,
}

impl Location {
    pub fn new(path: impl Into<String>, line: i32, column: i32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }

    /// Location synthesized for an aliased document with no position.
    pub fn aliased(alias: impl Into<String>) -> Self {
        Self::new(alias, -1, -1)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{},{}", self.path, self.line, self.column)
    }
}

/// A compiled expression that yields (and possibly accepts) a value.
pub trait ValueExpression: Send + Sync {
    /// The source text the expression was compiled from.
    fn expression_string(&self) -> &str;

    fn get_value(&self, ctx: &ElContext) -> Result<Value, ElError>;

    fn set_value(&self, ctx: &ElContext, value: Value) -> Result<(), ElError>;

    fn is_read_only(&self, ctx: &ElContext) -> Result<bool, ElError>;

    /// True when the source contains no placeholder at all.
    fn is_literal_text(&self) -> bool;

    /// Concrete-type access for decorators that unwrap one another.
    fn as_any(&self) -> &dyn Any;
}

/// A compiled expression that resolves to something invocable.
pub trait MethodExpression: Send + Sync {
    fn expression_string(&self) -> &str;

    fn invoke(&self, ctx: &ElContext, params: &[Value]) -> Result<Value, ElError>;

    fn is_literal_text(&self) -> bool;
}

/// Compiles expression source text.
pub trait ExpressionFactory: Send + Sync {
    fn create_value_expression(
        &self,
        ctx: &ElContext,
        expression: &str,
    ) -> Result<Arc<dyn ValueExpression>, ElError>;

    fn create_method_expression(
        &self,
        ctx: &ElContext,
        expression: &str,
    ) -> Result<Arc<dyn MethodExpression>, ElError>;
}

// ──────────────────────────────────────────────
// Literal expression
// ──────────────────────────────────────────────

/// Expression over plain text; evaluates to the text itself and is never
/// writable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralExpression {
    text: String,
}

impl LiteralExpression {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ValueExpression for LiteralExpression {
    fn expression_string(&self) -> &str {
        &self.text
    }

    fn get_value(&self, _ctx: &ElContext) -> Result<Value, ElError> {
        Ok(Value::Text(self.text.clone()))
    }

    fn set_value(&self, _ctx: &ElContext, _value: Value) -> Result<(), ElError> {
        Err(ElError::PropertyNotWritable {
            expression: self.text.clone(),
        })
    }

    fn is_read_only(&self, _ctx: &ElContext) -> Result<bool, ElError> {
        Ok(true)
    }

    fn is_literal_text(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl MethodExpression for LiteralExpression {
    fn expression_string(&self) -> &str {
        &self.text
    }

    fn invoke(&self, _ctx: &ElContext, _params: &[Value]) -> Result<Value, ElError> {
        Ok(Value::Text(self.text.clone()))
    }

    fn is_literal_text(&self) -> bool {
        true
    }
}

// ──────────────────────────────────────────────
// Closure-backed method
// ──────────────────────────────────────────────

type MethodBody = dyn Fn(&ElContext, &[Value]) -> Result<Value, ElError> + Send + Sync;

/// A method expression backed by a closure. Stored as `Value::Method`, it is
/// what a bean action or a flow initializer resolves to.
#[derive(Clone)]
pub struct FnMethod {
    name: String,
    body: Arc<MethodBody>,
}

impl FnMethod {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ElContext, &[Value]) -> Result<Value, ElError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Wrap into a `Value::Method`.
    pub fn into_value(self) -> Value {
        Value::Method(Arc::new(self))
    }
}

impl fmt::Debug for FnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMethod").field("name", &self.name).finish()
    }
}

impl MethodExpression for FnMethod {
    fn expression_string(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &ElContext, params: &[Value]) -> Result<Value, ElError> {
        (self.body)(ctx, params)
    }

    fn is_literal_text(&self) -> bool {
        false
    }
}
