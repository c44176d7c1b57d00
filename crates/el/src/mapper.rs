//! Variable and function mappers, plus their two-source composites.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ElError;
use crate::expression::ValueExpression;
use crate::value::Value;

/// A function callable from expressions as `prefix:name(args)`.
pub type ElFunction = Arc<dyn Fn(&[Value]) -> Result<Value, ElError> + Send + Sync>;

/// Maps variable names to the expressions they stand for.
pub trait VariableMapper: Send + Sync {
    fn resolve_variable(&self, name: &str) -> Option<Arc<dyn ValueExpression>>;

    /// Bind (or with `None`, unbind) `name`, returning the previous binding.
    fn set_variable(
        &self,
        name: &str,
        expression: Option<Arc<dyn ValueExpression>>,
    ) -> Option<Arc<dyn ValueExpression>>;
}

/// Maps `prefix:name` pairs to functions.
pub trait FunctionMapper: Send + Sync {
    fn resolve_function(&self, prefix: &str, name: &str) -> Option<ElFunction>;

    /// Register a function. Mappers that cannot be written ignore this.
    fn map_function(&self, _prefix: &str, _name: &str, _function: ElFunction) {}
}

// ──────────────────────────────────────────────
// Map-backed mappers
// ──────────────────────────────────────────────

#[derive(Default)]
pub struct MapVariableMapper {
    variables: RwLock<HashMap<String, Arc<dyn ValueExpression>>>,
}

impl MapVariableMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, expression: Arc<dyn ValueExpression>) -> Self {
        self.set_variable(name, Some(expression));
        self
    }

    pub fn len(&self) -> usize {
        self.variables.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VariableMapper for MapVariableMapper {
    fn resolve_variable(&self, name: &str) -> Option<Arc<dyn ValueExpression>> {
        let variables = self.variables.read().unwrap_or_else(|p| p.into_inner());
        variables.get(name).cloned()
    }

    fn set_variable(
        &self,
        name: &str,
        expression: Option<Arc<dyn ValueExpression>>,
    ) -> Option<Arc<dyn ValueExpression>> {
        let mut variables = self.variables.write().unwrap_or_else(|p| p.into_inner());
        match expression {
            Some(expr) => variables.insert(name.to_string(), expr),
            None => variables.remove(name),
        }
    }
}

#[derive(Default)]
pub struct MapFunctionMapper {
    functions: RwLock<HashMap<(String, String), ElFunction>>,
}

impl MapFunctionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(self, prefix: &str, name: &str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ElError> + Send + Sync + 'static,
    {
        self.map_function(prefix, name, Arc::new(function));
        self
    }
}

impl FunctionMapper for MapFunctionMapper {
    fn resolve_function(&self, prefix: &str, name: &str) -> Option<ElFunction> {
        let functions = self.functions.read().unwrap_or_else(|p| p.into_inner());
        functions
            .get(&(prefix.to_string(), name.to_string()))
            .cloned()
    }

    fn map_function(&self, prefix: &str, name: &str, function: ElFunction) {
        let mut functions = self.functions.write().unwrap_or_else(|p| p.into_inner());
        functions.insert((prefix.to_string(), name.to_string()), function);
    }
}

// ──────────────────────────────────────────────
// Composites
// ──────────────────────────────────────────────

/// Resolves through `primary`, then `fallback`. Writes go to `primary` only.
pub struct CompositeVariableMapper {
    primary: Arc<dyn VariableMapper>,
    fallback: Arc<dyn VariableMapper>,
}

impl CompositeVariableMapper {
    pub fn new(primary: Arc<dyn VariableMapper>, fallback: Arc<dyn VariableMapper>) -> Self {
        Self { primary, fallback }
    }
}

impl VariableMapper for CompositeVariableMapper {
    fn resolve_variable(&self, name: &str) -> Option<Arc<dyn ValueExpression>> {
        self.primary
            .resolve_variable(name)
            .or_else(|| self.fallback.resolve_variable(name))
    }

    fn set_variable(
        &self,
        name: &str,
        expression: Option<Arc<dyn ValueExpression>>,
    ) -> Option<Arc<dyn ValueExpression>> {
        self.primary.set_variable(name, expression)
    }
}

/// Resolves through `primary`, then `fallback`. Writes go to `primary` only.
pub struct CompositeFunctionMapper {
    primary: Arc<dyn FunctionMapper>,
    fallback: Arc<dyn FunctionMapper>,
}

impl CompositeFunctionMapper {
    pub fn new(primary: Arc<dyn FunctionMapper>, fallback: Arc<dyn FunctionMapper>) -> Self {
        Self { primary, fallback }
    }
}

impl FunctionMapper for CompositeFunctionMapper {
    fn resolve_function(&self, prefix: &str, name: &str) -> Option<ElFunction> {
        self.primary
            .resolve_function(prefix, name)
            .or_else(|| self.fallback.resolve_function(prefix, name))
    }

    fn map_function(&self, prefix: &str, name: &str, function: ElFunction) {
        self.primary.map_function(prefix, name, function);
    }
}
