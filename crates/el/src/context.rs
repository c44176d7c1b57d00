//! The evaluation context handed to every expression.

use std::fmt;
use std::sync::Arc;

use crate::component::{CompositeComponent, CompositeStackManager, ViewTree};
use crate::error::ElError;
use crate::mapper::{FunctionMapper, MapFunctionMapper, MapVariableMapper, VariableMapper};
use crate::value::Value;

/// Resolves root identifiers that are not bound in the variable mapper.
pub trait ElResolver: Send + Sync {
    /// `Ok(None)` when this resolver does not know `name`.
    fn resolve(&self, ctx: &ElContext, name: &str) -> Result<Option<Value>, ElError>;

    /// Assign to a root identifier. Returns `false` when not handled.
    fn set(&self, _ctx: &ElContext, _name: &str, _value: &Value) -> Result<bool, ElError> {
        Ok(false)
    }
}

/// Mappers, resolvers and the composite-component collaborators in effect
/// for one evaluation. Cheap to clone.
#[derive(Clone)]
pub struct ElContext {
    variables: Arc<dyn VariableMapper>,
    functions: Arc<dyn FunctionMapper>,
    resolvers: Vec<Arc<dyn ElResolver>>,
    stack_manager: Option<Arc<dyn CompositeStackManager>>,
    view: Option<Arc<dyn ViewTree>>,
}

impl Default for ElContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ElContext {
    pub fn new() -> Self {
        Self {
            variables: Arc::new(MapVariableMapper::new()),
            functions: Arc::new(MapFunctionMapper::new()),
            resolvers: Vec::new(),
            stack_manager: None,
            view: None,
        }
    }

    pub fn with_variable_mapper(mut self, mapper: Arc<dyn VariableMapper>) -> Self {
        self.variables = mapper;
        self
    }

    pub fn with_function_mapper(mut self, mapper: Arc<dyn FunctionMapper>) -> Self {
        self.functions = mapper;
        self
    }

    /// Append a resolver. Resolvers are consulted in insertion order.
    pub fn with_resolver(mut self, resolver: Arc<dyn ElResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_stack_manager(mut self, manager: Arc<dyn CompositeStackManager>) -> Self {
        self.stack_manager = Some(manager);
        self
    }

    pub fn with_view(mut self, view: Arc<dyn ViewTree>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn variable_mapper(&self) -> &Arc<dyn VariableMapper> {
        &self.variables
    }

    pub fn function_mapper(&self) -> &Arc<dyn FunctionMapper> {
        &self.functions
    }

    pub fn stack_manager(&self) -> Option<&Arc<dyn CompositeStackManager>> {
        self.stack_manager.as_ref()
    }

    pub fn view(&self) -> Option<&Arc<dyn ViewTree>> {
        self.view.as_ref()
    }

    /// The composite component expressions are currently evaluated against:
    /// top of the evaluation stack, else whatever the view is building.
    pub fn current_composite_component(&self) -> Option<Arc<CompositeComponent>> {
        self.stack_manager
            .as_ref()
            .and_then(|m| m.peek(self))
            .or_else(|| self.view.as_ref().and_then(|v| v.current_composite_component()))
    }

    /// Resolve a root identifier: variable mapper first, then resolvers.
    pub fn resolve_root(&self, name: &str) -> Result<Option<Value>, ElError> {
        if let Some(expr) = self.variables.resolve_variable(name) {
            return expr.get_value(self).map(Some);
        }
        for resolver in &self.resolvers {
            if let Some(value) = resolver.resolve(self, name)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Assign to a root identifier through the same chain.
    pub fn assign_root(&self, name: &str, value: Value) -> Result<(), ElError> {
        if let Some(expr) = self.variables.resolve_variable(name) {
            return expr.set_value(self, value);
        }
        for resolver in &self.resolvers {
            if resolver.set(self, name, &value)? {
                return Ok(());
            }
        }
        Err(ElError::PropertyNotWritable {
            expression: name.to_string(),
        })
    }
}

impl fmt::Debug for ElContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElContext")
            .field("resolvers", &self.resolvers.len())
            .field("stack_manager", &self.stack_manager.is_some())
            .field("view", &self.view.is_some())
            .finish()
    }
}
