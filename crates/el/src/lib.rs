//! faces-el: expression-language plumbing for the faces runtime.
//!
//! The full expression grammar lives behind [`ExpressionFactory`]. This crate
//! decorates and composes it: template text is split into literal runs and
//! placeholders ([`ExpressionText`]), mapper sources are chained
//! ([`CompositeVariableMapper`], [`CompositeFunctionMapper`]), and expressions
//! authored inside composite components push the right component instance
//! before they evaluate ([`ContextualCompositeValueExpression`],
//! [`ContextualCompositeMethodExpression`]).
//!
//! [`StandardExpressionFactory`] is a small evaluator good enough for literal
//! values, property paths and function calls.

pub mod component;
pub mod composite;
pub mod context;
pub mod error;
pub mod expression;
pub mod factory;
pub mod mapper;
pub mod text;
pub mod value;

pub use component::{
    CompositeComponent, CompositeStackManager, ComponentTree, PostAddEvent, StackManager,
    SubscriptionId, ViewTree,
};
pub use composite::{
    CompositeOrigin, ContextualCompositeMethodExpression, ContextualCompositeValueExpression,
    TagValueExpression,
};
pub use context::{ElContext, ElResolver};
pub use error::{ElError, ValidationFailure};
pub use expression::{
    ExpressionFactory, FnMethod, LiteralExpression, Location, MethodExpression, ValueExpression,
};
pub use factory::StandardExpressionFactory;
pub use mapper::{
    CompositeFunctionMapper, CompositeVariableMapper, ElFunction, FunctionMapper,
    MapFunctionMapper, MapVariableMapper, VariableMapper,
};
pub use text::ExpressionText;
pub use value::{ScopeMap, Value};
