//! Expressions authored inside composite components.
//!
//! `#{cc.attrs.label}` means different things depending on which composite
//! component instance is being evaluated. The decorators here locate that
//! instance before every call, push it on the stack manager and pop it
//! afterwards, on success and on failure alike.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::component::CompositeComponent;
use crate::context::ElContext;
use crate::error::ElError;
use crate::expression::{Location, MethodExpression, ValueExpression};
use crate::value::Value;

// ──────────────────────────────────────────────
// Push guard
// ──────────────────────────────────────────────

/// Pops the stack manager on drop if the matching push succeeded.
struct CompositePush<'a> {
    ctx: &'a ElContext,
    pushed: bool,
}

impl<'a> CompositePush<'a> {
    fn enter(ctx: &'a ElContext, component: Option<Arc<CompositeComponent>>) -> Self {
        let pushed = match ctx.stack_manager() {
            Some(manager) => manager.push(ctx, component),
            None => false,
        };
        Self { ctx, pushed }
    }
}

impl Drop for CompositePush<'_> {
    fn drop(&mut self) {
        if self.pushed {
            if let Some(manager) = self.ctx.stack_manager() {
                manager.pop(self.ctx);
            }
        }
    }
}

fn find_using_location(ctx: &ElContext, location: &Location) -> Option<Arc<CompositeComponent>> {
    ctx.stack_manager()
        .and_then(|manager| manager.find_using_location(ctx, location))
}

// ──────────────────────────────────────────────
// Tag value expression
// ──────────────────────────────────────────────

/// A value expression together with the tag attribute it was written in.
pub struct TagValueExpression {
    attribute: String,
    wrapped: Arc<dyn ValueExpression>,
}

impl TagValueExpression {
    pub fn new(attribute: impl Into<String>, wrapped: Arc<dyn ValueExpression>) -> Self {
        Self {
            attribute: attribute.into(),
            wrapped,
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn wrapped(&self) -> &Arc<dyn ValueExpression> {
        &self.wrapped
    }
}

impl ValueExpression for TagValueExpression {
    fn expression_string(&self) -> &str {
        self.wrapped.expression_string()
    }

    fn get_value(&self, ctx: &ElContext) -> Result<Value, ElError> {
        self.wrapped.get_value(ctx)
    }

    fn set_value(&self, ctx: &ElContext, value: Value) -> Result<(), ElError> {
        self.wrapped.set_value(ctx, value)
    }

    fn is_read_only(&self, ctx: &ElContext) -> Result<bool, ElError> {
        self.wrapped.is_read_only(ctx)
    }

    fn is_literal_text(&self) -> bool {
        self.wrapped.is_literal_text()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ──────────────────────────────────────────────
// Contextual composite value expression
// ──────────────────────────────────────────────

/// Value expression that evaluates against the composite component defined
/// at `location`.
pub struct ContextualCompositeValueExpression {
    location: Location,
    wrapped: Arc<dyn ValueExpression>,
}

impl ContextualCompositeValueExpression {
    pub fn new(location: Location, wrapped: Arc<dyn ValueExpression>) -> Self {
        Self { location, wrapped }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn wrapped(&self) -> &Arc<dyn ValueExpression> {
        &self.wrapped
    }

    fn enter<'a>(&self, ctx: &'a ElContext) -> CompositePush<'a> {
        CompositePush::enter(ctx, find_using_location(ctx, &self.location))
    }
}

impl ValueExpression for ContextualCompositeValueExpression {
    fn expression_string(&self) -> &str {
        self.wrapped.expression_string()
    }

    fn get_value(&self, ctx: &ElContext) -> Result<Value, ElError> {
        let _pushed = self.enter(ctx);
        self.wrapped.get_value(ctx)
    }

    fn set_value(&self, ctx: &ElContext, value: Value) -> Result<(), ElError> {
        let _pushed = self.enter(ctx);
        self.wrapped.set_value(ctx, value)
    }

    fn is_read_only(&self, ctx: &ElContext) -> Result<bool, ElError> {
        let _pushed = self.enter(ctx);
        self.wrapped.is_read_only(ctx)
    }

    fn is_literal_text(&self) -> bool {
        self.wrapped.is_literal_text()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ──────────────────────────────────────────────
// Contextual composite method expression
// ──────────────────────────────────────────────

/// How a contextual method expression finds its composite component.
#[derive(Clone)]
pub enum CompositeOrigin {
    /// The method expression itself was authored at this location.
    Location(Location),
    /// The method expression came from this value expression, typically a
    /// [`TagValueExpression`] around a [`ContextualCompositeValueExpression`].
    Source(Arc<dyn ValueExpression>),
}

/// Method expression that invokes against the right composite component and
/// can retry one nesting level up when the method is not found.
pub struct ContextualCompositeMethodExpression {
    origin: CompositeOrigin,
    delegate: Arc<dyn MethodExpression>,
    cc_client_id: Arc<OnceCell<String>>,
}

impl ContextualCompositeMethodExpression {
    pub fn with_location(
        ctx: &ElContext,
        location: Location,
        delegate: Arc<dyn MethodExpression>,
    ) -> Self {
        Self::new(ctx, CompositeOrigin::Location(location), delegate)
    }

    pub fn with_source(
        ctx: &ElContext,
        source: Arc<dyn ValueExpression>,
        delegate: Arc<dyn MethodExpression>,
    ) -> Self {
        Self::new(ctx, CompositeOrigin::Source(source), delegate)
    }

    /// Subscribes to the current composite component so its client id is
    /// captured the first time it is attached to the view.
    pub fn new(ctx: &ElContext, origin: CompositeOrigin, delegate: Arc<dyn MethodExpression>) -> Self {
        let cc_client_id = Arc::new(OnceCell::new());
        if let Some(cc) = ctx.current_composite_component() {
            let slot = cc_client_id.clone();
            cc.subscribe_post_add(move |event| {
                let _ = slot.set(event.component().client_id().to_string());
                event.unsubscribe();
            });
        }
        Self {
            origin,
            delegate,
            cc_client_id,
        }
    }

    pub fn origin(&self) -> &CompositeOrigin {
        &self.origin
    }

    /// Client id captured from the post-add event, if it has fired.
    pub fn composite_client_id(&self) -> Option<&str> {
        self.cc_client_id.get().map(String::as_str)
    }

    fn source_location(&self) -> Option<&Location> {
        match &self.origin {
            CompositeOrigin::Location(location) => Some(location),
            CompositeOrigin::Source(source) => {
                let any = source.as_any();
                let contextual = match any.downcast_ref::<TagValueExpression>() {
                    Some(tag) => tag
                        .wrapped()
                        .as_any()
                        .downcast_ref::<ContextualCompositeValueExpression>(),
                    None => any.downcast_ref::<ContextualCompositeValueExpression>(),
                };
                contextual.map(|c| c.location())
            }
        }
    }

    fn locate(&self, ctx: &ElContext) -> Option<Arc<CompositeComponent>> {
        self.source_location()
            .and_then(|location| find_using_location(ctx, location))
            .or_else(|| {
                let client_id = self.cc_client_id.get()?;
                ctx.view()?.find_component(client_id)
            })
    }

    fn invoke_fallback(
        &self,
        ctx: &ElContext,
        source: &Arc<dyn ValueExpression>,
        params: &[Value],
        original: ElError,
    ) -> Result<Value, ElError> {
        let attempt = source.get_value(ctx).and_then(|value| match value {
            Value::Method(fallback) => fallback.invoke(ctx, params).map(Some),
            _ => Ok(None),
        });
        match attempt {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(original),
            Err(err) => {
                if let Some(failure) = err.validation_failure() {
                    return Err(ElError::Validation(failure.clone()));
                }
                warn!(error = %original, "composite method invocation failed");
                warn!(
                    error = %err,
                    expression = source.expression_string(),
                    "fallback method invocation failed"
                );
                if err.is_method_not_found() {
                    Err(original)
                } else {
                    Err(err)
                }
            }
        }
    }
}

impl MethodExpression for ContextualCompositeMethodExpression {
    fn expression_string(&self) -> &str {
        self.delegate.expression_string()
    }

    fn invoke(&self, ctx: &ElContext, params: &[Value]) -> Result<Value, ElError> {
        let result = {
            let _pushed = CompositePush::enter(ctx, self.locate(ctx));
            self.delegate.invoke(ctx, params)
        };
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some(failure) = err.validation_failure() {
                    return Err(ElError::Validation(failure.clone()));
                }
                match &self.origin {
                    CompositeOrigin::Source(source) if err.is_method_not_found() => {
                        self.invoke_fallback(ctx, source, params, err)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    fn is_literal_text(&self) -> bool {
        self.delegate.is_literal_text()
    }
}
