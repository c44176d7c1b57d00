//! Composite-component aware expressions evaluated against a live stack
//! manager and view.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use faces_el::{
    ComponentTree, CompositeComponent, CompositeStackManager, ContextualCompositeMethodExpression,
    ContextualCompositeValueExpression, ElContext, ElError, ElResolver, ExpressionFactory,
    FnMethod, Location, MethodExpression, StackManager, StandardExpressionFactory,
    TagValueExpression, ValidationFailure, Value, ValueExpression, ViewTree,
};

/// Resolves `cc` to the current composite component and `actions` to a map
/// of methods.
struct TestResolver {
    attrs: HashMap<String, BTreeMap<String, Value>>,
    actions: BTreeMap<String, Value>,
}

impl ElResolver for TestResolver {
    fn resolve(&self, ctx: &ElContext, name: &str) -> Result<Option<Value>, ElError> {
        match name {
            "cc" => Ok(ctx.current_composite_component().map(|cc| {
                let mut map = BTreeMap::new();
                map.insert("clientId".to_string(), Value::text(cc.client_id()));
                map.insert(
                    "attrs".to_string(),
                    Value::Map(self.attrs.get(cc.client_id()).cloned().unwrap_or_default()),
                );
                Value::Map(map)
            })),
            "actions" => Ok(Some(Value::Map(self.actions.clone()))),
            _ => Ok(None),
        }
    }
}

struct Fixture {
    ctx: ElContext,
    manager: Arc<StackManager>,
    tree: Arc<ComponentTree>,
    outer: Arc<CompositeComponent>,
    inner: Arc<CompositeComponent>,
}

fn fixture(actions: BTreeMap<String, Value>) -> Fixture {
    let outer = Arc::new(CompositeComponent::new("form:outer", "ezcomp", "outer.xhtml"));
    let inner = Arc::new(
        CompositeComponent::new("form:outer:inner", "ezcomp", "inner.xhtml").with_parent(outer.clone()),
    );
    let mut attrs = HashMap::new();
    attrs.insert(
        "form:outer".to_string(),
        BTreeMap::from([("label".to_string(), Value::text("Outer"))]),
    );
    attrs.insert(
        "form:outer:inner".to_string(),
        BTreeMap::from([("label".to_string(), Value::text("Inner"))]),
    );
    let manager = Arc::new(StackManager::new());
    let tree = Arc::new(ComponentTree::new());
    tree.begin_composite(inner.clone());
    let ctx = ElContext::new()
        .with_resolver(Arc::new(TestResolver { attrs, actions }))
        .with_stack_manager(manager.clone())
        .with_view(tree.clone());
    Fixture {
        ctx,
        manager,
        tree,
        outer,
        inner,
    }
}

/// A source expression whose evaluation always fails.
struct FailingSource {
    expression: String,
    error: fn() -> ElError,
}

impl ValueExpression for FailingSource {
    fn expression_string(&self) -> &str {
        &self.expression
    }

    fn get_value(&self, _ctx: &ElContext) -> Result<Value, ElError> {
        Err((self.error)())
    }

    fn set_value(&self, _ctx: &ElContext, _value: Value) -> Result<(), ElError> {
        Err((self.error)())
    }

    fn is_read_only(&self, _ctx: &ElContext) -> Result<bool, ElError> {
        Ok(true)
    }

    fn is_literal_text(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn value_expr(ctx: &ElContext, src: &str) -> Arc<dyn ValueExpression> {
    StandardExpressionFactory.create_value_expression(ctx, src).unwrap()
}

fn method_expr(ctx: &ElContext, src: &str) -> Arc<dyn MethodExpression> {
    StandardExpressionFactory.create_method_expression(ctx, src).unwrap()
}

// ──────────────────────────────────────
// Value expressions
// ──────────────────────────────────────

#[test]
fn value_expression_evaluates_against_located_component() {
    let f = fixture(BTreeMap::new());
    let label = value_expr(&f.ctx, "#{cc.attrs.label}");
    assert_eq!(label.get_value(&f.ctx).unwrap(), Value::text("Inner"));

    let contextual =
        ContextualCompositeValueExpression::new(Location::aliased("/resources/ezcomp/outer.xhtml"), label);
    assert_eq!(contextual.get_value(&f.ctx).unwrap(), Value::text("Outer"));
    assert_eq!(f.manager.evaluation_depth(), 0);
    assert!(contextual.is_read_only(&f.ctx).unwrap());
    assert_eq!(f.manager.evaluation_depth(), 0);
}

#[test]
fn stack_is_popped_when_evaluation_fails() {
    let f = fixture(BTreeMap::new());
    let broken = value_expr(&f.ctx, "#{cc.clientId.length}");
    let contextual =
        ContextualCompositeValueExpression::new(Location::aliased("/resources/ezcomp/outer.xhtml"), broken);
    assert!(matches!(contextual.get_value(&f.ctx), Err(ElError::Evaluation { .. })));
    assert_eq!(f.manager.evaluation_depth(), 0);
    assert!(f.manager.peek(&f.ctx).is_none());
}

// ──────────────────────────────────────
// Method expressions
// ──────────────────────────────────────

#[test]
fn method_not_found_falls_back_to_source_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let save = FnMethod::new("save", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::text("saved"))
    });
    let f = fixture(BTreeMap::from([("save".to_string(), save.into_value())]));

    let source: Arc<dyn ValueExpression> = Arc::new(TagValueExpression::new(
        "action",
        value_expr(&f.ctx, "#{actions.save}"),
    ));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );

    assert_eq!(method.invoke(&f.ctx, &[]).unwrap(), Value::text("saved"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.manager.evaluation_depth(), 0);
}

#[test]
fn unrecovered_fallback_reports_original_error() {
    let f = fixture(BTreeMap::new());
    let source: Arc<dyn ValueExpression> = value_expr(&f.ctx, "#{actions.nothing}");
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    match method.invoke(&f.ctx, &[]) {
        Err(ElError::MethodNotFound { expression }) => assert_eq!(expression, "#{cc.attrs.action}"),
        other => panic!("expected MethodNotFound, got {other:?}"),
    }
}

#[test]
fn fallback_failure_other_than_not_found_propagates() {
    let broken = FnMethod::new("broken", |_, _| Err(ElError::evaluation("database down")));
    let f = fixture(BTreeMap::from([("broken".to_string(), broken.into_value())]));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        value_expr(&f.ctx, "#{actions.broken}"),
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    let err = method.invoke(&f.ctx, &[]).unwrap_err();
    assert_eq!(err.to_string(), "database down");
}

#[test]
fn validation_failure_bypasses_fallback() {
    let fallback_calls = Arc::new(AtomicUsize::new(0));
    let counter = fallback_calls.clone();
    let fallback = FnMethod::new("fallback", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });
    let f = fixture(BTreeMap::from([("fallback".to_string(), fallback.into_value())]));

    let rejecting: Arc<dyn MethodExpression> = Arc::new(FnMethod::new("validate", |_, _| {
        Err(ElError::wrap(
            "invocation failed",
            ElError::Validation(ValidationFailure::new("too short")),
        ))
    }));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        value_expr(&f.ctx, "#{actions.fallback}"),
        rejecting,
    );
    match method.invoke(&f.ctx, &[]) {
        Err(ElError::Validation(failure)) => assert_eq!(failure.message, "too short"),
        other => panic!("expected Validation, got {other:?}"),
    }
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.manager.evaluation_depth(), 0);
}

#[test]
fn validation_failure_from_fallback_is_unwrapped() {
    let rejecting = FnMethod::new("reject", |_, _| {
        Err(ElError::wrap("nested", ElError::Validation(ValidationFailure::new("bad"))))
    });
    let f = fixture(BTreeMap::from([("reject".to_string(), rejecting.into_value())]));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        value_expr(&f.ctx, "#{actions.reject}"),
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    assert!(matches!(method.invoke(&f.ctx, &[]), Err(ElError::Validation(_))));
}

#[test]
fn fallback_runs_after_component_is_popped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let record = FnMethod::new("record", move |ctx, _| {
        let pushed = ctx
            .stack_manager()
            .and_then(|manager| manager.peek(ctx))
            .map(|cc| cc.client_id().to_string());
        log.lock().unwrap().push(pushed);
        Ok(Value::text("recorded"))
    });
    let f = fixture(BTreeMap::from([("record".to_string(), record.into_value())]));

    let located = ContextualCompositeValueExpression::new(
        Location::aliased("/resources/ezcomp/outer.xhtml"),
        value_expr(&f.ctx, "#{actions.record}"),
    );
    let source: Arc<dyn ValueExpression> =
        Arc::new(TagValueExpression::new("action", Arc::new(located)));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );

    assert_eq!(method.invoke(&f.ctx, &[]).unwrap(), Value::text("recorded"));
    assert_eq!(*seen.lock().unwrap(), vec![None::<String>]);
    assert_eq!(f.manager.evaluation_depth(), 0);
}

#[test]
fn validation_failure_from_source_evaluation_is_unwrapped() {
    let f = fixture(BTreeMap::new());
    let source: Arc<dyn ValueExpression> = Arc::new(FailingSource {
        expression: "#{actions.check}".to_string(),
        error: || ElError::wrap("x", ElError::Validation(ValidationFailure::new("bad"))),
    });
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    match method.invoke(&f.ctx, &[]) {
        Err(ElError::Validation(failure)) => assert_eq!(failure.message, "bad"),
        other => panic!("expected Validation, got {other:?}"),
    }
    assert_eq!(f.manager.evaluation_depth(), 0);
}

#[test]
fn source_evaluation_not_found_reports_original_error() {
    let f = fixture(BTreeMap::new());
    let source: Arc<dyn ValueExpression> = Arc::new(FailingSource {
        expression: "#{failing}".to_string(),
        error: || ElError::MethodNotFound {
            expression: "#{failing}".to_string(),
        },
    });
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    match method.invoke(&f.ctx, &[]) {
        Err(ElError::MethodNotFound { expression }) => assert_eq!(expression, "#{cc.attrs.action}"),
        other => panic!("expected MethodNotFound, got {other:?}"),
    }
}

#[test]
fn source_evaluation_failure_other_than_not_found_propagates() {
    let f = fixture(BTreeMap::new());
    let source: Arc<dyn ValueExpression> = Arc::new(FailingSource {
        expression: "#{actions.lookup}".to_string(),
        error: || ElError::evaluation("lookup failed"),
    });
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        source,
        method_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    assert_eq!(method.invoke(&f.ctx, &[]).unwrap_err().to_string(), "lookup failed");
}

#[test]
fn location_from_wrapped_source_selects_component() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let probe: Arc<dyn MethodExpression> = Arc::new(FnMethod::new("probe", move |ctx, _| {
        let id = ctx
            .current_composite_component()
            .map(|cc| cc.client_id().to_string())
            .unwrap_or_default();
        log.lock().unwrap().push(id);
        Ok(Value::Null)
    }));
    let f = fixture(BTreeMap::new());
    let located = ContextualCompositeValueExpression::new(
        Location::aliased("/resources/ezcomp/outer.xhtml"),
        value_expr(&f.ctx, "#{cc.attrs.action}"),
    );
    let source: Arc<dyn ValueExpression> =
        Arc::new(TagValueExpression::new("action", Arc::new(located)));
    let method = ContextualCompositeMethodExpression::with_source(&f.ctx, source, probe);
    method.invoke(&f.ctx, &[]).unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), ["form:outer"]);
}

#[test]
fn client_id_captured_once_and_used_for_lookup() {
    let f = fixture(BTreeMap::new());
    let current = f.ctx.current_composite_component().unwrap();
    assert_eq!(current.client_id(), f.inner.client_id());

    let probe: Arc<dyn MethodExpression> = Arc::new(FnMethod::new("probe", |ctx, _| {
        Ok(ctx
            .current_composite_component()
            .map(|cc| Value::text(cc.client_id()))
            .unwrap_or_default())
    }));
    let method = ContextualCompositeMethodExpression::with_source(
        &f.ctx,
        value_expr(&f.ctx, "#{actions.none}"),
        probe,
    );
    assert!(method.composite_client_id().is_none());
    assert_eq!(f.inner.post_add_listener_count(), 1);

    f.tree.attach(f.inner.clone());
    f.tree.attach(f.outer.clone());
    assert_eq!(method.composite_client_id(), Some("form:outer:inner"));
    assert_eq!(f.inner.post_add_listener_count(), 0);

    // once the view has moved on, the captured id still finds the component
    f.tree.end_composite();
    assert!(f.tree.current_composite_component().is_none());
    assert_eq!(method.invoke(&f.ctx, &[]).unwrap(), Value::text("form:outer:inner"));
    assert_eq!(f.manager.evaluation_depth(), 0);
}
