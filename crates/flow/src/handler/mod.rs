//! The flow state machine.
//!
//! [`FlowHandler`] owns the registry of flows and moves a client window's
//! [`FlowStack`] between them. The stack itself lives in the session; every
//! change is written back before the call returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use faces_el::{ScopeMap, Value};
use faces_storage::SessionStoreExt;
use tracing::{debug, warn};

use crate::context::{FacesContext, RequestState};
use crate::error::FlowError;
use crate::model::{Flow, FlowCallNode, FlowKey, NULL_FLOW};
use crate::scope::FlowScopedContext;
use crate::stack::FlowStack;


/// Request parameter naming the defining document of the flow to enter.
pub const TO_FLOW_DOCUMENT_ID_REQUEST_PARAM: &str = "jftfdi";
/// Request parameter naming the flow to enter.
pub const FLOW_ID_REQUEST_PARAM: &str = "jffi";
/// Request parameter and request attribute carrying the pending return depth.
pub const FLOW_RETURN_DEPTH_PARAM: &str = "jffrd";

/// Where a transition goes.
#[derive(Debug, Clone)]
pub enum FlowTarget {
    /// Leave the current flow(s) through a return node.
    Return,
    /// Leave every active flow.
    Abandon,
    /// Enter a flow.
    Enter(Arc<Flow>),
}

impl FlowTarget {
    pub fn flow(&self) -> Option<&Arc<Flow>> {
        match self {
            FlowTarget::Enter(flow) => Some(flow),
            FlowTarget::Return | FlowTarget::Abandon => None,
        }
    }
}

/// Same flow, or both absent.
fn flows_equal(source: Option<&Arc<Flow>>, target: &FlowTarget) -> bool {
    match (source, target) {
        (None, FlowTarget::Return) => true,
        (Some(a), FlowTarget::Enter(b)) => Arc::ptr_eq(a, b) || **a == **b,
        _ => false,
    }
}

pub struct FlowHandler {
    /// defining document id -> flow id -> flow
    flows: RwLock<HashMap<String, HashMap<String, Arc<Flow>>>>,
    flows_by_id: RwLock<HashMap<String, Vec<Arc<Flow>>>>,
    enabled: AtomicBool,
    scope: FlowScopedContext,
}

impl FlowHandler {
    pub fn new(scope: FlowScopedContext) -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            flows_by_id: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(false),
            scope,
        }
    }

    pub fn scope(&self) -> &FlowScopedContext {
        &self.scope
    }

    // ──────────────────────────────────────────────
    // Registry
    // ──────────────────────────────────────────────

    /// Register a flow. The first registration turns the flow feature on.
    pub fn add_flow(&self, flow: Flow) -> Result<Arc<Flow>, FlowError> {
        if flow.id().is_empty() {
            return Err(FlowError::IllegalArgument(
                "The id of the flow may not be null or zero-length.".to_string(),
            ));
        }
        let flow = Arc::new(flow);
        {
            let mut flows = self.flows.write().unwrap_or_else(PoisonError::into_inner);
            let by_document = flows
                .entry(flow.defining_document_id().to_string())
                .or_default();
            if by_document.contains_key(flow.id()) {
                return Err(FlowError::DuplicateFlow {
                    id: flow.id().to_string(),
                    defining_document_id: flow.defining_document_id().to_string(),
                });
            }
            by_document.insert(flow.id().to_string(), flow.clone());
        }
        self.flows_by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(flow.id().to_string())
            .or_default()
            .push(flow.clone());
        self.enabled.store(true, Ordering::SeqCst);
        debug!(flow = %flow.key(), "registered flow");
        Ok(flow)
    }

    pub fn flow(&self, defining_document_id: &str, id: &str) -> Option<Arc<Flow>> {
        self.flows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(defining_document_id)
            .and_then(|by_id| by_id.get(id))
            .cloned()
    }

    /// Every registered flow with this id, in registration order.
    pub fn flows_with_id(&self, id: &str) -> Vec<Arc<Flow>> {
        self.flows_by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether any flow was registered.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn flow_for_key(&self, key: &FlowKey) -> Option<Arc<Flow>> {
        self.flow(&key.defining_document_id, &key.id)
    }

    // ──────────────────────────────────────────────
    // Stack storage
    // ──────────────────────────────────────────────

    /// The stored stack of this request's window. `None` without a session
    /// or before the first push.
    fn read_stack(&self, request: &RequestState) -> Result<Option<Arc<FlowStack>>, FlowError> {
        let Some(session) = request.session() else {
            return Ok(None);
        };
        let window = request
            .client_window()
            .ok_or(FlowError::ClientWindowUnavailable)?;
        Ok(session.get_typed::<FlowStack>(&FlowStack::session_key_for(window.id()))?)
    }

    /// Apply `change` to the stack and store the result.
    fn update_stack<R>(
        &self,
        request: &RequestState,
        change: impl FnOnce(&mut FlowStack) -> R,
    ) -> Result<R, FlowError> {
        let session = request.session().ok_or(FlowError::NoSession)?;
        let window = request
            .client_window()
            .ok_or(FlowError::ClientWindowUnavailable)?;
        let key = FlowStack::session_key_for(window.id());
        let mut stack = match session.get_typed::<FlowStack>(&key)? {
            Some(stored) => (*stored).clone(),
            None => FlowStack::new(key.clone()),
        };
        let result = change(&mut stack);
        session.put_typed(&key, stack)?;
        Ok(result)
    }

    /// A copy of this window's stack.
    pub fn flow_stack(&self, ctx: &FacesContext) -> Result<Option<FlowStack>, FlowError> {
        Ok(self
            .read_stack(ctx.request())?
            .map(|stack| (*stack).clone()))
    }

    // ──────────────────────────────────────────────
    // Queries
    // ──────────────────────────────────────────────

    /// The flow below the looked-through return frames, with its depth.
    pub(crate) fn position_for(
        &self,
        request: &RequestState,
    ) -> Result<Option<(Arc<Flow>, usize)>, FlowError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let Some(stack) = self.read_stack(request)? else {
            return Ok(None);
        };
        Ok(stack
            .current()
            .and_then(|frame| self.flow_for_key(&frame.flow))
            .map(|flow| (flow, stack.current_flow_depth())))
    }

    pub fn current_flow(&self, ctx: &FacesContext) -> Result<Option<Arc<Flow>>, FlowError> {
        Ok(self.position_for(ctx.request())?.map(|(flow, _)| flow))
    }

    /// Stack size minus the return depth, never below zero.
    pub fn current_flow_depth(&self, ctx: &FacesContext) -> Result<usize, FlowError> {
        Ok(self
            .read_stack(ctx.request())?
            .map_or(0, |stack| stack.current_flow_depth()))
    }

    pub fn last_displayed_view_id(&self, ctx: &FacesContext) -> Result<Option<String>, FlowError> {
        Ok(self
            .read_stack(ctx.request())?
            .and_then(|stack| stack.last_displayed_view_id().map(str::to_string)))
    }

    /// Whether the flow is anywhere on this window's stack.
    pub fn is_active(
        &self,
        ctx: &FacesContext,
        defining_document_id: &str,
        id: &str,
    ) -> Result<bool, FlowError> {
        let key = FlowKey::new(defining_document_id, id);
        Ok(self
            .read_stack(ctx.request())?
            .is_some_and(|stack| stack.contains(&key)))
    }

    pub fn current_flow_scope(&self, ctx: &FacesContext) -> Result<ScopeMap, FlowError> {
        self.scope.current_flow_scope_for(self, ctx.request())
    }

    // ──────────────────────────────────────────────
    // Return mode
    // ──────────────────────────────────────────────

    pub fn push_return_mode(&self, ctx: &FacesContext) -> Result<(), FlowError> {
        let request = ctx.request();
        let pending = request
            .attribute(FLOW_RETURN_DEPTH_PARAM)
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        request.set_attribute(FLOW_RETURN_DEPTH_PARAM, Value::Int(pending + 1));
        self.update_stack(request, FlowStack::enter_return_mode)
    }

    /// Undo [`push_return_mode`](Self::push_return_mode). The pending
    /// request-level depth is only decremented while the navigation layer
    /// has set the reset flag.
    pub fn pop_return_mode(&self, ctx: &FacesContext) -> Result<(), FlowError> {
        let request = ctx.request();
        if request.reset_flow_handler_state() {
            match request
                .attribute(FLOW_RETURN_DEPTH_PARAM)
                .and_then(|v| v.as_int())
            {
                Some(pending) if pending > 1 => {
                    request.set_attribute(FLOW_RETURN_DEPTH_PARAM, Value::Int(pending - 1));
                }
                Some(_) => {
                    request.remove_attribute(FLOW_RETURN_DEPTH_PARAM);
                }
                None => {}
            }
        }
        self.update_stack(request, FlowStack::leave_return_mode)
    }

    /// Remove and return the pending return depth of this request.
    pub fn and_clear_return_mode_depth(&self, ctx: &FacesContext) -> usize {
        take_return_depth(ctx.request())
    }

    // ──────────────────────────────────────────────
    // Transitions
    // ──────────────────────────────────────────────

    /// Move from `source` to `target`.
    ///
    /// Outbound parameters of `call_node` that the target declares inbound
    /// are evaluated first, in the scope of the flow being left. Then frames
    /// are popped, the target is pushed, the captured values are assigned
    /// and the target's initializer runs.
    pub fn transition(
        &self,
        ctx: &FacesContext,
        source: Option<&Arc<Flow>>,
        target: &FlowTarget,
        call_node: Option<&FlowCallNode>,
        to_view_id: &str,
    ) -> Result<(), FlowError> {
        if !self.is_enabled() {
            return Ok(());
        }
        if flows_equal(source, target) {
            debug!(to_view_id, "transition within the same flow");
            return Ok(());
        }

        let el = ctx.el_context();
        let mut evaluated = Vec::new();
        if let (Some(call), FlowTarget::Enter(flow)) = (call_node, target) {
            let inbound = flow.inbound_parameters();
            for (name, param) in call.outbound_parameters() {
                if inbound.contains_key(name) {
                    evaluated.push((name.clone(), param.value().get_value(el)?));
                }
            }
        }

        self.perform_pops(ctx, source, target)?;
        if let FlowTarget::Enter(flow) = target {
            self.push_flow(ctx, flow, to_view_id, evaluated)?;
        }
        Ok(())
    }

    fn perform_pops(
        &self,
        ctx: &FacesContext,
        source: Option<&Arc<Flow>>,
        target: &FlowTarget,
    ) -> Result<(), FlowError> {
        let Some(source) = source else {
            return Ok(());
        };
        let pops = match target {
            FlowTarget::Return => take_return_depth(ctx.request()),
            FlowTarget::Abandon => self
                .read_stack(ctx.request())?
                .map_or(0, |stack| stack.size()),
            FlowTarget::Enter(flow) => {
                usize::from(source.flow_call(ctx.el_context(), flow)?.is_none())
            }
        };
        debug!(source = %source.key(), pops, "leaving flows");
        for _ in 0..pops {
            self.pop_flow(ctx)?;
        }
        Ok(())
    }

    fn push_flow(
        &self,
        ctx: &FacesContext,
        flow: &Arc<Flow>,
        view_id: &str,
        evaluated: Vec<(String, Value)>,
    ) -> Result<(), FlowError> {
        let request = ctx.request();
        let el = ctx.el_context();
        self.update_stack(request, |stack| {
            stack.push(flow.key().clone(), Some(view_id.to_string()))
        })?;
        debug!(flow = %flow.key(), view_id, "entered flow");

        if let Some((current, depth)) = self.position_for(request)? {
            self.scope.flow_entered(request, &current, depth)?;
        }
        let inbound = flow.inbound_parameters();
        for (name, value) in evaluated {
            if let Some(param) = inbound.get(&name) {
                param.value().set_value(el, value)?;
            }
        }
        if let Some(initializer) = flow.initializer() {
            initializer.invoke(el, &[])?;
        }
        Ok(())
    }

    /// Finalize and remove the top frame.
    fn pop_flow(&self, ctx: &FacesContext) -> Result<(), FlowError> {
        let request = ctx.request();
        let Some(stack) = self.read_stack(request)? else {
            return Ok(());
        };
        if let Some(top) = stack.peek().and_then(|frame| self.flow_for_key(&frame.flow)) {
            if let Some(finalizer) = top.finalizer() {
                finalizer.invoke(ctx.el_context(), &[])?;
            }
            self.scope.flow_exited(request, &top, stack.size())?;
        }
        let popped = self.update_stack(request, FlowStack::pop)?;
        if let Some(frame) = popped {
            debug!(flow = %frame.flow, "left flow");
        }
        Ok(())
    }

    /// Transition driven by the client-window request parameters `jftfdi`,
    /// `jffi` and `jffrd`. Without `jftfdi` nothing happens.
    pub fn client_window_transition(&self, ctx: &FacesContext) -> Result<(), FlowError> {
        let Some(to_document) = ctx.request_parameter(TO_FLOW_DOCUMENT_ID_REQUEST_PARAM) else {
            return Ok(());
        };
        let source = self.current_flow(ctx)?;
        let mut call_node = None;
        let target = match ctx.request_parameter(FLOW_ID_REQUEST_PARAM) {
            Some(flow_id) if to_document != NULL_FLOW => {
                let Some(flow) = self.flow(to_document, flow_id) else {
                    warn!(
                        defining_document_id = to_document,
                        flow_id, "client window names an unknown flow"
                    );
                    return Ok(());
                };
                if let Some(source) = &source {
                    call_node = source.flow_call(ctx.el_context(), &flow)?;
                }
                FlowTarget::Enter(flow)
            }
            _ => {
                let raw = ctx.request_parameter(FLOW_RETURN_DEPTH_PARAM).unwrap_or_default();
                let depth: i64 = raw.trim().parse().map_err(|_| {
                    FlowError::IllegalArgument(format!(
                        "invalid {FLOW_RETURN_DEPTH_PARAM} value '{raw}'"
                    ))
                })?;
                ctx.request()
                    .set_attribute(FLOW_RETURN_DEPTH_PARAM, Value::Int(depth));
                FlowTarget::Return
            }
        };
        let view_id = ctx.view_id().unwrap_or_default();
        self.transition(ctx, source.as_ref(), &target, call_node, view_id)
    }
}

fn take_return_depth(request: &RequestState) -> usize {
    request
        .remove_attribute(FLOW_RETURN_DEPTH_PARAM)
        .and_then(|v| v.as_int())
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

impl fmt::Debug for FlowHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flows = self.flows.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = flows
            .values()
            .flat_map(|by_id| by_id.values().map(|flow| flow.key().to_string()))
            .collect();
        keys.sort();
        f.debug_struct("FlowHandler")
            .field("flows", &keys)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
