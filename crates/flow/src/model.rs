//! The flow graph: nodes, parameters and the flow itself.
//!
//! Everything here is immutable once built, except the reverse index from
//! called flow id to flow-call node, which is filled on first use.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use faces_el::{ElContext, ElError, MethodExpression, Value, ValueExpression};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Defining document id marking a navigation that leaves flows rather than
/// entering one.
pub const NULL_FLOW: &str = "jakarta.faces.flow.NullFlow";

// ──────────────────────────────────────────────
// Keys and parameters
// ──────────────────────────────────────────────

/// Identity of a flow: the pair (defining document id, flow id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub defining_document_id: String,
    pub id: String,
}

impl FlowKey {
    pub fn new(defining_document_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            defining_document_id: defining_document_id.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{definingDocumentId={}, id={}}}",
            self.defining_document_id, self.id
        )
    }
}

/// A named value expression, used for inbound, outbound and method-call
/// parameters.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    value: Arc<dyn ValueExpression>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Arc<dyn ValueExpression>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Arc<dyn ValueExpression> {
        &self.value
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &self.value.expression_string())
            .finish()
    }
}

fn outcome_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ──────────────────────────────────────────────
// Nodes
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewNode {
    pub id: String,
    pub vdl_document_id: String,
}

pub struct SwitchCase {
    pub from_outcome: String,
    pub condition: Arc<dyn ValueExpression>,
}

/// Picks an outcome from the first case whose condition holds.
pub struct SwitchNode {
    pub id: String,
    pub cases: Vec<SwitchCase>,
    pub default_outcome: Option<Arc<dyn ValueExpression>>,
}

impl SwitchNode {
    pub fn outcome(&self, ctx: &ElContext) -> Result<Option<String>, ElError> {
        for case in &self.cases {
            if case.condition.get_value(ctx)?.is_truthy() {
                return Ok(Some(case.from_outcome.clone()));
            }
        }
        match &self.default_outcome {
            Some(expr) => Ok(outcome_text(expr.get_value(ctx)?)),
            None => Ok(None),
        }
    }
}

pub struct MethodCallNode {
    pub id: String,
    pub method: Arc<dyn MethodExpression>,
    pub parameters: Vec<Arc<dyn ValueExpression>>,
    pub default_outcome: Option<Arc<dyn ValueExpression>>,
}

impl MethodCallNode {
    /// Invoke the method with its evaluated parameters. A `Null` result
    /// falls back to the default outcome.
    pub fn invoke(&self, ctx: &ElContext) -> Result<Option<String>, ElError> {
        let args = self
            .parameters
            .iter()
            .map(|p| p.get_value(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(outcome) = outcome_text(self.method.invoke(ctx, &args)?) {
            return Ok(Some(outcome));
        }
        match &self.default_outcome {
            Some(expr) => Ok(outcome_text(expr.get_value(ctx)?)),
            None => Ok(None),
        }
    }
}

pub struct ReturnNode {
    pub id: String,
    pub from_outcome: Arc<dyn ValueExpression>,
}

impl ReturnNode {
    pub fn from_outcome(&self, ctx: &ElContext) -> Result<String, ElError> {
        Ok(self.from_outcome.get_value(ctx)?.to_string())
    }
}

/// Calls another flow, passing outbound parameters by name.
pub struct FlowCallNode {
    pub id: String,
    pub called_flow_document_id: Option<Arc<dyn ValueExpression>>,
    pub called_flow_id: Arc<dyn ValueExpression>,
    pub outbound_parameters: BTreeMap<String, Parameter>,
}

impl FlowCallNode {
    pub fn called_flow_id(&self, ctx: &ElContext) -> Result<String, ElError> {
        Ok(self.called_flow_id.get_value(ctx)?.to_string())
    }

    /// Empty when the call names no defining document.
    pub fn called_flow_document_id(&self, ctx: &ElContext) -> Result<String, ElError> {
        match &self.called_flow_document_id {
            Some(expr) => Ok(expr.get_value(ctx)?.to_string()),
            None => Ok(String::new()),
        }
    }

    pub fn outbound_parameters(&self) -> &BTreeMap<String, Parameter> {
        &self.outbound_parameters
    }
}

/// Borrowed view of any node in a flow.
#[derive(Clone, Copy)]
pub enum FlowNode<'a> {
    View(&'a ViewNode),
    Switch(&'a SwitchNode),
    MethodCall(&'a MethodCallNode),
    FlowCall(&'a FlowCallNode),
    Return(&'a ReturnNode),
}

impl FlowNode<'_> {
    pub fn id(&self) -> &str {
        match self {
            FlowNode::View(n) => &n.id,
            FlowNode::Switch(n) => &n.id,
            FlowNode::MethodCall(n) => &n.id,
            FlowNode::FlowCall(n) => &n.id,
            FlowNode::Return(n) => &n.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FlowNode::View(_) => "view",
            FlowNode::Switch(_) => "switch",
            FlowNode::MethodCall(_) => "method-call",
            FlowNode::FlowCall(_) => "flow-call",
            FlowNode::Return(_) => "flow-return",
        }
    }
}

impl fmt::Debug for FlowNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.id())
    }
}

// ──────────────────────────────────────────────
// Flow
// ──────────────────────────────────────────────

/// A reusable conversation unit. Built by [`crate::FlowBuilder`].
pub struct Flow {
    pub(crate) key: FlowKey,
    pub(crate) start_node_id: String,
    pub(crate) views: Vec<ViewNode>,
    pub(crate) switches: BTreeMap<String, SwitchNode>,
    pub(crate) method_calls: Vec<MethodCallNode>,
    pub(crate) flow_calls: BTreeMap<String, FlowCallNode>,
    pub(crate) returns: BTreeMap<String, ReturnNode>,
    pub(crate) inbound_parameters: BTreeMap<String, Parameter>,
    pub(crate) initializer: Option<Arc<dyn MethodExpression>>,
    pub(crate) finalizer: Option<Arc<dyn MethodExpression>>,
    /// called flow id -> flow-call node id
    pub(crate) calls_by_target: OnceCell<HashMap<String, String>>,
}

impl Flow {
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn defining_document_id(&self) -> &str {
        &self.key.defining_document_id
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn views(&self) -> &[ViewNode] {
        &self.views
    }

    pub fn switches(&self) -> &BTreeMap<String, SwitchNode> {
        &self.switches
    }

    pub fn method_calls(&self) -> &[MethodCallNode] {
        &self.method_calls
    }

    pub fn flow_calls(&self) -> &BTreeMap<String, FlowCallNode> {
        &self.flow_calls
    }

    pub fn returns(&self) -> &BTreeMap<String, ReturnNode> {
        &self.returns
    }

    pub fn inbound_parameters(&self) -> &BTreeMap<String, Parameter> {
        &self.inbound_parameters
    }

    pub fn initializer(&self) -> Option<&Arc<dyn MethodExpression>> {
        self.initializer.as_ref()
    }

    pub fn finalizer(&self) -> Option<&Arc<dyn MethodExpression>> {
        self.finalizer.as_ref()
    }

    /// Look a node up by id. Kinds are searched in the order view, switch,
    /// method call, flow call, return; the first hit wins.
    pub fn node(&self, id: &str) -> Option<FlowNode<'_>> {
        if let Some(view) = self.views.iter().find(|v| v.id == id) {
            return Some(FlowNode::View(view));
        }
        if let Some(switch) = self.switches.get(id) {
            return Some(FlowNode::Switch(switch));
        }
        if let Some(call) = self.method_calls.iter().find(|m| m.id == id) {
            return Some(FlowNode::MethodCall(call));
        }
        if let Some(call) = self.flow_calls.get(id) {
            return Some(FlowNode::FlowCall(call));
        }
        self.returns.get(id).map(FlowNode::Return)
    }

    /// The flow-call node of this flow that calls `target`, if any.
    ///
    /// The first call evaluates every node's called flow id and caches the
    /// result for the lifetime of the flow.
    pub fn flow_call(&self, ctx: &ElContext, target: &Flow) -> Result<Option<&FlowCallNode>, ElError> {
        let index = self.calls_by_target.get_or_try_init(|| {
            let mut index = HashMap::new();
            for node in self.flow_calls.values() {
                index.insert(node.called_flow_id(ctx)?, node.id.clone());
            }
            Ok::<_, ElError>(index)
        })?;
        Ok(index
            .get(target.id())
            .and_then(|node_id| self.flow_calls.get(node_id)))
    }

    /// `<windowId>_<flowId>`: the per-window prefix of this flow's scope
    /// storage keys.
    pub fn client_window_flow_id(&self, window_id: &str) -> String {
        format!("{}_{}", window_id, self.key.id)
    }
}

impl PartialEq for Flow {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.start_node_id == other.start_node_id
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("key", &self.key)
            .field("start_node_id", &self.start_node_id)
            .field("views", &self.views.len())
            .field("switches", &self.switches.len())
            .field("method_calls", &self.method_calls.len())
            .field("flow_calls", &self.flow_calls.len())
            .field("returns", &self.returns.len())
            .field(
                "inbound_parameters",
                &self.inbound_parameters.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
