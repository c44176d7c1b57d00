//! Programmatic flow construction.
//!
//! A [`FlowBuilder`] only records strings; [`FlowBuilder::build`] compiles
//! every expression through an [`ExpressionFactory`] and produces an
//! immutable [`Flow`].

use std::collections::BTreeMap;
use std::sync::Arc;

use faces_el::{ElContext, ExpressionFactory, ValueExpression};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::FlowError;
use crate::model::{
    Flow, FlowCallNode, FlowKey, MethodCallNode, Parameter, ReturnNode, SwitchCase, SwitchNode,
    ViewNode,
};

#[derive(Debug, Clone, Default)]
struct SwitchSpec {
    id: String,
    cases: Vec<(String, String)>,
    default_outcome: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MethodCallSpec {
    id: String,
    method: String,
    parameters: Vec<String>,
    default_outcome: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FlowCallSpec {
    id: String,
    flow_document_id: Option<String>,
    flow_id: String,
    outbound: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct FlowBuilder {
    defining_document_id: String,
    id: String,
    start_node: Option<String>,
    views: Vec<(String, String)>,
    switches: Vec<SwitchSpec>,
    method_calls: Vec<MethodCallSpec>,
    flow_calls: Vec<FlowCallSpec>,
    returns: Vec<(String, String)>,
    inbound: Vec<(String, String)>,
    initializer: Option<String>,
    finalizer: Option<String>,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&mut self, defining_document_id: &str, id: &str) -> &mut Self {
        self.defining_document_id = defining_document_id.to_string();
        self.id = id.to_string();
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.id
    }

    pub fn defining_document_id(&self) -> &str {
        &self.defining_document_id
    }

    pub fn view_node(&mut self, id: &str, vdl_document_id: &str) -> &mut Self {
        self.views.push((id.to_string(), vdl_document_id.to_string()));
        self
    }

    pub fn switch_node(&mut self, id: &str) -> SwitchNodeBuilder<'_> {
        self.switches.push(SwitchSpec {
            id: id.to_string(),
            ..SwitchSpec::default()
        });
        let index = self.switches.len() - 1;
        SwitchNodeBuilder {
            spec: &mut self.switches[index],
        }
    }

    pub fn return_node(&mut self, id: &str, from_outcome: &str) -> &mut Self {
        self.returns.push((id.to_string(), from_outcome.to_string()));
        self
    }

    pub fn method_call_node(&mut self, id: &str, method: &str) -> MethodCallBuilder<'_> {
        self.method_calls.push(MethodCallSpec {
            id: id.to_string(),
            method: method.to_string(),
            ..MethodCallSpec::default()
        });
        let index = self.method_calls.len() - 1;
        MethodCallBuilder {
            spec: &mut self.method_calls[index],
        }
    }

    pub fn flow_call_node(&mut self, id: &str) -> FlowCallBuilder<'_> {
        self.flow_calls.push(FlowCallSpec {
            id: id.to_string(),
            ..FlowCallSpec::default()
        });
        let index = self.flow_calls.len() - 1;
        FlowCallBuilder {
            spec: &mut self.flow_calls[index],
        }
    }

    /// Declare an inbound parameter. `value` is the expression the passed
    /// value is assigned to on entry, e.g. `#{flowScope.greeting}`.
    pub fn inbound_parameter(&mut self, name: &str, value: &str) -> &mut Self {
        self.inbound.push((name.to_string(), value.to_string()));
        self
    }

    pub fn initializer(&mut self, method: &str) -> &mut Self {
        self.initializer = Some(method.to_string());
        self
    }

    pub fn finalizer(&mut self, method: &str) -> &mut Self {
        self.finalizer = Some(method.to_string());
        self
    }

    pub fn start_node(&mut self, id: &str) -> &mut Self {
        self.start_node = Some(id.to_string());
        self
    }

    /// Compile the recorded nodes into a [`Flow`].
    pub fn build(&self, factory: &dyn ExpressionFactory, ctx: &ElContext) -> Result<Flow, FlowError> {
        if self.id.is_empty() {
            return Err(FlowError::IllegalArgument(
                "The id of the flow may not be null or zero-length.".to_string(),
            ));
        }
        let value = |expr: &str| -> Result<Arc<dyn ValueExpression>, FlowError> {
            Ok(factory.create_value_expression(ctx, expr)?)
        };
        let optional = |expr: &Option<String>| -> Result<Option<Arc<dyn ValueExpression>>, FlowError> {
            expr.as_deref().map(|e| value(e)).transpose()
        };

        let mut views: Vec<ViewNode> = self
            .views
            .iter()
            .map(|(id, vdl)| ViewNode {
                id: id.clone(),
                vdl_document_id: vdl.clone(),
            })
            .collect();

        let mut switches = BTreeMap::new();
        for spec in &self.switches {
            let cases = spec
                .cases
                .iter()
                .map(|(outcome, condition)| {
                    Ok(SwitchCase {
                        from_outcome: outcome.clone(),
                        condition: value(condition)?,
                    })
                })
                .collect::<Result<Vec<_>, FlowError>>()?;
            switches.insert(
                spec.id.clone(),
                SwitchNode {
                    id: spec.id.clone(),
                    cases,
                    default_outcome: optional(&spec.default_outcome)?,
                },
            );
        }

        let mut method_calls = Vec::with_capacity(self.method_calls.len());
        for spec in &self.method_calls {
            method_calls.push(MethodCallNode {
                id: spec.id.clone(),
                method: factory.create_method_expression(ctx, &spec.method)?,
                parameters: spec
                    .parameters
                    .iter()
                    .map(|p| value(p))
                    .collect::<Result<Vec<_>, _>>()?,
                default_outcome: optional(&spec.default_outcome)?,
            });
        }

        let mut flow_calls = BTreeMap::new();
        for spec in &self.flow_calls {
            let mut outbound_parameters = BTreeMap::new();
            for (name, expr) in &spec.outbound {
                outbound_parameters.insert(name.clone(), Parameter::new(name.clone(), value(expr)?));
            }
            flow_calls.insert(
                spec.id.clone(),
                FlowCallNode {
                    id: spec.id.clone(),
                    called_flow_document_id: optional(&spec.flow_document_id)?,
                    called_flow_id: value(&spec.flow_id)?,
                    outbound_parameters,
                },
            );
        }

        let mut returns = BTreeMap::new();
        for (id, outcome) in &self.returns {
            returns.insert(
                id.clone(),
                ReturnNode {
                    id: id.clone(),
                    from_outcome: value(outcome)?,
                },
            );
        }

        let mut inbound_parameters = BTreeMap::new();
        for (name, expr) in &self.inbound {
            inbound_parameters.insert(name.clone(), Parameter::new(name.clone(), value(expr)?));
        }

        let initializer = self
            .initializer
            .as_deref()
            .map(|m| factory.create_method_expression(ctx, m))
            .transpose()?;
        let finalizer = self
            .finalizer
            .as_deref()
            .map(|m| factory.create_method_expression(ctx, m))
            .transpose()?;

        let mut flow = Flow {
            key: FlowKey::new(self.defining_document_id.clone(), self.id.clone()),
            start_node_id: String::new(),
            views: Vec::new(),
            switches,
            method_calls,
            flow_calls,
            returns,
            inbound_parameters,
            initializer,
            finalizer,
            calls_by_target: OnceCell::new(),
        };

        match &self.start_node {
            Some(start) => {
                flow.views = views;
                if flow.node(start).is_none() {
                    return Err(FlowError::StartNodeNotFound {
                        flow: self.id.clone(),
                        node: start.clone(),
                    });
                }
                flow.start_node_id = start.clone();
            }
            None => {
                if !views.iter().any(|v| v.id == self.id) {
                    views.push(ViewNode {
                        id: self.id.clone(),
                        vdl_document_id: format!("/{0}/{0}.xhtml", self.id),
                    });
                }
                flow.views = views;
                flow.start_node_id = self.id.clone();
            }
        }

        debug!(flow = %flow.key, start = %flow.start_node_id, "built flow");
        Ok(flow)
    }
}

// ──────────────────────────────────────────────
// Node sub-builders
// ──────────────────────────────────────────────

pub struct SwitchNodeBuilder<'a> {
    spec: &'a mut SwitchSpec,
}

impl SwitchNodeBuilder<'_> {
    /// Add a case: `from_outcome` is chosen when `condition` evaluates true.
    pub fn case(self, from_outcome: &str, condition: &str) -> Self {
        self.spec
            .cases
            .push((from_outcome.to_string(), condition.to_string()));
        self
    }

    pub fn default_outcome(self, outcome: &str) -> Self {
        self.spec.default_outcome = Some(outcome.to_string());
        self
    }
}

pub struct MethodCallBuilder<'a> {
    spec: &'a mut MethodCallSpec,
}

impl MethodCallBuilder<'_> {
    pub fn parameter(self, value: &str) -> Self {
        self.spec.parameters.push(value.to_string());
        self
    }

    pub fn default_outcome(self, outcome: &str) -> Self {
        self.spec.default_outcome = Some(outcome.to_string());
        self
    }
}

pub struct FlowCallBuilder<'a> {
    spec: &'a mut FlowCallSpec,
}

impl FlowCallBuilder<'_> {
    /// Name the called flow. An empty document id means "no defining document".
    pub fn flow_reference(self, flow_document_id: &str, flow_id: &str) -> Self {
        self.spec.flow_document_id =
            (!flow_document_id.is_empty()).then(|| flow_document_id.to_string());
        self.spec.flow_id = flow_id.to_string();
        self
    }

    pub fn outbound_parameter(self, name: &str, value: &str) -> Self {
        self.spec.outbound.push((name.to_string(), value.to_string()));
        self
    }
}
