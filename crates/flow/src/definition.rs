//! Flow definition documents.
//!
//! A flow can be declared in a JSON document instead of code:
//!
//! ```json
//! {
//!   "id": "booking",
//!   "start-node": "pick",
//!   "views": [{ "id": "pick", "vdl-document": "/booking/pick.xhtml" }],
//!   "flow-returns": [{ "id": "done", "from-outcome": "/home" }],
//!   "flow-calls": [{
//!     "id": "pay",
//!     "flow-reference": { "flow-id": "payment" },
//!     "outbound-parameters": [{ "name": "amount", "value": "#{flowScope.total}" }]
//!   }],
//!   "inbound-parameters": [{ "name": "guest", "value": "#{flowScope.guest}" }]
//! }
//! ```
//!
//! Documents are discovered as `<dir>/<name>/<name>-flow.json`. An empty
//! document declares the flow `<name>` with a single return node.

use std::path::Path;

use serde_json::Value as Json;
use tracing::debug;

use crate::builder::FlowBuilder;
use crate::error::FlowError;

const DEFINITION_SUFFIX: &str = "-flow.json";

// ── Parsing helpers ─────────────────────────────────────────────────

fn required_str(document: &str, obj: &Json, field: &str) -> Result<String, FlowError> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| FlowError::definition(document, format!("missing '{}' field", field)))
}

fn optional_str<'a>(obj: &'a Json, field: &str) -> Option<&'a str> {
    obj.get(field).and_then(|v| v.as_str())
}

fn array<'a>(document: &str, obj: &'a Json, field: &str) -> Result<&'a [Json], FlowError> {
    match obj.get(field) {
        None | Some(Json::Null) => Ok(&[]),
        Some(Json::Array(items)) => Ok(items),
        Some(_) => Err(FlowError::definition(
            document,
            format!("'{}' must be an array", field),
        )),
    }
}

/// Parse one definition document into a builder. `document` names the
/// source in error messages.
pub fn parse_definition(document: &str, json: &Json) -> Result<FlowBuilder, FlowError> {
    if !json.is_object() {
        return Err(FlowError::definition(document, "expected a JSON object"));
    }
    let id = required_str(document, json, "id")?;
    parse_with_id(document, json, &id)
}

fn parse_with_id(document: &str, json: &Json, id: &str) -> Result<FlowBuilder, FlowError> {
    let mut builder = FlowBuilder::new();
    builder.id("", id);

    if let Some(start) = optional_str(json, "start-node") {
        builder.start_node(start);
    }

    for view in array(document, json, "views")? {
        builder.view_node(
            &required_str(document, view, "id")?,
            &required_str(document, view, "vdl-document")?,
        );
    }

    for switch in array(document, json, "switches")? {
        let cases = array(document, switch, "cases")?
            .iter()
            .map(|case| {
                Ok((
                    required_str(document, case, "from-outcome")?,
                    required_str(document, case, "condition")?,
                ))
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        let mut node = builder.switch_node(&required_str(document, switch, "id")?);
        for (outcome, condition) in &cases {
            node = node.case(outcome, condition);
        }
        if let Some(default) = optional_str(switch, "default-outcome") {
            node.default_outcome(default);
        }
    }

    for call in array(document, json, "method-calls")? {
        let parameters = array(document, call, "parameters")?
            .iter()
            .map(|p| {
                p.as_str().map(str::to_string).ok_or_else(|| {
                    FlowError::definition(document, "method-call parameters must be strings")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut node = builder.method_call_node(
            &required_str(document, call, "id")?,
            &required_str(document, call, "method")?,
        );
        for p in &parameters {
            node = node.parameter(p);
        }
        if let Some(default) = optional_str(call, "default-outcome") {
            node.default_outcome(default);
        }
    }

    for ret in array(document, json, "flow-returns")? {
        builder.return_node(
            &required_str(document, ret, "id")?,
            &required_str(document, ret, "from-outcome")?,
        );
    }

    for call in array(document, json, "flow-calls")? {
        let reference = call.get("flow-reference").ok_or_else(|| {
            FlowError::definition(document, "flow-call is missing 'flow-reference'")
        })?;
        let flow_id = required_str(document, reference, "flow-id")?;
        let flow_document_id = optional_str(reference, "flow-document-id").unwrap_or_default();
        let outbound = array(document, call, "outbound-parameters")?
            .iter()
            .map(|p| {
                Ok((
                    required_str(document, p, "name")?,
                    required_str(document, p, "value")?,
                ))
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        let mut node = builder
            .flow_call_node(&required_str(document, call, "id")?)
            .flow_reference(flow_document_id, &flow_id);
        for (name, value) in &outbound {
            node = node.outbound_parameter(name, value);
        }
    }

    for param in array(document, json, "inbound-parameters")? {
        builder.inbound_parameter(
            &required_str(document, param, "name")?,
            &required_str(document, param, "value")?,
        );
    }

    if let Some(method) = optional_str(json, "initializer") {
        builder.initializer(method);
    }
    if let Some(method) = optional_str(json, "finalizer") {
        builder.finalizer(method);
    }
    Ok(builder)
}

/// The flow declared by an empty definition file.
pub fn synthesized_flow(name: &str) -> FlowBuilder {
    let mut builder = FlowBuilder::new();
    builder
        .id("", name)
        .return_node(&format!("{name}-return"), &format!("/{name}-return"));
    builder
}

/// Load the definition file of flow `name`. A document without an `id`
/// takes the flow name.
pub fn load_definition(path: &Path, name: &str) -> Result<FlowBuilder, FlowError> {
    let text = std::fs::read_to_string(path).map_err(|source| FlowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(synthesized_flow(name));
    }
    let document = path.display().to_string();
    let json: Json = serde_json::from_str(&text)
        .map_err(|e| FlowError::definition(&document, e.to_string()))?;
    if !json.is_object() {
        return Err(FlowError::definition(&document, "expected a JSON object"));
    }
    let id = optional_str(&json, "id").unwrap_or(name).to_string();
    parse_with_id(&document, &json, &id)
}

/// Find every `<dir>/<name>/<name>-flow.json`, sorted by flow name.
pub fn discover(dir: &Path) -> Result<Vec<FlowBuilder>, FlowError> {
    let io = |source| FlowError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let entry = entry.map_err(io)?;
        if entry.file_type().map_err(io)?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut builders = Vec::new();
    for name in names {
        let path = dir.join(&name).join(format!("{name}{DEFINITION_SUFFIX}"));
        if path.is_file() {
            debug!(path = %path.display(), "loading flow definition");
            builders.push(load_definition(&path, &name)?);
        }
    }
    Ok(builders)
}
