//! Per-request state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use faces_el::{ElContext, ElError, ElResolver, Value};
use faces_storage::SessionStore;

use crate::application::Application;

/// Identifies one browser window or tab within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientWindow {
    id: String,
}

impl ClientWindow {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Session handle, client window and request attributes of one request.
///
/// Clones share attributes and flags.
#[derive(Clone, Default)]
pub struct RequestState {
    session: Option<Arc<dyn SessionStore>>,
    client_window: Option<ClientWindow>,
    attributes: Arc<Mutex<HashMap<String, Value>>>,
    reset_flow_handler_state: Arc<AtomicBool>,
}

impl RequestState {
    pub fn new(session: Option<Arc<dyn SessionStore>>, client_window: Option<ClientWindow>) -> Self {
        Self {
            session,
            client_window,
            ..Self::default()
        }
    }

    pub fn session(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session.as_ref()
    }

    pub fn client_window(&self) -> Option<&ClientWindow> {
        self.client_window.as_ref()
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn set_attribute(&self, name: &str, value: Value) -> Option<Value> {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value)
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Set by the navigation layer while it resolves a case that may probe
    /// the flow stack repeatedly.
    pub fn reset_flow_handler_state(&self) -> bool {
        self.reset_flow_handler_state.load(Ordering::SeqCst)
    }

    pub fn set_reset_flow_handler_state(&self, reset: bool) {
        self.reset_flow_handler_state.store(reset, Ordering::SeqCst);
    }
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("session", &self.session.as_ref().map(|s| s.id().to_string()))
            .field("client_window", &self.client_window)
            .field("reset_flow_handler_state", &self.reset_flow_handler_state())
            .finish()
    }
}

// ──────────────────────────────────────────────
// FacesContext
// ──────────────────────────────────────────────

/// Everything a flow operation needs about the current request.
pub struct FacesContext {
    application: Arc<Application>,
    request: RequestState,
    el: ElContext,
    params: HashMap<String, String>,
    view_id: Option<String>,
}

impl FacesContext {
    pub(crate) fn new(application: Arc<Application>, request: RequestState, el: ElContext) -> Self {
        Self {
            application,
            request,
            el,
            params: HashMap::new(),
            view_id: None,
        }
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn request(&self) -> &RequestState {
        &self.request
    }

    pub fn el_context(&self) -> &ElContext {
        &self.el
    }

    /// Replace the EL context, e.g. to attach a view tree or a composite
    /// component stack manager.
    pub fn map_el(mut self, f: impl FnOnce(ElContext) -> ElContext) -> Self {
        self.el = f(self.el);
        self
    }

    pub fn request_parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn with_request_parameter(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn view_id(&self) -> Option<&str> {
        self.view_id.as_deref()
    }

    pub fn set_view_id(&mut self, view_id: impl Into<String>) {
        self.view_id = Some(view_id.into());
    }
}

impl fmt::Debug for FacesContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacesContext")
            .field("request", &self.request)
            .field("params", &self.params)
            .field("view_id", &self.view_id)
            .finish()
    }
}

/// Resolves `flowScope` to the scope map of the current flow.
pub(crate) struct FlowScopeResolver {
    pub(crate) application: Arc<Application>,
    pub(crate) request: RequestState,
}

pub(crate) const FLOW_SCOPE: &str = "flowScope";

impl ElResolver for FlowScopeResolver {
    fn resolve(&self, _ctx: &ElContext, name: &str) -> Result<Option<Value>, ElError> {
        if name != FLOW_SCOPE {
            return Ok(None);
        }
        let handler = self.application.flow_handler();
        let scope = handler
            .scope()
            .current_flow_scope_for(handler, &self.request)?;
        Ok(Some(Value::Scope(scope)))
    }
}
