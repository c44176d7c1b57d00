//! Application-wide wiring: settings, expression factory, flow handler and
//! flow scope.

use std::fmt;
use std::sync::Arc;

use faces_el::{
    ElContext, ElResolver, ExpressionFactory, FunctionMapper, MapFunctionMapper,
    StandardExpressionFactory,
};
use faces_storage::SessionStore;
use tracing::{info, warn};

use crate::builder::FlowBuilder;
use crate::config::{ClientWindowMode, FacesSettings};
use crate::context::{ClientWindow, FacesContext, FlowScopeResolver, RequestState};
use crate::definition;
use crate::error::FlowError;
use crate::handler::FlowHandler;
use crate::model::Flow;
use crate::scope::{BeanManager, BeanRegistry, FlowListener, FlowScopedContext};

pub struct ApplicationBuilder {
    settings: FacesSettings,
    factory: Arc<dyn ExpressionFactory>,
    bean_manager: Arc<dyn BeanManager>,
    listeners: Vec<Arc<dyn FlowListener>>,
    resolvers: Vec<Arc<dyn ElResolver>>,
    functions: Arc<dyn FunctionMapper>,
}

impl ApplicationBuilder {
    pub fn new(settings: FacesSettings) -> Self {
        Self {
            settings,
            factory: Arc::new(StandardExpressionFactory),
            bean_manager: Arc::new(BeanRegistry::new()),
            listeners: Vec::new(),
            resolvers: Vec::new(),
            functions: Arc::new(MapFunctionMapper::new()),
        }
    }

    pub fn expression_factory(mut self, factory: Arc<dyn ExpressionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn bean_manager(mut self, bean_manager: Arc<dyn BeanManager>) -> Self {
        self.bean_manager = bean_manager;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn FlowListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Add a root resolver consulted after `flowScope`.
    pub fn resolver(mut self, resolver: Arc<dyn ElResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn function_mapper(mut self, functions: Arc<dyn FunctionMapper>) -> Self {
        self.functions = functions;
        self
    }

    pub fn build(self) -> Arc<Application> {
        let scope = FlowScopedContext::new(self.bean_manager, self.listeners);
        Arc::new(Application {
            settings: self.settings,
            factory: self.factory,
            handler: FlowHandler::new(scope),
            resolvers: self.resolvers,
            functions: self.functions,
        })
    }
}

pub struct Application {
    settings: FacesSettings,
    factory: Arc<dyn ExpressionFactory>,
    handler: FlowHandler,
    resolvers: Vec<Arc<dyn ElResolver>>,
    functions: Arc<dyn FunctionMapper>,
}

impl Application {
    pub fn builder(settings: FacesSettings) -> ApplicationBuilder {
        ApplicationBuilder::new(settings)
    }

    pub fn settings(&self) -> &FacesSettings {
        &self.settings
    }

    pub fn expression_factory(&self) -> &Arc<dyn ExpressionFactory> {
        &self.factory
    }

    pub fn flow_handler(&self) -> &FlowHandler {
        &self.handler
    }

    pub fn flow_scoped_context(&self) -> &FlowScopedContext {
        self.handler.scope()
    }

    /// Flows need a client window; `none` is treated as `url` once any flow
    /// is registered.
    pub fn effective_client_window_mode(&self) -> ClientWindowMode {
        match self.settings.client_window_mode {
            ClientWindowMode::None if self.handler.is_enabled() => ClientWindowMode::Url,
            mode => mode,
        }
    }

    /// An EL context for configuration-time work: function mapper and extra
    /// resolvers, no request.
    pub fn el_context(&self) -> ElContext {
        self.resolvers.iter().fold(
            ElContext::new().with_function_mapper(self.functions.clone()),
            |ctx, resolver| ctx.with_resolver(resolver.clone()),
        )
    }

    /// Compile and register a flow.
    pub fn register_flow(&self, builder: &FlowBuilder) -> Result<Arc<Flow>, FlowError> {
        let flow = builder.build(self.factory.as_ref(), &self.el_context())?;
        if self.settings.client_window_mode == ClientWindowMode::None && !self.handler.is_enabled() {
            warn!(
                flow = builder.flow_id(),
                "client-window-mode is 'none' but flows are defined; using 'url'"
            );
        }
        self.handler.add_flow(flow)
    }

    /// Register every flow found under the configured `flow-definitions`
    /// directory. Returns how many were registered.
    pub fn load_flow_definitions(&self) -> Result<usize, FlowError> {
        let Some(dir) = &self.settings.flow_definitions else {
            return Ok(0);
        };
        let builders = definition::discover(dir)?;
        for builder in &builders {
            self.register_flow(builder)?;
        }
        info!(dir = %dir.display(), flows = builders.len(), "loaded flow definitions");
        Ok(builders.len())
    }

    pub fn request(
        &self,
        session: Option<Arc<dyn SessionStore>>,
        client_window_id: Option<&str>,
    ) -> RequestState {
        RequestState::new(session, client_window_id.map(ClientWindow::new))
    }

    /// A context for one request. Its EL context resolves `flowScope` first,
    /// then the application's resolvers.
    pub fn create_context(self: &Arc<Self>, request: RequestState) -> FacesContext {
        let flow_scope = Arc::new(FlowScopeResolver {
            application: self.clone(),
            request: request.clone(),
        });
        let el = self
            .resolvers
            .iter()
            .fold(
                ElContext::new()
                    .with_function_mapper(self.functions.clone())
                    .with_resolver(flow_scope),
                |ctx, resolver| ctx.with_resolver(resolver.clone()),
            );
        FacesContext::new(self.clone(), request, el)
    }

    /// Drop all flow-scoped state of an ending session.
    pub fn session_destroyed(&self, session: &dyn SessionStore) -> Result<(), FlowError> {
        self.handler.scope().session_destroyed(session)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.settings)
            .field("handler", &self.handler)
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}
