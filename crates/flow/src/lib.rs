//! faces-flow: reusable conversation units ("flows") and their scope.
//!
//! A [`Flow`] is an immutable graph of nodes built once at configuration
//! time. At runtime the [`FlowHandler`] keeps a per-session, per-window
//! [`FlowStack`] of active flows and moves between them with
//! [`FlowHandler::transition`]. Beans and the `flowScope` map live in a
//! [`FlowScopedContext`] keyed by client window, flow and stack depth.

pub mod application;
pub mod builder;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod handler;
pub mod model;
pub mod scope;
pub mod stack;

pub use application::{Application, ApplicationBuilder};
pub use builder::{FlowBuilder, FlowCallBuilder, MethodCallBuilder, SwitchNodeBuilder};
pub use config::{ClientWindowMode, FacesSettings};
pub use context::{ClientWindow, FacesContext, RequestState};
pub use error::FlowError;
pub use handler::{
    FlowHandler, FlowTarget, FLOW_ID_REQUEST_PARAM, FLOW_RETURN_DEPTH_PARAM,
    TO_FLOW_DOCUMENT_ID_REQUEST_PARAM,
};
pub use model::{
    Flow, FlowCallNode, FlowKey, FlowNode, MethodCallNode, Parameter, ReturnNode, SwitchCase,
    SwitchNode, ViewNode, NULL_FLOW,
};
pub use scope::{
    BeanInstance, BeanManager, BeanRegistry, Contextual, CreationalContext, FlowListener,
    FlowScopedContext,
};
pub use stack::{FlowFrame, FlowStack};
