use std::path::PathBuf;

use faces_el::ElError;
use faces_storage::StorageError;

/// Errors raised while building, loading or running flows.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A required argument was missing or malformed.
    #[error("{0}")]
    IllegalArgument(String),

    #[error("Flow with id \"{id}\" and definingDocumentId \"{defining_document_id}\" already exists.")]
    DuplicateFlow {
        id: String,
        defining_document_id: String,
    },

    /// A flow-scoped bean was requested while its owning flow is not on the
    /// stack.
    #[error("Request to activate bean in flow '{flow}', but that flow is not active.")]
    ContextNotActive { flow: String },

    /// The flow scope was used while no flow is current.
    #[error("no flow is active in this request")]
    NoActiveFlow,

    /// Flow state was written for a request that has no session.
    #[error("no session is available to hold flow state")]
    NoSession,

    #[error("Unable to obtain current ClientWindow.  Is the ClientWindow feature enabled?")]
    ClientWindowUnavailable,

    #[error("FlowScoped bean {bean} must be PassivationCapable, but is not.")]
    NotPassivationCapable { bean: String },

    #[error("start node '{node}' of flow '{flow}' does not exist")]
    StartNodeNotFound { flow: String, node: String },

    /// A flow definition document could not be understood.
    #[error("invalid flow definition '{document}': {message}")]
    Definition { document: String, message: String },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error(transparent)]
    El(#[from] ElError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FlowError {
    pub(crate) fn definition(document: &str, message: impl Into<String>) -> Self {
        FlowError::Definition {
            document: document.to_string(),
            message: message.into(),
        }
    }
}

/// Surface a flow error through the expression layer, keeping expression
/// errors (validation failures in particular) intact.
impl From<FlowError> for ElError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::El(inner) => inner,
            other => ElError::evaluation(other.to_string()),
        }
    }
}
