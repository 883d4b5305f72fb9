//! Error types for weir.

use thiserror::Error;

/// Result type alias using weir's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for weir operations.
///
/// Assembly-time variants abort topology construction entirely and surface
/// to the operator synchronously. [`Error::Processing`] is the one runtime
/// variant: it is isolated to a single record by the lifecycle runners and
/// never stops a task instance.
#[derive(Error, Debug)]
pub enum Error {
    /// A required configuration property is absent, empty, or not
    /// representable in the demanded type.
    #[error("configuration property '{property}' is missing or empty")]
    ConfigMissing {
        /// Name of the offending property.
        property: String,
    },

    /// The configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(String),

    /// A node identifier is declared more than once within its collection.
    #[error("duplicate node id '{id}'")]
    DuplicateNode {
        /// The reused identifier.
        id: String,
    },

    /// The topology is structurally empty: it lacks sources or sinks.
    #[error("topology has no {0} declared")]
    EmptyTopology(&'static str),

    /// A transform or sink declares no incoming edges.
    #[error("node '{node}' declares no sources")]
    NoSourcesDeclared {
        /// The edge-less node.
        node: String,
    },

    /// An edge references an invalid upstream: valid upstreams are sources
    /// and transforms declared earlier in the document.
    #[error("node '{node}' references unknown upstream '{source_id}'")]
    UnknownUpstream {
        /// The node declaring the edge.
        node: String,
        /// The unresolved upstream identifier.
        source_id: String,
    },

    /// An implementation identifier matched no registered constructor, or
    /// the constructed component has the wrong capability for its collection.
    #[error("unknown component type '{implementation}'")]
    UnknownComponentType {
        /// The implementation identifier that failed to resolve.
        implementation: String,
    },

    /// A grouping declaration is invalid: key-based grouping without a key
    /// field, or an unrecognized strategy string.
    #[error("invalid grouping configuration: {0}")]
    InvalidGroupingConfig(String),

    /// A failure raised by user-supplied processing logic. Logged and
    /// swallowed at the runner boundary; the record is still acknowledged.
    #[error("processing fault: {0}")]
    Processing(String),

    /// A lifecycle entry point was invoked in the wrong state.
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    /// Envelope wire-form (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::Processing`] fault raised by user logic.
    pub fn processing(msg: impl Into<String>) -> Self {
        Error::Processing(msg.into())
    }
}
