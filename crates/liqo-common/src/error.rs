//! Error types shared by every liqoctl operation
//!
//! The variants follow the failure classes of the peering protocol: absence
//! of a resource that must exist, ambiguous selectors, safety refusals raised
//! before any mutation, wait timeouts, and plain API failures.

use thiserror::Error;

/// Main error type for Liqo operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API or transport error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Target of a get/replace/patch does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Resource name (namespace-qualified when namespaced)
        name: String,
    },

    /// A resource that a step expects to already exist is missing
    #[error("no {kind} found for cluster {cluster_id}")]
    MissingResource {
        /// Resource kind
        kind: String,
        /// Cluster the lookup was keyed on
        cluster_id: String,
    },

    /// More than one resource matched a selector expected to be unique
    #[error("found {count} {kind} resources for cluster {cluster_id}, expected at most one")]
    Ambiguous {
        /// Resource kind
        kind: String,
        /// Cluster the lookup was keyed on
        cluster_id: String,
        /// Number of matches
        count: usize,
    },

    /// Create failed because the object is already there
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// Optimistic concurrency conflict on update
    #[error("conflict updating {kind} {name}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// A business rule refused the operation before anything was mutated
    #[error("precondition failed: {message}")]
    Precondition {
        /// Why the operation was refused
        message: String,
    },

    /// A wait condition did not hold before the deadline
    #[error("timed out waiting for {condition}")]
    Timeout {
        /// Human-readable name of the awaited condition
        condition: String,
    },

    /// The operation was cancelled from outside
    #[error("canceled while waiting for {condition}")]
    Canceled {
        /// Human-readable name of the awaited condition
        condition: String,
    },

    /// A wait condition reached a terminal failure state
    #[error("{condition} failed: {message}")]
    ConditionFailed {
        /// Human-readable name of the awaited condition
        condition: String,
        /// Failure reported by the resource
        message: String,
    },

    /// Invalid input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Key or certificate handling failure
    #[error("crypto error: {message}")]
    Crypto {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a not-found error for a resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a missing-resource error keyed on a cluster ID
    pub fn missing(kind: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self::MissingResource {
            kind: kind.into(),
            cluster_id: cluster_id.into(),
        }
    }

    /// Create an ambiguous-state error
    pub fn ambiguous(kind: impl Into<String>, cluster_id: impl Into<String>, count: usize) -> Self {
        Self::Ambiguous {
            kind: kind.into(),
            cluster_id: cluster_id.into(),
            count,
        }
    }

    /// Create a precondition (safety refusal) error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a timeout error for the named condition
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Whether this error means the target resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Whether this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "Conflict",
            _ => false,
        }
    }

    /// Whether this error is a wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
