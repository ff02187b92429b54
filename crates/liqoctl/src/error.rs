//! Error types for liqoctl

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Liqo(#[from] liqo_common::Error),

    /// A step failed; carries which phase and which cluster it concerned
    #[error("{phase} failed on {cluster} cluster: {source}")]
    Phase {
        phase: String,
        cluster: String,
        source: Box<Error>,
    },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Annotate an error with the phase and cluster it happened in
    pub fn phase(phase: impl Into<String>, cluster: impl Into<String>, source: impl Into<Error>) -> Self {
        Error::Phase {
            phase: phase.into(),
            cluster: cluster.into(),
            source: Box::new(source.into()),
        }
    }

    /// The innermost error, with every phase annotation peeled off
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// The core error at the root, if any
    pub fn liqo(&self) -> Option<&liqo_common::Error> {
        match self.root() {
            Error::Liqo(e) => Some(e),
            _ => None,
        }
    }

    /// Phases this error crossed, outermost first
    pub fn phases(&self) -> Vec<&str> {
        let mut phases = Vec::new();
        let mut current = self;
        while let Error::Phase { phase, source, .. } = current {
            phases.push(phase.as_str());
            current = source;
        }
        phases
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::Liqo(e.into())
    }
}

/// Attach phase context to a result
pub trait PhaseExt<T> {
    /// Wrap the error in [`Error::Phase`]
    fn in_phase(self, phase: &str, cluster: &str) -> Result<T>;
}

impl<T, E: Into<Error>> PhaseExt<T> for std::result::Result<T, E> {
    fn in_phase(self, phase: &str, cluster: &str) -> Result<T> {
        self.map_err(|e| Error::phase(phase, cluster, e))
    }
}
