use thiserror::Error;

pub type Result<T> = std::result::Result<T, ComposeError>;

/// Composition and construction errors.
///
/// Everything here is fatal to the boot sequence: the composition-time
/// variants (`DuplicateModule`, `UnsatisfiedDependency`, `CyclicDependency`)
/// are raised before any module is constructed, `ModuleInit` after a partial
/// construction that has already been rolled back.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("module '{name}' is already registered")]
    DuplicateModule { name: String },

    #[error("module '{module}' requires capability '{capability}', which no registered module provides")]
    UnsatisfiedDependency { module: String, capability: String },

    #[error("dependency cycle detected involving module '{member}'")]
    CyclicDependency { member: String },

    #[error("module '{name}' failed to construct")]
    ModuleInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("service not found: {name}")]
    ServiceNotFound { name: String },

    #[error("failed to downcast service '{name}' to {type_name}")]
    DowncastFailed { name: String, type_name: String },
}
