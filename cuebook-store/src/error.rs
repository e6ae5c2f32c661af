use thiserror::Error;

use cuebook_core::ScriptError;

use crate::storage::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The service spawns its rebuild worker on the ambient tokio runtime.
    #[error("No tokio runtime: {0}")]
    NoRuntime(String),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Script(ScriptError::NotFound { .. }))
    }
}
