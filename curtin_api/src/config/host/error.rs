//! Validation errors for the host configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum HostConfigurationValidationError {
    #[error(transparent)]
    Storage(#[from] ValidationError),
}
