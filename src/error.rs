// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to find type {0}")]
    UnknownType(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("disconnect")]
    Disconnect,

    #[error("operation cancelled")]
    Cancelled,

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("Invalid store configuration: {0}")]
    Config(String),

    #[error("Backing store failed: {0}")]
    Backend(String),
}

impl StoreError {
    /// HTTP status the API layer reports for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::UnknownType(_) | StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Kube(kube::Error::Api(resp)) => {
                StatusCode::from_u16(resp.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == StatusCode::NOT_FOUND
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
