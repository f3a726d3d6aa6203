use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    domain::ResourceError,
    engine::{EngineNotAvailable, EngineSpecError, RegistryError, RenderError},
    infra::error::InfraError,
};

/// Failures of a single render.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    EngineNotAvailable(#[from] EngineNotAvailable),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("engine `{engine}` failed to render `{path}`")]
    Engine {
        engine: String,
        path: String,
        #[source]
        source: RenderError,
    },
    #[error("render worker failed: {0}")]
    Worker(String),
}

impl DispatchError {
    pub fn engine(engine: impl Into<String>, path: impl Into<String>, source: RenderError) -> Self {
        Self::Engine {
            engine: engine.into(),
            path: path.into(),
            source,
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Resource(err) if err.is_not_found())
    }
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: String,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<String>,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<DispatchError> for HttpError {
    fn from(error: DispatchError) -> Self {
        const SOURCE: &str = "infra::http::dispatch_error_to_http_error";
        match &error {
            DispatchError::EngineNotAvailable(inner) => {
                let message = match &inner.engine {
                    Some(_) => inner.to_string(),
                    None => "No engine can display this resource".to_string(),
                };
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, message, &error)
            }
            DispatchError::Resource(ResourceError::NotFound { .. }) => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Resource not found", &error)
            }
            DispatchError::Resource(ResourceError::InvalidPath { .. }) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid resource path",
                &error,
            ),
            DispatchError::Resource(_) | DispatchError::Engine { .. } | DispatchError::Worker(_) => {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    &error,
                )
            }
        }
    }
}

/// Top-level failure of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    EngineSpec(#[from] EngineSpecError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
