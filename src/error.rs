use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use log::error;
use std::error::Error as StdError;
use thiserror::Error;

use crate::models::api::ErrorResponse;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failures while turning an upload into a text fragment.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unreadable image: {0}")]
    Decode(String),

    #[error("captioning model failed: {0}")]
    Model(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("temporary file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("No file uploaded")]
    NoFile,

    #[error("No valid file uploaded")]
    NoFilename,

    #[error("Document is empty or unreadable")]
    Empty,

    #[error("{0}")]
    Unsupported(String),

    #[error("No document loaded")]
    NoDocument,

    #[error("Invalid page number")]
    InvalidPage,

    #[error("Failed to process document: {0}")]
    Extraction(String),

    #[error("Failed to process document: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Media processing failed: {0}")]
    Media(#[from] MediaError),

    #[error("Failed to generate response: {0}")]
    Generation(#[source] BoxError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::Document(
                DocumentError::NoFile
                | DocumentError::NoFilename
                | DocumentError::Empty
                | DocumentError::Unsupported(_)
                | DocumentError::NoDocument
                | DocumentError::InvalidPage,
            ) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status.is_server_error() {
            error!("Request failed: {}", self);
            let error = match &self {
                ChatError::Generation(_) => "Server error while processing request".to_string(),
                ChatError::Document(_) => self.to_string(),
                _ => "Internal Server Error".to_string(),
            };
            ErrorResponse {
                error,
                details: Some(
                    self
                        .source()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| self.to_string())
                ),
            }
        } else {
            ErrorResponse { error: self.to_string(), details: None }
        };
        (status, Json(body)).into_response()
    }
}
