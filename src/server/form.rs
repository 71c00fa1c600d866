use axum::{
    body::Bytes,
    extract::{ FromRequest, Multipart, Request },
    http::header::CONTENT_TYPE,
};
use log::debug;
use std::collections::HashMap;
use url::form_urlencoded;

use crate::agent::ChatRequest;
use crate::error::ChatError;
use crate::media::Upload;

/// A decoded `multipart/form-data` or `application/x-www-form-urlencoded`
/// body. File parts keep the client's file name, which may be empty when a
/// form control was submitted without a selection.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl FormData {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// `"true"`, case-insensitively.
    pub fn flag(&self, name: &str) -> bool {
        self.field(name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Removes a file part, including one without a file name.
    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }

    /// Removes a file part only if a file was actually selected.
    pub fn take_selected_file(&mut self, name: &str) -> Option<Upload> {
        self.take_file(name).filter(|f| !f.file_name.trim().is_empty())
    }

    pub fn into_chat_request(mut self) -> ChatRequest {
        ChatRequest {
            audio: self.take_selected_file("audio"),
            video: self.take_selected_file("video"),
            image: self.take_selected_file("image"),
            google_search: self.flag("google_search"),
            document_interaction: self.flag("document_interaction"),
            document_context: self.field("document_context").unwrap_or("").trim().to_string(),
            text: self.fields.remove("text"),
        }
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ChatError> {
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await.map_err(invalid_form)?;
                    debug!("Form file part {}: {} ({} bytes)", name, file_name, bytes.len());
                    form.files.insert(name, Upload::new(file_name, bytes.to_vec()));
                }
                None => {
                    let value = field.text().await.map_err(invalid_form)?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    fn from_urlencoded(body: &[u8]) -> Self {
        FormData {
            fields: form_urlencoded::parse(body).into_owned().collect(),
            files: HashMap::new(),
        }
    }
}

fn invalid_form(err: impl std::fmt::Display) -> ChatError {
    ChatError::InvalidInput(format!("Invalid form data: {}", err))
}

impl<S> FromRequest<S> for FormData where S: Send + Sync {
    type Rejection = ChatError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state).await.map_err(invalid_form)?;
            Self::from_multipart(multipart).await
        } else {
            let body = Bytes::from_request(req, state).await.map_err(invalid_form)?;
            Ok(Self::from_urlencoded(&body))
        }
    }
}
