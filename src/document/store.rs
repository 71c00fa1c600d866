use std::path::PathBuf;

use crate::error::DocumentError;
use crate::models::api::DocumentPage;

/// Splits `text` into windows of `size` characters. Concatenating the pages
/// gives back `text`.
pub fn paginate(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// The single loaded document, paged for incremental reading.
#[derive(Debug, Default)]
pub struct DocumentStore {
    pages: Vec<String>,
    filename: String,
    file_path: Option<PathBuf>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current document. Returns the previous backing file,
    /// which the caller deletes.
    pub fn load(
        &mut self,
        filename: impl Into<String>,
        file_path: PathBuf,
        text: &str,
        page_size: usize
    ) -> Option<PathBuf> {
        let previous = self.file_path.replace(file_path);
        self.pages = paginate(text, page_size);
        self.filename = filename.into();
        previous.filter(|p| Some(p) != self.file_path.as_ref())
    }

    /// 1-based page lookup.
    pub fn page(&self, number: usize) -> Result<DocumentPage, DocumentError> {
        if self.pages.is_empty() {
            return Err(DocumentError::NoDocument);
        }
        if number < 1 || number > self.pages.len() {
            return Err(DocumentError::InvalidPage);
        }
        Ok(DocumentPage {
            page: self.pages[number - 1].clone(),
            current_page: number,
            total_pages: self.pages.len(),
        })
    }

    /// Resets every field and hands back the backing file for deletion.
    pub fn clear(&mut self) -> Option<PathBuf> {
        self.pages.clear();
        self.filename.clear();
        self.file_path.take()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn full_text(&self) -> String {
        self.pages.concat()
    }
}
