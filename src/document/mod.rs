pub mod extract;
pub mod store;

use log::{ info, warn };
use std::fs;
use std::io::{ self, Write };
use std::path::{ Path, PathBuf };
use tempfile::Builder;

use self::extract::{ extract_text, Extraction };
use crate::error::DocumentError;
use crate::media::Upload;

pub const FALLBACK_FILENAME: &str = "uploaded_document";

/// Reduces a client file name to `[A-Za-z0-9_.-]`, whitespace runs become
/// `_`, path separators are dropped and leading/trailing `.`/`_` stripped.
pub fn sanitize_filename(name: &str) -> String {
    let name = name.replace(['/', '\\'], " ");
    let joined = name.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() { FALLBACK_FILENAME.to_string() } else { trimmed.to_string() }
}

/// Writes the upload under a unique name that keeps the sanitized file name
/// (and so its extension) as suffix.
pub fn save_upload(dir: &Path, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let mut file = Builder::new()
        .prefix("doc-")
        .suffix(&format!("-{}", filename))
        .rand_bytes(8)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

/// A saved and extracted document, ready to be paged.
#[derive(Debug)]
pub struct Ingested {
    pub filename: String,
    pub path: PathBuf,
    pub text: String,
}

/// Saves and extracts an upload. Blocking; run it off the async runtime.
/// On any outcome other than extracted text the saved file is removed.
pub fn ingest(dir: &Path, upload: &Upload) -> Result<Ingested, DocumentError> {
    let filename = sanitize_filename(&upload.file_name);
    let path = save_upload(dir, &filename, &upload.bytes)?;
    info!("Saved document {} to {}", filename, path.display());

    let extraction = extract_text(&path);
    if !matches!(extraction, Extraction::Text(_)) {
        warn!("Document {} rejected: {}", filename, extraction.as_text());
        if let Err(e) = fs::remove_file(&path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
    let text = extraction.into_result()?;
    Ok(Ingested { filename, path, text })
}

/// Deletes a document's backing file, tolerating one that is already gone.
pub fn remove_backing_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("Removed document file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove document file {}: {}", path.display(), e),
    }
}
