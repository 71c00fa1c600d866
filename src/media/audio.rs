use log::info;
use std::path::Path;
use std::time::Instant;

use super::{ MediaKind, TempUpload, Upload };
use crate::cache::CacheReclaimer;
use crate::error::MediaError;
use crate::llm::speech::Transcriber;

/// Transcript of an audio or video upload.
///
/// The upload is written to a per-request temp file that is removed before
/// returning; the reclaim hook runs on success and failure alike.
pub async fn transcribe_upload(
    transcriber: &dyn Transcriber,
    reclaimer: &dyn CacheReclaimer,
    temp_dir: &Path,
    kind: MediaKind,
    upload: &Upload
) -> Result<String, MediaError> {
    let result = transcribe(transcriber, temp_dir, kind, upload).await;
    reclaimer.reclaim().await;
    result
}

async fn transcribe(
    transcriber: &dyn Transcriber,
    temp_dir: &Path,
    kind: MediaKind,
    upload: &Upload
) -> Result<String, MediaError> {
    let temp = TempUpload::write(temp_dir, kind, upload)?;
    info!("Processing {:?} file {} ({} bytes)", kind, upload.file_name, upload.bytes.len());

    let start = Instant::now();
    let transcript = transcriber
        .transcribe(temp.path()).await
        .map_err(|e| MediaError::Transcription(e.to_string()))?;
    info!("Transcribed by {} in {:.2}s", transcriber.get_model(), start.elapsed().as_secs_f32());

    let transcript = transcript.trim();
    if transcript.is_empty() {
        return Err(MediaError::Transcription("no speech recognized".to_string()));
    }
    Ok(transcript.to_string())
}
