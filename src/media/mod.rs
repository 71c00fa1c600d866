pub mod audio;
pub mod image;

use log::{ debug, warn };
use std::fs;
use std::io::{ self, Write };
use std::path::Path;
use tempfile::{ Builder, NamedTempFile };

/// One file field of a request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { file_name: file_name.into(), bytes }
    }

    /// Lower-cased extension of the client-side file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
}

impl MediaKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio-",
            MediaKind::Video => "video-",
            MediaKind::Image => "image-",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "wav",
            MediaKind::Video => "mp4",
            MediaKind::Image => "jpg",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Audio => "Audio Transcription",
            MediaKind::Video => "Video Transcription",
            MediaKind::Image => "Image Description",
        }
    }
}

/// An upload copied to a uniquely named file. The file is removed when the
/// value is dropped, on every exit path.
pub struct TempUpload {
    file: NamedTempFile,
}

impl TempUpload {
    pub fn write(dir: &Path, kind: MediaKind, upload: &Upload) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let extension = upload.extension().unwrap_or_else(|| kind.default_extension().to_string());
        let mut file = Builder::new()
            .prefix(kind.prefix())
            .suffix(&format!(".{}", extension))
            .rand_bytes(12)
            .tempfile_in(dir)?;
        file.write_all(&upload.bytes)?;
        file.flush()?;
        debug!("create temp file: {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Deletes leftover temp files of the given kinds. Returns how many were removed.
pub fn sweep_temp_files(dir: &Path, kinds: &[MediaKind]) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return 0;
        }
        Err(e) => {
            warn!("Could not list temp directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !kinds.iter().any(|k| name.starts_with(k.prefix())) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                removed += 1;
            }
            Err(e) => warn!("Could not remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Last processed media, replayed as context for later text turns.
#[derive(Debug, Default, Clone)]
pub struct MediaMemory {
    pub audio_transcription: Option<String>,
    pub video_transcription: Option<String>,
    pub image_caption: Option<String>,
}

impl MediaMemory {
    pub fn remember(&mut self, kind: MediaKind, text: String) {
        match kind {
            MediaKind::Audio => {
                self.audio_transcription = Some(text);
            }
            MediaKind::Video => {
                self.video_transcription = Some(text);
            }
            MediaKind::Image => {
                self.image_caption = Some(text);
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// `\n[Label]: text` for each remembered item, in audio, video, image order.
    pub fn context(&self) -> String {
        let mut context = String::new();
        let items = [
            (MediaKind::Audio, &self.audio_transcription),
            (MediaKind::Video, &self.video_transcription),
            (MediaKind::Image, &self.image_caption),
        ];
        for (kind, text) in items {
            if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                context.push_str(&format!("\n[{}]: {}", kind.label(), text));
            }
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_upload_is_unique_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let upload = Upload::new("clip.MP3", b"ID3".to_vec());
        let first = TempUpload::write(dir.path(), MediaKind::Audio, &upload).unwrap();
        let second = TempUpload::write(dir.path(), MediaKind::Audio, &upload).unwrap();
        assert_ne!(first.path(), second.path());

        let name = first.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("audio-"));
        assert!(name.ends_with(".mp3"));
        assert_eq!(fs::read(first.path()).unwrap(), b"ID3");

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn missing_extension_uses_kind_default() {
        let dir = tempfile::tempdir().unwrap();
        let upload = Upload::new("blob", vec![1, 2, 3]);
        let temp = TempUpload::write(dir.path(), MediaKind::Video, &upload).unwrap();
        assert!(temp.path().to_string_lossy().ends_with(".mp4"));
    }

    #[test]
    fn sweep_removes_only_requested_kinds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("audio-a.wav"), b"a").unwrap();
        fs::write(dir.path().join("video-b.mp4"), b"b").unwrap();
        fs::write(dir.path().join("image-c.jpg"), b"c").unwrap();
        fs::write(dir.path().join("report.pdf"), b"d").unwrap();

        assert_eq!(sweep_temp_files(dir.path(), &[MediaKind::Audio, MediaKind::Video]), 2);
        assert!(dir.path().join("image-c.jpg").exists());
        assert!(dir.path().join("report.pdf").exists());
        assert_eq!(sweep_temp_files(dir.path(), &[MediaKind::Audio]), 0);
        assert_eq!(sweep_temp_files(&dir.path().join("missing"), &[MediaKind::Image]), 0);
    }

    #[test]
    fn media_memory_renders_labeled_context() {
        let mut memory = MediaMemory::default();
        assert_eq!(memory.context(), "");
        memory.remember(MediaKind::Image, "a red bicycle".into());
        memory.remember(MediaKind::Audio, "hello".into());
        assert_eq!(
            memory.context(),
            "\n[Audio Transcription]: hello\n[Image Description]: a red bicycle"
        );
        memory.clear();
        assert!(memory.image_caption.is_none());
    }
}
