//! Checks applied to an uploaded audio file before it is forwarded.

use bytes::Bytes;

use crate::error::{RelayError, Result};

pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "audio/flac",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/webm",
    "video/webm",
    "video/mp4",
];

pub const ACCEPTED_EXTENSIONS: &[&str] = &["flac", "mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

/// An upload as it arrived, before any checks.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// An upload that passed [`validate`].
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub bytes: Bytes,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Require a filename, a non-empty body, and either an accepted content type
/// or an accepted extension. The extension is the fallback when the declared
/// type is missing or unknown.
pub fn validate(upload: AudioUpload) -> Result<AudioFile> {
    let filename = upload
        .filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| RelayError::validation("No audio file provided (missing filename)"))?;

    if upload.bytes.is_empty() {
        return Err(RelayError::validation(format!("Audio file '{}' is empty", filename)));
    }

    let content_type = upload.content_type.map(|ct| ct.trim().to_lowercase());
    let type_ok = content_type.as_deref().is_some_and(is_accepted_content_type);

    if !type_ok && !has_accepted_extension(&filename) {
        return Err(RelayError::validation(format!(
            "Unsupported audio file '{}' ({}). Accepted formats: {}",
            filename,
            content_type.as_deref().unwrap_or("no content type"),
            ACCEPTED_EXTENSIONS.join(", ")
        )));
    }

    Ok(AudioFile {
        bytes: upload.bytes,
        filename,
        content_type,
    })
}

/// Parameters such as `; codecs=opus` are ignored.
fn is_accepted_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    ACCEPTED_CONTENT_TYPES.contains(&essence)
}

fn has_accepted_extension(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(filename: Option<&str>, content_type: Option<&str>) -> AudioUpload {
        AudioUpload {
            bytes: Bytes::from_static(b"RIFF....WAVE"),
            filename: filename.map(String::from),
            content_type: content_type.map(String::from),
        }
    }

    #[test]
    fn test_accepted_content_type() {
        let file = validate(upload(Some("clip.bin"), Some("audio/webm; codecs=opus"))).unwrap();
        assert_eq!(file.filename, "clip.bin");
        assert_eq!(file.content_type.as_deref(), Some("audio/webm; codecs=opus"));
    }

    #[test]
    fn test_extension_fallback_for_unknown_content_type() {
        assert!(validate(upload(Some("memo.M4A"), Some("application/octet-stream"))).is_ok());
        assert!(validate(upload(Some("memo.mp3"), None)).is_ok());
    }

    #[test]
    fn test_rejects_when_neither_matches() {
        let err = validate(upload(Some("note.ogg"), Some("audio/ogg"))).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("note.ogg"));

        assert!(validate(upload(Some("noext"), None)).is_err());
    }

    #[test]
    fn test_rejects_missing_filename_or_empty_body() {
        assert!(validate(upload(None, Some("audio/wav"))).unwrap_err().is_validation());
        assert!(validate(upload(Some("  "), Some("audio/wav"))).unwrap_err().is_validation());

        let empty = AudioUpload {
            bytes: Bytes::new(),
            filename: Some("a.wav".to_string()),
            content_type: Some("audio/wav".to_string()),
        };
        assert!(validate(empty).unwrap_err().is_validation());
    }
}
