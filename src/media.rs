use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::multipart::Part;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::path::Path;
use thiserror::Error;

const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unable to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("malformed data url")]
    MalformedDataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("invalid mime type `{0}`")]
    Mime(String),
}

/// An uploaded image as it travels between the browser, the model and the store.
///
/// On the wire the payload is base64 (`{name, mimeType, data}`); in memory it is
/// the raw bytes. Values are never mutated after construction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryFile {
    name: String,
    #[serde(alias = "type", default)]
    mime_type: String,
    #[serde_as(as = "Base64")]
    data: Vec<u8>,
}

impl BinaryFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|err| MediaError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(mime_for_extension)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(name, mime_type, data))
    }

    /// Rebuilds a file from a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(name: impl Into<String>, url: &str) -> Result<Self, MediaError> {
        let (mime_type, payload) = split_data_url(url).ok_or(MediaError::MalformedDataUrl)?;
        let data = BASE64
            .decode(payload)
            .map_err(|err| MediaError::Base64(err.to_string()))?;
        Ok(Self::new(name, mime_type, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared mime type, falling back to jpeg when the browser sent none.
    pub fn mime_type(&self) -> &str {
        if self.mime_type.trim().is_empty() {
            FALLBACK_MIME
        } else {
            &self.mime_type
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), BASE64.encode(&self.data))
    }

    /// File extension implied by the mime type, used when naming staged uploads.
    pub fn extension(&self) -> &'static str {
        match self.mime_type().to_ascii_lowercase().as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/avif" => "avif",
            "image/heic" => "heic",
            _ => "jpg",
        }
    }

    /// Multipart body part carrying the raw bytes under `filename`.
    pub fn to_part(&self, filename: &str) -> Result<Part, MediaError> {
        Part::bytes(self.data.clone())
            .file_name(filename.to_string())
            .mime_str(self.mime_type())
            .map_err(|_| MediaError::Mime(self.mime_type().to_string()))
    }
}

pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some((mime_type, payload))
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BinaryFile {
        BinaryFile::new("dress.png", "image/png", vec![0x89, b'P', b'N', b'G', 0, 255, 7])
    }

    #[test]
    fn data_url_round_trip_preserves_bytes_and_mime() {
        let file = sample();
        let url = file.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        let back = BinaryFile::from_data_url("dress.png", &url).expect("decode");
        assert_eq!(back, file);
    }

    #[test]
    fn json_wire_form_uses_base64_and_accepts_type_alias() {
        let file = sample();
        let value = serde_json::to_value(&file).expect("serialize");
        assert_eq!(value["mimeType"], "image/png");
        assert!(value["data"].is_string());

        let legacy = serde_json::json!({
            "name": "dress.png",
            "type": "image/png",
            "data": value["data"].clone(),
        });
        let parsed: BinaryFile = serde_json::from_value(legacy).expect("deserialize");
        assert_eq!(parsed.data(), file.data());
        assert_eq!(parsed.mime_type(), "image/png");
    }

    #[test]
    fn missing_mime_falls_back_to_jpeg() {
        let file = BinaryFile::new("a", "", vec![1, 2, 3]);
        assert_eq!(file.mime_type(), "image/jpeg");
        assert_eq!(file.extension(), "jpg");
        assert!(file.to_data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn rejects_non_base64_data_urls() {
        assert!(matches!(
            BinaryFile::from_data_url("x", "data:image/png,plain"),
            Err(MediaError::MalformedDataUrl)
        ));
        assert!(matches!(
            BinaryFile::from_data_url("x", "data:image/png;base64,@@@"),
            Err(MediaError::Base64(_))
        ));
    }

    #[tokio::test]
    async fn from_path_reads_bytes_and_guesses_mime() {
        let dir = std::env::temp_dir().join(format!("atelier-media-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.expect("mkdir");
        let path = dir.join("front.JPG");
        tokio::fs::write(&path, [1u8, 2, 3, 4]).await.expect("write");

        let file = BinaryFile::from_path(&path).await.expect("read");
        assert_eq!(file.name(), "front.JPG");
        assert_eq!(file.mime_type(), "image/jpeg");
        assert_eq!(file.data(), &[1, 2, 3, 4]);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn multipart_part_accepts_declared_mime() {
        assert!(sample().to_part("dress_1.png").is_ok());
    }
}
