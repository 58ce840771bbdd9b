use axum::extract::Multipart;
use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::diagrams::image_media_type;
use crate::errors::AppError;
use crate::models::asset::AssetType;
use crate::storage::keys;

/// Which upload endpoint a file came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Pdf,
    Image,
}

impl UploadKind {
    pub fn folder(&self) -> &'static str {
        match self {
            UploadKind::Pdf => keys::PDFS,
            UploadKind::Image => keys::IMAGES,
        }
    }

    pub fn asset_type(&self) -> AssetType {
        match self {
            UploadKind::Pdf => AssetType::Pdf,
            UploadKind::Image => AssetType::Image,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadKind::Pdf => "pdf",
            UploadKind::Image => "image",
        }
    }

    /// The content type to store the file with, or `None` if this endpoint does
    /// not accept it. The file extension decides; a declared type only has to agree.
    pub fn content_type(&self, filename: &str, declared: Option<&str>) -> Option<&'static str> {
        let resolved = match self {
            UploadKind::Pdf => filename
                .to_ascii_lowercase()
                .ends_with(".pdf")
                .then_some("application/pdf"),
            UploadKind::Image => image_media_type(filename),
        }?;
        match declared.map(str::to_ascii_lowercase) {
            None => Some(resolved),
            Some(d) if d == resolved || d == "application/octet-stream" => Some(resolved),
            Some(d) if *self == UploadKind::Image && d == "image/jpg" => Some(resolved),
            Some(_) => None,
        }
    }
}

/// A file read out of a multipart upload.
#[derive(Debug)]
pub struct UploadedFile {
    pub session_id: Uuid,
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

/// Reads the `file` and `session_id` fields. Anything missing, oversized, or of
/// the wrong type is a validation error.
pub async fn read_upload(
    mut multipart: Multipart,
    kind: UploadKind,
    max_bytes: usize,
) -> Result<UploadedFile, AppError> {
    let mut session_id: Option<Uuid> = None;
    let mut file: Option<(String, &'static str, Bytes)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_id" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("unreadable session_id: {e}")))?;
                session_id = Some(
                    raw.trim()
                        .parse()
                        .map_err(|_| AppError::Validation("session_id must be a UUID".to_string()))?,
                );
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = kind
                    .content_type(&filename, field.content_type())
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "'{filename}' is not a supported {} file",
                            kind.label()
                        ))
                    })?;

                let mut bytes = BytesMut::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| AppError::Validation(format!("upload interrupted: {e}")))?
                {
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(AppError::Validation(format!(
                            "'{filename}' is larger than {} MB",
                            max_bytes / (1024 * 1024)
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                if bytes.is_empty() {
                    return Err(AppError::Validation(format!("'{filename}' is empty")));
                }
                file = Some((filename, content_type, bytes.freeze()));
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| AppError::Validation("session_id is required".to_string()))?;
    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("file is required".to_string()))?;

    Ok(UploadedFile {
        session_id,
        filename,
        content_type,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_upload_accepts_pdfs_only() {
        assert_eq!(
            UploadKind::Pdf.content_type("notes.PDF", Some("application/pdf")),
            Some("application/pdf")
        );
        assert_eq!(UploadKind::Pdf.content_type("notes.docx", None), None);
    }

    #[test]
    fn test_declared_type_must_agree_with_extension() {
        assert_eq!(UploadKind::Pdf.content_type("notes.pdf", Some("image/png")), None);
        assert_eq!(
            UploadKind::Pdf.content_type("notes.pdf", Some("application/octet-stream")),
            Some("application/pdf")
        );
    }

    #[test]
    fn test_image_upload_types() {
        assert_eq!(
            UploadKind::Image.content_type("leaf.jpg", Some("image/jpg")),
            Some("image/jpeg")
        );
        assert_eq!(UploadKind::Image.content_type("leaf.webp", None), Some("image/webp"));
        assert_eq!(UploadKind::Image.content_type("leaf.svg", Some("image/svg+xml")), None);
    }

    #[test]
    fn test_upload_kind_routes_to_session_folders() {
        assert_eq!(UploadKind::Pdf.folder(), "pdfs");
        assert_eq!(UploadKind::Image.asset_type(), AssetType::Image);
    }
}
