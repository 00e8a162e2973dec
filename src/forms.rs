use axum::extract::Multipart;
use file_format::{FileFormat, Kind};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};

/// Field-level validation errors, keyed by form field name.
#[derive(Debug, Default, Clone)]
pub struct FieldErrors {
    errors: BTreeMap<&'static str, Vec<String>>,
}

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[String])> {
        self.errors.iter().map(|(f, msgs)| (*f, msgs.as_slice()))
    }
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Sniffs the actual byte content; the filename is never trusted.
    pub fn sniff(&self) -> FileFormat {
        FileFormat::from_bytes(&self.bytes)
    }

    pub fn is_image(&self) -> bool {
        self.sniff().kind() == Kind::Image
    }
}

/// Post create/edit form: text is required, group and image are optional.
#[derive(Debug, Default, Clone)]
pub struct PostForm {
    pub text: String,
    pub group: Option<i64>,
    /// The group choice as submitted, kept so a value that does not parse
    /// to an id still surfaces as a field error instead of vanishing.
    pub group_raw: Option<String>,
    pub image: Option<ImageUpload>,
}

impl PostForm {
    pub async fn from_multipart(multipart: &mut Multipart) -> AppResult<Self> {
        let mut form = PostForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("malformed form body: {}", e)))?
        {
            match field.name() {
                Some("text") => {
                    form.text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                }
                Some("group") => {
                    let raw = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    let raw = raw.trim();
                    if !raw.is_empty() {
                        form.group = raw.parse().ok();
                        form.group_raw = Some(raw.to_string());
                    }
                }
                Some("image") => {
                    let filename = field.file_name().unwrap_or("").to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    // A file input submitted empty arrives as an empty part.
                    if !filename.is_empty() || !bytes.is_empty() {
                        form.image = Some(ImageUpload {
                            filename,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();
        if self.text.trim().is_empty() {
            errors.add("text", "This field is required.");
        }
        if self.group_raw.is_some() && self.group.is_none() {
            errors.add("group", "Select a valid choice.");
        }
        if let Some(image) = &self.image {
            if !image.is_image() {
                errors.add(
                    "image",
                    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
                );
            }
        }
        errors
    }
}

/// Comment form: a single required text field.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub text: String,
}

impl CommentForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();
        if self.text.trim().is_empty() {
            errors.add("text", "This field is required.");
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
        0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08, 0xD7, 0x63, 0xF8,
        0xCF, 0xC0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x9A, 0x60, 0xE1, 0xD5, 0x00, 0x00, 0x00,
        0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn empty_text_is_rejected() {
        let form = PostForm {
            text: "   ".to_string(),
            ..Default::default()
        };
        let errors = form.validate();
        assert!(!errors.get("text").is_empty());
    }

    #[test]
    fn text_payload_in_image_field_is_rejected() {
        let form = PostForm {
            text: "hello".to_string(),
            image: Some(ImageUpload {
                // Benign-looking name, non-image content.
                filename: "photo.png".to_string(),
                bytes: b"hello world".to_vec(),
            }),
            ..Default::default()
        };
        let errors = form.validate();
        assert!(!errors.get("image").is_empty());
    }

    #[test]
    fn png_bytes_are_accepted() {
        let form = PostForm {
            text: "hello".to_string(),
            image: Some(ImageUpload {
                filename: "payload.txt".to_string(),
                bytes: PNG_1X1.to_vec(),
            }),
            ..Default::default()
        };
        assert!(form.validate().is_empty());
    }

    #[test]
    fn unparsable_group_choice_is_rejected() {
        let form = PostForm {
            text: "hello".to_string(),
            group: None,
            group_raw: Some("garbage".to_string()),
            ..Default::default()
        };
        let errors = form.validate();
        assert!(!errors.get("group").is_empty());

        // A numeric choice parses and raises no shape error here.
        let form = PostForm {
            text: "hello".to_string(),
            group: Some(3),
            group_raw: Some("3".to_string()),
            ..Default::default()
        };
        assert!(form.validate().is_empty());
    }

    #[test]
    fn empty_comment_is_invalid() {
        let form = CommentForm {
            text: "".to_string(),
        };
        assert!(!form.validate().get("text").is_empty());
    }
}
