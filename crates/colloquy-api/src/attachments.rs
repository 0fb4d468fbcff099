//! Canonicalization of file references.
//!
//! Clients send files in several shapes: `{url, filename}`, `{data, fileName}`,
//! data URIs in either field, and the legacy `experimental_attachments` list.
//! Everything downstream sees one [`Attachment`] form: a media type, a display
//! name, and exactly one of a remote URL or bare base64 bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;
use tracing::warn;

use colloquy_types::api::{LegacyAttachment, RawFilePart};
use colloquy_types::models::{Attachment, Message, Part, Payload};

/// Media types accepted on inbound user files.
pub const ALLOWED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpg", "image/jpeg", "application/pdf"];

const DEFAULT_FILENAME: &str = "attachment";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("file part has no media type")]
    MissingMediaType,
    #[error("file part has neither a url nor inline data")]
    MissingPayload,
    #[error("file part data is not valid base64")]
    InvalidData,
}

pub fn is_allowed_media_type(media_type: &str) -> bool {
    ALLOWED_MEDIA_TYPES.contains(&media_type)
}

/// Canonicalize one raw file part.
pub fn normalize(raw: &RawFilePart) -> Result<Attachment, AttachmentError> {
    let media_type = non_empty(raw.media_type.as_deref())
        .ok_or(AttachmentError::MissingMediaType)?
        .to_ascii_lowercase();

    let payload = match (non_empty(raw.url.as_deref()), non_empty(raw.data.as_deref())) {
        (Some(url), _) => payload_from_url(url)?,
        (None, Some(data)) => payload_from_data(data)?,
        (None, None) => return Err(AttachmentError::MissingPayload),
    };

    let filename = non_empty(raw.filename.as_deref())
        .or_else(|| non_empty(raw.file_name.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| derive_filename(&payload));

    Ok(Attachment {
        media_type,
        filename,
        payload,
    })
}

pub fn normalize_legacy(legacy: &LegacyAttachment) -> Result<Attachment, AttachmentError> {
    normalize(&RawFilePart {
        media_type: Some(legacy.content_type.clone()),
        filename: Some(legacy.name.clone()),
        url: Some(legacy.url.clone()),
        ..Default::default()
    })
}

/// Re-run normalization over an already typed attachment.
pub fn renormalize(attachment: &Attachment) -> Result<Attachment, AttachmentError> {
    let (url, data) = match &attachment.payload {
        Payload::Url(u) => (Some(u.clone()), None),
        Payload::Data(d) => (None, Some(d.clone())),
    };
    normalize(&RawFilePart {
        media_type: Some(attachment.media_type.clone()),
        filename: Some(attachment.filename.clone()),
        file_name: None,
        url,
        data,
    })
}

/// Normalize every file part and attachment of a conversation. Stored rows
/// written by older clients may carry data URIs or URLs in the wrong field;
/// entries that cannot be repaired are dropped from the model context.
pub fn normalize_history(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut m| {
            m.parts = m
                .parts
                .into_iter()
                .filter_map(|p| match p {
                    Part::File(a) => repair(&m.id, &a).map(Part::File),
                    other => Some(other),
                })
                .collect();
            m.attachments = m.attachments.iter().filter_map(|a| repair(&m.id, a)).collect();
            m
        })
        .collect()
}

fn repair(message_id: &str, attachment: &Attachment) -> Option<Attachment> {
    match renormalize(attachment) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!(message_id, error = %e, "dropping unusable attachment from history");
            None
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn is_remote(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Anything in the `url` field is a reference unless it is a data URI.
fn payload_from_url(value: &str) -> Result<Payload, AttachmentError> {
    match value.strip_prefix("data:") {
        Some(rest) => data_uri(rest),
        None => Ok(Payload::Url(value.to_string())),
    }
}

/// The `data` field holds base64, a data URI, or a misplaced http(s) link.
fn payload_from_data(value: &str) -> Result<Payload, AttachmentError> {
    if let Some(rest) = value.strip_prefix("data:") {
        return data_uri(rest);
    }
    if is_remote(value) {
        return Ok(Payload::Url(value.to_string()));
    }
    inline(value)
}

fn data_uri(rest: &str) -> Result<Payload, AttachmentError> {
    let (header, body) = rest.split_once(',').ok_or(AttachmentError::InvalidData)?;
    if header.ends_with(";base64") {
        return inline(body);
    }
    Ok(Payload::Data(B64.encode(body.as_bytes())))
}

fn inline(body: &str) -> Result<Payload, AttachmentError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() || B64.decode(&compact).is_err() {
        return Err(AttachmentError::InvalidData);
    }
    Ok(Payload::Data(compact))
}

fn derive_filename(payload: &Payload) -> String {
    match payload {
        Payload::Url(url) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|seg| !seg.is_empty() && !seg.contains(':'))
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
        Payload::Data(_) => DEFAULT_FILENAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(media_type: &str) -> RawFilePart {
        RawFilePart {
            media_type: Some(media_type.into()),
            ..Default::default()
        }
    }

    #[test]
    fn remote_url_keeps_its_name() {
        let a = normalize(&RawFilePart {
            url: Some("https://cdn.example/a/cat.png".into()),
            filename: Some("My cat.png".into()),
            ..raw("image/png")
        })
        .unwrap();
        assert_eq!(a.payload, Payload::Url("https://cdn.example/a/cat.png".into()));
        assert_eq!(a.filename, "My cat.png");
    }

    #[test]
    fn data_uri_in_url_field_becomes_bare_base64() {
        let a = normalize(&RawFilePart {
            url: Some("data:image/png;base64,aGVsbG8=".into()),
            ..raw("image/png")
        })
        .unwrap();
        assert_eq!(a.payload, Payload::Data("aGVsbG8=".into()));
        assert_eq!(a.filename, DEFAULT_FILENAME);
    }

    #[test]
    fn remote_link_in_data_field_becomes_url() {
        let a = normalize(&RawFilePart {
            data: Some("https://files.example/report.pdf?sig=1".into()),
            file_name: Some("report.pdf".into()),
            ..raw("application/pdf")
        })
        .unwrap();
        assert_eq!(a.payload, Payload::Url("https://files.example/report.pdf?sig=1".into()));
        assert_eq!(a.filename, "report.pdf");
    }

    #[test]
    fn any_url_field_value_is_kept_as_a_reference() {
        for url in ["s3://bucket/scan.pdf", "/uploads/scan.pdf", "blob:abc-123"] {
            let a = normalize(&RawFilePart {
                url: Some(url.into()),
                ..raw("application/pdf")
            })
            .unwrap();
            assert_eq!(a.payload, Payload::Url(url.into()));
            assert_eq!(renormalize(&a).unwrap(), a);
        }
    }

    #[test]
    fn filename_falls_back_to_url_path() {
        let a = normalize(&RawFilePart {
            url: Some("https://files.example/docs/report.pdf?sig=1".into()),
            ..raw("application/pdf")
        })
        .unwrap();
        assert_eq!(a.filename, "report.pdf");
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert_eq!(normalize(&raw("image/png")), Err(AttachmentError::MissingPayload));
        assert_eq!(
            normalize(&RawFilePart {
                url: Some("https://x/y.png".into()),
                ..Default::default()
            }),
            Err(AttachmentError::MissingMediaType)
        );
        assert_eq!(
            normalize(&RawFilePart {
                data: Some("not base64!".into()),
                ..raw("image/png")
            }),
            Err(AttachmentError::InvalidData)
        );
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let inputs = [
            RawFilePart {
                data: Some("data:application/pdf;base64,JVBERi0x".into()),
                file_name: Some("a.pdf".into()),
                ..raw("application/pdf")
            },
            RawFilePart {
                url: Some("https://cdn.example/cat.png".into()),
                ..raw("IMAGE/PNG")
            },
        ];
        for input in inputs {
            let once = normalize(&input).unwrap();
            let twice = renormalize(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn legacy_attachments_map_onto_canonical_form() {
        let a = normalize_legacy(&LegacyAttachment {
            url: "https://cdn.example/cat.png".into(),
            name: "cat.png".into(),
            content_type: "image/png".into(),
        })
        .unwrap();
        assert_eq!(a.media_type, "image/png");
        assert_eq!(a.filename, "cat.png");
    }
}
