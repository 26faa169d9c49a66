use serde::Deserialize;

use vidiary_core::JobId;

use crate::{DispatchError, DispatchResult};

/// A parsed queue message. Two shapes arrive on the same queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// Generated by the blob store when an object is written. Carries no
    /// job id; the dispatcher adopts the confirmation-created job or waits.
    UploadEvent {
        object_bucket: String,
        object_key: String,
    },

    /// Generated by the upload API after a client's upload notification.
    Confirmation {
        job_id: JobId,
        object_key: String,
        object_bucket: String,
    },
}

impl ParsedMessage {
    pub fn object_key(&self) -> &str {
        match self {
            Self::UploadEvent { object_key, .. } => object_key,
            Self::Confirmation { object_key, .. } => object_key,
        }
    }

    pub fn object_bucket(&self) -> &str {
        match self {
            Self::UploadEvent { object_bucket, .. } => object_bucket,
            Self::Confirmation { object_bucket, .. } => object_bucket,
        }
    }
}

#[derive(Deserialize)]
struct StorageEventBody {
    #[serde(rename = "Records")]
    records: Vec<StorageRecord>,
}

#[derive(Deserialize)]
struct StorageRecord {
    s3: StorageEntity,
}

#[derive(Deserialize)]
struct StorageEntity {
    bucket: StorageBucket,
    object: StorageObject,
}

#[derive(Deserialize)]
struct StorageBucket {
    name: Option<String>,
}

#[derive(Deserialize)]
struct StorageObject {
    key: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmationBody {
    job_id: String,
    object_key: String,
    object_bucket: Option<String>,
}

/// Parse a raw queue message body into one of the two supported shapes.
///
/// Storage event keys are URL-encoded (`+` for space); they are decoded here
/// so the rest of the system only sees real keys. A body matching neither
/// shape is a malformed message and will be removed from the queue.
pub fn parse_message(body: &str, default_bucket: &str) -> DispatchResult<ParsedMessage> {
    if let Ok(event) = serde_json::from_str::<StorageEventBody>(body) {
        let record = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::malformed("storage event with no records"))?;
        let key = record
            .s3
            .object
            .key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DispatchError::malformed("storage event missing object key"))?;
        let bucket = record
            .s3
            .bucket
            .name
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| default_bucket.to_string());
        return Ok(ParsedMessage::UploadEvent {
            object_bucket: bucket,
            object_key: decode_event_key(&key),
        });
    }

    if let Ok(confirmation) = serde_json::from_str::<ConfirmationBody>(body) {
        if confirmation.job_id.is_empty() {
            return Err(DispatchError::malformed("confirmation missing job_id"));
        }
        if confirmation.object_key.is_empty() {
            return Err(DispatchError::malformed("confirmation missing object_key"));
        }
        return Ok(ParsedMessage::Confirmation {
            job_id: JobId::from(confirmation.job_id),
            object_key: confirmation.object_key,
            object_bucket: confirmation
                .object_bucket
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| default_bucket.to_string()),
        });
    }

    Err(DispatchError::malformed("unrecognized message shape"))
}

/// Decode a storage-event object key: `+` is space, `%XX` is a byte.
fn decode_event_key(key: &str) -> String {
    let mut out = Vec::with_capacity(key.len());
    let bytes = key.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_event() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"my-bucket"},
            "object":{"key":"uploads/20260120_120000_abc_video.mp4"}}}]}"#;
        let parsed = parse_message(body, "default-bucket").unwrap();
        assert_eq!(
            parsed,
            ParsedMessage::UploadEvent {
                object_bucket: "my-bucket".to_string(),
                object_key: "uploads/20260120_120000_abc_video.mp4".to_string(),
            }
        );
    }

    #[test]
    fn upload_event_key_is_url_decoded() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"b"},
            "object":{"key":"uploads/my+video%281%29.mp4"}}}]}"#;
        let parsed = parse_message(body, "b").unwrap();
        assert_eq!(parsed.object_key(), "uploads/my video(1).mp4");
    }

    #[test]
    fn upload_event_falls_back_to_default_bucket() {
        let body = r#"{"Records":[{"s3":{"bucket":{"name":""},"object":{"key":"k"}}}]}"#;
        let parsed = parse_message(body, "fallback").unwrap();
        assert_eq!(parsed.object_bucket(), "fallback");
    }

    #[test]
    fn parses_confirmation() {
        let body = r#"{"job_id":"j-42","object_key":"uploads/v.mp4","object_bucket":"b"}"#;
        let parsed = parse_message(body, "default").unwrap();
        assert_eq!(
            parsed,
            ParsedMessage::Confirmation {
                job_id: JobId::from("j-42"),
                object_key: "uploads/v.mp4".to_string(),
                object_bucket: "b".to_string(),
            }
        );
    }

    #[test]
    fn confirmation_without_bucket_uses_default() {
        let body = r#"{"job_id":"j-42","object_key":"uploads/v.mp4"}"#;
        let parsed = parse_message(body, "default").unwrap();
        assert_eq!(parsed.object_bucket(), "default");
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(parse_message("not json", "b").is_err());
        assert!(parse_message("{}", "b").is_err());
        assert!(parse_message(r#"{"Records":[]}"#, "b").is_err());
        assert!(parse_message(r#"{"job_id":"","object_key":"k"}"#, "b").is_err());
        assert!(parse_message(r#"{"job_id":"j","object_key":""}"#, "b").is_err());
    }
}
