// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bucket-change notification payloads.
//!
//! These are the JSON documents an S3-compatible server (MinIO) publishes
//! for every object change in a bucket with notifications enabled. The
//! replicator only needs a handful of fields, but the full record shape is
//! kept so that raw payloads survive a decode/encode pass for logging.
//!
//! A payload looks like:
//!
//! ```json
//! {
//!   "EventName": "s3:ObjectCreated:Put",
//!   "Key": "photos/a.jpg",
//!   "Records": [{ "s3": { "object": { "key": "a.jpg", "size": 1024 } } }]
//! }
//! ```

use std::borrow::Cow;
use std::string::FromUtf8Error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Origin host and user agent stamped on deletes performed by the server's
/// own lifecycle (ILM) expiry rules.
pub const LIFECYCLE_EXPIRY_ORIGIN: &str = "Internal: [ILM-EXPIRY]";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("failed to decode notification payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to unescape object key {key:?}: {source}")]
    KeyDecode {
        key: String,
        #[source]
        source: FromUtf8Error,
    },

    #[error("malformed escape in object key {key:?} at byte {offset}")]
    KeyEscape { key: String, offset: usize },

    #[error("event {0:?} is not a supported event")]
    UnsupportedEvent(String),
}

impl NotificationError {
    /// Message without payload-specific detail, for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            NotificationError::Decode(_) => "invalid notification payload",
            NotificationError::KeyDecode { .. } => "object key is not valid UTF-8",
            NotificationError::KeyEscape { .. } => "malformed escape in object key",
            NotificationError::UnsupportedEvent(_) => "unsupported event",
        }
    }
}

// ============================================================================
// Event kinds
// ============================================================================

/// The event names the replicator acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
pub enum EventKind {
    #[strum(serialize = "s3:ObjectCreated:Put")]
    ObjectCreatedPut,
    #[strum(serialize = "s3:ObjectCreated:CompleteMultipartUpload")]
    ObjectCreatedCompleteMultipartUpload,
    #[strum(serialize = "s3:ObjectRemoved:Delete")]
    ObjectRemovedDelete,
}

impl EventKind {
    /// Parse an event name, rejecting anything outside the supported set.
    pub fn parse(event_name: &str) -> Result<Self, NotificationError> {
        event_name
            .parse()
            .map_err(|_| NotificationError::UnsupportedEvent(event_name.to_string()))
    }

    pub fn namespace(self) -> EventNamespace {
        match self {
            EventKind::ObjectCreatedPut | EventKind::ObjectCreatedCompleteMultipartUpload => {
                EventNamespace::Created
            }
            EventKind::ObjectRemovedDelete => EventNamespace::Removed,
        }
    }
}

/// Coarse classification of an event: does it create or remove an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum EventNamespace {
    #[strum(serialize = "s3:ObjectCreated")]
    Created,
    #[strum(serialize = "s3:ObjectRemoved")]
    Removed,
}

/// The event type of an arbitrary event name: its first two `:` segments.
///
/// Works on unsupported names too, so rejected events can still be labeled.
pub fn event_type(event_name: &str) -> String {
    event_name.splitn(3, ':').take(2).collect::<Vec<_>>().join(":")
}

/// Strip the quotes S3 servers put around ETags.
pub fn normalize_etag(etag: &str) -> &str {
    etag.trim_matches('"')
}

// ============================================================================
// Payload
// ============================================================================

/// Top-level notification document; one per queue message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "EventName", default)]
    pub event_name: String,
    /// `bucket/path` of the changed object
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Records", default)]
    pub records: Vec<Record>,
}

impl Envelope {
    pub fn from_slice(payload: &[u8]) -> Result<Self, NotificationError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Split [`Envelope::key`] into its bucket and object path.
    ///
    /// A key without a `/` is all bucket.
    pub fn bucket_and_path(&self) -> (&str, &str) {
        self.key.split_once('/').unwrap_or((self.key.as_str(), ""))
    }

    pub fn event_type(&self) -> String {
        event_type(&self.event_name)
    }
}

/// Per-object change detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub event_version: String,
    pub event_source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aws_region: String,
    pub event_time: Option<DateTime<Utc>>,
    pub event_name: String,
    pub user_identity: UserIdentity,
    pub request_parameters: RequestParameters,
    pub response_elements: ResponseElements,
    pub s3: S3Entity,
    pub source: Source,
}

impl Record {
    /// The object key with its query escaping (`+` and `%XX`) undone.
    ///
    /// A `%` not followed by two hex digits is rejected rather than kept.
    pub fn decoded_key(&self) -> Result<String, NotificationError> {
        let key = &self.s3.object.key;
        if let Some(offset) = malformed_escape(key) {
            return Err(NotificationError::KeyEscape {
                key: key.clone(),
                offset,
            });
        }
        let spaced: Cow<'_, str> = if key.contains('+') {
            Cow::Owned(key.replace('+', " "))
        } else {
            Cow::Borrowed(key)
        };
        urlencoding::decode(&spaced)
            .map(Cow::into_owned)
            .map_err(|source| NotificationError::KeyDecode {
                key: key.clone(),
                source,
            })
    }

    /// True when the change was made by the server's lifecycle expiry.
    pub fn is_lifecycle_expiry(&self) -> bool {
        self.source.host == LIFECYCLE_EXPIRY_ORIGIN
            || self.source.user_agent == LIFECYCLE_EXPIRY_ORIGIN
    }
}

/// Byte offset of the first `%` that does not start a `%XX` escape.
fn malformed_escape(key: &str) -> Option<usize> {
    let bytes = key.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        let valid = bytes
            .get(i + 1..i + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Some(i);
        }
        i += 3;
    }
    None
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserIdentity {
    pub principal_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestParameters {
    pub principal_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(rename = "sourceIPAddress")]
    pub source_ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResponseElements {
    pub content_length: String,
    pub x_amz_request_id: String,
    pub x_minio_deployment_id: String,
    pub x_minio_origin_endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S3Entity {
    pub s3_schema_version: String,
    pub configuration_id: String,
    pub bucket: Bucket,
    pub object: Object,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bucket {
    pub name: String,
    pub owner_identity: UserIdentity,
    pub arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Object {
    /// Query-escaped key; see [`Record::decoded_key`]
    pub key: String,
    /// Declared size in bytes. Advisory only.
    pub size: u64,
    pub e_tag: String,
    pub content_type: String,
    pub user_metadata: UserMetadata,
    pub sequencer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMetadata {
    #[serde(rename = "content-type")]
    pub content_type: String,
}

/// Where the change originated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    pub host: String,
    pub port: String,
    pub user_agent: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;
    use test_case::test_case;

    const PUT_PAYLOAD: &str = r#"{
        "EventName": "s3:ObjectCreated:Put",
        "Key": "photos/holiday/a+b%2Bc.jpg",
        "Records": [{
            "eventVersion": "2.0",
            "eventSource": "minio:s3",
            "awsRegion": "",
            "eventTime": "2024-03-01T12:00:00.000Z",
            "eventName": "s3:ObjectCreated:Put",
            "userIdentity": {"principalId": "minio"},
            "requestParameters": {"principalId": "minio", "region": "", "sourceIPAddress": "10.0.0.1"},
            "responseElements": {"content-length": "0", "x-amz-request-id": "17B", "x-minio-deployment-id": "d", "x-minio-origin-endpoint": "http://10.0.0.2:9000"},
            "s3": {
                "s3SchemaVersion": "1.0",
                "configurationId": "Config",
                "bucket": {"name": "photos", "ownerIdentity": {"principalId": "minio"}, "arn": "arn:aws:s3:::photos"},
                "object": {"key": "holiday%2Fa+b%2Bc.jpg", "size": 1024, "eTag": "abc", "contentType": "image/jpeg", "userMetadata": {"content-type": "image/jpeg"}, "sequencer": "17B"}
            },
            "source": {"host": "10.0.0.3", "port": "", "userAgent": "MinIO (linux; amd64) minio-go/v7.0.70"}
        }]
    }"#;

    #[test]
    fn test_decode_put_payload() {
        let envelope = Envelope::from_slice(PUT_PAYLOAD.as_bytes()).unwrap();

        assert_eq!(envelope.event_name, "s3:ObjectCreated:Put");
        assert_eq!(envelope.records.len(), 1);

        let record = &envelope.records[0];
        assert_eq!(record.s3.bucket.name, "photos");
        assert_eq!(record.s3.object.size, 1024);
        assert_eq!(record.s3.object.e_tag, "abc");
        assert_eq!(record.s3.object.content_type, "image/jpeg");
        assert_eq!(record.request_parameters.source_ip_address, "10.0.0.1");
        assert_eq!(
            record.response_elements.x_minio_origin_endpoint,
            "http://10.0.0.2:9000"
        );
        assert!(record.event_time.is_some());
        assert!(!record.is_lifecycle_expiry());
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let envelope =
            Envelope::from_slice(br#"{"EventName":"s3:ObjectRemoved:Delete","Key":"b/k"}"#)
                .unwrap();
        assert!(envelope.records.is_empty());

        let envelope = Envelope::from_slice(
            br#"{"EventName":"x","Key":"b/k","Records":[{"s3":{"object":{"key":"k"}}}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.records[0].s3.object.size, 0);
        assert_eq!(envelope.records[0].event_time, None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::from_slice(b"not json"),
            Err(NotificationError::Decode(_))
        ));
    }

    #[test]
    fn test_decoded_key() {
        let envelope = Envelope::from_slice(PUT_PAYLOAD.as_bytes()).unwrap();
        assert_eq!(
            envelope.records[0].decoded_key().unwrap(),
            "holiday/a b+c.jpg"
        );
    }

    #[test]
    fn test_decoded_key_invalid_utf8() {
        let mut record = Record::default();
        record.s3.object.key = "bad%FF%FE".to_string();
        assert!(matches!(
            record.decoded_key(),
            Err(NotificationError::KeyDecode { .. })
        ));
    }

    #[test_case("%ZZ.jpg", 0; "non-hex digits")]
    #[test_case("sale/50%", 7; "trailing percent")]
    #[test_case("a%2", 1; "truncated escape")]
    #[test_case("ok%20then%G1", 9; "second escape bad")]
    fn test_decoded_key_malformed_escape(key: &str, expected: usize) {
        let mut record = Record::default();
        record.s3.object.key = key.to_string();
        match record.decoded_key() {
            Err(NotificationError::KeyEscape { offset, .. }) => assert_eq!(offset, expected),
            other => panic!("expected KeyEscape, got {other:?}"),
        }
    }

    #[test]
    fn test_decoded_key_reserved_characters() {
        let mut record = Record::default();
        record.s3.object.key = "sale/50%25off+%5B1%5D~%23.jpg".to_string();
        assert_eq!(record.decoded_key().unwrap(), "sale/50%off [1]~#.jpg");
    }

    #[test_case("photos/a.jpg", "photos", "a.jpg"; "simple")]
    #[test_case("photos/dir/a.jpg", "photos", "dir/a.jpg"; "nested path")]
    #[test_case("photos", "photos", ""; "bucket only")]
    #[test_case("", "", ""; "empty")]
    fn test_bucket_and_path(key: &str, bucket: &str, path: &str) {
        let envelope = Envelope {
            key: key.to_string(),
            ..Default::default()
        };
        assert_eq!(envelope.bucket_and_path(), (bucket, path));
    }

    #[test_case("s3:ObjectCreated:Put", "s3:ObjectCreated")]
    #[test_case("s3:ObjectRemoved:DeleteMarkerCreated", "s3:ObjectRemoved")]
    #[test_case("s3:ObjectAccessed", "s3:ObjectAccessed")]
    #[test_case("bogus", "bogus")]
    fn test_event_type(name: &str, expected: &str) {
        assert_eq!(event_type(name), expected);
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(
            EventKind::parse("s3:ObjectCreated:CompleteMultipartUpload").unwrap(),
            EventKind::ObjectCreatedCompleteMultipartUpload
        );
        assert!(matches!(
            EventKind::parse("s3:ObjectCreated:Copy"),
            Err(NotificationError::UnsupportedEvent(_))
        ));
        assert!(EventKind::parse("ObjectCreated:Put").is_err());
    }

    #[test]
    fn test_event_kind_namespace_matches_event_type() {
        for kind in EventKind::iter() {
            assert_eq!(kind.namespace().to_string(), event_type(kind.as_ref()));
        }
    }

    #[test]
    fn test_lifecycle_expiry() {
        let mut record = Record::default();
        record.source.host = LIFECYCLE_EXPIRY_ORIGIN.to_string();
        assert!(record.is_lifecycle_expiry());

        let mut record = Record::default();
        record.source.user_agent = LIFECYCLE_EXPIRY_ORIGIN.to_string();
        assert!(record.is_lifecycle_expiry());
    }

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
    }
}
