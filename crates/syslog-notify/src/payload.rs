// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Chat notification payloads built from syslog records.
//!
//! The wire format is the incoming-webhook attachment message:
//!
//! ```text
//! {"attachments":[{"fallback":"[app] boom","color":"#rrggbb","field":[
//!   {"title":"tag","value":"app","short":true},
//!   {"title":"hostname","value":"h1","short":true},
//!   {"title":"time","value":"02 Jan 24 03:04 -0700","short":false},
//!   {"title":"content","value":"boom","short":false}]}]}
//! ```

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::message::MessageRecord;

/// RFC 822 with a numeric zone. Chat clients size the time column for it.
pub const TIME_FORMAT: &str = "%d %b %y %H:%M %z";

/// Number of digest bytes turned into the color code.
const COLOR_BYTES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pretext: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(rename = "field", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub title: &'static str,
    pub value: String,
    pub short: bool,
}

impl Field {
    fn new(title: &'static str, value: impl Into<String>, short: bool) -> Self {
        Self {
            title,
            value: value.into(),
            short,
        }
    }
}

impl Notification {
    /// Encodes the notification as the JSON request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<&MessageRecord> for Notification {
    fn from(record: &MessageRecord) -> Self {
        transform(record)
    }
}

/// Builds the notification for one record. Total and deterministic.
#[must_use]
pub fn transform(record: &MessageRecord) -> Notification {
    let attachment = Attachment {
        fallback: format!("[{}] {}", record.tag(), record.content()),
        pretext: String::new(),
        color: color_tag(record.tag()),
        fields: vec![
            Field::new("tag", record.tag(), true),
            Field::new("hostname", record.hostname(), true),
            Field::new("time", format_timestamp(&record.timestamp()), false),
            Field::new("content", record.content(), false),
        ],
    };

    Notification {
        text: String::new(),
        attachments: vec![attachment],
    }
}

/// `#` followed by the first three bytes of the tag's SHA-1, in lowercase hex.
/// Depends on the tag only, so a source keeps its color across messages.
#[must_use]
pub fn color_tag(tag: &str) -> String {
    let digest = Sha1::digest(tag.as_bytes());
    format!("#{}", hex::encode(&digest[..COLOR_BYTES]))
}

#[must_use]
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_record() -> MessageRecord {
        let timestamp = FixedOffset::west_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();
        MessageRecord::new("app", "h1", "boom", timestamp)
    }

    #[test]
    fn test_transform_example_record() {
        let notification = transform(&sample_record());

        assert_eq!(notification.text, "");
        assert_eq!(notification.attachments.len(), 1);
        let attachment = &notification.attachments[0];
        assert_eq!(attachment.fallback, "[app] boom");
        assert_eq!(attachment.pretext, "");
        assert_eq!(attachment.color, "#7d1043");

        let titles: Vec<_> = attachment.fields.iter().map(|f| f.title).collect();
        assert_eq!(titles, ["tag", "hostname", "time", "content"]);
        let shorts: Vec<_> = attachment.fields.iter().map(|f| f.short).collect();
        assert_eq!(shorts, [true, true, false, false]);
        assert_eq!(attachment.fields[0].value, "app");
        assert_eq!(attachment.fields[1].value, "h1");
        assert_eq!(attachment.fields[2].value, "02 Jan 24 03:04 -0700");
        assert_eq!(attachment.fields[3].value, "boom");
    }

    #[test]
    fn test_color_tag_known_digests() {
        // sha1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        assert_eq!(color_tag(""), "#da39a3");
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(color_tag("abc"), "#a9993e");
    }

    #[test]
    fn test_format_timestamp_positive_offset() {
        let timestamp = FixedOffset::east_opt(5 * 3600 + 1800)
            .unwrap()
            .with_ymd_and_hms(2006, 1, 2, 15, 4, 5)
            .unwrap();
        assert_eq!(format_timestamp(&timestamp), "02 Jan 06 15:04 +0530");
    }

    #[test]
    fn test_wire_format() {
        let body = transform(&sample_record()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            value,
            json!({
                "attachments": [{
                    "fallback": "[app] boom",
                    "color": "#7d1043",
                    "field": [
                        {"title": "tag", "value": "app", "short": true},
                        {"title": "hostname", "value": "h1", "short": true},
                        {"title": "time", "value": "02 Jan 24 03:04 -0700", "short": false},
                        {"title": "content", "value": "boom", "short": false},
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_wire_format_keeps_empty_field_values() {
        let record = MessageRecord::new("", "", "", sample_record().timestamp());
        let body = transform(&record).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        let attachment = &value["attachments"][0];
        assert_eq!(attachment["fallback"], "[] ");
        assert_eq!(attachment["field"][0], json!({"title": "tag", "value": "", "short": true}));
        assert_eq!(attachment["field"][3], json!({"title": "content", "value": "", "short": false}));
        assert!(attachment.get("pretext").is_none());
    }

    #[test]
    fn test_fallback_is_not_escaped() {
        let record = MessageRecord::new("a\"b", "h1", "<x> & \"y\"", sample_record().timestamp());
        let notification = transform(&record);
        assert_eq!(notification.attachments[0].fallback, "[a\"b] <x> & \"y\"");

        let body = notification.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["attachments"][0]["fallback"], "[a\"b] <x> & \"y\"");
    }

    proptest! {
        #[test]
        fn prop_color_depends_only_on_tag(tag in ".*", content_a in ".*", content_b in ".*") {
            let timestamp = sample_record().timestamp();
            let first = transform(&MessageRecord::new(tag.clone(), "h1", content_a, timestamp));
            let second = transform(&MessageRecord::new(tag.clone(), "h2", content_b, timestamp));

            prop_assert_eq!(&first.attachments[0].color, &second.attachments[0].color);
            prop_assert_eq!(first.attachments[0].color.clone(), color_tag(&tag));
            prop_assert_eq!(first.attachments[0].color.len(), 7);
            prop_assert!(first.attachments[0].color[1..]
                .chars()
                .all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }
}
