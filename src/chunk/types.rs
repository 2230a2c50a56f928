//! Domain payload types captured from the workspace API.
//!
//! Every struct keeps the fields the store needs for denormalized columns
//! and filtering; everything else the API returned rides along in `extra`
//! so the serialized payload round-trips verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel value of [`Message::latest_reply`] meaning every reply in the
/// thread was deleted: the starter still looks like a thread lead, but there
/// is nothing left to fetch.
pub const LATEST_REPLY_NO_REPLIES: &str = "no_replies";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reply_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Message {
    /// A thread starter carries its own timestamp as the thread timestamp.
    pub fn is_thread_start(&self) -> bool {
        self.thread_ts.as_deref() == Some(self.ts.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private_download: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_members: i64,
    /// Populated by the read facade from the membership table; chunk
    /// payloads rarely carry it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workspace identity as reported by the auth probe at crawl start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub team: String,
    pub team_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchChannel {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// A message hit returned by the workspace search endpoint. Unlike channel
/// messages these are not versioned entities: every capture is its own row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMessage {
    pub ts: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<SearchChannel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_start_detection() {
        let mut m = Message {
            ts: "123.456".into(),
            ..Default::default()
        };
        assert!(!m.is_thread_start());
        m.thread_ts = Some("123.456".into());
        assert!(m.is_thread_start());
        m.thread_ts = Some("100.000".into());
        assert!(!m.is_thread_start());
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{"ts":"1.000","text":"hi","client_msg_id":"abc","blocks":[{"type":"rich_text"}]}"#;
        let m: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(m.extra["client_msg_id"], "abc");
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["blocks"][0]["type"], "rich_text");
    }
}
