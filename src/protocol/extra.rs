//! Tenant-configured extra response fields.
//!
//! A tenant stores a JSON object whose keys are added to verification
//! responses. Two shapes are accepted:
//!
//! ```json
//! {"vip": {"value": "gold", "mode": "ALWAYS"}}
//! {"vip": "gold"}
//! ```
//!
//! The first carries its own merge policy (`SUCCESS_ONLY` when omitted); the
//! second uses the tenant's map-wide policy. String values may contain
//! placeholders from a fixed set (`${timestamp}`, `${nonce}`, ...). Anything
//! else inside `${...}` is left verbatim, so stored templates can never
//! expand into arbitrary data.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::MergePolicy;

/// Response keys owned by the protocol. Extra fields never replace these,
/// compared case-insensitively.
pub const CORE_FIELDS: [&str; 5] = ["success", "code", "message", "expireAt", "expireAtReadable"];

pub fn is_core_field(key: &str) -> bool {
    CORE_FIELDS.iter().any(|core| core.eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Timestamp,
    Millis,
    Date,
    Datetime,
    Iso8601,
    Uuid,
    Nonce,
    ExpireTs,
}

impl Placeholder {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "timestamp" => Self::Timestamp,
            "millis" => Self::Millis,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "iso8601" => Self::Iso8601,
            "uuid" => Self::Uuid,
            "nonce" => Self::Nonce,
            "expireTs" => Self::ExpireTs,
            _ => return None,
        })
    }

    fn render(self, ctx: &PlaceholderContext) -> String {
        match self {
            Self::Timestamp => ctx.now.timestamp().to_string(),
            Self::Millis => ctx.now.timestamp_millis().to_string(),
            Self::Date => ctx.now.format("%Y-%m-%d").to_string(),
            Self::Datetime => ctx.now.format("%Y-%m-%d %H:%M:%S").to_string(),
            Self::Iso8601 => ctx.now.to_rfc3339_opts(SecondsFormat::Millis, true),
            Self::Uuid => ctx.uuid.clone(),
            Self::Nonce => ctx.nonce.clone(),
            Self::ExpireTs => ctx.expire_ts.to_string(),
        }
    }
}

/// Values substituted into templates for one response. `uuid` and `nonce`
/// are drawn once, so every field in a response sees the same values.
#[derive(Debug, Clone)]
pub struct PlaceholderContext {
    pub now: DateTime<Utc>,
    pub expire_ts: i64,
    pub uuid: String,
    pub nonce: String,
}

impl PlaceholderContext {
    pub fn new(now: DateTime<Utc>, expire_ts: i64) -> Self {
        let nonce = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self {
            now,
            expire_ts,
            uuid: Uuid::new_v4().to_string(),
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    /// A string value, pre-split into literal and placeholder segments
    Template(Vec<Segment>),
    /// Any non-string JSON value, merged as-is
    Json(Value),
}

impl ExtraValue {
    fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Template(split_template(&s)),
            other => Self::Json(other),
        }
    }

    fn render(&self, ctx: &PlaceholderContext) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => out.push_str(s),
                        Segment::Placeholder(p) => out.push_str(&p.render(ctx)),
                    }
                }
                Value::String(out)
            }
        }
    }
}

fn split_template(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        literal.push_str(&rest[..start]);
        match Placeholder::from_token(&after[..end]) {
            Some(p) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(p));
            }
            None => literal.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtraField {
    pub name: String,
    pub policy: MergePolicy,
    pub value: ExtraValue,
}

/// Parsed form of a tenant's extra-field configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraTemplate {
    fields: Vec<ExtraField>,
}

impl ExtraTemplate {
    /// Parse the stored JSON. Anything other than a JSON object yields an
    /// empty template.
    pub fn parse(raw: &str, map_policy: MergePolicy) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::from_map(map, map_policy),
            Ok(_) | Err(_) => {
                tracing::warn!("Ignoring malformed extra field configuration");
                Self::default()
            }
        }
    }

    fn from_map(map: Map<String, Value>, map_policy: MergePolicy) -> Self {
        let fields = map
            .into_iter()
            .map(|(name, value)| match value {
                Value::Object(mut per_field) => {
                    let policy = MergePolicy::parse_lenient(
                        per_field.get("mode").and_then(Value::as_str),
                    );
                    let value = per_field.remove("value").unwrap_or(Value::Null);
                    ExtraField {
                        name,
                        policy,
                        value: ExtraValue::from_json(value),
                    }
                }
                flat => ExtraField {
                    name,
                    policy: map_policy,
                    value: ExtraValue::from_json(flat),
                },
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[ExtraField] {
        &self.fields
    }

    /// Merge every field whose policy admits this outcome into `body`.
    pub fn apply(&self, body: &mut Map<String, Value>, success: bool, ctx: &PlaceholderContext) {
        for field in &self.fields {
            if !field.policy.applies(success) || is_core_field(&field.name) {
                continue;
            }
            body.insert(field.name.clone(), field.value.render(ctx));
        }
    }
}

/// Merge a card's own extra JSON object into a success body.
pub fn merge_card_extra(body: &mut Map<String, Value>, raw: &str) {
    let Ok(Value::Object(extra)) = serde_json::from_str::<Value>(raw) else {
        return;
    };
    for (key, value) in extra {
        if !is_core_field(&key) {
            body.insert(key, value);
        }
    }
}
