use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A completed span, ready for encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// 128-bit trace identifier, hex encoded on the wire
    #[serde(with = "hex_id::u128_hex")]
    pub trace_id: u128,
    /// 64-bit span identifier
    #[serde(with = "hex_id::u64_hex")]
    pub span_id: u64,
    /// Parent span identifier (0 for a root span)
    #[serde(with = "hex_id::u64_hex", default)]
    pub parent_span_id: u64,
    pub name: String,
    pub kind: SpanKind,
    /// Unix nanoseconds
    pub start_time_unix_nano: u64,
    /// Unix nanoseconds
    pub end_time_unix_nano: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SpanStatus,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

/// Span kind according to the OpenTelemetry data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl SpanRecord {
    /// Starts a span now; call [`finish`](Self::finish) to close it.
    pub fn new(trace_id: u128, span_id: u64, name: impl Into<String>, kind: SpanKind) -> Self {
        let now = now_unix_nanos();
        Self {
            trace_id,
            span_id,
            parent_span_id: 0,
            name: name.into(),
            kind,
            start_time_unix_nano: now,
            end_time_unix_nano: now,
            attributes: BTreeMap::new(),
            status: SpanStatus::Unset,
        }
    }

    pub fn with_parent(mut self, parent_span_id: u64) -> Self {
        self.parent_span_id = parent_span_id;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time_unix_nano = now_unix_nanos().max(self.start_time_unix_nano);
        self.status = status;
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id == 0
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano)
    }
}

mod hex_id {
    pub mod u128_hex {
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(id: &u128, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&format!("{id:032x}"))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
            let raw = String::deserialize(d)?;
            u128::from_str_radix(&raw, 16).map_err(D::Error::custom)
        }
    }

    pub mod u64_hex {
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(id: &u64, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&format!("{id:016x}"))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
            let raw = String::deserialize(d)?;
            u64::from_str_radix(&raw, 16).map_err(D::Error::custom)
        }
    }
}
