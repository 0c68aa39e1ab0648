//! Sync message model
//!
//! A [`SyncMessage`] describes one logical change to propagate between the
//! time-series store and the relational store. Direction and operation are
//! persisted as text by the message store; [`SyncMessage::direction`] and
//! [`SyncMessage::operation`] parse them into closed enums so dispatch can
//! match exhaustively.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::REQUIRED_IDENTIFIER_FIELDS;
use crate::errors::Result;
use crate::types::status::SyncStatus;

/// Which way a change flows. The time-series store is side A and the
/// relational store side B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    TimeseriesToRelational,
    RelationalToTimeseries,
    Bidirectional,
}

crate::impl_domain_status_conversions!(SyncDirection {
    TimeseriesToRelational => "timeseries_to_relational",
    RelationalToTimeseries => "relational_to_timeseries",
    Bidirectional => "bidirectional",
});

/// Kind of change carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    BulkInsert,
}

crate::impl_domain_status_conversions!(OperationType {
    Insert => "insert",
    Update => "update",
    Delete => "delete",
    BulkInsert => "bulk_insert",
});

/// Key attributes identifying a logical record, e.g.
/// `{symbol: "AAA", kind: "quote", granularity: "1d"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordIdentifier(BTreeMap<String, String>);

impl RecordIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Required identifier fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_IDENTIFIER_FIELDS
            .iter()
            .copied()
            .filter(|field| self.get(field).map_or(true, |v| v.trim().is_empty()))
            .collect()
    }

    /// Overlays the required identifier fields found as strings on a
    /// bulk-insert element onto this template.
    #[must_use]
    pub fn merged_with_element(&self, element: &Value) -> Self {
        let mut merged = self.clone();
        if let Some(object) = element.as_object() {
            for field in REQUIRED_IDENTIFIER_FIELDS {
                if let Some(value) = object.get(field).and_then(Value::as_str) {
                    merged.insert(field, value);
                }
            }
        }
        merged
    }

    /// Resolves the addressable key, or returns the missing field names.
    pub fn to_record_key(&self) -> std::result::Result<RecordKey, Vec<&'static str>> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(missing);
        }
        let field = |name: &str| self.get(name).unwrap_or_default().trim().to_string();
        Ok(RecordKey {
            symbol: field("symbol"),
            kind: field("kind"),
            granularity: field("granularity"),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RecordIdentifier {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Fully resolved record address shared by both stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub symbol: String,
    pub kind: String,
    pub granularity: String,
}

impl RecordKey {
    pub fn new(
        symbol: impl Into<String>,
        kind: impl Into<String>,
        granularity: impl Into<String>,
    ) -> Self {
        Self { symbol: symbol.into(), kind: kind.into(), granularity: granularity.into() }
    }

    /// Symbol name used by the time-series library, e.g. `AAA/quote/1d`.
    pub fn storage_symbol(&self) -> String {
        format!("{}/{}/{}", self.symbol, self.kind, self.granularity)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_symbol())
    }
}

/// One logical change to propagate between the two stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub id: String,
    /// Persisted direction text; see [`SyncMessage::direction`].
    pub sync_direction: String,
    /// Persisted operation text; see [`SyncMessage::operation`].
    pub operation_type: String,
    pub source_table: String,
    pub target_table: String,
    pub record_identifier: RecordIdentifier,
    pub payload: Value,
    pub status: SyncStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub sync_latency_ms: Option<i64>,
    pub processing_duration_ms: Option<i64>,
    pub rows_affected: Option<i64>,
}

impl SyncMessage {
    /// Creates a pending message with a fresh id, as a producer would.
    pub fn new(
        direction: SyncDirection,
        operation: OperationType,
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        record_identifier: RecordIdentifier,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sync_direction: direction.to_string(),
            operation_type: operation.to_string(),
            source_table: source_table.into(),
            target_table: target_table.into(),
            record_identifier,
            payload,
            status: SyncStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: None,
            processed_by: None,
            error_message: None,
            error_details: None,
            sync_latency_ms: None,
            processing_duration_ms: None,
            rows_affected: None,
        }
    }

    /// Parses the persisted direction into its closed enum.
    pub fn direction(&self) -> Result<SyncDirection> {
        self.sync_direction.parse()
    }

    /// Parses the persisted operation into its closed enum.
    pub fn operation(&self) -> Result<OperationType> {
        self.operation_type.parse()
    }

    /// Table holding this record on the time-series side.
    pub fn timeseries_table(&self) -> &str {
        match self.direction() {
            Ok(SyncDirection::RelationalToTimeseries) => &self.target_table,
            _ => &self.source_table,
        }
    }

    /// Table holding this record on the relational side.
    pub fn relational_table(&self) -> &str {
        match self.direction() {
            Ok(SyncDirection::RelationalToTimeseries) => &self.source_table,
            _ => &self.target_table,
        }
    }
}
