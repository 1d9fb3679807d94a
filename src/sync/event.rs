use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entity types published by the Ledger server.
///
/// The engine never validates against this list; it exists so collaborators
/// and the CLI can name the common categories without string typos.
pub mod entity {
	pub const EXPENSE: &str = "expense";
	pub const BUDGET: &str = "budget";
	pub const PEOPLE: &str = "people";
	pub const PAYMENT_METHOD: &str = "payment_method";
	pub const LOAN: &str = "loan";
	pub const INVESTMENT: &str = "investment";
	pub const FIXED_EXPENSE: &str = "fixed_expense";
	pub const BACKUP: &str = "backup";
	pub const INCOME: &str = "income";
	pub const CATEGORY: &str = "category";
	pub const PLACE: &str = "place";
	pub const SETTINGS: &str = "settings";

	pub const KNOWN: &[&str] = &[
		EXPENSE,
		BUDGET,
		PEOPLE,
		PAYMENT_METHOD,
		LOAN,
		INVESTMENT,
		FIXED_EXPENSE,
		BACKUP,
		INCOME,
		CATEGORY,
		PLACE,
		SETTINGS,
	];
}

/// Why an incoming payload was not accepted as a [`SyncEvent`].
#[derive(Debug, Error)]
pub enum EventParseError {
	#[error("invalid sync event payload: {0}")]
	Json(#[from] serde_json::Error),

	#[error("sync event is missing `{0}`")]
	MissingField(&'static str),
}

/// A single change notification delivered over the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
	/// Domain category that changed (e.g. "expense")
	#[serde(rename = "entityType")]
	pub entity_type: String,
	/// Session identity of the client that produced the mutation. Absent for
	/// changes the server makes on its own (e.g. scheduled backups).
	#[serde(
		rename = "tabId",
		alias = "originId",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub origin_id: Option<String>,
	/// ISO-8601 time of the change, informational only
	#[serde(default)]
	pub timestamp: String,
}

impl SyncEvent {
	pub fn new(entity_type: impl Into<String>, origin_id: impl Into<String>) -> Self {
		Self {
			entity_type: entity_type.into(),
			origin_id: Some(origin_id.into()),
			timestamp: Utc::now().to_rfc3339(),
		}
	}

	/// An event with no originating client.
	pub fn unattributed(entity_type: impl Into<String>) -> Self {
		Self {
			entity_type: entity_type.into(),
			origin_id: None,
			timestamp: Utc::now().to_rfc3339(),
		}
	}

	/// Parse one message payload. A blank entity type is missing; a blank or
	/// null tab id means the change is unattributed.
	pub fn parse(payload: &str) -> Result<Self, EventParseError> {
		let mut event: SyncEvent = serde_json::from_str(payload)?;
		if event.entity_type.trim().is_empty() {
			return Err(EventParseError::MissingField("entityType"));
		}
		if event.origin_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
			event.origin_id = None;
		}
		Ok(event)
	}

	/// The timestamp as UTC, when it is valid RFC 3339.
	pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
		DateTime::parse_from_rfc3339(&self.timestamp)
			.ok()
			.map(|t| t.with_timezone(&Utc))
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn parses_wire_payload() {
		let event = SyncEvent::parse(
			r#"{"entityType":"expense","tabId":"tab-1","timestamp":"2024-03-01T10:15:00.000Z"}"#,
		)
		.expect("payload should parse");

		assert_eq!(event.entity_type, "expense");
		assert_eq!(event.origin_id.as_deref(), Some("tab-1"));
		let ts = event.timestamp_utc().expect("timestamp should parse");
		assert_eq!(ts.to_rfc3339(), "2024-03-01T10:15:00+00:00");
	}

	#[test]
	fn accepts_origin_alias_and_missing_timestamp() {
		let event = SyncEvent::parse(r#"{"entityType":"loan","originId":"tab-9"}"#)
			.expect("alias should parse");
		assert_eq!(event.origin_id.as_deref(), Some("tab-9"));
		assert!(event.timestamp.is_empty());
		assert!(event.timestamp_utc().is_none());
	}

	#[test]
	fn rejects_malformed_payloads() {
		assert!(matches!(
			SyncEvent::parse("not json"),
			Err(EventParseError::Json(_))
		));
		assert!(matches!(
			SyncEvent::parse(r#"{"tabId":"t"}"#),
			Err(EventParseError::Json(_))
		));
		assert!(matches!(
			SyncEvent::parse(r#"{"entityType":"  ","tabId":"t"}"#),
			Err(EventParseError::MissingField("entityType"))
		));
		assert!(matches!(
			SyncEvent::parse(r#"{"entityType":"budget","tabId":7}"#),
			Err(EventParseError::Json(_))
		));
	}

	#[test]
	fn missing_null_or_blank_tab_id_is_unattributed() {
		for payload in [
			r#"{"entityType":"backup","tabId":null,"timestamp":"2024-03-01T02:00:00Z"}"#,
			r#"{"entityType":"backup"}"#,
			r#"{"entityType":"backup","tabId":"  "}"#,
		] {
			let event = SyncEvent::parse(payload).expect("unattributed change should parse");
			assert_eq!(event.entity_type, entity::BACKUP);
			assert_eq!(event.origin_id, None, "payload {}", payload);
		}

		let json = SyncEvent::unattributed(entity::BACKUP)
			.to_json()
			.expect("serialize");
		assert!(!json.contains("tabId"));
	}

	#[test]
	fn serializes_with_wire_names() {
		let event = SyncEvent::new(entity::BUDGET, "tab-3");
		let json = event.to_json().expect("serialize");
		assert!(json.contains(r#""entityType":"budget""#));
		assert!(json.contains(r#""tabId":"tab-3""#));
		assert!(event.timestamp_utc().is_some());
	}

	#[test]
	fn known_entity_types_are_unique() {
		let mut seen = std::collections::HashSet::new();
		for t in entity::KNOWN {
			assert!(seen.insert(*t), "duplicate entity type {}", t);
		}
	}
}
