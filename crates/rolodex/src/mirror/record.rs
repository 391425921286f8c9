//! Extraction of mirror columns from a raw CRM contact record.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::Value;

use super::errors::{MirrorError, Result};

/// Trim and lowercase an email; `None` if nothing is left.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() { None } else { Some(email) }
}

/// Columns pulled out of one contact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFields {
    pub remote_id: Option<i64>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub phone: Option<String>,
    pub is_deleted: bool,
    pub remote_updated_at: Option<DateTime<FixedOffset>>,
}

impl ContactFields {
    /// Extract the fields, rejecting records without any usable key.
    pub fn from_record(record: &Value) -> Result<Self> {
        let obj = record
            .as_object()
            .ok_or_else(|| MirrorError::malformed("record is not a JSON object"))?;

        let remote_id = obj.get("id").and_then(as_i64);
        let email = obj
            .get("email")
            .and_then(Value::as_str)
            .and_then(normalize_email);

        if remote_id.is_none() && email.is_none() {
            return Err(MirrorError::malformed("record has neither id nor email"));
        }

        let company_name = obj
            .get("clientCorporation")
            .and_then(|c| c.get("name"))
            .or_else(|| obj.get("companyName"))
            .and_then(text);

        Ok(Self {
            remote_id,
            email,
            first_name: obj.get("firstName").and_then(text),
            last_name: obj.get("lastName").and_then(text),
            company_name,
            phone: obj.get("phone").and_then(text),
            is_deleted: obj
                .get("isDeleted")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            remote_updated_at: obj.get("dateLastModified").and_then(epoch_millis),
        })
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn epoch_millis(value: &Value) -> Option<DateTime<FixedOffset>> {
    let millis = value.as_i64()?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ann@Example.COM "), Some("ann@example.com".into()));
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn extracts_all_fields() {
        let fields = ContactFields::from_record(&json!({
            "id": 42,
            "email": "Ann@X.com",
            "firstName": "Ann",
            "lastName": " Lee ",
            "phone": "",
            "isDeleted": true,
            "dateLastModified": 1_700_000_000_000_i64,
            "clientCorporation": {"id": 9, "name": "Acme"}
        }))
        .unwrap();

        assert_eq!(fields.remote_id, Some(42));
        assert_eq!(fields.email.as_deref(), Some("ann@x.com"));
        assert_eq!(fields.last_name.as_deref(), Some("Lee"));
        assert_eq!(fields.phone, None);
        assert_eq!(fields.company_name.as_deref(), Some("Acme"));
        assert!(fields.is_deleted);
        assert_eq!(
            fields.remote_updated_at.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn string_ids_are_accepted() {
        let fields = ContactFields::from_record(&json!({"id": "17"})).unwrap();
        assert_eq!(fields.remote_id, Some(17));
    }

    #[test]
    fn records_without_key_are_malformed() {
        let err = ContactFields::from_record(&json!({"firstName": "Nobody", "email": " "}))
            .expect_err("no key");
        assert!(err.is_record_level());
        assert!(ContactFields::from_record(&json!([1, 2])).is_err());
    }
}
