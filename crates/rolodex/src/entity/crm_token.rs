//! CrmToken entity - the single live credential set for the CRM integration.

use sea_orm::entity::prelude::*;

/// The persisted OAuth + REST session credential set.
///
/// Replaced wholesale on every refresh; never updated field by field.
#[derive(Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub access_token: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub refresh_token: Option<String>,

    /// Session-specific REST base URL returned by the REST login.
    #[sea_orm(column_type = "Text")]
    pub rest_base_url: String,
    /// Session token (`BhRestToken`) returned by the REST login.
    #[sea_orm(column_type = "Text")]
    pub session_token: String,

    /// Access token expiry. `None` when the CRM did not report a lifetime.
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("rest_base_url", &self.rest_base_url)
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Model {
    /// Join a REST path onto the session base URL.
    pub fn rest_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.rest_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> Model {
        Model {
            id: Uuid::new_v4(),
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            rest_base_url: "https://rest9.example.com/rest-services/abc/".to_string(),
            session_token: "secret-session".to_string(),
            expires_at: None,
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", record());
        assert!(!rendered.contains("secret-"));
        assert!(rendered.contains("rest9.example.com"));
    }

    #[test]
    fn rest_url_joins_without_double_slash() {
        assert_eq!(
            record().rest_url("/query/ClientContact"),
            "https://rest9.example.com/rest-services/abc/query/ClientContact"
        );
    }
}
