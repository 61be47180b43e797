use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    /// ISO 4217 code of the user's budgeting currency
    pub currency: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_response() {
        let json = r#"{
            "id": "u-42",
            "username": "alice",
            "email": "alice@example.com",
            "displayName": "Alice",
            "currency": "EUR"
        }"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, "u-42");
        assert_eq!(profile.display_name(), "Alice");
        assert_eq!(profile.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let json = r#"{"id":"u-1","username":"bob","displayName":"  "}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.display_name(), "bob");
        assert!(profile.email.is_none());
    }
}
