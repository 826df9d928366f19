use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::utils::format_phone;

/// Customer organization that owns survey projects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(rename = "contactEmail")]
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Client {
    pub fn phone_display(&self) -> String {
        self.phone.as_deref().map(format_phone).unwrap_or_default()
    }
}

/// Payload for `POST /clients`
#[derive(Debug, Clone, Serialize)]
pub struct NewClient {
    pub name: String,
    #[serde(rename = "contactEmail", skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Payload for `PATCH /clients/{id}` - only the fields being changed are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "contactEmail", skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_response() {
        let json = r#"{
            "id": "0e65066c-ab20-4da0-b3bf-79dfd0668049",
            "name": "Acme Geomatics",
            "contactEmail": "ops@acme-geo.com",
            "phone": "5551234567",
            "address": "401 Pier Ave, Seattle WA"
        }"#;

        let client: Client = serde_json::from_str(json).expect("Failed to parse client JSON");
        assert!(client.active); // absent field defaults to active
        assert_eq!(client.phone_display(), "(555) 123-4567");
    }
}
