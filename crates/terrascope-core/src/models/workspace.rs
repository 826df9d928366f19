use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Shared grouping of projects and members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "memberCount")]
    pub member_count: Option<u32>,
    #[serde(rename = "projectCount")]
    pub project_count: Option<u32>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload for `POST /workspaces`
#[derive(Debug, Clone, Serialize)]
pub struct NewWorkspace {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Payload for `PATCH /workspaces/{id}` - only the fields being changed are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkspaceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workspace_response() {
        let json = r#"{
            "id": "a7c2e9d0-5b1f-49e3-8a77-4f0cf4dd90b2",
            "name": "Coastal Monitoring",
            "description": null,
            "memberCount": 6,
            "projectCount": 11
        }"#;

        let workspace: Workspace =
            serde_json::from_str(json).expect("Failed to parse workspace JSON");
        assert_eq!(workspace.member_count, Some(6));
        assert!(workspace.description.is_none());
    }
}
