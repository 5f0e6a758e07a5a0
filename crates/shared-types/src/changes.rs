use serde::{Deserialize, Serialize};

/// Type of change between a saved snapshot and the live system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Create => f.write_str("create"),
            ChangeType::Update => f.write_str("update"),
            ChangeType::Delete => f.write_str("delete"),
        }
    }
}

/// Description of a single configuration difference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigChange {
    pub change_type: ChangeType,
    pub target: String,
    pub old_config: Option<serde_json::Value>,
    pub new_config: Option<serde_json::Value>,
    pub description: String,
}
