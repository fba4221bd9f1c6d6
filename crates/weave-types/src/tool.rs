use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independent external-capability channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFamily {
    /// Ad-hoc integrations (MCP servers)
    Integration,
    /// Native data queries
    DataQuery,
}

impl ToolFamily {
    pub const ALL: [ToolFamily; 2] = [ToolFamily::Integration, ToolFamily::DataQuery];
}

impl std::fmt::Display for ToolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolFamily::Integration => write!(f, "integration"),
            ToolFamily::DataQuery => write!(f, "data_query"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Executing,
    Completed,
    Failed,
}

/// One invocation of an external capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub family: ToolFamily,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn executing(
        family: ToolFamily,
        id: impl Into<String>,
        name: impl Into<String>,
        server_name: Option<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            family,
            name: name.into(),
            server_name,
            arguments,
            status: ToolCallStatus::Executing,
            result: None,
            error: None,
            elapsed_ms: None,
            started_at: Utc::now(),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.status == ToolCallStatus::Executing
    }

    /// Moves an executing record to its final state. Returns false if it already finished.
    pub fn finish(
        &mut self,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
        elapsed_ms: Option<u64>,
    ) -> bool {
        if !self.is_executing() {
            return false;
        }
        self.status = if success {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Failed
        };
        self.result = result;
        self.error = error;
        self.elapsed_ms = elapsed_ms;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finish_only_once() {
        let mut record = ToolCallRecord::executing(
            ToolFamily::Integration,
            "srv:search",
            "search",
            Some("srv".to_string()),
            json!({"q": "rust"}),
        );

        assert!(record.finish(false, None, Some("timeout".to_string()), Some(1200)));
        assert_eq!(record.status, ToolCallStatus::Failed);

        assert!(!record.finish(true, Some(json!({"ok": true})), None, Some(5)));
        assert_eq!(record.status, ToolCallStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert_eq!(record.elapsed_ms, Some(1200));
    }
}
