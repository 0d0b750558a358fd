//! Records persisted inside a backup archive

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Archive format version written into every `metadata.json`
pub const FORMAT_VERSION: &str = "1.0";

pub const METADATA_FILE: &str = "metadata.json";
pub const RESOURCE_CONFIG_FILE: &str = "resource-config.json";
pub const MEMBERS_FILE: &str = "members.json";

/// Per-resource backup metadata (`<resourceId>/metadata.json`).
///
/// Restore rebuilds a resource from the files listed in `backup_files` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    /// RFC 3339 UTC timestamp of the collection
    pub timestamp: String,
    pub resource_id: String,
    pub backup_files: Vec<String>,
}

impl BackupMetadata {
    /// Metadata for a resource collected now, listing the standard payload files.
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            resource_id: resource_id.into(),
            backup_files: vec![RESOURCE_CONFIG_FILE.to_string(), MEMBERS_FILE.to_string()],
        }
    }

    pub fn lists(&self, file_name: &str) -> bool {
        self.backup_files.iter().any(|f| f == file_name)
    }
}

/// A resource as returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: String,
    pub name: String,
}

/// Resource configuration (`resource-config.json`).
///
/// Everything except `name` is opaque to pvault and handed back to the
/// directory verbatim on restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceConfig {
    pub name: String,
    pub policies: serde_json::Value,
    pub mfa_configuration: serde_json::Value,
    pub custom_attributes: Vec<serde_json::Value>,
    pub triggers: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAttribute {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Value")]
    pub value: String,
}

impl MemberAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One member of a resource with its group memberships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub username: String,
    #[serde(default)]
    pub attributes: Vec<MemberAttribute>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Member export (`members.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersExport {
    pub members: Vec<MemberRecord>,
}
