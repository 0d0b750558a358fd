//! The directory-service seam: where resources and members come from and go back to

use async_trait::async_trait;
use pvault_core::types::{MemberRecord, ResourceConfig, ResourceSummary};
use pvault_core::VaultResult;
use regex::Regex;

/// A directory service holding resources (user pools) and their members.
///
/// Every call is an await point; implementations handle their own paging.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resources whose name matches `pattern`.
    async fn list_resources(&self, pattern: &Regex) -> VaultResult<Vec<ResourceSummary>>;

    async fn describe_resource(&self, resource_id: &str) -> VaultResult<ResourceConfig>;

    /// Members of a resource. `groups` may be left empty; the collector
    /// fills it from [`Directory::list_member_groups`].
    async fn list_members(&self, resource_id: &str) -> VaultResult<Vec<MemberRecord>>;

    async fn list_member_groups(&self, resource_id: &str, username: &str)
        -> VaultResult<Vec<String>>;

    /// Create a resource from a backed-up configuration, returning its new id.
    async fn create_resource(&self, config: &ResourceConfig) -> VaultResult<String>;

    /// Create a member without sending any invitation or notification.
    async fn create_member(&self, resource_id: &str, member: &MemberRecord) -> VaultResult<()>;

    async fn add_member_to_group(
        &self,
        resource_id: &str,
        username: &str,
        group: &str,
    ) -> VaultResult<()>;
}
