//! In-process [`Directory`] used for tests and dry runs, with fault injection

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pvault_core::types::{MemberRecord, ResourceConfig, ResourceSummary};
use pvault_core::{VaultError, VaultResult};
use regex::Regex;

use crate::directory::Directory;

#[derive(Debug, Clone)]
struct StoredResource {
    config: ResourceConfig,
    members: Vec<MemberRecord>,
}

#[derive(Debug, Default)]
struct Faults {
    describe: HashSet<String>,
    list_members: HashSet<String>,
    create_resource: HashSet<String>,
    create_member: HashSet<String>,
    add_to_group: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<String, StoredResource>,
    next_id: u64,
    faults: Faults,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a resource under a fixed id.
    pub fn insert_resource(&self, resource_id: &str, config: ResourceConfig) {
        self.state().resources.insert(
            resource_id.to_string(),
            StoredResource {
                config,
                members: Vec::new(),
            },
        );
    }

    /// Seed a member, including its group memberships.
    pub fn insert_member(&self, resource_id: &str, member: MemberRecord) {
        if let Some(resource) = self.state().resources.get_mut(resource_id) {
            resource.members.push(member);
        }
    }

    pub fn fail_describe(&self, resource_id: &str) {
        self.state().faults.describe.insert(resource_id.to_string());
    }

    pub fn fail_list_members(&self, resource_id: &str) {
        self.state().faults.list_members.insert(resource_id.to_string());
    }

    /// Fail `create_resource` for configs with this name.
    pub fn fail_create_resource(&self, name: &str) {
        self.state().faults.create_resource.insert(name.to_string());
    }

    pub fn fail_create_member(&self, username: &str) {
        self.state().faults.create_member.insert(username.to_string());
    }

    pub fn fail_add_to_group(&self, group: &str) {
        self.state().faults.add_to_group.insert(group.to_string());
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.state().resources.keys().cloned().collect()
    }

    pub fn resource(&self, resource_id: &str) -> Option<ResourceConfig> {
        self.state()
            .resources
            .get(resource_id)
            .map(|r| r.config.clone())
    }

    /// Id of the first resource with this name.
    pub fn find_by_name(&self, name: &str) -> Option<String> {
        self.state()
            .resources
            .iter()
            .find(|(_, r)| r.config.name == name)
            .map(|(id, _)| id.clone())
    }

    pub fn members(&self, resource_id: &str) -> Vec<MemberRecord> {
        self.state()
            .resources
            .get(resource_id)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }
}

fn not_found(resource_id: &str) -> VaultError {
    VaultError::Directory(format!("resource not found: {resource_id}"))
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_resources(&self, pattern: &Regex) -> VaultResult<Vec<ResourceSummary>> {
        Ok(self
            .state()
            .resources
            .iter()
            .filter(|(_, r)| pattern.is_match(&r.config.name))
            .map(|(id, r)| ResourceSummary {
                id: id.clone(),
                name: r.config.name.clone(),
            })
            .collect())
    }

    async fn describe_resource(&self, resource_id: &str) -> VaultResult<ResourceConfig> {
        let state = self.state();
        if state.faults.describe.contains(resource_id) {
            return Err(VaultError::Directory(format!(
                "describe {resource_id}: injected failure"
            )));
        }
        state
            .resources
            .get(resource_id)
            .map(|r| r.config.clone())
            .ok_or_else(|| not_found(resource_id))
    }

    async fn list_members(&self, resource_id: &str) -> VaultResult<Vec<MemberRecord>> {
        let state = self.state();
        if state.faults.list_members.contains(resource_id) {
            return Err(VaultError::Directory(format!(
                "list members of {resource_id}: injected failure"
            )));
        }
        let resource = state
            .resources
            .get(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        Ok(resource
            .members
            .iter()
            .map(|m| MemberRecord {
                groups: Vec::new(),
                ..m.clone()
            })
            .collect())
    }

    async fn list_member_groups(
        &self,
        resource_id: &str,
        username: &str,
    ) -> VaultResult<Vec<String>> {
        let state = self.state();
        let resource = state
            .resources
            .get(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        resource
            .members
            .iter()
            .find(|m| m.username == username)
            .map(|m| m.groups.clone())
            .ok_or_else(|| VaultError::Directory(format!("member not found: {username}")))
    }

    async fn create_resource(&self, config: &ResourceConfig) -> VaultResult<String> {
        let mut state = self.state();
        if state.faults.create_resource.contains(&config.name) {
            return Err(VaultError::Directory(format!(
                "create {}: injected failure",
                config.name
            )));
        }
        state.next_id += 1;
        let id = format!("mem_{:04}", state.next_id);
        state.resources.insert(
            id.clone(),
            StoredResource {
                config: config.clone(),
                members: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn create_member(&self, resource_id: &str, member: &MemberRecord) -> VaultResult<()> {
        let mut state = self.state();
        if state.faults.create_member.contains(&member.username) {
            return Err(VaultError::Directory(format!(
                "create member {}: injected failure",
                member.username
            )));
        }
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        if resource.members.iter().any(|m| m.username == member.username) {
            return Err(VaultError::Directory(format!(
                "member already exists: {}",
                member.username
            )));
        }
        resource.members.push(MemberRecord {
            groups: Vec::new(),
            ..member.clone()
        });
        Ok(())
    }

    async fn add_member_to_group(
        &self,
        resource_id: &str,
        username: &str,
        group: &str,
    ) -> VaultResult<()> {
        let mut state = self.state();
        if state.faults.add_to_group.contains(group) {
            return Err(VaultError::Directory(format!(
                "group not found: {group}"
            )));
        }
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        let member = resource
            .members
            .iter_mut()
            .find(|m| m.username == username)
            .ok_or_else(|| VaultError::Directory(format!("member not found: {username}")))?;
        if !member.groups.iter().any(|g| g == group) {
            member.groups.push(group.to_string());
        }
        Ok(())
    }
}
