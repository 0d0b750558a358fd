use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::DisplayErrorContext;
use aws_sdk_cognitoidentityprovider::types::{DeliveryMediumType, MessageActionType};
use aws_sdk_cognitoidentityprovider::Client;
use pvault_backup::Directory;
use pvault_core::types::{MemberRecord, ResourceConfig, ResourceSummary};
use pvault_core::{VaultError, VaultResult};
use regex::Regex;
use tracing::debug;

use crate::convert;

/// Page size for `ListUserPools` (the API maximum)
const LIST_POOLS_PAGE: i32 = 60;

/// Cognito user pools as a [`Directory`]
#[derive(Clone)]
pub struct CognitoDirectory {
    client: Client,
}

impl CognitoDirectory {
    pub async fn new(region: &str) -> Self {
        let sdk_config = crate::load_sdk_config(region).await;
        debug!(region, "Cognito client ready");
        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn sdk_err<E: std::error::Error>(op: &str, target: &str, err: E) -> VaultError {
    VaultError::Directory(format!("{op} {target}: {}", DisplayErrorContext(err)))
}

#[async_trait]
impl Directory for CognitoDirectory {
    async fn list_resources(&self, pattern: &Regex) -> VaultResult<Vec<ResourceSummary>> {
        let mut pools = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_user_pools()
                .max_results(LIST_POOLS_PAGE)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_err("ListUserPools", pattern.as_str(), e))?;

            pools.extend(out.user_pools().iter().filter_map(|pool| {
                let name = pool.name()?;
                pattern.is_match(name).then(|| ResourceSummary {
                    id: pool.id().unwrap_or_default().to_string(),
                    name: name.to_string(),
                })
            }));

            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        debug!(pattern = %pattern, matched = pools.len(), "listed user pools");
        Ok(pools)
    }

    async fn describe_resource(&self, resource_id: &str) -> VaultResult<ResourceConfig> {
        let out = self
            .client
            .describe_user_pool()
            .user_pool_id(resource_id)
            .send()
            .await
            .map_err(|e| sdk_err("DescribeUserPool", resource_id, e))?;
        let pool = out.user_pool().ok_or_else(|| {
            VaultError::Directory(format!("DescribeUserPool {resource_id}: empty response"))
        })?;
        Ok(convert::config_from_pool(pool))
    }

    async fn list_members(&self, resource_id: &str) -> VaultResult<Vec<MemberRecord>> {
        let mut members = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_users()
                .user_pool_id(resource_id)
                .set_pagination_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_err("ListUsers", resource_id, e))?;

            members.extend(out.users().iter().filter_map(convert::member_from_user));

            match out.pagination_token() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }
        Ok(members)
    }

    async fn list_member_groups(
        &self,
        resource_id: &str,
        username: &str,
    ) -> VaultResult<Vec<String>> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .admin_list_groups_for_user()
                .user_pool_id(resource_id)
                .username(username)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_err("AdminListGroupsForUser", username, e))?;

            groups.extend(
                out.groups()
                    .iter()
                    .filter_map(|g| g.group_name().map(str::to_string)),
            );

            match out.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(groups)
    }

    async fn create_resource(&self, config: &ResourceConfig) -> VaultResult<String> {
        let schema = convert::schema_attributes(&config.custom_attributes);
        let out = self
            .client
            .create_user_pool()
            .pool_name(&config.name)
            .set_policies(convert::pool_policies(&config.policies))
            .mfa_configuration(convert::mfa_type(&config.mfa_configuration))
            .set_schema((!schema.is_empty()).then_some(schema))
            .set_lambda_config(convert::lambda_config(&config.triggers))
            .send()
            .await
            .map_err(|e| sdk_err("CreateUserPool", &config.name, e))?;

        out.user_pool()
            .and_then(|pool| pool.id())
            .map(str::to_string)
            .ok_or_else(|| {
                VaultError::Directory(format!("CreateUserPool {}: no pool id returned", config.name))
            })
    }

    async fn create_member(&self, resource_id: &str, member: &MemberRecord) -> VaultResult<()> {
        self.client
            .admin_create_user()
            .user_pool_id(resource_id)
            .username(&member.username)
            .set_user_attributes(Some(convert::user_attributes(member)?))
            .message_action(MessageActionType::Suppress)
            .desired_delivery_mediums(DeliveryMediumType::Email)
            .send()
            .await
            .map_err(|e| sdk_err("AdminCreateUser", &member.username, e))?;
        Ok(())
    }

    async fn add_member_to_group(
        &self,
        resource_id: &str,
        username: &str,
        group: &str,
    ) -> VaultResult<()> {
        self.client
            .admin_add_user_to_group()
            .user_pool_id(resource_id)
            .username(username)
            .group_name(group)
            .send()
            .await
            .map_err(|e| sdk_err("AdminAddUserToGroup", &format!("{username} -> {group}"), e))?;
        Ok(())
    }
}
