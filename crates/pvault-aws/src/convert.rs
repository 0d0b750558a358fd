//! Mapping between Cognito SDK types and pvault's backup records
//!
//! The opaque parts of `resource-config.json` use the key names of the
//! backups written by earlier tooling:
//!
//! ```json
//! {
//!   "policies": {"password_policy": {"minimum_length": 8, "require_uppercase": true, ...}},
//!   "mfaConfiguration": {"mfa_type": "OPTIONAL"},
//!   "customAttributes": [{"name": "tenant", "type": "String", "mutable": true, "required": false}],
//!   "triggers": {"pre_sign_up": "arn:aws:lambda:..."}
//! }
//! ```

use aws_sdk_cognitoidentityprovider::types::{
    AttributeDataType, AttributeType, LambdaConfigType, PasswordPolicyType, SchemaAttributeType,
    UserPoolMfaType, UserPoolPolicyType, UserPoolType, UserType,
};
use pvault_core::types::{MemberAttribute, MemberRecord, ResourceConfig};
use pvault_core::{VaultError, VaultResult};
use serde_json::{json, Map, Value};

const CUSTOM_PREFIX: &str = "custom:";

/// Attributes Cognito assigns itself and rejects on `AdminCreateUser`.
const SERVER_ASSIGNED_ATTRIBUTES: &[&str] = &["sub"];

const TRIGGERS: &[&str] = &[
    "pre_sign_up",
    "post_confirmation",
    "pre_authentication",
    "post_authentication",
];

pub fn config_from_pool(pool: &UserPoolType) -> ResourceConfig {
    ResourceConfig {
        name: pool.name().unwrap_or_default().to_string(),
        policies: pool.policies().map(policies_to_json).unwrap_or(Value::Null),
        mfa_configuration: json!({
            "mfa_type": pool
                .mfa_configuration()
                .map(UserPoolMfaType::as_str)
                .unwrap_or("OFF")
        }),
        custom_attributes: pool
            .schema_attributes()
            .iter()
            .filter_map(custom_attribute_to_json)
            .collect(),
        triggers: pool.lambda_config().map(triggers_to_json).unwrap_or(Value::Null),
    }
}

fn policies_to_json(policies: &UserPoolPolicyType) -> Value {
    let Some(p) = policies.password_policy() else {
        return json!({});
    };
    json!({
        "password_policy": {
            "minimum_length": p.minimum_length(),
            "require_uppercase": p.require_uppercase(),
            "require_lowercase": p.require_lowercase(),
            "require_numbers": p.require_numbers(),
            "require_symbols": p.require_symbols(),
        }
    })
}

fn custom_attribute_to_json(attr: &SchemaAttributeType) -> Option<Value> {
    let name = attr.name()?.strip_prefix(CUSTOM_PREFIX)?;
    Some(json!({
        "name": name,
        "type": attr.attribute_data_type().map(AttributeDataType::as_str).unwrap_or("String"),
        "mutable": attr.mutable().unwrap_or(true),
        "required": attr.required().unwrap_or(false),
    }))
}

fn triggers_to_json(lambda: &LambdaConfigType) -> Value {
    let arns = [
        lambda.pre_sign_up(),
        lambda.post_confirmation(),
        lambda.pre_authentication(),
        lambda.post_authentication(),
    ];
    let map: Map<String, Value> = TRIGGERS
        .iter()
        .zip(arns)
        .filter_map(|(key, arn)| Some((key.to_string(), Value::from(arn?))))
        .collect();
    Value::Object(map)
}

pub fn pool_policies(value: &Value) -> Option<UserPoolPolicyType> {
    let p = value.get("password_policy")?.as_object()?;
    let flag = |key: &str| p.get(key).and_then(Value::as_bool).unwrap_or(false);

    let mut password = PasswordPolicyType::builder()
        .require_uppercase(flag("require_uppercase"))
        .require_lowercase(flag("require_lowercase"))
        .require_numbers(flag("require_numbers"))
        .require_symbols(flag("require_symbols"));
    if let Some(min) = p.get("minimum_length").and_then(Value::as_i64) {
        password = password.minimum_length(min as i32);
    }

    Some(
        UserPoolPolicyType::builder()
            .password_policy(password.build())
            .build(),
    )
}

/// Accepts `{"mfa_type": "ON"}` or a bare `"ON"`; anything else is `OFF`.
pub fn mfa_type(value: &Value) -> UserPoolMfaType {
    let raw = value
        .get("mfa_type")
        .and_then(Value::as_str)
        .or_else(|| value.as_str());
    match raw {
        Some("ON") => UserPoolMfaType::On,
        Some("OPTIONAL") => UserPoolMfaType::Optional,
        _ => UserPoolMfaType::Off,
    }
}

pub fn schema_attributes(attrs: &[Value]) -> Vec<SchemaAttributeType> {
    attrs
        .iter()
        .filter_map(|attr| {
            let name = attr.get("name")?.as_str()?;
            let name = name.strip_prefix(CUSTOM_PREFIX).unwrap_or(name);
            let data_type = attr.get("type").and_then(Value::as_str).unwrap_or("String");
            Some(
                SchemaAttributeType::builder()
                    .name(name)
                    .attribute_data_type(AttributeDataType::from(data_type))
                    .mutable(attr.get("mutable").and_then(Value::as_bool).unwrap_or(true))
                    .required(attr.get("required").and_then(Value::as_bool).unwrap_or(false))
                    .build(),
            )
        })
        .collect()
}

pub fn lambda_config(value: &Value) -> Option<LambdaConfigType> {
    let triggers = value.as_object()?;
    let arn = |key: &str| triggers.get(key).and_then(Value::as_str).map(str::to_string);
    Some(
        LambdaConfigType::builder()
            .set_pre_sign_up(arn("pre_sign_up"))
            .set_post_confirmation(arn("post_confirmation"))
            .set_pre_authentication(arn("pre_authentication"))
            .set_post_authentication(arn("post_authentication"))
            .build(),
    )
}

/// `None` for users the API returned without a username.
pub fn member_from_user(user: &UserType) -> Option<MemberRecord> {
    Some(MemberRecord {
        username: user.username()?.to_string(),
        attributes: user
            .attributes()
            .iter()
            .map(|a| MemberAttribute::new(a.name(), a.value().unwrap_or_default()))
            .collect(),
        groups: Vec::new(),
    })
}

/// Writable attributes of `member` in SDK form.
pub fn user_attributes(member: &MemberRecord) -> VaultResult<Vec<AttributeType>> {
    member
        .attributes
        .iter()
        .filter(|a| !SERVER_ASSIGNED_ATTRIBUTES.contains(&a.name.as_str()))
        .map(|a| {
            AttributeType::builder()
                .name(&a.name)
                .value(&a.value)
                .build()
                .map_err(|e| VaultError::Directory(format!("attribute {}: {e}", a.name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> UserPoolType {
        UserPoolType::builder()
            .id("ap-northeast-1_AAA")
            .name("prod-users")
            .policies(
                UserPoolPolicyType::builder()
                    .password_policy(
                        PasswordPolicyType::builder()
                            .minimum_length(12)
                            .require_uppercase(true)
                            .require_numbers(true)
                            .build(),
                    )
                    .build(),
            )
            .mfa_configuration(UserPoolMfaType::Optional)
            .schema_attributes(
                SchemaAttributeType::builder()
                    .name("email")
                    .attribute_data_type(AttributeDataType::String)
                    .build(),
            )
            .schema_attributes(
                SchemaAttributeType::builder()
                    .name("custom:tenant")
                    .attribute_data_type(AttributeDataType::String)
                    .mutable(false)
                    .build(),
            )
            .lambda_config(
                LambdaConfigType::builder()
                    .pre_sign_up("arn:aws:lambda:ap-northeast-1:123:function:signup")
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_config_from_pool() {
        let config = config_from_pool(&sample_pool());

        assert_eq!(config.name, "prod-users");
        assert_eq!(config.policies["password_policy"]["minimum_length"], 12);
        assert_eq!(config.policies["password_policy"]["require_uppercase"], true);
        assert_eq!(config.policies["password_policy"]["require_symbols"], false);
        assert_eq!(config.mfa_configuration, json!({"mfa_type": "OPTIONAL"}));
        assert_eq!(config.custom_attributes.len(), 1, "standard attributes are skipped");
        assert_eq!(config.custom_attributes[0]["name"], "tenant");
        assert_eq!(config.custom_attributes[0]["mutable"], false);
        assert_eq!(
            config.triggers,
            json!({"pre_sign_up": "arn:aws:lambda:ap-northeast-1:123:function:signup"})
        );
    }

    #[test]
    fn test_config_survives_json_and_back() {
        let config = config_from_pool(&sample_pool());
        let bytes = serde_json::to_vec(&config).unwrap();
        let config: ResourceConfig = serde_json::from_slice(&bytes).unwrap();

        let policy = pool_policies(&config.policies).unwrap();
        let password = policy.password_policy().unwrap();
        assert_eq!(password.minimum_length(), Some(12));
        assert!(password.require_uppercase());
        assert!(!password.require_lowercase());

        assert_eq!(mfa_type(&config.mfa_configuration), UserPoolMfaType::Optional);

        let schema = schema_attributes(&config.custom_attributes);
        assert_eq!(schema[0].name(), Some("tenant"));
        assert_eq!(schema[0].mutable(), Some(false));

        let lambda = lambda_config(&config.triggers).unwrap();
        assert!(lambda.pre_sign_up().unwrap().ends_with(":signup"));
        assert!(lambda.post_confirmation().is_none());
    }

    #[test]
    fn test_mfa_type_accepts_both_shapes() {
        assert_eq!(mfa_type(&json!("ON")), UserPoolMfaType::On);
        assert_eq!(mfa_type(&json!({"mfa_type": "OPTIONAL"})), UserPoolMfaType::Optional);
        assert_eq!(mfa_type(&Value::Null), UserPoolMfaType::Off);
        assert_eq!(mfa_type(&json!("sometimes")), UserPoolMfaType::Off);
    }

    #[test]
    fn test_missing_sections_map_to_none() {
        assert!(pool_policies(&Value::Null).is_none());
        assert!(lambda_config(&Value::Null).is_none());
        assert!(schema_attributes(&[json!({"type": "String"})]).is_empty());
    }

    #[test]
    fn test_member_roundtrip_drops_sub() {
        let user = UserType::builder()
            .username("alice")
            .attributes(AttributeType::builder().name("sub").value("uuid-1").build().unwrap())
            .attributes(
                AttributeType::builder()
                    .name("email")
                    .value("alice@example.com")
                    .build()
                    .unwrap(),
            )
            .build();

        let member = member_from_user(&user).unwrap();
        assert_eq!(member.username, "alice");
        assert_eq!(member.attributes.len(), 2);

        let attrs = user_attributes(&member).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name(), "email");
        assert_eq!(attrs[0].value(), Some("alice@example.com"));
    }

    #[test]
    fn test_user_without_username_is_skipped() {
        assert!(member_from_user(&UserType::builder().build()).is_none());
    }
}
