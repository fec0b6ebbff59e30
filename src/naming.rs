//! Section naming conventions shared by every writer and pruner of the credential stores.

pub const DEFAULT_PROFILE: &str = "default";
pub const SERVICE_PROFILE: &str = "service";
pub const ACCESS_KEY_PREFIX: &str = "access-key";
pub const SESSION_TOKEN_PREFIX: &str = "session-token-";
pub const SSO_SESSION_PREFIX: &str = "sso";
pub const SHADOW_PREFIX: &str = "shadow-";

const CONFIG_PROFILE_PREFIX: &str = "profile ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Long-lived, user-supplied access key.
    AccessKey,
    /// Session token derived from an access key.
    SessionToken,
    /// Anything else; fully regenerable from the declarative configuration.
    Managed,
}

pub fn classify(name: &str) -> SectionKind {
    if name.starts_with(ACCESS_KEY_PREFIX) {
        SectionKind::AccessKey
    } else if name.starts_with(SESSION_TOKEN_PREFIX) {
        SectionKind::SessionToken
    } else {
        SectionKind::Managed
    }
}

/// Exempt sections are never removed by a prune pass.
#[inline]
pub fn is_exempt(name: &str) -> bool {
    classify(name) != SectionKind::Managed
}

pub fn session_token_name(access_key: &str) -> String {
    format!("{SESSION_TOKEN_PREFIX}{access_key}")
}

pub fn shadow_name(profile: &str) -> String {
    format!("{SHADOW_PREFIX}{profile}")
}

pub fn config_section_name(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        DEFAULT_PROFILE.to_owned()
    } else {
        format!("{CONFIG_PROFILE_PREFIX}{profile}")
    }
}

/// Inverse of [`config_section_name`]. Sections which are not profiles (`sso-session x`,
/// `services x`, ...) yield `None`.
pub fn profile_of_config_section(section: &str) -> Option<&str> {
    if section == DEFAULT_PROFILE {
        return Some(DEFAULT_PROFILE);
    }
    section
        .strip_prefix(CONFIG_PROFILE_PREFIX)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

/// MFA device ARN for the IAM user behind `caller_arn` (its trailing path segment).
pub fn mfa_device_arn(account_id: &str, caller_arn: &str) -> crate::Result<String> {
    let user_name = user_name_of_caller(caller_arn)?;
    Ok(format!("arn:aws:iam::{account_id}:mfa/{user_name}"))
}

pub fn user_name_of_caller(caller_arn: &str) -> crate::Result<&str> {
    caller_arn
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && *s != caller_arn)
        .ok_or_else(|| crate::Error::UserError(format!("caller ARN '{caller_arn}' is invalid")))
}

/// `arn:aws:sts::<acct>:assumed-role/<role>/<session>` → `arn:aws:iam::<acct>:role/<role>`.
/// IAM role ARNs are returned as-is.
pub fn role_arn_of_caller(caller_arn: &str) -> crate::Result<String> {
    let invalid = || crate::Error::UserError(format!("caller ARN '{caller_arn}' is not a role"));
    let parts: Vec<&str> = caller_arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(invalid());
    }
    let (partition, service, account, resource) = (parts[1], parts[2], parts[4], parts[5]);
    match service {
        "sts" => {
            let role = resource
                .strip_prefix("assumed-role/")
                .and_then(|r| r.split('/').next())
                .filter(|r| !r.is_empty())
                .ok_or_else(invalid)?;
            Ok(format!("arn:{partition}:iam::{account}:role/{role}"))
        }
        "iam" if resource.starts_with("role/") => Ok(caller_arn.to_owned()),
        _ => Err(invalid()),
    }
}
