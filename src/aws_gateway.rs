//! [`IdentityGateway`](crate::gateway::IdentityGateway) backed by AWS STS and IAM.

use crate::gateway::{AccessKey, CallerIdentity, Credentials, Source};

/// Role chaining has a maximum duration of 1 hour (AWS limitation)
const ASSUME_ROLE_DURATION_SECS: i32 = 3600;

pub struct AwsGateway {
    region: String,
    stores: crate::store::StorePaths,
    runner: std::sync::Arc<dyn crate::command::CommandRunner>,
    sso_timeout: std::time::Duration,
}

impl std::fmt::Debug for AwsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsGateway")
            .field("region", &self.region)
            .field("stores", &self.stores)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Tuning {
    /// Liveness check: bounded timeout, a few retries.
    Verify {
        timeout: std::time::Duration,
        max_retries: u32,
    },
    /// Calls with side effects (MFA submission, key creation) are never retried.
    Once,
}

impl AwsGateway {
    pub fn new(
        region: impl Into<String>,
        stores: crate::store::StorePaths,
        runner: std::sync::Arc<dyn crate::command::CommandRunner>,
        sso_timeout: std::time::Duration,
    ) -> Self {
        Self {
            region: region.into(),
            stores,
            runner,
            sso_timeout,
        }
    }

    #[allow(deprecated)]
    fn profile_files(&self) -> aws_config::profile::profile_file::ProfileFiles {
        use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
        ProfileFiles::builder()
            .with_file(ProfileFileKind::Config, &self.stores.config)
            .with_file(ProfileFileKind::Credentials, &self.stores.credentials)
            .build()
    }

    async fn sdk_config(&self, source: &Source, tuning: Tuning) -> aws_config::SdkConfig {
        let (timeouts, retries) = match tuning {
            Tuning::Verify {
                timeout,
                max_retries,
            } => (
                aws_smithy_types::timeout::TimeoutConfig::builder()
                    .operation_attempt_timeout(timeout)
                    .build(),
                aws_smithy_types::retry::RetryConfig::standard()
                    .with_max_attempts(max_retries.saturating_add(1)),
            ),
            Tuning::Once => (
                aws_smithy_types::timeout::TimeoutConfig::builder()
                    .operation_timeout(std::time::Duration::from_secs(30))
                    .build(),
                aws_smithy_types::retry::RetryConfig::disabled(),
            ),
        };

        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .timeout_config(timeouts)
            .retry_config(retries);

        let loader = match source {
            Source::Static(c) => {
                use secrecy::ExposeSecret;
                let creds = aws_sdk_sts::config::Credentials::new(
                    &c.access_key_id,
                    c.secret_access_key.expose_secret(),
                    c.session_token.clone(),
                    c.expiration.map(Into::into),
                    concat!(env!("CARGO_PKG_NAME"), "-static"),
                );
                loader.credentials_provider(creds)
            }
            Source::Profile(name) => loader
                .profile_files(self.profile_files())
                .profile_name(name),
        };
        loader.load().await
    }

    async fn caller_identity(
        &self,
        source: &Source,
        tuning: Tuning,
    ) -> crate::gateway::Result<CallerIdentity> {
        let sts = aws_sdk_sts::Client::new(&self.sdk_config(source, tuning).await);
        let resp = sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify_sdk_error("GetCallerIdentity", e))?;
        match (resp.account(), resp.arn(), resp.user_id()) {
            (Some(account), Some(arn), Some(user_id)) => Ok(CallerIdentity {
                account: account.to_owned(),
                arn: arn.to_owned(),
                user_id: user_id.to_owned(),
            }),
            _ => Err(crate::gateway::Error::Unknown(
                "sts:GetCallerIdentity returned an incomplete identity".to_owned(),
            )),
        }
    }
}

fn convert_sts_credentials(
    context: &str,
    creds: Option<&aws_sdk_sts::types::Credentials>,
) -> crate::gateway::Result<Credentials> {
    let creds = creds.ok_or_else(|| {
        crate::gateway::Error::Unknown(format!("{context} returned empty credentials"))
    })?;
    let exp = creds.expiration();
    let expiration = chrono::DateTime::from_timestamp(exp.secs(), exp.subsec_nanos());
    Ok(Credentials {
        access_key_id: creds.access_key_id().to_owned(),
        secret_access_key: creds.secret_access_key().into(),
        session_token: Some(creds.session_token().to_owned()),
        expiration,
    })
}

#[async_trait::async_trait]
impl crate::gateway::IdentityGateway for AwsGateway {
    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn verify_identity(
        &self,
        source: &Source,
        timeout: std::time::Duration,
        max_retries: u32,
    ) -> crate::gateway::Result<CallerIdentity> {
        let identity = self
            .caller_identity(
                source,
                Tuning::Verify {
                    timeout,
                    max_retries,
                },
            )
            .await?;
        tracing::debug!(arn = %identity.arn, "identity verified");
        Ok(identity)
    }

    #[tracing::instrument(skip(self, base, mfa_code), fields(source = %base.describe()))]
    async fn issue_session_token(
        &self,
        base: &Source,
        mfa_code: &str,
    ) -> crate::gateway::Result<Credentials> {
        let identity = self.caller_identity(base, Tuning::Once).await?;
        let serial = crate::naming::mfa_device_arn(&identity.account, &identity.arn)
            .map_err(|e| crate::gateway::Error::InvalidArgument(e.to_string()))?;
        tracing::debug!(serial_number = %serial, "requesting session token");

        let sts = aws_sdk_sts::Client::new(&self.sdk_config(base, Tuning::Once).await);
        let resp = sts
            .get_session_token()
            .duration_seconds(crate::gateway::SESSION_DURATION_SECS)
            .serial_number(serial)
            .token_code(mfa_code)
            .send()
            .await
            .map_err(|e| match classify_sdk_error("GetSessionToken", e) {
                // An invalid one-time code surfaces as AccessDenied
                crate::gateway::Error::PermissionDenied(m) => {
                    crate::gateway::Error::InvalidArgument(m)
                }
                e => e,
            })?;
        convert_sts_credentials("sts:GetSessionToken", resp.credentials())
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn assume_role(
        &self,
        source: &Source,
        session_name: &str,
        account_id: &str,
        role_name: &str,
    ) -> crate::gateway::Result<Credentials> {
        let role_arn = crate::naming::role_arn(account_id, role_name);
        let sts = aws_sdk_sts::Client::new(&self.sdk_config(source, Tuning::Once).await);
        let resp = sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(session_name)
            .duration_seconds(ASSUME_ROLE_DURATION_SECS)
            .send()
            .await
            .map_err(|e| classify_sdk_error("AssumeRole", e))?;
        let creds = convert_sts_credentials("sts:AssumeRole", resp.credentials())?;
        tracing::debug!(
            role_arn = %role_arn,
            access_key_id = %creds.access_key_id,
            expiration = ?creds.expiration,
            "AssumeRole completed successfully"
        );
        Ok(creds)
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn create_access_key(
        &self,
        source: &Source,
        user_name: &str,
    ) -> crate::gateway::Result<AccessKey> {
        let iam = aws_sdk_iam::Client::new(&self.sdk_config(source, Tuning::Once).await);
        let resp = iam
            .create_access_key()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("CreateAccessKey", e))?;
        let key = resp.access_key().ok_or_else(|| {
            crate::gateway::Error::Unknown("iam:CreateAccessKey returned no key".to_owned())
        })?;
        tracing::info!(
            user_name = user_name,
            access_key_id = key.access_key_id(),
            "created access key"
        );
        Ok(AccessKey {
            id: key.access_key_id().to_owned(),
            secret: key.secret_access_key().into(),
        })
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn delete_access_key(
        &self,
        source: &Source,
        user_name: &str,
        key_id: &str,
    ) -> crate::gateway::Result<()> {
        let iam = aws_sdk_iam::Client::new(&self.sdk_config(source, Tuning::Once).await);
        iam.delete_access_key()
            .user_name(user_name)
            .access_key_id(key_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error("DeleteAccessKey", e))?;
        tracing::info!(user_name = user_name, access_key_id = key_id, "deleted access key");
        Ok(())
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn list_assumable_roles(&self, source: &Source) -> crate::gateway::Result<Vec<String>> {
        let identity = self.caller_identity(source, Tuning::Once).await?;
        let principal = crate::naming::role_arn_of_caller(&identity.arn)
            .map_err(|e| crate::gateway::Error::InvalidArgument(e.to_string()))?;

        let iam = aws_sdk_iam::Client::new(&self.sdk_config(source, Tuning::Once).await);
        let mut roles = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = iam.list_roles().max_items(100);
            if let Some(m) = &marker {
                request = request.marker(m);
            }
            let resp = request
                .send()
                .await
                .map_err(|e| classify_sdk_error("ListRoles", e))?;
            for role in resp.roles() {
                let Some(document) = role.assume_role_policy_document() else {
                    continue;
                };
                if trusts_principal(document, &principal) {
                    roles.push(role.role_name().to_owned());
                }
            }
            match resp.marker() {
                Some(m) if resp.is_truncated() => marker = Some(m.to_owned()),
                _ => break,
            }
        }

        if roles.is_empty() {
            return Err(crate::gateway::Error::NotFound(format!(
                "no role trusts {principal}"
            )));
        }
        roles.sort();
        Ok(roles)
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    async fn export_credentials(&self, source: &Source) -> crate::gateway::Result<Credentials> {
        use aws_credential_types::provider::ProvideCredentials;
        if let Source::Static(c) = source {
            return Ok(c.clone());
        }
        let config = self.sdk_config(source, Tuning::Once).await;
        let provider = config.credentials_provider().ok_or_else(|| {
            crate::gateway::Error::NotFound(format!("no credentials for {}", source.describe()))
        })?;
        let creds = provider.provide_credentials().await.map_err(|e| {
            tracing::warn!(err = ?e, "failed to resolve credentials");
            crate::gateway::Error::Unauthenticated(format!(
                "could not resolve credentials for {}: {e}",
                source.describe()
            ))
        })?;
        Ok(Credentials {
            access_key_id: creds.access_key_id().to_owned(),
            secret_access_key: creds.secret_access_key().into(),
            session_token: creds.session_token().map(str::to_owned),
            expiration: creds.expiry().map(chrono::DateTime::<chrono::Utc>::from),
        })
    }

    async fn sso_login(&self, sso_session: &str) -> crate::gateway::Result<()> {
        self.run_aws_cli(&["sso", "login", "--sso-session", sso_session])
            .await
    }

    async fn sso_logout(&self) -> crate::gateway::Result<()> {
        self.run_aws_cli(&["sso", "logout"]).await
    }
}

impl AwsGateway {
    async fn run_aws_cli(&self, args: &[&str]) -> crate::gateway::Result<()> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        tracing::info!(args = ?args, "running aws cli");
        let output = self
            .runner
            .run(std::path::Path::new("aws"), &args, self.sso_timeout)
            .await
            .map_err(|e| crate::gateway::Error::Network(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            tracing::error!(
                args = ?args,
                code = ?output.code,
                stderr = %output.stderr,
                "aws cli failed"
            );
            Err(crate::gateway::Error::Unauthenticated(format!(
                "aws {} exited with {:?}",
                args.join(" "),
                output.code
            )))
        }
    }
}

/// Whether a (URL-encoded) trust policy has an `Allow` statement naming `principal_arn` as an
/// AWS principal.
pub fn trusts_principal(policy_document: &str, principal_arn: &str) -> bool {
    let decoded = percent_encoding::percent_decode(policy_document.as_bytes())
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| policy_document.to_owned());
    let policy: serde_json::Value = match serde_json::from_str(&decoded) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(err = ?e, "unparsable trust policy");
            return false;
        }
    };

    let statements = match policy.get("Statement") {
        Some(serde_json::Value::Array(a)) => a.iter().collect::<Vec<_>>(),
        Some(v @ serde_json::Value::Object(_)) => vec![v],
        _ => return false,
    };

    statements.into_iter().any(|statement| {
        let allowed = statement.get("Effect").and_then(|e| e.as_str()) == Some("Allow");
        let principals = statement.get("Principal").and_then(|p| p.get("AWS"));
        let named = match principals {
            Some(serde_json::Value::String(s)) => s == principal_arn,
            Some(serde_json::Value::Array(a)) => {
                a.iter().any(|v| v.as_str() == Some(principal_arn))
            }
            _ => false,
        };
        allowed && named
    })
}

/// Maps SDK errors to [`crate::gateway::Error`] by error code; transport failures are `Network`.
fn classify_sdk_error<E, R>(
    context: &str,
    err: aws_smithy_runtime_api::client::result::SdkError<E, R>,
) -> crate::gateway::Error
where
    E: std::marker::Send
        + std::marker::Sync
        + std::error::Error
        + aws_smithy_types::error::metadata::ProvideErrorMetadata
        + 'static,
    R: std::marker::Send + std::marker::Sync + std::fmt::Debug + 'static,
{
    use aws_smithy_runtime_api::client::result::SdkError;
    use aws_smithy_types::error::metadata::ProvideErrorMetadata;

    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        tracing::error!(context = context, err = ?err, "identity service unreachable");
        return crate::gateway::Error::Network(format!("{context}: {err}"));
    }
    // Raised before dispatch when the credential chain (e.g. an expired SSO token) fails
    if matches!(err, SdkError::ConstructionFailure(_)) {
        return crate::gateway::Error::Unauthenticated(format!("{context}: {err}"));
    }

    macro_rules! match_map_error {
        (
            $e:expr,
            $(
                $c:literal => $t:ident,
            )*
        ) => {
            match $e {
                $(
                    e1 if e1.code() == Some($c) => {
                        crate::gateway::Error::$t(format!(
                            "AWS says {code} for {context}: {message:?}",
                            code = $c,
                            context = context,
                            message = e1.message(),
                        ))
                    }
                )*
                e => {
                    tracing::error!(context = context, err = ?e, "identity service returned error");
                    crate::gateway::Error::Unknown(format!(
                        "AWS returned error for {context}: {code:?} {message:?}",
                        context = context,
                        code = e.code(),
                        message = e.message(),
                    ))
                }
            }
        }
    }

    match_map_error! {
        err,
        "AccessDenied" => PermissionDenied,
        "ExpiredToken" => Unauthenticated,
        "ExpiredTokenException" => Unauthenticated,
        "InvalidClientTokenId" => Unauthenticated,
        "SignatureDoesNotMatch" => Unauthenticated,
        "LimitExceeded" => LimitExceeded,
        "NoSuchEntity" => NotFound,
        "ValidationError" => InvalidArgument,
        "MalformedPolicyDocument" => InvalidArgument,
        "RegionDisabledException" => InvalidArgument,
    }
}
