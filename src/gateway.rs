//! Capability surface over the remote identity services used by the login orchestrator.

/// Liveness checks are short and retried a little; nothing else is retried silently.
pub const VERIFY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
pub const VERIFY_MAX_RETRIES: u32 = 2;

/// sts:GetSessionToken duration.
pub const SESSION_DURATION_SECS: i32 = 12 * 3600;

#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: secrecy::SecretString,
    pub session_token: Option<String>,
    pub expiration: Option<chrono::DateTime<chrono::Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secrecy::SecretString::from(secret_access_key.into()),
            session_token,
            expiration: None,
        }
    }

    pub fn same_material(&self, other: &Credentials) -> bool {
        use secrecy::ExposeSecret;
        self.access_key_id == other.access_key_id
            && self.secret_access_key.expose_secret() == other.secret_access_key.expose_secret()
            && self.session_token == other.session_token
    }
}

/// Identity a remote call is made as.
#[derive(Clone, Debug)]
pub enum Source {
    /// Explicit key material (an access key, a session token, or assumed-role credentials).
    Static(Credentials),
    /// A named profile resolved from the managed credentials/config files (SSO profiles).
    Profile(String),
}

impl Source {
    pub fn describe(&self) -> String {
        match self {
            Source::Static(c) => format!("static:{}", c.access_key_id),
            Source::Profile(p) => format!("profile:{p}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Clone, Debug)]
pub struct AccessKey {
    pub id: String,
    pub secret: secrecy::SecretString,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unknown: {0}")]
    Unknown(String),
}

impl Error {
    /// Prefixes the message, keeping the classification.
    pub fn context(self, ctx: &str) -> Error {
        match self {
            Error::Unauthenticated(m) => Error::Unauthenticated(format!("{ctx}: {m}")),
            Error::Network(m) => Error::Network(format!("{ctx}: {m}")),
            Error::InvalidArgument(m) => Error::InvalidArgument(format!("{ctx}: {m}")),
            Error::PermissionDenied(m) => Error::PermissionDenied(format!("{ctx}: {m}")),
            Error::LimitExceeded(m) => Error::LimitExceeded(format!("{ctx}: {m}")),
            Error::NotFound(m) => Error::NotFound(format!("{ctx}: {m}")),
            Error::Unknown(m) => Error::Unknown(format!("{ctx}: {m}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait::async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn verify_identity(
        &self,
        source: &Source,
        timeout: std::time::Duration,
        max_retries: u32,
    ) -> Result<CallerIdentity>;

    /// Exchanges a long-lived key for a 12-hour MFA session.
    async fn issue_session_token(&self, base: &Source, mfa_code: &str) -> Result<Credentials>;

    async fn assume_role(
        &self,
        source: &Source,
        session_name: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<Credentials>;

    async fn create_access_key(&self, source: &Source, user_name: &str) -> Result<AccessKey>;

    async fn delete_access_key(&self, source: &Source, user_name: &str, key_id: &str)
        -> Result<()>;

    /// Roles in the source's account whose trust policy allows the source's own role.
    async fn list_assumable_roles(&self, source: &Source) -> Result<Vec<String>>;

    /// Resolves `source` into frozen static credentials.
    async fn export_credentials(&self, source: &Source) -> Result<Credentials>;

    async fn sso_login(&self, sso_session: &str) -> Result<()>;

    async fn sso_logout(&self) -> Result<()>;
}

/// Session name appears in CloudTrail logs for auditing.
pub fn generate_session_name() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let random: u16 = rand::random();
    format!("{}-{}-{:x}", env!("CARGO_PKG_NAME"), timestamp, random)
}
