#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("UserError: {0}")]
    UserError(String),

    #[error("ConfigError: {0}")]
    ConfigError(String),

    /// Static key or session rejected by the identity service; recoverable by re-authentication.
    #[error("AuthError: {0}")]
    AuthError(String),

    #[error("NetworkError: {0}")]
    NetworkError(String),

    /// Malformed user input such as an MFA code; the user must retry the input.
    #[error("ValidationError: {0}")]
    ValidationError(String),

    #[error("LimitExceeded: {0}")]
    LimitExceeded(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("ScriptError: {0}")]
    ScriptError(String),

    /// The new access key was created and stored, but the old one could not be deleted.
    /// Both keys remain active in IAM.
    #[error("PartialRotation: new access key {new_key_id} is stored, but deleting {old_key_id} failed: {message}")]
    PartialRotation {
        new_key_id: String,
        old_key_id: String,
        message: String,
    },

    #[error(transparent)]
    RemoteError(crate::gateway::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Failure, but we don't want to emit error to stderr/out anymore. Used in cmd
    #[error("")]
    FailureButSilentlyExit,

    /// Failure, but we don't want to emit error to stderr/out anymore. Used in cmd
    #[error("")]
    SilentlyExitWithCode(std::process::ExitCode),
}

impl From<crate::gateway::Error> for Error {
    fn from(e: crate::gateway::Error) -> Error {
        use crate::gateway::Error as G;
        match e {
            G::Unauthenticated(m) => Error::AuthError(m),
            G::Network(m) => Error::NetworkError(m),
            G::InvalidArgument(m) => Error::ValidationError(m),
            G::LimitExceeded(m) => Error::LimitExceeded(m),
            G::NotFound(m) => Error::NotFound(m),
            e => Error::RemoteError(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an orchestrator operation that did not hard-fail.
///
/// A soft failure means the operation did not succeed but nothing is broken; it is part of
/// the normal control flow (e.g. "no session yet, ask the user for an MFA code") and is never
/// logged as an error.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Soft(SoftFailure),
}

impl<T> Outcome<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(t) => Some(t),
            Outcome::Soft(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftFailure {
    /// No usable session token for the access key; re-invoke with an MFA code.
    MfaRequired { access_key: String },
    /// The SSO session could not be established without user interaction.
    SessionMissing { sso_session: String },
}

impl std::fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftFailure::MfaRequired { access_key } => {
                write!(f, "MFA code required to renew the session for {access_key}")
            }
            SoftFailure::SessionMissing { sso_session } => {
                write!(f, "no active SSO session for {sso_session}")
            }
        }
    }
}
