//! In-memory stand-ins for the remote identity services and the command runner.

use crate::gateway::{AccessKey, CallerIdentity, Credentials, Source};

pub const ACCOUNT: &str = "111111111111";
pub const USER_ARN: &str = "arn:aws:iam::111111111111:user/alice";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Verify(String),
    IssueSessionToken { base: String, code: String },
    AssumeRole { source: String, account: String, role: String },
    CreateAccessKey { source: String, user: String },
    DeleteAccessKey { source: String, user: String, key_id: String },
    ListRoles(String),
    Export(String),
    SsoLogin(String),
    SsoLogout,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub calls: Vec<Call>,
    /// Access key ids accepted by `verify_identity` and usable as call sources.
    pub valid_keys: std::collections::HashSet<String>,
    pub sso_logged_in: bool,
    pub sso_login_succeeds: bool,
    pub network_down: bool,
    /// Role names whose assumption is denied.
    pub denied_roles: std::collections::HashSet<String>,
    pub create_key_error: Option<crate::gateway::Error>,
    pub delete_key_error: Option<crate::gateway::Error>,
    /// Replaced by a directory once a key deletion is attempted, so later writes fail.
    pub block_path_on_delete: Option<std::path::PathBuf>,
    pub assumable_roles: Vec<String>,
    pub sessions_issued: u32,
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    pub state: parking_lot::Mutex<FakeState>,
}

impl FakeGateway {
    pub fn with_valid_keys(ids: &[&str]) -> Self {
        let gw = Self::default();
        gw.state
            .lock()
            .valid_keys
            .extend(ids.iter().map(|s| s.to_string()));
        gw
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    fn check_source(state: &FakeState, source: &Source) -> crate::gateway::Result<()> {
        if state.network_down {
            return Err(crate::gateway::Error::Network("connect timeout".to_owned()));
        }
        match source {
            Source::Static(c) if state.valid_keys.contains(&c.access_key_id) => Ok(()),
            Source::Profile(_) if state.sso_logged_in => Ok(()),
            _ => Err(crate::gateway::Error::Unauthenticated(format!(
                "{} is not valid",
                source.describe()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl crate::gateway::IdentityGateway for FakeGateway {
    async fn verify_identity(
        &self,
        source: &Source,
        _timeout: std::time::Duration,
        _max_retries: u32,
    ) -> crate::gateway::Result<CallerIdentity> {
        let mut state = self.state.lock();
        state.calls.push(Call::Verify(source.describe()));
        Self::check_source(&state, source)?;
        Ok(CallerIdentity {
            account: ACCOUNT.to_owned(),
            arn: USER_ARN.to_owned(),
            user_id: "AIDAALICE".to_owned(),
        })
    }

    async fn issue_session_token(
        &self,
        base: &Source,
        mfa_code: &str,
    ) -> crate::gateway::Result<Credentials> {
        let mut state = self.state.lock();
        state.calls.push(Call::IssueSessionToken {
            base: base.describe(),
            code: mfa_code.to_owned(),
        });
        Self::check_source(&state, base)?;
        state.sessions_issued += 1;
        let id = format!("ASIASESSION{}", state.sessions_issued);
        state.valid_keys.insert(id.clone());
        Ok(Credentials::new(
            id,
            "session-secret",
            Some("session-token".to_owned()),
        ))
    }

    async fn assume_role(
        &self,
        source: &Source,
        _session_name: &str,
        account_id: &str,
        role_name: &str,
    ) -> crate::gateway::Result<Credentials> {
        let mut state = self.state.lock();
        state.calls.push(Call::AssumeRole {
            source: source.describe(),
            account: account_id.to_owned(),
            role: role_name.to_owned(),
        });
        Self::check_source(&state, source)?;
        if state.denied_roles.contains(role_name) {
            return Err(crate::gateway::Error::PermissionDenied(format!(
                "not authorized to assume {role_name}"
            )));
        }
        let id = format!("ASIA{}{account_id}", role_name.to_uppercase());
        state.valid_keys.insert(id.clone());
        Ok(Credentials::new(
            id,
            format!("secret-{role_name}-{account_id}"),
            Some(format!("token-{role_name}-via-{}", source.describe())),
        ))
    }

    async fn create_access_key(
        &self,
        source: &Source,
        user_name: &str,
    ) -> crate::gateway::Result<AccessKey> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateAccessKey {
            source: source.describe(),
            user: user_name.to_owned(),
        });
        Self::check_source(&state, source)?;
        if let Some(e) = state.create_key_error.clone() {
            return Err(e);
        }
        state.valid_keys.insert("AKIANEW".to_owned());
        Ok(AccessKey {
            id: "AKIANEW".to_owned(),
            secret: secrecy::SecretString::from("new-secret".to_owned()),
        })
    }

    async fn delete_access_key(
        &self,
        source: &Source,
        user_name: &str,
        key_id: &str,
    ) -> crate::gateway::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeleteAccessKey {
            source: source.describe(),
            user: user_name.to_owned(),
            key_id: key_id.to_owned(),
        });
        Self::check_source(&state, source)?;
        if let Some(path) = state.block_path_on_delete.take() {
            let _ = std::fs::remove_file(&path);
            std::fs::create_dir_all(&path).map_err(|e| {
                crate::gateway::Error::Unknown(format!("blocking {}: {e}", path.display()))
            })?;
        }
        if let Some(e) = state.delete_key_error.clone() {
            return Err(e);
        }
        state.valid_keys.remove(key_id);
        Ok(())
    }

    async fn list_assumable_roles(&self, source: &Source) -> crate::gateway::Result<Vec<String>> {
        let mut state = self.state.lock();
        state.calls.push(Call::ListRoles(source.describe()));
        Self::check_source(&state, source)?;
        if state.assumable_roles.is_empty() {
            return Err(crate::gateway::Error::NotFound(
                "no assumable roles".to_owned(),
            ));
        }
        Ok(state.assumable_roles.clone())
    }

    async fn export_credentials(&self, source: &Source) -> crate::gateway::Result<Credentials> {
        let mut state = self.state.lock();
        state.calls.push(Call::Export(source.describe()));
        Self::check_source(&state, source)?;
        let name = match source {
            Source::Profile(p) => p.clone(),
            Source::Static(c) => c.access_key_id.clone(),
        };
        Ok(Credentials::new(
            format!("ASIAEXPORT-{name}"),
            format!("exported-{name}"),
            Some(format!("exported-token-{name}")),
        ))
    }

    async fn sso_login(&self, sso_session: &str) -> crate::gateway::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SsoLogin(sso_session.to_owned()));
        if !state.sso_login_succeeds {
            return Err(crate::gateway::Error::Unauthenticated(
                "browser authorization was not completed".to_owned(),
            ));
        }
        state.sso_logged_in = true;
        Ok(())
    }

    async fn sso_logout(&self) -> crate::gateway::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SsoLogout);
        state.sso_logged_in = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RunnerState {
    pub commands: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
}

#[derive(Debug, Default)]
pub struct FakeRunner {
    pub state: parking_lot::Mutex<RunnerState>,
}

impl FakeRunner {
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }
}

#[async_trait::async_trait]
impl crate::command::CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &std::path::Path,
        args: &[String],
        _timeout: std::time::Duration,
    ) -> crate::Result<crate::command::CommandOutput> {
        let mut state = self.state.lock();
        let mut line = program.display().to_string();
        for a in args {
            line.push(' ');
            line.push_str(a);
        }
        state.commands.push(line);
        Ok(crate::command::CommandOutput {
            code: Some(state.exit_code),
            stdout: state.stdout.clone(),
            stderr: if state.exit_code == 0 {
                String::new()
            } else {
                "boom".to_owned()
            },
        })
    }
}
