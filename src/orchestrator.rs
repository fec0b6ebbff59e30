//! The login state machine.
//!
//! A login validates the group's access key, ensures an MFA session, materializes every
//! profile of the group into the credential stores, prunes what the group does not use
//! anymore, and finally runs the post-login hooks. Logout is the same pipeline driven with
//! an empty group.

use crate::error::{Outcome, SoftFailure};
use crate::gateway::{Credentials, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    KeyValidated,
    SessionEnsured,
    RolesFetched,
    RegionSet,
    SupportFilesWritten,
    ScriptRun,
    LoggedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// Long-lived access key + MFA session, roles assumed into static credentials.
    StaticKey,
    /// SSO-backed config profiles, resolved by the SDKs at use time.
    Sso,
    /// SSO profiles written under `shadow-` names, exported as static credentials.
    SsoShadow,
    Gcp,
}

impl LoginMode {
    pub fn for_group(
        group: &crate::profile::ProfileGroup,
        settings: &crate::config::Settings,
        force_static: bool,
    ) -> LoginMode {
        match (group.cloud, group.auth_mode) {
            (crate::profile::CloudType::Gcp, _) => LoginMode::Gcp,
            (_, Some(crate::profile::AuthMode::Sso)) if force_static || settings.sso_static => {
                LoginMode::SsoShadow
            }
            (_, Some(crate::profile::AuthMode::Sso)) => LoginMode::Sso,
            _ => LoginMode::StaticKey,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub group: crate::profile::ProfileGroup,
    pub mfa_code: Option<String>,
    pub region_override: Option<String>,
    pub run_script: bool,
    pub mode: LoginMode,
}

impl LoginRequest {
    pub fn new(group: crate::profile::ProfileGroup, settings: &crate::config::Settings) -> Self {
        let mode = LoginMode::for_group(&group, settings, false);
        Self {
            group,
            mfa_code: None,
            region_override: None,
            run_script: settings.run_script,
            mode,
        }
    }

    fn region(&self) -> String {
        self.region_override
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.group.region)
            .to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginReport {
    pub group: String,
    pub mode: LoginMode,
    pub region: String,
    /// Profile names now present in the stores.
    pub profiles: Vec<String>,
    /// Sections removed by the prune passes.
    pub removed: Vec<String>,
    pub script_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub access_key: String,
    pub old_key_id: String,
    pub new_key_id: String,
}

/// Everything a login run reads and writes besides the remote services.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub settings: crate::config::Settings,
    pub stores: crate::store::StorePaths,
    pub marker: crate::marker::ActiveGroupMarker,
    pub selection_path: std::path::PathBuf,
    /// Group of the last successful login; `None` after logout.
    pub active_group: Option<String>,
}

impl LoginContext {
    pub async fn load(settings: crate::config::Settings) -> crate::Result<Self> {
        let marker = crate::marker::ActiveGroupMarker::new(crate::config::active_group_path());
        let active_group = marker.read().await?;
        Ok(Self {
            stores: crate::store::StorePaths::resolve(&settings),
            settings,
            marker,
            selection_path: crate::config::selection_path(),
            active_group,
        })
    }
}

/// Exactly six ASCII digits.
pub fn validate_mfa_code(code: &str) -> crate::Result<()> {
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(crate::Error::ValidationError(
            "MFA code must be exactly 6 digits".to_owned(),
        ))
    }
}

struct Run {
    group: String,
    state: State,
}

impl Run {
    fn new(group: &str) -> Self {
        Self {
            group: group.to_owned(),
            state: State::Idle,
        }
    }

    fn advance(&mut self, next: State) {
        tracing::debug!(group = %self.group, from = ?self.state, to = ?next, "login state");
        self.state = next;
    }
}

pub struct Orchestrator {
    gateway: std::sync::Arc<dyn crate::gateway::IdentityGateway>,
    runner: std::sync::Arc<dyn crate::command::CommandRunner>,
    ctx: LoginContext,
}

impl Orchestrator {
    pub fn new(
        gateway: std::sync::Arc<dyn crate::gateway::IdentityGateway>,
        runner: std::sync::Arc<dyn crate::command::CommandRunner>,
        ctx: LoginContext,
    ) -> Self {
        Self {
            gateway,
            runner,
            ctx,
        }
    }

    pub fn context(&self) -> &LoginContext {
        &self.ctx
    }

    pub fn active_group(&self) -> Option<&str> {
        self.ctx.active_group.as_deref()
    }

    #[tracing::instrument(skip_all, fields(group = %request.group.name, mode = ?request.mode))]
    pub async fn login(&mut self, request: &LoginRequest) -> crate::Result<Outcome<LoginReport>> {
        request.group.validate()?;
        if let Some(code) = request.mfa_code.as_deref() {
            validate_mfa_code(code)?;
        }
        let mut group = request.group.clone();
        self.load_service_selection(&mut group).await?;

        let mut run = Run::new(&group.name);
        let result = match request.mode {
            LoginMode::StaticKey => self.login_static(&group, request, &mut run).await,
            LoginMode::Sso => self.login_sso(&group, request, false, &mut run).await,
            LoginMode::SsoShadow => self.login_sso(&group, request, true, &mut run).await,
            LoginMode::Gcp => self.login_gcp(&group, request, &mut run).await,
        };
        match &result {
            Ok(Outcome::Done(report)) => {
                run.advance(State::LoggedIn);
                tracing::info!(profiles = ?report.profiles, region = %report.region, "logged in");
            }
            Ok(Outcome::Soft(reason)) => {
                tracing::info!(state = ?run.state, reason = %reason, "login needs user action");
            }
            Err(e) => tracing::error!(state = ?run.state, err = ?e, "login failed"),
        }
        result
    }

    async fn login_static(
        &mut self,
        group: &crate::profile::ProfileGroup,
        request: &LoginRequest,
        run: &mut Run,
    ) -> crate::Result<Outcome<LoginReport>> {
        let key_name = group
            .access_key_or(&self.ctx.settings.default_access_key)
            .to_owned();
        let (key, _) = self.validate_key(&key_name).await?;
        run.advance(State::KeyValidated);

        let session = match self
            .ensure_session(&key_name, &key, request.mfa_code.as_deref())
            .await?
        {
            Outcome::Done(s) => s,
            Outcome::Soft(f) => return Ok(Outcome::Soft(f)),
        };
        run.advance(State::SessionEnsured);

        let mut removed = self.fetch_roles(group, Some(&session)).await?;
        run.advance(State::RolesFetched);

        let region = request.region();
        let entries = group
            .active_profile_names()
            .into_iter()
            .map(|n| (n, crate::store::ConfigEntry::plain(&region)))
            .collect();
        removed.extend(self.write_config(entries).await?);
        run.advance(State::RegionSet);

        let script_output = self.finish(group, request.run_script, run).await?;
        Ok(Outcome::Done(LoginReport {
            group: group.name.clone(),
            mode: request.mode,
            region,
            profiles: group.active_profile_names().into_iter().collect(),
            removed,
            script_output,
        }))
    }

    async fn login_sso(
        &mut self,
        group: &crate::profile::ProfileGroup,
        request: &LoginRequest,
        shadow: bool,
        run: &mut Run,
    ) -> crate::Result<Outcome<LoginReport>> {
        let sso_session = group
            .sso_session_or(&self.ctx.settings.default_sso_session)
            .to_owned();
        let region = request.region();

        let mut config = crate::store::ConfigStore::load(&self.ctx.stores.config).await?;
        if !config.has_section(&format!("sso-session {sso_session}")) {
            return Err(crate::Error::ConfigError(format!(
                "[sso-session {sso_session}] is not defined in {}",
                self.ctx.stores.config.display()
            )));
        }
        run.advance(State::KeyValidated);

        let sso_entries = sso_config_entries(group, &sso_session, &region, shadow);
        for (name, entry) in sso_entries.iter() {
            config.upsert(name, entry);
        }
        config.save().await?;
        run.advance(State::RolesFetched);

        let Some(check_profile) = sso_entries
            .iter()
            .find(|(_, e)| e.sso.is_some())
            .map(|(n, _)| n.clone())
        else {
            return Err(crate::Error::ConfigError(format!(
                "group '{}' has no profile to sign in with",
                group.name
            )));
        };
        if let Outcome::Soft(f) = self.ensure_sso_session(&check_profile, &sso_session).await? {
            return Ok(Outcome::Soft(f));
        }
        run.advance(State::SessionEnsured);

        let mut config_entries = sso_entries;
        let mut removed = if shadow {
            let removed = self.export_shadow_credentials(group).await?;
            config_entries.extend(
                group
                    .active_profile_names()
                    .into_iter()
                    .map(|n| (n, crate::store::ConfigEntry::plain(&region))),
            );
            removed
        } else {
            // Static credentials under the same names would take precedence over SSO config.
            let mut store =
                crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
            let removed = store.prune_unused(&Default::default());
            store.save().await?;
            removed
        };
        removed.extend(self.write_config(config_entries).await?);
        run.advance(State::RegionSet);

        let script_output = self.finish(group, request.run_script, run).await?;
        Ok(Outcome::Done(LoginReport {
            group: group.name.clone(),
            mode: request.mode,
            region,
            profiles: group.active_profile_names().into_iter().collect(),
            removed,
            script_output,
        }))
    }

    async fn login_gcp(
        &mut self,
        group: &crate::profile::ProfileGroup,
        request: &LoginRequest,
        run: &mut Run,
    ) -> crate::Result<Outcome<LoginReport>> {
        let command = self.ctx.settings.gcp_login_command.clone();
        let output = self
            .runner
            .run_shell(&command, self.ctx.settings.sso_login_timeout())
            .await?;
        if !output.success() {
            return Err(crate::Error::AuthError(format!(
                "`{command}` exited with {:?}: {}",
                output.code,
                output.stderr.trim()
            )));
        }
        run.advance(State::KeyValidated);
        run.advance(State::SessionEnsured);

        let script_output = self.finish(group, request.run_script, run).await?;
        Ok(Outcome::Done(LoginReport {
            group: group.name.clone(),
            mode: request.mode,
            region: request.region(),
            profiles: Vec::new(),
            removed: Vec::new(),
            script_output,
        }))
    }

    /// Removes every managed section from both stores and clears the active-group marker.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&mut self, sso_logout: bool) -> crate::Result<LoginReport> {
        let group = crate::profile::ProfileGroup::empty();
        let mut run = Run::new(&group.name);

        let mut removed = self.fetch_roles(&group, None).await?;
        run.advance(State::RolesFetched);
        removed.extend(self.write_config(Vec::new()).await?);
        run.advance(State::RegionSet);

        if sso_logout {
            if let Err(e) = self.gateway.sso_logout().await {
                tracing::warn!(err = ?e, "SSO logout failed");
            }
        }
        let script_output = self.finish(&group, false, &mut run).await?;
        tracing::info!(removed = ?removed, "logged out");
        Ok(LoginReport {
            group: group.name,
            mode: LoginMode::StaticKey,
            region: String::new(),
            profiles: Vec::new(),
            removed,
            script_output,
        })
    }

    /// Replaces the group's long-lived access key with a fresh one.
    ///
    /// The new key is stored before the old one is deleted. When the deletion fails, both keys
    /// remain active in IAM and [`crate::Error::PartialRotation`] is returned.
    #[tracing::instrument(skip(self, group, mfa_code), fields(group = %group.name))]
    pub async fn rotate_key(
        &mut self,
        group: &crate::profile::ProfileGroup,
        mfa_code: Option<&str>,
    ) -> crate::Result<Outcome<RotationReport>> {
        if group.auth_mode == Some(crate::profile::AuthMode::Sso) {
            return Err(crate::Error::UserError(format!(
                "group '{}' signs in with SSO and has no access key",
                group.name
            )));
        }
        if let Some(code) = mfa_code {
            validate_mfa_code(code)?;
        }
        let key_name = group
            .access_key_or(&self.ctx.settings.default_access_key)
            .to_owned();

        self.logout(false).await?;
        let (key, identity) = self.validate_key(&key_name).await?;
        let user_name = crate::naming::user_name_of_caller(&identity.arn)?.to_owned();
        let session = match self.ensure_session(&key_name, &key, mfa_code).await? {
            Outcome::Done(s) => s,
            Outcome::Soft(f) => return Ok(Outcome::Soft(f)),
        };
        let session = Source::Static(session);

        let old_key_id = key.access_key_id.clone();
        let new_key = self
            .gateway
            .create_access_key(&session, &user_name)
            .await
            .map_err(|e| {
                crate::Error::from(e.context(&format!("creating a key for {user_name}")))
            })?;
        tracing::info!(user = %user_name, key_id = %new_key.id, "created access key");

        let mut store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        store.upsert(
            &key_name,
            &Credentials {
                access_key_id: new_key.id.clone(),
                secret_access_key: new_key.secret.clone(),
                session_token: None,
                expiration: None,
            },
        );
        store.save().await?;

        let deletion = self
            .gateway
            .delete_access_key(&session, &user_name, &old_key_id)
            .await;
        if let Err(e) = self.logout(false).await {
            tracing::warn!(err = ?e, "logout after key rotation failed");
        }

        match deletion {
            Ok(()) => {
                tracing::info!(
                    user = %user_name,
                    key_id = %old_key_id,
                    "deleted previous access key"
                );
                Ok(Outcome::Done(RotationReport {
                    access_key: key_name,
                    old_key_id,
                    new_key_id: new_key.id,
                }))
            }
            Err(e) => {
                tracing::error!(
                    user = %user_name,
                    key_id = %old_key_id,
                    err = ?e,
                    "failed to delete previous access key"
                );
                Err(crate::Error::PartialRotation {
                    new_key_id: new_key.id,
                    old_key_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Discovers the roles `source_profile` may assume and remembers them for the group.
    #[tracing::instrument(skip(self, group), fields(group = %group.name))]
    pub async fn list_service_roles(
        &self,
        group: &crate::profile::ProfileGroup,
        source_profile: &str,
    ) -> crate::Result<Vec<String>> {
        declared_profile(group, source_profile)?;
        let store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        let source = match store.get(source_profile) {
            Ok(c) => Source::Static(c),
            Err(_) => Source::Profile(source_profile.to_owned()),
        };
        let roles = self
            .gateway
            .list_assumable_roles(&source)
            .await
            .map_err(|e| crate::Error::from(e.context(&format!("profile '{source_profile}'"))))?;

        let mut selections =
            crate::selection::SelectionStore::load(&self.ctx.selection_path).await?;
        selections
            .group_mut(&group.name)
            .available
            .insert(source_profile.to_owned(), roles.clone());
        selections.save().await?;
        Ok(roles)
    }

    pub async fn set_service_role(
        &self,
        group: &crate::profile::ProfileGroup,
        source_profile: &str,
        role_name: &str,
    ) -> crate::Result<()> {
        declared_profile(group, source_profile)?;
        if role_name.trim().is_empty() {
            return Err(crate::Error::UserError("role name is empty".to_owned()));
        }
        let mut selections =
            crate::selection::SelectionStore::load(&self.ctx.selection_path).await?;
        let selection = selections.group_mut(&group.name);
        if let Some(known) = selection.available.get(source_profile) {
            if !known.iter().any(|r| r == role_name) {
                tracing::warn!(
                    profile = %source_profile,
                    role = %role_name,
                    "role was not among the discovered roles"
                );
            }
        }
        selection.select(source_profile, role_name);
        selections.save().await?;
        tracing::info!(
            group = %group.name,
            profile = %source_profile,
            role = %role_name,
            "service role selected"
        );
        Ok(())
    }

    pub async fn clear_service_role(
        &self,
        group: &crate::profile::ProfileGroup,
    ) -> crate::Result<()> {
        let mut selections =
            crate::selection::SelectionStore::load(&self.ctx.selection_path).await?;
        selections.group_mut(&group.name).clear();
        selections.save().await?;
        Ok(())
    }

    pub async fn service_selection(
        &self,
        group: &crate::profile::ProfileGroup,
    ) -> crate::Result<crate::selection::GroupSelection> {
        let selections = crate::selection::SelectionStore::load(&self.ctx.selection_path).await?;
        Ok(selections.get(&group.name).cloned().unwrap_or_default())
    }

    async fn load_service_selection(
        &self,
        group: &mut crate::profile::ProfileGroup,
    ) -> crate::Result<()> {
        let mut selections =
            crate::selection::SelectionStore::load(&self.ctx.selection_path).await?;
        let Some((profile, role)) = selections
            .get(&group.name)
            .and_then(|s| s.selection())
            .map(|(p, r)| (p.to_owned(), r.to_owned()))
        else {
            return Ok(());
        };
        if !group.apply_service_selection(&profile, &role) {
            tracing::warn!(
                group = %group.name,
                profile = %profile,
                "service role source is gone, clearing selection"
            );
            selections.group_mut(&group.name).clear();
            selections.save().await?;
        }
        Ok(())
    }

    async fn validate_key(
        &self,
        key_name: &str,
    ) -> crate::Result<(Credentials, crate::gateway::CallerIdentity)> {
        let store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        let key = store.get(key_name).map_err(|_| {
            crate::Error::NotFound(format!(
                "access key '{key_name}' is not stored; run `{} set-access-key {key_name}`",
                env!("CARGO_PKG_NAME")
            ))
        })?;
        let identity = self
            .gateway
            .verify_identity(
                &Source::Static(key.clone()),
                crate::gateway::VERIFY_TIMEOUT,
                crate::gateway::VERIFY_MAX_RETRIES,
            )
            .await
            .map_err(|e| crate::Error::from(e.context(&format!("access key '{key_name}'"))))?;
        tracing::debug!(arn = %identity.arn, "access key is valid");
        Ok((key, identity))
    }

    /// Returns a live session for `key`, issuing (and immediately persisting) a new one when
    /// an MFA code is at hand.
    async fn ensure_session(
        &self,
        key_name: &str,
        key: &Credentials,
        mfa_code: Option<&str>,
    ) -> crate::Result<Outcome<Credentials>> {
        let session_name = crate::naming::session_token_name(key_name);
        let store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        match store.get(&session_name) {
            Ok(existing) => match self
                .gateway
                .verify_identity(
                    &Source::Static(existing.clone()),
                    crate::gateway::VERIFY_TIMEOUT,
                    crate::gateway::VERIFY_MAX_RETRIES,
                )
                .await
            {
                Ok(_) => return Ok(Outcome::Done(existing)),
                Err(crate::gateway::Error::Unauthenticated(m)) => {
                    tracing::info!(
                        session = %session_name,
                        reason = %m,
                        "session is no longer valid"
                    )
                }
                Err(e) => return Err(e.into()),
            },
            Err(_) => tracing::debug!(session = %session_name, "no stored session"),
        }

        let Some(code) = mfa_code else {
            return Ok(Outcome::Soft(SoftFailure::MfaRequired {
                access_key: key_name.to_owned(),
            }));
        };
        validate_mfa_code(code)?;
        let session = self
            .gateway
            .issue_session_token(&Source::Static(key.clone()), code)
            .await?;

        let mut store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        store.upsert(&session_name, &session);
        store.save().await?;
        tracing::info!(session = %session_name, "stored new session");
        Ok(Outcome::Done(session))
    }

    async fn ensure_sso_session(
        &self,
        check_profile: &str,
        sso_session: &str,
    ) -> crate::Result<Outcome<()>> {
        let source = Source::Profile(check_profile.to_owned());
        let verify = || {
            self.gateway.verify_identity(
                &source,
                crate::gateway::VERIFY_TIMEOUT,
                crate::gateway::VERIFY_MAX_RETRIES,
            )
        };
        match verify().await {
            Ok(_) => return Ok(Outcome::Done(())),
            Err(crate::gateway::Error::Unauthenticated(m)) => {
                tracing::info!(
                    profile = %check_profile,
                    reason = %m,
                    "SSO session is not usable, signing in"
                )
            }
            Err(e) => {
                return Err(crate::Error::from(
                    e.context(&format!("profile '{check_profile}'")),
                ))
            }
        }
        match self.gateway.sso_login(sso_session).await {
            Ok(()) => {}
            Err(crate::gateway::Error::Unauthenticated(m)) => {
                tracing::info!(
                    sso_session = %sso_session,
                    reason = %m,
                    "SSO login was not completed"
                );
                return Ok(Outcome::Soft(SoftFailure::SessionMissing {
                    sso_session: sso_session.to_owned(),
                }));
            }
            Err(e) => return Err(e.into()),
        }
        match verify().await {
            Ok(_) => Ok(Outcome::Done(())),
            Err(crate::gateway::Error::Unauthenticated(_)) => {
                Ok(Outcome::Soft(SoftFailure::SessionMissing {
                    sso_session: sso_session.to_owned(),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Assumes every profile of `group` and rewrites the credentials store in one batch. Any
    /// failure leaves the store untouched.
    async fn fetch_roles(
        &self,
        group: &crate::profile::ProfileGroup,
        base: Option<&Credentials>,
    ) -> crate::Result<Vec<String>> {
        let mut store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        let session_name = crate::gateway::generate_session_name();
        let mut materialized: std::collections::HashMap<String, Credentials> =
            std::collections::HashMap::new();

        for profile in materialization_order(group)? {
            let source = source_for(profile, base, &materialized, &store)?;
            tracing::debug!(profile = %profile.name, source = %source.describe(), "assuming role");
            let creds = self
                .gateway
                .assume_role(
                    &source,
                    &session_name,
                    &profile.account_id,
                    &profile.role_name,
                )
                .await
                .map_err(|e| {
                    crate::Error::from(e.context(&format!("profile '{}'", profile.name)))
                })?;
            store.upsert(&profile.name, &creds);
            if profile.is_default {
                store.upsert(crate::naming::DEFAULT_PROFILE, &creds);
            }
            materialized.insert(profile.name.clone(), creds);
        }

        let removed = store.prune_unused(&group.active_profile_names());
        store.save().await?;
        Ok(removed)
    }

    async fn export_shadow_credentials(
        &self,
        group: &crate::profile::ProfileGroup,
    ) -> crate::Result<Vec<String>> {
        let mut store = crate::store::CredentialsStore::load(&self.ctx.stores.credentials).await?;
        for profile in group.all_profiles() {
            let shadow = crate::naming::shadow_name(&profile.name);
            let creds = self
                .gateway
                .export_credentials(&Source::Profile(shadow.clone()))
                .await
                .map_err(|e| crate::Error::from(e.context(&format!("profile '{shadow}'"))))?;
            store.upsert(&profile.name, &creds);
            if profile.is_default {
                store.upsert(crate::naming::DEFAULT_PROFILE, &creds);
            }
        }
        let removed = store.prune_unused(&group.active_profile_names());
        store.save().await?;
        Ok(removed)
    }

    /// Writes `entries` and prunes every other managed profile from the config store.
    async fn write_config(
        &self,
        entries: Vec<(String, crate::store::ConfigEntry)>,
    ) -> crate::Result<Vec<String>> {
        let mut store = crate::store::ConfigStore::load(&self.ctx.stores.config).await?;
        let active: std::collections::BTreeSet<String> =
            entries.iter().map(|(n, _)| n.clone()).collect();
        for (name, entry) in entries.iter() {
            store.upsert(name, entry);
        }
        let removed = store.prune_unused(&active);
        store.save().await?;
        Ok(removed)
    }

    /// Support files, then the post-login script.
    async fn finish(
        &mut self,
        group: &crate::profile::ProfileGroup,
        run_script: bool,
        run: &mut Run,
    ) -> crate::Result<Option<String>> {
        let name = Some(group.name.as_str()).filter(|n| !n.is_empty());
        if let Err(e) = self.ctx.marker.write(name).await {
            tracing::warn!(
                path = %self.ctx.marker.path().display(),
                err = ?e,
                "failed to write active group marker"
            );
        }
        self.ctx.active_group = name.map(str::to_owned);
        run.advance(State::SupportFilesWritten);

        let output = self.run_script(group, run_script).await?;
        run.advance(State::ScriptRun);
        Ok(output)
    }

    async fn run_script(
        &self,
        group: &crate::profile::ProfileGroup,
        enabled: bool,
    ) -> crate::Result<Option<String>> {
        let Some(script) = group.script.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        if !enabled {
            tracing::debug!(script = %script, "script disabled");
            return Ok(None);
        }
        let path = crate::command::expand_home(script);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(crate::Error::ScriptError(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let output = self
            .runner
            .run(&path, &[], self.ctx.settings.script_timeout())
            .await
            .map_err(|e| crate::Error::ScriptError(e.to_string()))?;
        if !output.success() {
            return Err(crate::Error::ScriptError(format!(
                "{} exited with {:?}: {}",
                path.display(),
                output.code,
                output.stderr.trim()
            )));
        }
        tracing::info!(script = %path.display(), stdout = %output.stdout.trim(), "script finished");
        Ok(Some(output.stdout))
    }
}

fn declared_profile<'a>(
    group: &'a crate::profile::ProfileGroup,
    name: &str,
) -> crate::Result<&'a crate::profile::Profile> {
    group
        .profiles
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| {
            crate::Error::UserError(format!(
                "profile '{name}' is not declared in group '{}'",
                group.name
            ))
        })
}

/// Profiles in declaration order, except that a profile sourced from another profile of the
/// same group always comes after its source.
fn materialization_order(
    group: &crate::profile::ProfileGroup,
) -> crate::Result<Vec<&crate::profile::Profile>> {
    fn visit<'a>(
        profile: &'a crate::profile::Profile,
        all: &[&'a crate::profile::Profile],
        ordered: &mut Vec<&'a crate::profile::Profile>,
        visiting: &mut Vec<&'a str>,
    ) -> crate::Result<()> {
        if ordered.iter().any(|p| p.name == profile.name) {
            return Ok(());
        }
        if visiting.contains(&profile.name.as_str()) {
            return Err(crate::Error::ConfigError(format!(
                "profile '{}' has a circular source chain",
                profile.name
            )));
        }
        visiting.push(profile.name.as_str());
        if let Some(source) = profile.source_profile.as_deref() {
            if let Some(sp) = all.iter().copied().find(|p| p.name == source) {
                visit(sp, all, ordered, visiting)?;
            }
        }
        visiting.pop();
        ordered.push(profile);
        Ok(())
    }

    let all: Vec<&crate::profile::Profile> = group.all_profiles().collect();
    let mut ordered = Vec::with_capacity(all.len());
    for &profile in all.iter() {
        visit(profile, &all, &mut ordered, &mut Vec::new())?;
    }
    Ok(ordered)
}

/// Chained profiles use their source's credentials from this pass, then whatever the store
/// already holds for a source outside the group. Everything else uses the MFA session.
fn source_for(
    profile: &crate::profile::Profile,
    base: Option<&Credentials>,
    materialized: &std::collections::HashMap<String, Credentials>,
    store: &crate::store::CredentialsStore,
) -> crate::Result<Source> {
    match profile.source_profile.as_deref() {
        Some(source) => {
            if let Some(c) = materialized.get(source) {
                return Ok(Source::Static(c.clone()));
            }
            store.get(source).map(Source::Static).map_err(|_| {
                crate::Error::ConfigError(format!(
                    "source profile '{source}' of '{}' has no credentials",
                    profile.name
                ))
            })
        }
        None => base.cloned().map(Source::Static).ok_or_else(|| {
            crate::Error::UserError(format!("no session to assume '{}' with", profile.name))
        }),
    }
}

fn sso_config_entries(
    group: &crate::profile::ProfileGroup,
    sso_session: &str,
    region: &str,
    shadow: bool,
) -> Vec<(String, crate::store::ConfigEntry)> {
    let name_of = |n: &str| {
        if shadow {
            crate::naming::shadow_name(n)
        } else {
            n.to_owned()
        }
    };
    let mut entries = Vec::new();
    for profile in group.all_profiles() {
        let entry = match profile.source_profile.as_deref() {
            Some(source) => crate::store::ConfigEntry {
                region: region.to_owned(),
                sso: None,
                chain: Some(crate::store::ChainSettings {
                    source_profile: name_of(source),
                    role_arn: crate::naming::role_arn(&profile.account_id, &profile.role_name),
                }),
            },
            None => crate::store::ConfigEntry {
                region: region.to_owned(),
                sso: Some(crate::store::SsoSettings {
                    session: sso_session.to_owned(),
                    account_id: profile.account_id.clone(),
                    role_name: profile.role_name.clone(),
                }),
                chain: None,
            },
        };
        if profile.is_default && !shadow {
            entries.push((crate::naming::DEFAULT_PROFILE.to_owned(), entry.clone()));
        }
        entries.push((name_of(&profile.name), entry));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{group, profile};
    use crate::testing::{Call, FakeGateway, FakeRunner};

    const BASE_CREDENTIALS: &str = "\
[access-key]
aws_access_key_id = AKIABASE
aws_secret_access_key = base-secret

[session-token-access-key]
aws_access_key_id = ASIASESSION0
aws_secret_access_key = session-secret
aws_session_token = session-token

[legacy]
aws_access_key_id = AKIALEGACY
aws_secret_access_key = legacy-secret
";

    struct Fixture {
        dir: tempfile::TempDir,
        gateway: std::sync::Arc<FakeGateway>,
        runner: std::sync::Arc<FakeRunner>,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_credentials(BASE_CREDENTIALS, &["AKIABASE", "ASIASESSION0"]).await
        }

        async fn without_session() -> Self {
            let creds = concat!(
                "[access-key]\naws_access_key_id = AKIABASE\naws_secret_access_key = base-secret\n",
                "\n[legacy]\naws_access_key_id = AKIALEGACY\naws_secret_access_key = legacy-secret\n",
            );
            Self::with_credentials(creds, &["AKIABASE"]).await
        }

        async fn with_credentials(text: &str, valid: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let fx = Self {
                dir,
                gateway: std::sync::Arc::new(FakeGateway::with_valid_keys(valid)),
                runner: std::sync::Arc::new(FakeRunner::default()),
            };
            tokio::fs::create_dir_all(fx.credentials_path().parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(fx.credentials_path(), text).await.unwrap();
            fx
        }

        fn credentials_path(&self) -> std::path::PathBuf {
            self.dir.path().join("aws").join("credentials")
        }

        fn config_path(&self) -> std::path::PathBuf {
            self.dir.path().join("aws").join("config")
        }

        fn settings(&self) -> crate::config::Settings {
            crate::config::Settings {
                credentials_file: Some(self.credentials_path()),
                config_file: Some(self.config_path()),
                gcp_login_command: "gcloud auth login".to_owned(),
                ..Default::default()
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let settings = self.settings();
            let ctx = LoginContext {
                stores: crate::store::StorePaths::resolve(&settings),
                settings,
                marker: crate::marker::ActiveGroupMarker::new(
                    self.dir.path().join("state").join("active-group"),
                ),
                selection_path: self.dir.path().join("state").join("selection.json"),
                active_group: None,
            };
            Orchestrator::new(self.gateway.clone(), self.runner.clone(), ctx)
        }

        async fn credentials(&self) -> crate::store::CredentialsStore {
            crate::store::CredentialsStore::load(self.credentials_path())
                .await
                .unwrap()
        }

        async fn config(&self) -> crate::store::ConfigStore {
            crate::store::ConfigStore::load(self.config_path()).await.unwrap()
        }

        async fn read(&self, path: std::path::PathBuf) -> String {
            tokio::fs::read_to_string(path).await.unwrap_or_default()
        }
    }

    fn two_profiles() -> crate::profile::ProfileGroup {
        let mut readonly = profile("readonly", "222222222222", "ro");
        readonly.is_default = true;
        group(
            "team-a",
            vec![profile("developer", "111111111111", "dev"), readonly],
        )
    }

    fn sso_group() -> crate::profile::ProfileGroup {
        let mut g = two_profiles();
        g.auth_mode = Some(crate::profile::AuthMode::Sso);
        g
    }

    async fn login(
        fx: &Fixture,
        orch: &mut Orchestrator,
        group: crate::profile::ProfileGroup,
    ) -> crate::Result<Outcome<LoginReport>> {
        let request = LoginRequest::new(group, &fx.settings());
        orch.login(&request).await
    }

    #[test]
    fn mfa_code_format() {
        validate_mfa_code("012345").unwrap();
        for bad in ["12345", "1234567", "12345a", "١٢٣٤٥٦", ""] {
            assert!(matches!(
                validate_mfa_code(bad),
                Err(crate::Error::ValidationError(_))
            ));
        }
    }

    #[test]
    fn mode_selection() {
        let settings = crate::config::Settings::default();
        assert_eq!(
            LoginMode::for_group(&two_profiles(), &settings, false),
            LoginMode::StaticKey
        );
        assert_eq!(
            LoginMode::for_group(&sso_group(), &settings, false),
            LoginMode::Sso
        );
        assert_eq!(
            LoginMode::for_group(&sso_group(), &settings, true),
            LoginMode::SsoShadow
        );
        let mut gcp = group("gcp", vec![]);
        gcp.cloud = crate::profile::CloudType::Gcp;
        assert_eq!(LoginMode::for_group(&gcp, &settings, true), LoginMode::Gcp);
    }

    #[tokio::test]
    async fn static_login_two_profiles_one_default() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        let report = login(&fx, &mut orch, two_profiles())
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(report.removed, vec!["legacy"]);
        assert_eq!(report.profiles, vec!["default", "developer", "readonly"]);

        let creds = fx.credentials().await;
        assert_eq!(
            creds.names().collect::<Vec<_>>(),
            vec![
                "access-key",
                "session-token-access-key",
                "developer",
                "readonly",
                "default"
            ]
        );
        let readonly = creds.get("readonly").unwrap();
        assert!(creds.get("default").unwrap().same_material(&readonly));
        assert!(!creds.get("developer").unwrap().same_material(&readonly));

        let config = fx.config().await;
        assert_eq!(
            config.profile_names(),
            vec!["default", "developer", "readonly"]
        );
        for name in ["default", "developer", "readonly"] {
            assert_eq!(config.get(name).unwrap().get("region"), Some("eu-west-1"));
        }

        assert_eq!(orch.active_group(), Some("team-a"));
        assert_eq!(
            orch.context().marker.read().await.unwrap().as_deref(),
            Some("team-a")
        );
        assert!(fx.gateway.calls().contains(&Call::AssumeRole {
            source: "static:ASIASESSION0".to_owned(),
            account: "222222222222".to_owned(),
            role: "ro".to_owned(),
        }));
    }

    #[tokio::test]
    async fn region_override_wins() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        let mut request = LoginRequest::new(two_profiles(), &fx.settings());
        request.region_override = Some("ap-northeast-1".to_owned());
        orch.login(&request).await.unwrap().done().unwrap();
        let config = fx.config().await;
        assert_eq!(
            config.get("developer").unwrap().get("region"),
            Some("ap-northeast-1")
        );
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        login(&fx, &mut orch, two_profiles()).await.unwrap();
        let creds = fx.read(fx.credentials_path()).await;
        let config = fx.read(fx.config_path()).await;

        login(&fx, &mut orch, two_profiles()).await.unwrap();
        assert_eq!(fx.read(fx.credentials_path()).await, creds);
        assert_eq!(fx.read(fx.config_path()).await, config);
    }

    #[tokio::test]
    async fn missing_session_without_mfa_is_soft() {
        let fx = Fixture::without_session().await;
        let before = fx.read(fx.credentials_path()).await;
        let mut orch = fx.orchestrator();
        let outcome = login(&fx, &mut orch, two_profiles()).await.unwrap();
        match outcome {
            Outcome::Soft(SoftFailure::MfaRequired { access_key }) => {
                assert_eq!(access_key, "access-key")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.read(fx.credentials_path()).await, before);
        assert!(!fx.config_path().exists());
        assert_eq!(orch.active_group(), None);
        assert!(!fx
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::IssueSessionToken { .. } | Call::AssumeRole { .. })));
    }

    #[tokio::test]
    async fn new_session_survives_failed_role_pass() {
        let fx = Fixture::without_session().await;
        fx.gateway.state.lock().denied_roles.insert("ro".to_owned());
        let mut orch = fx.orchestrator();
        let mut request = LoginRequest::new(two_profiles(), &fx.settings());
        request.mfa_code = Some("123456".to_owned());
        let err = orch.login(&request).await.unwrap_err();
        assert!(err.to_string().contains("readonly"), "{err}");

        let creds = fx.credentials().await;
        assert_eq!(
            creds.access_key_id("session-token-access-key").unwrap(),
            "ASIASESSION1"
        );
        assert!(creds.has_entry("legacy"));
        assert!(!creds.has_entry("developer"));
    }

    #[tokio::test]
    async fn malformed_mfa_code_is_rejected_before_remote_calls() {
        let fx = Fixture::without_session().await;
        let mut orch = fx.orchestrator();
        let mut request = LoginRequest::new(two_profiles(), &fx.settings());
        request.mfa_code = Some("12a456".to_owned());
        assert!(matches!(
            orch.login(&request).await,
            Err(crate::Error::ValidationError(_))
        ));
        assert!(fx.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_key_is_an_auth_error() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().valid_keys.remove("AKIABASE");
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, two_profiles()).await,
            Err(crate::Error::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn network_failure_is_hard() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().network_down = true;
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, two_profiles()).await,
            Err(crate::Error::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn exempt_sections_survive_every_login() {
        let fx = Fixture::new().await;
        let mut creds = fx.credentials().await;
        creds.upsert(
            "access-key-old",
            &Credentials::new("AKIAOLD", "old-secret", None),
        );
        creds.save().await.unwrap();

        let mut orch = fx.orchestrator();
        login(&fx, &mut orch, two_profiles()).await.unwrap();
        let other = group("team-b", vec![profile("ops", "333333333333", "ops")]);
        login(&fx, &mut orch, other).await.unwrap();
        orch.logout(false).await.unwrap();

        let names: Vec<String> = fx
            .credentials()
            .await
            .names()
            .map(str::to_owned)
            .collect();
        assert_eq!(
            names,
            vec!["access-key", "session-token-access-key", "access-key-old"]
        );
    }

    #[tokio::test]
    async fn chained_profile_uses_source_credentials() {
        let fx = Fixture::new().await;
        let mut admin = profile("admin", "111111111111", "admin");
        admin.source_profile = Some("developer".to_owned());
        let g = group(
            "team-a",
            vec![admin, profile("developer", "111111111111", "dev")],
        );
        let mut orch = fx.orchestrator();
        login(&fx, &mut orch, g).await.unwrap().done().unwrap();

        let developer = fx.credentials().await.get("developer").unwrap();
        let assumed: Vec<(String, String)> = fx
            .gateway
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AssumeRole { source, role, .. } => Some((role, source)),
                _ => None,
            })
            .collect();
        assert_eq!(
            assumed,
            vec![
                ("dev".to_owned(), "static:ASIASESSION0".to_owned()),
                (
                    "admin".to_owned(),
                    format!("static:{}", developer.access_key_id)
                ),
            ]
        );
    }

    #[tokio::test]
    async fn circular_chain_is_a_config_error() {
        let fx = Fixture::new().await;
        let mut a = profile("a", "1", "r");
        a.source_profile = Some("b".to_owned());
        let mut b = profile("b", "1", "r");
        b.source_profile = Some("a".to_owned());
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, group("g", vec![a, b])).await,
            Err(crate::Error::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn logout_removes_managed_sections() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        login(&fx, &mut orch, two_profiles()).await.unwrap();

        let report = orch.logout(false).await.unwrap();
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(
            removed,
            vec![
                "default",
                "default",
                "developer",
                "profile developer",
                "profile readonly",
                "readonly"
            ]
        );
        assert_eq!(
            fx.credentials().await.names().collect::<Vec<_>>(),
            vec!["access-key", "session-token-access-key"]
        );
        assert!(fx.config().await.profile_names().is_empty());
        assert_eq!(orch.active_group(), None);
        assert_eq!(orch.context().marker.read().await.unwrap(), None);
        assert!(!fx.gateway.calls().contains(&Call::SsoLogout));
    }

    #[tokio::test]
    async fn rotation_creation_failure_leaves_key_alone() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().create_key_error = Some(crate::gateway::Error::LimitExceeded(
            "user already has 2 access keys".to_owned(),
        ));
        let mut orch = fx.orchestrator();
        let err = orch.rotate_key(&two_profiles(), None).await.unwrap_err();
        match err {
            crate::Error::LimitExceeded(m) => assert!(m.contains("2 access keys"), "{m}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!fx
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::DeleteAccessKey { .. })));
        let key = fx.credentials().await.get("access-key").unwrap();
        assert!(key.same_material(&Credentials::new("AKIABASE", "base-secret", None)));
    }

    #[tokio::test]
    async fn rotation_replaces_key() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        let report = orch
            .rotate_key(&two_profiles(), None)
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(
            report,
            RotationReport {
                access_key: "access-key".to_owned(),
                old_key_id: "AKIABASE".to_owned(),
                new_key_id: "AKIANEW".to_owned(),
            }
        );
        let key = fx.credentials().await.get("access-key").unwrap();
        assert_eq!(key.access_key_id, "AKIANEW");
        assert_eq!(key.session_token, None);
        assert!(fx.gateway.calls().contains(&Call::DeleteAccessKey {
            source: "static:ASIASESSION0".to_owned(),
            user: "alice".to_owned(),
            key_id: "AKIABASE".to_owned(),
        }));
    }

    #[tokio::test]
    async fn rotation_delete_failure_is_partial() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().delete_key_error = Some(crate::gateway::Error::Network(
            "connection reset".to_owned(),
        ));
        let mut orch = fx.orchestrator();
        match orch.rotate_key(&two_profiles(), None).await {
            Err(crate::Error::PartialRotation {
                new_key_id,
                old_key_id,
                ..
            }) => {
                assert_eq!(new_key_id, "AKIANEW");
                assert_eq!(old_key_id, "AKIABASE");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            fx.credentials().await.access_key_id("access-key").unwrap(),
            "AKIANEW"
        );
    }

    #[tokio::test]
    async fn rotation_partial_failure_survives_failed_logout() {
        let fx = Fixture::new().await;
        {
            let mut state = fx.gateway.state.lock();
            state.delete_key_error = Some(crate::gateway::Error::PermissionDenied(
                "iam:DeleteAccessKey denied".to_owned(),
            ));
            state.block_path_on_delete = Some(fx.config_path());
        }
        let mut orch = fx.orchestrator();
        match orch.rotate_key(&two_profiles(), None).await {
            Err(crate::Error::PartialRotation {
                new_key_id,
                old_key_id,
                ..
            }) => {
                assert_eq!(new_key_id, "AKIANEW");
                assert_eq!(old_key_id, "AKIABASE");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(fx.config_path().is_dir());
        assert_eq!(
            fx.credentials().await.access_key_id("access-key").unwrap(),
            "AKIANEW"
        );
    }

    #[tokio::test]
    async fn rotation_succeeds_when_final_logout_fails() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().block_path_on_delete = Some(fx.config_path());
        let mut orch = fx.orchestrator();
        let report = orch
            .rotate_key(&two_profiles(), None)
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(report.new_key_id, "AKIANEW");
    }

    #[tokio::test]
    async fn rotation_without_session_needs_mfa() {
        let fx = Fixture::without_session().await;
        let mut orch = fx.orchestrator();
        assert!(matches!(
            orch.rotate_key(&two_profiles(), None).await,
            Ok(Outcome::Soft(SoftFailure::MfaRequired { .. }))
        ));
        assert!(!fx
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CreateAccessKey { .. })));
    }

    #[tokio::test]
    async fn missing_script_fails_after_credentials_are_written() {
        let fx = Fixture::new().await;
        let mut g = two_profiles();
        g.script = Some(fx.dir.path().join("nope.sh").display().to_string());
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, g).await,
            Err(crate::Error::ScriptError(_))
        ));
        assert!(fx.credentials().await.has_entry("developer"));
        assert!(fx.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn script_runs_and_reports_output() {
        let fx = Fixture::new().await;
        let script = fx.dir.path().join("post-login.sh");
        tokio::fs::write(&script, "#!/bin/sh\necho done\n").await.unwrap();
        fx.runner.state.lock().stdout = "done\n".to_owned();
        let mut g = two_profiles();
        g.script = Some(script.display().to_string());

        let mut orch = fx.orchestrator();
        let report = login(&fx, &mut orch, g.clone())
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(report.script_output.as_deref(), Some("done\n"));
        assert_eq!(fx.runner.commands(), vec![script.display().to_string()]);

        fx.runner.state.lock().exit_code = 2;
        assert!(matches!(
            login(&fx, &mut orch, g.clone()).await,
            Err(crate::Error::ScriptError(_))
        ));

        let mut request = LoginRequest::new(g, &fx.settings());
        request.run_script = false;
        let report = orch.login(&request).await.unwrap().done().unwrap();
        assert_eq!(report.script_output, None);
        assert_eq!(fx.runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn sso_login_writes_sso_profiles() {
        let fx = Fixture::new().await;
        tokio::fs::write(
            fx.config_path(),
            "[sso-session sso]\nsso_start_url = https://example.awsapps.com/start\nsso_region = us-east-1\n",
        )
        .await
        .unwrap();
        fx.gateway.state.lock().sso_login_succeeds = true;

        let mut orch = fx.orchestrator();
        let report = login(&fx, &mut orch, sso_group())
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(report.mode, LoginMode::Sso);
        assert!(fx.gateway.calls().contains(&Call::SsoLogin("sso".to_owned())));

        let config = fx.config().await;
        assert!(config.has_section("sso-session sso"));
        let default = config.get("default").unwrap();
        assert_eq!(default.get("sso_session"), Some("sso"));
        assert_eq!(default.get("sso_account_id"), Some("222222222222"));
        assert_eq!(default.get("sso_role_name"), Some("ro"));
        assert_eq!(
            config.get("developer").unwrap().get("sso_role_name"),
            Some("dev")
        );

        assert_eq!(
            fx.credentials().await.names().collect::<Vec<_>>(),
            vec!["access-key", "session-token-access-key"]
        );
    }

    #[tokio::test]
    async fn sso_login_not_completed_is_soft() {
        let fx = Fixture::new().await;
        tokio::fs::write(fx.config_path(), "[sso-session sso]\nsso_region = us-east-1\n")
            .await
            .unwrap();
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, sso_group()).await,
            Ok(Outcome::Soft(SoftFailure::SessionMissing { .. }))
        ));
    }

    #[tokio::test]
    async fn sso_network_failure_does_not_open_browser_login() {
        let fx = Fixture::new().await;
        tokio::fs::write(fx.config_path(), "[sso-session sso]\nsso_region = us-east-1\n")
            .await
            .unwrap();
        {
            let mut state = fx.gateway.state.lock();
            state.network_down = true;
            state.sso_login_succeeds = true;
        }
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, sso_group()).await,
            Err(crate::Error::NetworkError(_))
        ));
        assert!(!fx
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SsoLogin(_))));
    }

    #[tokio::test]
    async fn sso_session_must_be_defined() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        assert!(matches!(
            login(&fx, &mut orch, sso_group()).await,
            Err(crate::Error::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn sso_shadow_exports_static_credentials() {
        let fx = Fixture::new().await;
        tokio::fs::write(fx.config_path(), "[sso-session sso]\nsso_region = us-east-1\n")
            .await
            .unwrap();
        fx.gateway.state.lock().sso_logged_in = true;

        let mut orch = fx.orchestrator();
        let mut request = LoginRequest::new(sso_group(), &fx.settings());
        request.mode = LoginMode::SsoShadow;
        orch.login(&request).await.unwrap().done().unwrap();

        let creds = fx.credentials().await;
        assert_eq!(
            creds.access_key_id("readonly").unwrap(),
            "ASIAEXPORT-shadow-readonly"
        );
        assert_eq!(
            creds.access_key_id("default").unwrap(),
            "ASIAEXPORT-shadow-readonly"
        );

        let config = fx.config().await;
        assert_eq!(
            config.get("shadow-readonly").unwrap().get("sso_role_name"),
            Some("ro")
        );
        let plain = config.get("readonly").unwrap();
        assert_eq!(plain.get("sso_session"), None);
        assert_eq!(plain.get("region"), Some("eu-west-1"));
        assert!(!fx
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SsoLogin(_))));
    }

    #[tokio::test]
    async fn sso_logout_calls_external_logout() {
        let fx = Fixture::new().await;
        let mut orch = fx.orchestrator();
        orch.logout(true).await.unwrap();
        assert_eq!(fx.gateway.calls(), vec![Call::SsoLogout]);
    }

    #[tokio::test]
    async fn gcp_login_leaves_aws_stores_alone() {
        let fx = Fixture::new().await;
        let before = fx.read(fx.credentials_path()).await;
        let mut g = group("gcp", vec![]);
        g.cloud = crate::profile::CloudType::Gcp;
        let mut orch = fx.orchestrator();
        login(&fx, &mut orch, g).await.unwrap().done().unwrap();

        assert_eq!(fx.runner.commands(), vec!["/bin/sh -c gcloud auth login"]);
        assert_eq!(fx.read(fx.credentials_path()).await, before);
        assert_eq!(orch.active_group(), Some("gcp"));
    }

    #[tokio::test]
    async fn service_role_is_materialized() {
        let fx = Fixture::new().await;
        fx.gateway.state.lock().assumable_roles = vec!["ci".to_owned(), "deployer".to_owned()];
        let mut orch = fx.orchestrator();
        let g = two_profiles();
        login(&fx, &mut orch, g.clone()).await.unwrap();

        let roles = orch.list_service_roles(&g, "developer").await.unwrap();
        assert_eq!(roles, vec!["ci", "deployer"]);
        orch.set_service_role(&g, "developer", "deployer")
            .await
            .unwrap();
        let selection = orch.service_selection(&g).await.unwrap();
        assert_eq!(selection.available["developer"], vec!["ci", "deployer"]);
        assert_eq!(selection.history, vec!["developer : deployer"]);

        let report = login(&fx, &mut orch, g.clone())
            .await
            .unwrap()
            .done()
            .unwrap();
        assert!(report.profiles.contains(&"service".to_owned()));
        let creds = fx.credentials().await;
        let developer = creds.get("developer").unwrap();
        assert!(fx.gateway.calls().contains(&Call::AssumeRole {
            source: format!("static:{}", developer.access_key_id),
            account: "111111111111".to_owned(),
            role: "deployer".to_owned(),
        }));
        assert!(creds.has_entry("service"));

        orch.clear_service_role(&g).await.unwrap();
        login(&fx, &mut orch, g).await.unwrap();
        assert!(!fx.credentials().await.has_entry("service"));
    }

    #[tokio::test]
    async fn unknown_service_source_is_rejected() {
        let fx = Fixture::new().await;
        let orch = fx.orchestrator();
        assert!(matches!(
            orch.set_service_role(&two_profiles(), "nobody", "deployer").await,
            Err(crate::Error::UserError(_))
        ));
    }

    #[tokio::test]
    async fn stale_service_selection_is_cleared() {
        let fx = Fixture::new().await;
        let selection_path = fx.dir.path().join("state").join("selection.json");
        let mut selections = crate::selection::SelectionStore::load(&selection_path)
            .await
            .unwrap();
        selections.group_mut("team-a").select("removed", "deployer");
        selections.save().await.unwrap();

        let mut orch = fx.orchestrator();
        let report = login(&fx, &mut orch, two_profiles())
            .await
            .unwrap()
            .done()
            .unwrap();
        assert!(!report.profiles.contains(&"service".to_owned()));
        let selection = orch.service_selection(&two_profiles()).await.unwrap();
        assert_eq!(selection.selection(), None);
        assert_eq!(selection.history, vec!["removed : deployer"]);
    }
}
