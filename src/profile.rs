//! In-memory model of profile groups. Pure data and validation; no I/O.

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Key,
    Sso,
}

impl std::str::FromStr for AuthMode {
    type Err = crate::Error;
    fn from_str(s: &str) -> Result<AuthMode, crate::Error> {
        match s {
            "key" => Ok(AuthMode::Key),
            "sso" => Ok(AuthMode::Sso),
            _ => Err(crate::Error::UserError("unknown auth_mode".to_owned())),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloudType {
    #[default]
    Aws,
    Gcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub account_id: String,
    pub role_name: String,
    pub is_default: bool,
    /// When set, this profile is obtained by assuming `role_name` from the named profile.
    pub source_profile: Option<String>,
}

impl Profile {
    pub fn validate(&self) -> crate::Result<()> {
        for (field, value) in [
            ("profile", &self.name),
            ("account", &self.account_id),
            ("role", &self.role_name),
        ] {
            if value.trim().is_empty() {
                return Err(crate::Error::ConfigError(format!(
                    "profile '{}' is missing {field}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileGroup {
    pub name: String,
    pub team: String,
    pub region: String,
    pub color: String,
    pub auth_mode: Option<AuthMode>,
    pub cloud: CloudType,
    pub access_key: Option<String>,
    pub sso_session: Option<String>,
    pub script: Option<String>,
    pub profiles: Vec<Profile>,
    pub service_profile: Option<Profile>,
}

impl ProfileGroup {
    /// The group used for logout: no profiles, so every managed section gets pruned.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            team: String::new(),
            region: String::new(),
            color: String::new(),
            auth_mode: Some(AuthMode::Key),
            cloud: CloudType::Aws,
            access_key: None,
            sso_session: None,
            script: None,
            profiles: Vec::new(),
            service_profile: None,
        }
    }

    /// Checks the group and each of its profiles, stopping at the first problem.
    pub fn validate(&self) -> crate::Result<()> {
        let fail =
            |m: String| Err(crate::Error::ConfigError(format!("group '{}': {m}", self.name)));
        for (field, value) in [
            ("team", &self.team),
            ("region", &self.region),
            ("color", &self.color),
        ] {
            if value.trim().is_empty() {
                return fail(format!("{field} is not set"));
            }
        }
        if self.auth_mode.is_none() {
            return fail("auth_mode is not set".to_owned());
        }
        if let Some(k) = self.access_key.as_deref() {
            if !k.starts_with(crate::naming::ACCESS_KEY_PREFIX) {
                return fail(format!(
                    "access_key '{k}' must start with '{}'",
                    crate::naming::ACCESS_KEY_PREFIX
                ));
            }
        }
        if let Some(s) = self.sso_session.as_deref() {
            if !s.starts_with(crate::naming::SSO_SESSION_PREFIX) {
                return fail(format!(
                    "sso_session '{s}' must start with '{}'",
                    crate::naming::SSO_SESSION_PREFIX
                ));
            }
        }
        if self.cloud == CloudType::Aws && self.profiles.is_empty() {
            return fail("no profiles declared".to_owned());
        }
        if self.profiles.iter().filter(|p| p.is_default).count() > 1 {
            return fail("more than one profile is marked as default".to_owned());
        }
        let mut seen = std::collections::HashSet::new();
        for profile in self.profiles.iter() {
            if let Err(crate::Error::ConfigError(m)) = profile.validate() {
                return fail(m);
            }
            if !seen.insert(profile.name.as_str()) {
                return fail(format!("profile '{}' is declared twice", profile.name));
            }
            if is_reserved(&profile.name) {
                return fail(format!("profile name '{}' is reserved", profile.name));
            }
        }
        Ok(())
    }

    pub fn access_key_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.access_key.as_deref().unwrap_or(fallback)
    }

    pub fn sso_session_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.sso_session.as_deref().unwrap_or(fallback)
    }

    pub fn find(&self, name: &str) -> Option<&Profile> {
        self.all_profiles().find(|p| p.name == name)
    }

    /// Declared profiles followed by the service profile, if any.
    pub fn all_profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter().chain(self.service_profile.iter())
    }

    pub fn default_profile(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.is_default)
    }

    /// Names that a login of this group materializes; everything else is prunable.
    pub fn active_profile_names(&self) -> std::collections::BTreeSet<String> {
        let mut names: std::collections::BTreeSet<String> =
            self.all_profiles().map(|p| p.name.clone()).collect();
        if self.default_profile().is_some() {
            names.insert(crate::naming::DEFAULT_PROFILE.to_owned());
        }
        names
    }

    /// Layers the user's service role selection on top of the declared profiles. Returns
    /// false and drops any service profile when the selected source profile is not declared
    /// in this group anymore.
    pub fn apply_service_selection(&mut self, source_profile: &str, role_name: &str) -> bool {
        let Some(source) = self.profiles.iter().find(|p| p.name == source_profile) else {
            self.service_profile = None;
            return false;
        };
        self.service_profile = Some(Profile {
            name: crate::naming::SERVICE_PROFILE.to_owned(),
            account_id: source.account_id.clone(),
            role_name: role_name.to_owned(),
            is_default: false,
            source_profile: Some(source.name.clone()),
        });
        true
    }
}

fn is_reserved(name: &str) -> bool {
    name == crate::naming::DEFAULT_PROFILE
        || name == crate::naming::SERVICE_PROFILE
        || crate::naming::is_exempt(name)
        || name.starts_with(crate::naming::SHADOW_PREFIX)
}

#[cfg(test)]
pub(crate) fn profile(name: &str, account: &str, role: &str) -> Profile {
    Profile {
        name: name.to_owned(),
        account_id: account.to_owned(),
        role_name: role.to_owned(),
        is_default: false,
        source_profile: None,
    }
}

#[cfg(test)]
pub(crate) fn group(name: &str, profiles: Vec<Profile>) -> ProfileGroup {
    ProfileGroup {
        name: name.to_owned(),
        team: "platform".to_owned(),
        region: "eu-west-1".to_owned(),
        color: "#00ff00".to_owned(),
        auth_mode: Some(AuthMode::Key),
        cloud: CloudType::Aws,
        access_key: None,
        sso_session: None,
        script: None,
        profiles,
        service_profile: None,
    }
}
