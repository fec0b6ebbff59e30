fn home_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(std::env::var("HOME").expect("No $HOME environment variable present"))
}

pub fn config_dir() -> std::path::PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(|x| x.into())
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join(env!("CARGO_PKG_NAME"))
}

pub fn state_dir() -> std::path::PathBuf {
    match std::env::var("XDG_STATE_HOME") {
        Ok(d) => std::path::PathBuf::from(d),
        Err(_) => home_dir().join(".local").join("state"),
    }
    .join(env!("CARGO_PKG_NAME"))
}

pub fn log_dir() -> std::path::PathBuf {
    state_dir().join("log")
}

pub fn log_dir_mkpath() -> std::io::Result<std::path::PathBuf> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn accounts_path() -> std::path::PathBuf {
    config_dir().join("accounts.yaml")
}

pub fn settings_path() -> std::path::PathBuf {
    config_dir().join("settings.yaml")
}

pub fn selection_path() -> std::path::PathBuf {
    state_dir().join("selection.json")
}

pub fn active_group_path() -> std::path::PathBuf {
    state_dir().join("active-group")
}

pub fn default_credentials_path() -> std::path::PathBuf {
    std::env::var_os("AWS_SHARED_CREDENTIALS_FILE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".aws").join("credentials"))
}

pub fn default_aws_config_path() -> std::path::PathBuf {
    std::env::var_os("AWS_CONFIG_FILE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".aws").join("config"))
}

/// Small key/value toggles from `settings.yaml`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    pub default_access_key: String,
    pub default_sso_session: String,
    pub run_script: bool,
    /// Shell command printing a 6-digit MFA code on stdout.
    pub mfa_command: Option<String>,
    /// Materialize SSO groups as plain static credentials (shadow mode).
    pub sso_static: bool,
    pub repeat_interval_minutes: u64,
    pub credentials_file: Option<std::path::PathBuf>,
    pub config_file: Option<std::path::PathBuf>,
    pub gcp_login_command: String,
    pub sso_login_timeout_secs: u64,
    pub script_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_access_key: crate::naming::ACCESS_KEY_PREFIX.to_owned(),
            default_sso_session: crate::naming::SSO_SESSION_PREFIX.to_owned(),
            run_script: true,
            mfa_command: None,
            sso_static: false,
            repeat_interval_minutes: 50,
            credentials_file: None,
            config_file: None,
            gcp_login_command: "gcloud auth login --update-adc".to_owned(),
            sso_login_timeout_secs: 300,
            script_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub async fn load() -> crate::Result<Self> {
        Self::read_from_file(settings_path()).await
    }

    /// A missing file yields the defaults.
    pub async fn read_from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.as_ref().display(),
                    "no settings file, using defaults"
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(&data)?)
    }

    pub fn sso_login_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sso_login_timeout_secs)
    }

    pub fn script_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.script_timeout_secs)
    }

    pub fn repeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.repeat_interval_minutes * 60)
    }
}

/// One group as written in `accounts.yaml`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GroupSpec {
    pub team: String,
    pub region: String,
    pub color: String,
    pub auth_mode: Option<crate::profile::AuthMode>,
    #[serde(rename = "type")]
    pub cloud: crate::profile::CloudType,
    pub access_key: Option<String>,
    pub sso_session: Option<String>,
    pub script: Option<String>,
    pub profiles: Vec<ProfileSpec>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ProfileSpec {
    pub profile: String,
    pub account: AccountId,
    pub role: String,
    pub default: bool,
    pub source: Option<String>,
}

/// Account ids written as YAML integers lose their leading zeros; they are padded back.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AccountId {
    Text(String),
    Number(u64),
}

impl Default for AccountId {
    fn default() -> Self {
        AccountId::Text(String::new())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Text(s) => write!(f, "{s}"),
            AccountId::Number(n) => write!(f, "{n:012}"),
        }
    }
}

impl GroupSpec {
    pub fn into_group(self, name: &str) -> crate::profile::ProfileGroup {
        crate::profile::ProfileGroup {
            name: name.to_owned(),
            team: self.team,
            region: self.region,
            color: self.color,
            auth_mode: self.auth_mode,
            cloud: self.cloud,
            access_key: self.access_key,
            sso_session: self.sso_session,
            script: self.script,
            profiles: self
                .profiles
                .into_iter()
                .map(|p| crate::profile::Profile {
                    name: p.profile,
                    account_id: p.account.to_string(),
                    role_name: p.role,
                    is_default: p.default,
                    source_profile: p.source,
                })
                .collect(),
            service_profile: None,
        }
    }
}

/// The declarative account configuration (`accounts.yaml`): group name → group.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    pub groups: Vec<crate::profile::ProfileGroup>,
}

impl Accounts {
    pub async fn load() -> crate::Result<Self> {
        Self::read_from_file(accounts_path()).await
    }

    pub async fn read_from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let data = tokio::fs::read(&path).await.map_err(|e| {
            crate::Error::ConfigError(format!(
                "Can't read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_slice(&data)
    }

    pub fn from_yaml_slice(data: &[u8]) -> crate::Result<Self> {
        let parsed: std::collections::BTreeMap<String, GroupSpec> = serde_yaml::from_slice(data)?;
        Ok(Self {
            groups: parsed
                .into_iter()
                .map(|(name, spec)| spec.into_group(&name))
                .collect(),
        })
    }

    pub fn find(&self, name: &str) -> crate::Result<&crate::profile::ProfileGroup> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| crate::Error::UserError(format!("No group named '{name}' in accounts")))
    }
}
