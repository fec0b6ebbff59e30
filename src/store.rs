//! Read/modify/write access to the AWS `credentials` and `config` files.
//!
//! Every load reads the whole file and every save rewrites it, so a batch of mutations is
//! performed in memory and persisted once. Nothing guards against other processes editing
//! the same files concurrently.

const KEY_ACCESS_KEY_ID: &str = "aws_access_key_id";
const KEY_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const KEY_SESSION_TOKEN: &str = "aws_session_token";

const KEY_REGION: &str = "region";
const KEY_OUTPUT: &str = "output";
const KEY_SSO_SESSION: &str = "sso_session";
const KEY_SSO_ACCOUNT_ID: &str = "sso_account_id";
const KEY_SSO_ROLE_NAME: &str = "sso_role_name";
const KEY_SOURCE_PROFILE: &str = "source_profile";
const KEY_ROLE_ARN: &str = "role_arn";

/// Keys owned by this tool in a config profile section.
const MANAGED_CONFIG_KEYS: &[&str] = &[
    KEY_REGION,
    KEY_OUTPUT,
    KEY_SSO_SESSION,
    KEY_SSO_ACCOUNT_ID,
    KEY_SSO_ROLE_NAME,
    KEY_SOURCE_PROFILE,
    KEY_ROLE_ARN,
];

pub const OUTPUT_FORMAT: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Credentials,
    Config,
}

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub credentials: std::path::PathBuf,
    pub config: std::path::PathBuf,
}

impl StorePaths {
    pub fn resolve(settings: &crate::config::Settings) -> Self {
        Self {
            credentials: settings
                .credentials_file
                .clone()
                .unwrap_or_else(crate::config::default_credentials_path),
            config: settings
                .config_file
                .clone()
                .unwrap_or_else(crate::config::default_aws_config_path),
        }
    }

    pub async fn has_entry(&self, kind: StoreKind, name: &str) -> crate::Result<bool> {
        Ok(match kind {
            StoreKind::Credentials => CredentialsStore::load(&self.credentials)
                .await?
                .has_entry(name),
            StoreKind::Config => ConfigStore::load(&self.config).await?.has_entry(name),
        })
    }
}

pub type CredentialEntry = crate::gateway::Credentials;

/// One `profile <name>` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigEntry {
    pub region: String,
    pub sso: Option<SsoSettings>,
    pub chain: Option<ChainSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoSettings {
    pub session: String,
    pub account_id: String,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    pub source_profile: String,
    pub role_arn: String,
}

impl ConfigEntry {
    pub fn plain(region: &str) -> Self {
        Self {
            region: region.to_owned(),
            ..Default::default()
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (KEY_REGION, self.region.clone()),
            (KEY_OUTPUT, OUTPUT_FORMAT.to_owned()),
        ];
        if let Some(sso) = self.sso.as_ref() {
            pairs.push((KEY_SSO_SESSION, sso.session.clone()));
            pairs.push((KEY_SSO_ACCOUNT_ID, sso.account_id.clone()));
            pairs.push((KEY_SSO_ROLE_NAME, sso.role_name.clone()));
        }
        if let Some(chain) = self.chain.as_ref() {
            pairs.push((KEY_SOURCE_PROFILE, chain.source_profile.clone()));
            pairs.push((KEY_ROLE_ARN, chain.role_arn.clone()));
        }
        pairs
    }
}

async fn read_document(path: &std::path::Path) -> crate::Result<crate::ini::Document> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(crate::ini::Document::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "store file is absent, starting empty");
            Ok(crate::ini::Document::default())
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_document(path: &std::path::Path, doc: &crate::ini::Document) -> crate::Result<()> {
    use tokio::io::AsyncWriteExt;
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let data = zeroize::Zeroizing::new(doc.render());
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// The `credentials` file: section name = profile name.
#[derive(Debug)]
pub struct CredentialsStore {
    path: std::path::PathBuf,
    doc: crate::ini::Document,
}

impl CredentialsStore {
    pub async fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = read_document(&path).await?;
        Ok(Self { path, doc })
    }

    pub async fn save(&self) -> crate::Result<()> {
        tracing::debug!(path = %self.path.display(), "saving credentials");
        write_document(&self.path, &self.doc).await
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.doc.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.doc.names()
    }

    /// Overwrites the key material of `name`; the session token is dropped when absent.
    pub fn upsert(&mut self, name: &str, entry: &CredentialEntry) {
        use secrecy::ExposeSecret;
        let section = self.doc.entry(name);
        section.set(KEY_ACCESS_KEY_ID, entry.access_key_id.as_str());
        section.set(
            KEY_SECRET_ACCESS_KEY,
            entry.secret_access_key.expose_secret(),
        );
        match entry.session_token.as_deref() {
            Some(t) => section.set(KEY_SESSION_TOKEN, t),
            None => section.remove(KEY_SESSION_TOKEN),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        !self.doc.retain(|n| n != name).is_empty()
    }

    pub fn get(&self, name: &str) -> crate::Result<CredentialEntry> {
        let section = self
            .doc
            .get(name)
            .ok_or_else(|| crate::Error::NotFound(format!("credentials '{name}' not found")))?;
        let field = |key: &str| {
            section
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| crate::Error::NotFound(format!("credentials '{name}' lack {key}")))
        };
        Ok(CredentialEntry::new(
            field(KEY_ACCESS_KEY_ID)?,
            field(KEY_SECRET_ACCESS_KEY)?,
            section.get(KEY_SESSION_TOKEN).map(str::to_owned),
        ))
    }

    pub fn access_key_id(&self, name: &str) -> crate::Result<String> {
        Ok(self.get(name)?.access_key_id)
    }

    /// Every `access-key*` section, in file order.
    pub fn access_key_names(&self) -> Vec<String> {
        self.doc
            .names()
            .filter(|n| crate::naming::classify(n) == crate::naming::SectionKind::AccessKey)
            .map(str::to_owned)
            .collect()
    }

    /// Removes every managed section not in `active`; returns the removed names.
    pub fn prune_unused(&mut self, active: &std::collections::BTreeSet<String>) -> Vec<String> {
        let removed = self
            .doc
            .retain(|name| crate::naming::is_exempt(name) || active.contains(name));
        if !removed.is_empty() {
            tracing::info!(removed = ?removed, "pruned unused credentials");
        }
        removed
    }
}

/// The `config` file: `profile <name>` sections plus the unprefixed `default`.
#[derive(Debug)]
pub struct ConfigStore {
    path: std::path::PathBuf,
    doc: crate::ini::Document,
}

impl ConfigStore {
    pub async fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = read_document(&path).await?;
        Ok(Self { path, doc })
    }

    pub async fn save(&self) -> crate::Result<()> {
        tracing::debug!(path = %self.path.display(), "saving config");
        write_document(&self.path, &self.doc).await
    }

    pub fn has_entry(&self, profile: &str) -> bool {
        self.doc
            .contains(&crate::naming::config_section_name(profile))
    }

    /// Raw section lookup, for non-profile sections such as `sso-session <name>`.
    pub fn has_section(&self, section: &str) -> bool {
        self.doc.contains(section)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.doc
            .names()
            .filter_map(crate::naming::profile_of_config_section)
            .map(str::to_owned)
            .collect()
    }

    pub fn upsert(&mut self, profile: &str, entry: &ConfigEntry) {
        let section = self
            .doc
            .entry(&crate::naming::config_section_name(profile));
        let pairs = entry.pairs();
        for key in MANAGED_CONFIG_KEYS {
            if !pairs.iter().any(|(k, _)| k == key) {
                section.remove(key);
            }
        }
        for (k, v) in pairs {
            section.set(k, v);
        }
    }

    pub fn get(&self, profile: &str) -> Option<&crate::ini::Section> {
        self.doc.get(&crate::naming::config_section_name(profile))
    }

    /// Removes every profile section whose profile is not active. Non-profile sections
    /// (e.g. `sso-session`) are kept.
    pub fn prune_unused(&mut self, active: &std::collections::BTreeSet<String>) -> Vec<String> {
        let removed = self.doc.retain(|section| {
            match crate::naming::profile_of_config_section(section) {
                Some(p) => active.contains(p),
                None => true,
            }
        });
        if !removed.is_empty() {
            tracing::info!(removed = ?removed, "pruned unused config profiles");
        }
        removed
    }
}
