//! Persisted service-role selections: last choice, discovered roles and recent history per group.

pub const HISTORY_LIMIT: usize = 10;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GroupSelection {
    pub selected_profile: Option<String>,
    pub selected_role: Option<String>,
    pub available: std::collections::BTreeMap<String, Vec<String>>,
    pub history: Vec<String>,
}

impl GroupSelection {
    pub fn select(&mut self, profile: &str, role: &str) {
        self.selected_profile = Some(profile.to_owned());
        self.selected_role = Some(role.to_owned());
        push_history(&mut self.history, history_item(profile, role));
    }

    pub fn clear(&mut self) {
        self.selected_profile = None;
        self.selected_role = None;
    }

    pub fn selection(&self) -> Option<(&str, &str)> {
        match (self.selected_profile.as_deref(), self.selected_role.as_deref()) {
            (Some(p), Some(r)) => Some((p, r)),
            _ => None,
        }
    }
}

pub fn history_item(profile: &str, role: &str) -> String {
    format!("{profile} : {role}")
}

/// Newest first, no duplicates, at most [`HISTORY_LIMIT`] entries.
pub fn push_history(history: &mut Vec<String>, item: String) {
    history.retain(|h| h != &item);
    history.insert(0, item);
    history.truncate(HISTORY_LIMIT);
}

#[derive(Debug)]
pub struct SelectionStore {
    path: std::path::PathBuf,
    groups: std::collections::BTreeMap<String, GroupSelection>,
}

impl SelectionStore {
    pub async fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let groups = match tokio::fs::read(&path).await {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        err = ?e,
                        "Failed to parse selections, starting over"
                    );
                    Default::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Default::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, groups })
    }

    pub async fn save(&self) -> crate::Result<()> {
        use tokio::io::AsyncWriteExt;
        tracing::debug!(path = %self.path.display(), "saving selections");
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_string_pretty(&self.groups)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .mode(0o600)
            .open(&self.path)
            .await?;
        file.write_all(data.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    pub fn get(&self, group: &str) -> Option<&GroupSelection> {
        self.groups.get(group)
    }

    pub fn group_mut(&mut self, group: &str) -> &mut GroupSelection {
        self.groups.entry(group.to_owned()).or_default()
    }
}
