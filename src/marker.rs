/// Single-line file naming the currently logged-in group, read by other tooling.
#[derive(Debug, Clone)]
pub struct ActiveGroupMarker {
    path: std::path::PathBuf,
}

impl ActiveGroupMarker {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn read(&self) -> crate::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(Some(s.trim().to_owned()).filter(|s| !s.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `None` removes the marker.
    pub async fn write(&self, group: Option<&str>) -> crate::Result<()> {
        match group.filter(|g| !g.is_empty()) {
            Some(g) => {
                if let Some(dir) = self.path.parent() {
                    tokio::fs::create_dir_all(dir).await?;
                }
                tokio::fs::write(&self.path, format!("{g}\n")).await?;
            }
            None => match tokio::fs::remove_file(&self.path).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}
