#[derive(Debug, serde::Serialize)]
struct StatusOutput {
    active_group: Option<String>,
    credentials_file: std::path::PathBuf,
    config_file: std::path::PathBuf,
    access_keys: Vec<String>,
    sessions: Vec<String>,
    profiles: Vec<String>,
    config_profiles: Vec<String>,
    default_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_role: Option<String>,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Print as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[tokio::main]
pub async fn run(args: &StatusArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let stores = crate::store::StorePaths::resolve(&settings);
    let marker = crate::marker::ActiveGroupMarker::new(crate::config::active_group_path());
    let active_group = marker.read().await?;

    let credentials = crate::store::CredentialsStore::load(&stores.credentials).await?;
    let config = crate::store::ConfigStore::load(&stores.config).await?;

    let mut access_keys = Vec::new();
    let mut sessions = Vec::new();
    let mut profiles = Vec::new();
    for name in credentials.names() {
        match crate::naming::classify(name) {
            crate::naming::SectionKind::AccessKey => access_keys.push(name.to_owned()),
            crate::naming::SectionKind::SessionToken => sessions.push(name.to_owned()),
            crate::naming::SectionKind::Managed => profiles.push(name.to_owned()),
        }
    }

    let service_role = match active_group.as_deref() {
        Some(g) => crate::selection::SelectionStore::load(crate::config::selection_path())
            .await?
            .get(g)
            .and_then(|s| s.selection().map(|(p, r)| crate::selection::history_item(p, r))),
        None => None,
    };

    let output = StatusOutput {
        active_group,
        credentials_file: stores.credentials.clone(),
        config_file: stores.config.clone(),
        access_keys,
        sessions,
        profiles,
        config_profiles: config.profile_names(),
        default_configured: stores
            .has_entry(crate::store::StoreKind::Config, crate::naming::DEFAULT_PROFILE)
            .await?,
        service_role,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Active group: {}",
        output.active_group.as_deref().unwrap_or("(none)")
    );
    println!("Credentials: {}", output.credentials_file.display());
    println!("Config: {}", output.config_file.display());
    println!("Access keys: {}", output.access_keys.join(", "));
    println!("Sessions: {}", output.sessions.join(", "));
    println!("Profiles: {}", output.profiles.join(", "));
    println!("Config profiles: {}", output.config_profiles.join(", "));
    println!(
        "Default profile: {}",
        if output.default_configured { "configured" } else { "absent" }
    );
    if let Some(s) = output.service_role.as_deref() {
        println!("Service role: {s}");
    }
    Ok(())
}
