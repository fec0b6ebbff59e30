#[derive(clap::Args)]
pub struct LogoutArgs {
    /// Also end the SSO session. Implied when the active group signs in with SSO.
    #[arg(long, default_value_t = false)]
    pub sso: bool,
}

#[tokio::main]
pub async fn run(args: &LogoutArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let mut orchestrator = crate::cmd::orchestrator(settings, "").await?;

    let sso = args.sso || active_group_uses_sso(orchestrator.active_group()).await;
    let report = orchestrator.logout(sso).await?;

    let mut lines = vec!["All managed profiles were removed".to_owned()];
    if !report.removed.is_empty() {
        lines.push(format!("Removed: {}", report.removed.join(", ")));
    }
    crate::terminal::banner("Logged out", &lines).await;
    Ok(())
}

async fn active_group_uses_sso(active: Option<&str>) -> bool {
    let Some(name) = active else {
        return false;
    };
    match crate::config::Accounts::load().await {
        Ok(accounts) => accounts
            .find(name)
            .map(|g| g.auth_mode == Some(crate::profile::AuthMode::Sso))
            .unwrap_or(false),
        Err(e) => {
            tracing::warn!(err = ?e, "Failed to load accounts");
            false
        }
    }
}
