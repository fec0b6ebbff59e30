#[derive(clap::Args)]
pub struct ServiceRoleArgs {
    #[command(subcommand)]
    pub command: ServiceRoleCommand,
}

#[derive(clap::Subcommand)]
pub enum ServiceRoleCommand {
    /// Discover roles a profile of the group may assume.
    List {
        group: String,
        /// Declared profile to assume the service role from.
        profile: String,
    },
    /// Select the service role materialized on the next login.
    Set {
        group: String,
        profile: String,
        role: String,
    },
    Clear { group: String },
    /// Show recent selections, newest first.
    History { group: String },
}

#[tokio::main]
pub async fn run(args: &ServiceRoleArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let accounts = crate::config::Accounts::load().await?;

    match &args.command {
        ServiceRoleCommand::List { group, profile } => {
            let group = accounts.find(group)?;
            let orchestrator = crate::cmd::orchestrator(settings, &group.region).await?;
            for role in orchestrator.list_service_roles(group, profile).await? {
                println!("{role}");
            }
        }
        ServiceRoleCommand::Set {
            group,
            profile,
            role,
        } => {
            let group = accounts.find(group)?;
            let orchestrator = crate::cmd::orchestrator(settings, &group.region).await?;
            orchestrator.set_service_role(group, profile, role).await?;
            crate::terminal::banner(
                &format!("Service role for {}", group.name),
                &[
                    crate::selection::history_item(profile, role),
                    String::new(),
                    format!("Run `{} login {}` to apply", env!("CARGO_PKG_NAME"), group.name),
                ],
            )
            .await;
        }
        ServiceRoleCommand::Clear { group } => {
            let group = accounts.find(group)?;
            let orchestrator = crate::cmd::orchestrator(settings, &group.region).await?;
            orchestrator.clear_service_role(group).await?;
        }
        ServiceRoleCommand::History { group } => {
            let group = accounts.find(group)?;
            let orchestrator = crate::cmd::orchestrator(settings, &group.region).await?;
            let selection = orchestrator.service_selection(group).await?;
            for item in selection.history.iter() {
                println!("{item}");
            }
        }
    }
    Ok(())
}
