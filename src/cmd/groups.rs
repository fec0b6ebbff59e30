#[derive(clap::Args)]
pub struct GroupsArgs {
    /// Print the groups as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, serde::Serialize)]
struct GroupSummary<'a> {
    name: &'a str,
    team: &'a str,
    region: &'a str,
    color: &'a str,
    auth_mode: Option<crate::profile::AuthMode>,
    cloud: crate::profile::CloudType,
    profiles: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
pub async fn run(args: &GroupsArgs) -> Result<(), anyhow::Error> {
    let accounts = crate::config::Accounts::load().await?;
    let summaries: Vec<GroupSummary> = accounts
        .groups
        .iter()
        .map(|g| GroupSummary {
            name: &g.name,
            team: &g.team,
            region: &g.region,
            color: &g.color,
            auth_mode: g.auth_mode,
            cloud: g.cloud,
            profiles: g.profiles.iter().map(|p| p.name.as_str()).collect(),
            error: g.validate().err().map(|e| e.to_string()),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for s in summaries.iter() {
            let auth = s
                .auth_mode
                .map(|m| format!("{m:?}").to_lowercase())
                .unwrap_or_else(|| "-".to_owned());
            println!(
                "{} [{}] team={} region={} auth={} profiles={}",
                s.name,
                format!("{:?}", s.cloud).to_lowercase(),
                s.team,
                s.region,
                auth,
                s.profiles.join(",")
            );
            if let Some(e) = s.error.as_deref() {
                println!("  ! {e}");
            }
        }
    }

    if summaries.iter().any(|s| s.error.is_some()) {
        return Err(crate::Error::SilentlyExitWithCode(std::process::ExitCode::from(2)).into());
    }
    Ok(())
}
