#[derive(clap::Args)]
pub struct LoginArgs {
    /// Group name in accounts.yaml.
    pub group: String,

    /// One-time code from the MFA device.
    #[arg(long, env = "AWSPROF_MFA_CODE")]
    pub mfa_code: Option<String>,

    /// Region written to every profile instead of the group's region.
    #[arg(long)]
    pub region: Option<String>,

    /// Skip the group's post-login script.
    #[arg(long, default_value_t = false)]
    pub no_script: bool,

    /// Materialize SSO groups as static credentials.
    #[arg(long = "static", default_value_t = false)]
    pub force_static: bool,
}

#[tokio::main]
pub async fn run(args: &LoginArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let accounts = crate::config::Accounts::load().await?;
    let group = accounts.find(&args.group)?.clone();

    let mut request = crate::orchestrator::LoginRequest::new(group, &settings);
    request.mode =
        crate::orchestrator::LoginMode::for_group(&request.group, &settings, args.force_static);
    request.mfa_code = args.mfa_code.clone();
    request.region_override = args.region.clone();
    request.run_script = settings.run_script && !args.no_script;

    let mut orchestrator = crate::cmd::orchestrator(settings, &request.group.region).await?;
    match login(&mut orchestrator, request, true).await? {
        crate::Outcome::Done(report) => {
            print_report(&report).await;
            Ok(())
        }
        crate::Outcome::Soft(reason) => {
            crate::cmd::report_soft_failure(&reason).await;
            Err(crate::Error::FailureButSilentlyExit.into())
        }
    }
}

/// Logs in, fetching an MFA code and retrying once when the session needs renewal.
pub async fn login(
    orchestrator: &mut crate::orchestrator::Orchestrator,
    mut request: crate::orchestrator::LoginRequest,
    interactive: bool,
) -> Result<crate::Outcome<crate::orchestrator::LoginReport>, anyhow::Error> {
    let outcome = orchestrator.login(&request).await?;
    let access_key = match (&outcome, request.mfa_code.as_ref()) {
        (crate::Outcome::Soft(crate::SoftFailure::MfaRequired { access_key }), None) => {
            access_key.clone()
        }
        _ => return Ok(outcome),
    };
    let settings = orchestrator.context().settings.clone();
    let Some(code) = crate::cmd::obtain_mfa_code(&settings, &access_key, interactive).await? else {
        return Ok(outcome);
    };
    request.mfa_code = Some(code);
    Ok(orchestrator.login(&request).await?)
}

pub(crate) async fn print_report(report: &crate::orchestrator::LoginReport) {
    let mut lines = vec![
        format!("Mode: {:?}", report.mode),
        format!("Region: {}", report.region),
    ];
    if !report.profiles.is_empty() {
        lines.push(format!("Profiles: {}", report.profiles.join(", ")));
    }
    if !report.removed.is_empty() {
        lines.push(format!("Removed: {}", report.removed.join(", ")));
    }
    if let Some(out) = report.script_output.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(String::new());
        lines.extend(out.lines().map(str::to_owned));
    }
    crate::terminal::banner(&format!("Logged in to {}", report.group), &lines).await;
}
