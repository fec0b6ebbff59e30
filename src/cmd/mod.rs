pub mod groups;
pub mod login;
pub mod logout;
pub mod repeat;
pub mod rotate_key;
pub mod service_role;
pub mod set_access_key;
pub mod status;

/// STS is global; any region works when a group does not name one.
const FALLBACK_REGION: &str = "us-east-1";

const MFA_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

pub(crate) fn runner() -> std::sync::Arc<dyn crate::command::CommandRunner> {
    std::sync::Arc::new(crate::command::ShellRunner {
        inherit_stderr: true,
    })
}

pub(crate) async fn orchestrator(
    settings: crate::config::Settings,
    region: &str,
) -> crate::Result<crate::orchestrator::Orchestrator> {
    let ctx = crate::orchestrator::LoginContext::load(settings).await?;
    let runner = runner();
    let region = if region.is_empty() {
        FALLBACK_REGION
    } else {
        region
    };
    let gateway = crate::aws_gateway::AwsGateway::new(
        region,
        ctx.stores.clone(),
        runner.clone(),
        ctx.settings.sso_login_timeout(),
    );
    Ok(crate::orchestrator::Orchestrator::new(
        std::sync::Arc::new(gateway),
        runner,
        ctx,
    ))
}

/// Gets an MFA code from `mfa_command` when configured, otherwise from the user when
/// `interactive`.
pub(crate) async fn obtain_mfa_code(
    settings: &crate::config::Settings,
    access_key: &str,
    interactive: bool,
) -> Result<Option<String>, anyhow::Error> {
    if let Some(command) = settings.mfa_command.as_deref() {
        tracing::debug!(command = %command, "fetching MFA code");
        let output = runner().run_shell(command, MFA_COMMAND_TIMEOUT).await?;
        if !output.success() {
            anyhow::bail!("mfa_command exited with {:?}", output.code);
        }
        let code = output.stdout.trim().to_owned();
        crate::orchestrator::validate_mfa_code(&code)?;
        return Ok(Some(code));
    }
    if !interactive {
        return Ok(None);
    }
    let code = crate::terminal::prompt(&format!("MFA code for {access_key}"), false).await?;
    Ok(Some(code))
}

pub(crate) async fn report_soft_failure(reason: &crate::SoftFailure) {
    let product = env!("CARGO_PKG_NAME");
    let hint = match reason {
        crate::SoftFailure::MfaRequired { .. } => {
            "Pass --mfa-code, or set mfa_command in settings.yaml"
        }
        crate::SoftFailure::SessionMissing { .. } => {
            "Complete the SSO sign-in in your browser, then retry"
        }
    };
    crate::terminal::send(&indoc::formatdoc! {"
        :: {product} :: Not logged in ::::::::
        :: {product} ::
        :: {product} :: {reason}
        :: {product} :: {hint}
        :: {product} ::
    "})
    .await;
}
