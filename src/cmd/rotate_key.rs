#[derive(clap::Args)]
pub struct RotateKeyArgs {
    /// Group whose access key is rotated.
    pub group: String,

    /// One-time code from the MFA device.
    #[arg(long, env = "AWSPROF_MFA_CODE")]
    pub mfa_code: Option<String>,
}

#[tokio::main]
pub async fn run(args: &RotateKeyArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let accounts = crate::config::Accounts::load().await?;
    let group = accounts.find(&args.group)?.clone();
    let mut orchestrator = crate::cmd::orchestrator(settings.clone(), &group.region).await?;

    let mut outcome = orchestrator
        .rotate_key(&group, args.mfa_code.as_deref())
        .await;
    let renew = match (&outcome, args.mfa_code.as_ref()) {
        (Ok(crate::Outcome::Soft(crate::SoftFailure::MfaRequired { access_key })), None) => {
            Some(access_key.clone())
        }
        _ => None,
    };
    if let Some(access_key) = renew {
        if let Some(code) = crate::cmd::obtain_mfa_code(&settings, &access_key, true).await? {
            outcome = orchestrator.rotate_key(&group, Some(&code)).await;
        }
    }

    match outcome {
        Ok(crate::Outcome::Done(report)) => {
            crate::terminal::banner(
                &format!("Rotated {}", report.access_key),
                &[
                    format!("New key: {}", report.new_key_id),
                    format!("Deleted: {}", report.old_key_id),
                    String::new(),
                    format!("Run `{} login {}` to continue", env!("CARGO_PKG_NAME"), group.name),
                ],
            )
            .await;
            Ok(())
        }
        Ok(crate::Outcome::Soft(reason)) => {
            crate::cmd::report_soft_failure(&reason).await;
            Err(crate::Error::FailureButSilentlyExit.into())
        }
        Err(crate::Error::PartialRotation {
            new_key_id,
            old_key_id,
            message,
        }) => {
            crate::terminal::banner(
                "Key rotation is incomplete",
                &[
                    format!("New key {new_key_id} is stored and active"),
                    format!("Old key {old_key_id} could not be deleted: {message}"),
                    String::new(),
                    "Delete the old key in the IAM console".to_owned(),
                ],
            )
            .await;
            Err(crate::Error::FailureButSilentlyExit.into())
        }
        Err(e) => Err(e.into()),
    }
}
