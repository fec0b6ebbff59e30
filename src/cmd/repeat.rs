#[derive(clap::Args)]
pub struct RepeatArgs {
    /// Group name in accounts.yaml.
    pub group: String,

    /// Minutes between logins; defaults to `repeat_interval_minutes`.
    #[arg(long)]
    pub interval_minutes: Option<u64>,

    /// Skip the group's post-login script on every login.
    #[arg(long, default_value_t = false)]
    pub no_script: bool,

    /// Enable logging to file ($XDG_STATE_HOME/awsprof/log/*).
    #[arg(long, default_value_t = false)]
    pub log_to_file: bool,
}

/// Logs in now, then again every interval until interrupted. SIGUSR1 pauses the timer and
/// SIGUSR2 resumes it.
#[tokio::main]
pub async fn run(args: &RepeatArgs) -> Result<(), anyhow::Error> {
    use futures::FutureExt;
    use tokio::signal::unix::{signal, SignalKind};

    let settings = crate::config::Settings::load().await?;
    let accounts = crate::config::Accounts::load().await?;
    let group = accounts.find(&args.group)?.clone();
    let interval = match args.interval_minutes {
        Some(m) => std::time::Duration::from_secs(m * 60),
        None => settings.repeat_interval(),
    };
    if interval.is_zero() {
        return Err(crate::Error::UserError("interval must be at least a minute".to_owned()).into());
    }

    let mut request = crate::orchestrator::LoginRequest::new(group, &settings);
    request.run_script = settings.run_script && !args.no_script;
    let orchestrator = std::sync::Arc::new(tokio::sync::Mutex::new(
        crate::cmd::orchestrator(settings, &request.group.region).await?,
    ));

    {
        let mut o = orchestrator.lock().await;
        match crate::cmd::login::login(&mut o, request.clone(), true).await? {
            crate::Outcome::Done(report) => crate::cmd::login::print_report(&report).await,
            crate::Outcome::Soft(reason) => {
                crate::cmd::report_soft_failure(&reason).await;
                return Err(crate::Error::FailureButSilentlyExit.into());
            }
        }
    }

    let scheduler = crate::scheduler::RepeatScheduler::new();
    let job: crate::scheduler::Job = {
        let orchestrator = orchestrator.clone();
        std::sync::Arc::new(move || {
            let orchestrator = orchestrator.clone();
            let request = request.clone();
            async move {
                let mut o = orchestrator.lock().await;
                match crate::cmd::login::login(&mut o, request, false).await {
                    Ok(crate::Outcome::Done(report)) => {
                        tracing::info!(group = %report.group, "repeated login succeeded")
                    }
                    Ok(crate::Outcome::Soft(reason)) => {
                        tracing::warn!(reason = %reason, "repeated login needs user action")
                    }
                    Err(e) => tracing::error!(err = ?e, "repeated login failed"),
                }
            }
            .boxed()
        })
    };
    scheduler.start(interval, job);
    let wake = crate::scheduler::WakeDetector::default().spawn(scheduler.clone());

    crate::terminal::banner(
        "Repeating login",
        &[
            format!("Every {} minutes", interval.as_secs() / 60),
            "Ctrl-C to stop, SIGUSR1 to pause, SIGUSR2 to resume".to_owned(),
        ],
    )
    .await;

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r?;
                break;
            }
            _ = usr1.recv() => {
                if let Some(remaining) = scheduler.pause() {
                    tracing::info!(remaining = ?remaining, "paused");
                }
            }
            _ = usr2.recv() => {
                scheduler.resume();
                tracing::info!(remaining = ?scheduler.remaining(), "resumed");
            }
        }
    }

    scheduler.cancel();
    wake.abort();
    tracing::info!("repeat stopped");
    Ok(())
}
