#[derive(clap::Parser)]
#[clap(author, version, long_about = None)]
#[clap(about = "Declarative AWS profiles: MFA sessions, role chains and a tidy credentials file")]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in to a group, materializing all of its profiles.
    Login(awsprof::cmd::login::LoginArgs),
    /// Remove every managed profile.
    Logout(awsprof::cmd::logout::LogoutArgs),
    /// Replace the group's long-lived access key.
    RotateKey(awsprof::cmd::rotate_key::RotateKeyArgs),
    /// Store a long-lived access key.
    SetAccessKey(awsprof::cmd::set_access_key::SetAccessKeyArgs),
    /// List and validate the configured groups.
    Groups(awsprof::cmd::groups::GroupsArgs),
    Status(awsprof::cmd::status::StatusArgs),
    ServiceRole(awsprof::cmd::service_role::ServiceRoleArgs),
    /// Keep a group logged in by logging in again periodically.
    Repeat(awsprof::cmd::repeat::RepeatArgs),
}

fn main() -> Result<std::process::ExitCode, anyhow::Error> {
    use clap::Parser;
    let cli = Cli::parse();

    let log_to_file = matches!(&cli.command, Commands::Repeat(a) if a.log_to_file);
    let _guard = enable_tracing(log_to_file);
    let retval = match &cli.command {
        Commands::Login(args) => awsprof::cmd::login::run(args),
        Commands::Logout(args) => awsprof::cmd::logout::run(args),
        Commands::RotateKey(args) => awsprof::cmd::rotate_key::run(args),
        Commands::SetAccessKey(args) => awsprof::cmd::set_access_key::run(args),
        Commands::Groups(args) => awsprof::cmd::groups::run(args),
        Commands::Status(args) => awsprof::cmd::status::run(args),
        Commands::ServiceRole(args) => awsprof::cmd::service_role::run(args),
        Commands::Repeat(args) => awsprof::cmd::repeat::run(args),
    };
    match retval {
        Ok(_) => Ok(std::process::ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<awsprof::Error>() {
            Some(awsprof::Error::FailureButSilentlyExit) => Ok(std::process::ExitCode::FAILURE),
            Some(awsprof::Error::SilentlyExitWithCode(c)) => Ok(*c),
            _ => Err(e),
        },
    }
}

fn enable_tracing(log_to_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if let Ok(l) = std::env::var("AWSPROF_LOG") {
        std::env::set_var("RUST_LOG", l);
    }
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "awsprof=info");
    }

    if log_to_file {
        match awsprof::config::log_dir_mkpath() {
            Ok(dir) => {
                let appender = tracing_appender::rolling::daily(dir, "awsprof.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::fmt()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .init();
                return Some(guard);
            }
            Err(e) => eprintln!("Failed to create log directory, logging to stderr: {e}"),
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    None
}
