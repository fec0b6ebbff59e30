#[derive(clap::Args)]
pub struct SetAccessKeyArgs {
    /// Section to store the key under (`access-key*`); defaults to `default_access_key`.
    pub name: Option<String>,

    #[arg(long, env = "AWSPROF_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// Store the key without checking it against STS.
    #[arg(long, default_value_t = false)]
    pub no_verify: bool,
}

#[tokio::main]
pub async fn run(args: &SetAccessKeyArgs) -> Result<(), anyhow::Error> {
    let settings = crate::config::Settings::load().await?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| settings.default_access_key.clone());
    if crate::naming::classify(&name) != crate::naming::SectionKind::AccessKey {
        return Err(crate::Error::UserError(format!(
            "'{name}' must start with '{}'",
            crate::naming::ACCESS_KEY_PREFIX
        ))
        .into());
    }

    let access_key_id = match args.access_key_id.clone() {
        Some(id) => id,
        None => crate::terminal::prompt("Access key ID", false).await?,
    };
    let secret = zeroize::Zeroizing::new(match std::env::var("AWSPROF_SECRET_ACCESS_KEY") {
        Ok(s) => s,
        Err(_) => crate::terminal::prompt("Secret access key", true).await?,
    });
    if access_key_id.is_empty() || secret.is_empty() {
        return Err(
            crate::Error::UserError("access key ID and secret are required".to_owned()).into(),
        );
    }
    let key = crate::gateway::Credentials::new(access_key_id, secret.as_str(), None);

    let stores = crate::store::StorePaths::resolve(&settings);
    if !args.no_verify {
        use crate::gateway::IdentityGateway;
        let gateway = crate::aws_gateway::AwsGateway::new(
            crate::cmd::FALLBACK_REGION,
            stores.clone(),
            crate::cmd::runner(),
            settings.sso_login_timeout(),
        );
        let identity = gateway
            .verify_identity(
                &crate::gateway::Source::Static(key.clone()),
                crate::gateway::VERIFY_TIMEOUT,
                crate::gateway::VERIFY_MAX_RETRIES,
            )
            .await
            .map_err(crate::Error::from)?;
        tracing::info!(arn = %identity.arn, "access key verified");
    }

    let replacing = stores
        .has_entry(crate::store::StoreKind::Credentials, &name)
        .await?;
    let mut store = crate::store::CredentialsStore::load(&stores.credentials).await?;
    store.upsert(&name, &key);
    // The stored session belongs to the replaced key.
    store.remove(&crate::naming::session_token_name(&name));
    store.save().await?;

    crate::terminal::banner(
        &format!("{} {name}", if replacing { "Replaced" } else { "Stored" }),
        &[format!("Key: {}", key.access_key_id)],
    )
    .await;
    Ok(())
}
