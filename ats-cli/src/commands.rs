//! Subcommand implementations.

use anyhow::{Context, Result, bail};
use ats_core::{
    ApiError, AtsClient, Config, LoginCredentials, RegisterData, SessionState, TokenStore,
};
use serde_json::Value;

fn open_client(config: &Config) -> Result<AtsClient> {
    let path = config
        .credentials_path()
        .context("Failed to locate credentials file")?;
    let store = TokenStore::with_file(&path)
        .with_context(|| format!("Failed to open credentials at {}", path.display()))?;
    AtsClient::new(&config.client, store).context("Failed to build HTTP client")
}

/// Restore the session or explain why there is none
async fn restore(client: &AtsClient) -> Result<SessionState> {
    let state = client.session().initialize().await;
    if !state.is_authenticated() {
        bail!("Not logged in. Run `ats login` first.");
    }
    Ok(state)
}

fn print_signed_in(state: &SessionState) {
    if let Some(identity) = &state.identity {
        let name = identity.name.as_deref().unwrap_or(&identity.email);
        match &state.organization {
            Some(org) => println!("Logged in as {} <{}> at {}", name, identity.email, org.name),
            None => println!("Logged in as {} <{}>", name, identity.email),
        }
    }
}

/// Terminal errors get a hint on how to recover
fn explain(e: ApiError) -> anyhow::Error {
    if e.is_terminal() {
        anyhow::anyhow!("{}. Session expired, run `ats login` again.", e.user_message())
    } else {
        anyhow::anyhow!(e.user_message())
    }
}

pub async fn login(config: &Config, email: String, password: String) -> Result<()> {
    let client = open_client(config)?;
    let state = client
        .session()
        .login(&LoginCredentials { email, password })
        .await
        .map_err(explain)?;
    print_signed_in(&state);
    Ok(())
}

pub async fn register(
    config: &Config,
    email: String,
    password: String,
    name: String,
    organization_name: String,
) -> Result<()> {
    let client = open_client(config)?;
    let data = RegisterData {
        email,
        password,
        name,
        organization_name,
    };
    let state = client.session().register(&data).await.map_err(explain)?;
    print_signed_in(&state);
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    let client = open_client(config)?;
    client.session().logout().await;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(config: &Config, remote: bool) -> Result<()> {
    let client = open_client(config)?;
    let state = restore(&client).await?;

    if remote {
        let user = client.me().await.map_err(explain)?;
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    let Some(identity) = state.identity else {
        bail!("Session has no identity");
    };
    println!("user:         {}", identity.user_id);
    println!("email:        {}", identity.email);
    println!("role:         {:?}", identity.role);
    println!("organization: {}", identity.organization_id);
    if let Some(org) = state.organization {
        println!("              {} ({})", org.name, org.slug);
    }
    Ok(())
}

pub async fn get(config: &Config, path: &str) -> Result<()> {
    let client = open_client(config)?;
    restore(&client).await?;

    let body: Value = client.get(path).await.map_err(explain)?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub fn config_path() -> Result<()> {
    println!("{}", Config::config_path()?.display());
    Ok(())
}

pub fn config_show(config: &Config) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

pub fn config_init() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    Config::default().save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
