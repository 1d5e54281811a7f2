//! Pulsewatch CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{bail, Context, Result};
use clap::Parser;
use pulsewatch_client::{
    ApiClient, ClientConfig, ConnectionManager, ConnectionState, CredentialStore,
    FileCredentialStore, RequestOptions,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let store = open_store(cli.store.clone())?;

    // Only commands that talk to the backend need its URL
    let config = || build_config(cli.api_url.clone(), cli.channel_url.clone(), cli.timeout);

    match cli.command {
        Commands::Login { username, password } => {
            login(config()?, store, &username, &password).await
        }
        Commands::Whoami => whoami(store),
        Commands::Call {
            endpoint,
            method,
            data,
            query,
            no_auth,
        } => {
            let body = data
                .map(|d| serde_json::from_str::<Value>(&d))
                .transpose()
                .context("Request body is not valid JSON")?;
            let options = RequestOptions {
                method: method.into(),
                body,
                headers: Vec::new(),
                query,
            };
            call(config()?, store, &endpoint, options, !no_auth).await
        }
        Commands::Watch {
            diagnostics,
            snapshot,
        } => watch(config()?, store, &diagnostics, snapshot).await,
        Commands::Logout => logout(config()?, store).await,
    }
}

fn open_store(path: Option<PathBuf>) -> Result<Arc<dyn CredentialStore>> {
    let path = match path {
        Some(path) => path,
        None => FileCredentialStore::default_location()
            .context("No config directory; pass --store")?,
    };
    let store = FileCredentialStore::open(&path)
        .with_context(|| format!("Failed to open credential store: {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_config(
    api_url: Option<String>,
    channel_url: Option<String>,
    timeout: Option<u64>,
) -> Result<ClientConfig> {
    let Some(api_url) = api_url else {
        bail!("PULSEWATCH_API_URL or --api-url required");
    };

    let mut config = match channel_url {
        Some(channel_url) => ClientConfig::new(api_url, channel_url),
        None => ClientConfig::for_api_url(api_url),
    };
    if let Some(secs) = timeout {
        config = config.request_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

async fn login(
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    username: &str,
    password: &str,
) -> Result<()> {
    let client = ApiClient::new(config, store)?;
    client
        .login(username, password)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Login failed")?;

    match client.session() {
        Some(session) => println!(
            "Logged in as {} ({})",
            session.user_id.as_deref().unwrap_or(username),
            session.role.as_deref().unwrap_or("no role")
        ),
        None => println!("Logged in as {}", username),
    }
    Ok(())
}

fn whoami(store: Arc<dyn CredentialStore>) -> Result<()> {
    let Some(credential) = store.get() else {
        bail!("Not logged in");
    };
    let Some(session) = credential.session() else {
        bail!("Stored credential cannot be decoded; log in again");
    };

    println!("User:    {}", session.user_id.as_deref().unwrap_or("(unknown)"));
    println!("Role:    {}", session.role.as_deref().unwrap_or("(none)"));
    println!("Admin:   {}", session.is_admin());
    println!("Expired: {}", credential.is_expired());
    Ok(())
}

async fn call(
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    endpoint: &str,
    options: RequestOptions,
    requires_auth: bool,
) -> Result<()> {
    let client = ApiClient::new(config, store)?;
    let envelope = client
        .call::<Value>(endpoint, options, requires_auth)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .with_context(|| format!("Call to {} failed", endpoint))?;

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if !envelope.success {
        bail!(
            "Server reported failure: {}",
            envelope.failure_text().unwrap_or("no details")
        );
    }
    Ok(())
}

async fn watch(
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    diagnostics: &[String],
    snapshot: bool,
) -> Result<()> {
    let manager = ConnectionManager::new(config, store);

    manager.on_status_change(|connected| {
        if connected {
            info!("Channel connected");
        } else {
            warn!("Channel lost");
        }
    });
    manager.on_error(|e| warn!("Channel error: {}", e));

    for topic in Commands::watch_topics(diagnostics) {
        let label = topic.to_string();
        manager.subscribe(topic, move |event, payload| {
            println!("[{}] {} {}", label, event, payload);
        });
    }

    if !manager.connect() {
        bail!("Not logged in; run `pulsewatch login` first");
    }

    let mut state = manager.state_receiver();
    let mut snapshot_pending = snapshot;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing channel");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Connected if snapshot_pending => {
                        snapshot_pending = false;
                        if let Err(e) = manager.request_realtime_nodes() {
                            warn!("Snapshot request failed: {}", e);
                        }
                    }
                    ConnectionState::Failed => {
                        manager.disconnect();
                        bail!("Channel gave up reconnecting");
                    }
                    _ => {}
                }
            }
        }
    }

    manager.disconnect();
    Ok(())
}

async fn logout(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<()> {
    let client = ApiClient::new(config, store)?;
    client.logout().await?;
    println!("Logged out");
    Ok(())
}
