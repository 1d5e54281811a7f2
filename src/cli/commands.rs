//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use pulsewatch_client::{Method, Topic};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pulsewatch")]
#[command(about = "Talk to a Pulsewatch monitoring backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// REST API base URL
    #[arg(long, env = "PULSEWATCH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Live channel URL (defaults to the API host's /ws)
    #[arg(long, env = "PULSEWATCH_CHANNEL_URL", global = true)]
    pub channel_url: Option<String>,

    /// Credential file (defaults to the platform config directory)
    #[arg(long, env = "PULSEWATCH_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, env = "PULSEWATCH_REQUEST_TIMEOUT_SECS", global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the credential
    Login {
        #[arg(short, long, env = "PULSEWATCH_USERNAME")]
        username: String,

        #[arg(short, long, env = "PULSEWATCH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show the identity of the stored credential
    Whoami,

    /// Call an API endpoint and print the response envelope
    ///
    /// Examples:
    ///   pulsewatch call nodes
    ///   pulsewatch call nodes/7/restart -X post -d '{"force":true}'
    ///   pulsewatch call alerts -q status=open -q limit=20
    Call {
        /// Endpoint relative to the API URL
        endpoint: String,

        #[arg(short = 'X', long, value_enum, default_value_t = HttpMethod::Get)]
        method: HttpMethod,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter as key=value (can be repeated)
        #[arg(short, long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,

        /// Send the call without the stored credential
        #[arg(long)]
        no_auth: bool,
    },

    /// Stream live node updates until interrupted
    Watch {
        /// Also follow diagnostics for these topic ids (can be repeated)
        #[arg(long = "diagnostics")]
        diagnostics: Vec<String>,

        /// Request a full node snapshot once connected
        #[arg(long)]
        snapshot: bool,
    },

    /// Log out and forget the stored credential
    Logout,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
            HttpMethod::Put => Method::Put,
            HttpMethod::Patch => Method::Patch,
            HttpMethod::Delete => Method::Delete,
        }
    }
}

impl Commands {
    /// Topics followed by `watch`
    pub fn watch_topics(diagnostics: &[String]) -> Vec<Topic> {
        std::iter::once(Topic::Nodes)
            .chain(diagnostics.iter().map(Topic::diagnostics))
            .collect()
    }
}

fn parse_query_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid query parameter: {}. Expected key=value", s)),
    }
}
