use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Config file looked up in the working directory when none is given.
const DEFAULT_CONFIG_NAME: &str = "agent-chat";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Backend base URL
    #[arg(long, env = "BACKEND_URL")]
    pub base_url: Option<String>,

    /// User identifier embedded in the conversation URL
    #[arg(long)]
    pub user_id: Option<String>,

    /// Client identifier sent with every request
    #[arg(long)]
    pub client_id: Option<String>,

    /// Log filter directive (e.g. `info`, `agent_chat_client=debug`)
    #[arg(long, env = "LOG_FILTER")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Fresh UUID per run when absent.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// First assistant message; empty disables it.
    pub greeting: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub filter: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("backend.base_url", "http://127.0.0.1:8080")?
            .set_default("backend.connect_timeout_secs", 10)?
            .set_default("client.greeting", "Hi! How can I help you today?")?
            .set_default("log.filter", "info")?;

        // Explicit file must exist; the working-directory fallback is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        // E.g. CHAT_BACKEND__BASE_URL=http://10.0.0.2:8080
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Priority: CLI Flag > CLI Env Var > CHAT_ env > Config File > Defaults.
        if let Some(url) = cli.base_url {
            builder = builder.set_override("backend.base_url", url)?;
        }
        if let Some(user_id) = cli.user_id {
            builder = builder.set_override("client.user_id", user_id)?;
        }
        if let Some(client_id) = cli.client_id {
            builder = builder.set_override("client.client_id", client_id)?;
        }
        if let Some(filter) = cli.log_filter {
            builder = builder.set_override("log.filter", filter)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
