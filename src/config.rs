use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use chrono::DateTime;
use console::Emoji;

const LOCK: Emoji = Emoji("🔒 ", "");

pub const DEFAULT_STATE_DIR: &str = ".topoctl";

const DEFAULT_API_HOST: &str = if cfg!(debug_assertions) {
    "http://localhost:8080"
} else {
    "https://api.topoctl.dev"
};

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiToken {
    token: String,
    pub saved_at: DateTime<chrono::Utc>,
}

impl ApiToken {
    fn keyring_credential() -> Result<keyring::Entry> {
        Ok(keyring::Entry::new("topoctl", "api_token")?)
    }

    fn init() -> Option<Self> {
        ApiToken::keyring_credential().ok().and_then(|entry| {
            entry
                .get_password()
                .ok()
                .and_then(|password| serde_json::from_str(&password).ok())
        })
    }

    fn save(&self) -> Result<()> {
        let serialized = serde_json::to_string(self)?;
        ApiToken::keyring_credential()?.set_password(&serialized)?;
        log::debug!("API token saved to keyring");
        Ok(())
    }

    fn delete() -> Result<()> {
        ApiToken::keyring_credential()?.delete_credential()?;
        log::debug!("API token deleted from keyring");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Remote,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ProviderKind::Local),
            "remote" => Ok(ProviderKind::Remote),
            other => Err(anyhow::anyhow!(
                "Unknown provider '{other}'. Expected 'local' or 'remote'"
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Remote => write!(f, "remote"),
        }
    }
}

pub struct CliConfig {
    api_host: String,
    use_https: bool,
    provider: ProviderKind,
    region: Option<String>,
    root: PathBuf,
    state_dir: PathBuf,

    api_token: Option<ApiToken>,
}

impl CliConfig {
    pub fn init() -> Result<Self> {
        let mut api_host =
            std::env::var("TOPOCTL_API_HOST").unwrap_or_else(|_| DEFAULT_API_HOST.to_string());
        let mut use_https = true;
        if api_host.starts_with("http://") {
            api_host = api_host.trim_start_matches("http://").to_string();
            use_https = false;
        } else if api_host.starts_with("https://") {
            api_host = api_host.trim_start_matches("https://").to_string();
            use_https = true;
        }
        log::debug!("Using API host: {api_host}");

        let provider = match std::env::var("TOPOCTL_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => ProviderKind::Local,
        };

        Ok(CliConfig {
            api_host,
            use_https,
            provider,
            region: std::env::var("TOPOCTL_REGION").ok(),
            root: PathBuf::from("."),
            state_dir: std::env::var("TOPOCTL_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR)),
            api_token: ApiToken::init(),
        })
    }

    /// Configuration rooted at `root` with no environment or keyring input.
    pub fn local(root: &Path) -> Self {
        CliConfig {
            api_host: "localhost:8080".to_string(),
            use_https: false,
            provider: ProviderKind::Local,
            region: None,
            root: root.to_path_buf(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            api_token: None,
        }
    }

    pub fn set_root(&mut self, root: &Path) {
        self.root = root.to_path_buf();
    }

    /// Directory holding the descriptor.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding state and the local cloud, relative to the root unless absolute.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.state_dir)
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// `TOPOCTL_REGION` wins over the region declared in the descriptor.
    pub fn region<'a>(&'a self, declared: &'a str) -> &'a str {
        self.region.as_deref().unwrap_or(declared)
    }

    pub fn url(&self, path: &str) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.api_host, path)
    }

    pub fn token(&self) -> Result<&str> {
        let program = std::env::args().next().unwrap_or("<program>".to_string());
        let login_command = console::style(format!("{program} login")).bold();
        self.api_token
            .as_ref()
            .map(|t| t.token.as_str())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{}No API token found. Please log in with {}.",
                    LOCK,
                    login_command
                )
            })
    }

    pub fn api_token(&self) -> Option<&ApiToken> {
        self.api_token.as_ref()
    }

    pub fn save_token(&mut self, token: String) -> Result<()> {
        let api_token = ApiToken {
            token,
            saved_at: chrono::Utc::now(),
        };
        api_token.save()?;
        self.api_token = Some(api_token);
        Ok(())
    }

    pub fn clear_token(&mut self) -> Result<()> {
        if self.api_token.take().is_some() {
            ApiToken::delete()?;
        }
        Ok(())
    }
}
