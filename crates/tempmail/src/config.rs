//! Configuration loading for the relay
//!
//! OAuth client credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format) in the config directory
//! 3. Runtime environment variables (fallback)
//!
//! Service settings come from `relay.json` in the config directory, with
//! every field optional, and a couple of environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Service settings filename in the config directory
const SERVICE_FILE: &str = "relay.json";

/// Watermark document under the data directory
pub const STATE_FILE: &str = "state.json";
/// Address pool under the data directory
pub const POOL_FILE: &str = "emails.json";
/// OAuth tokens under the data directory
pub const TOKEN_FILE: &str = "gmail-tokens.json";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. JSON file (~/.config/tempmail/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Runtime settings for the relay service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Interface to bind the HTTP server to
    pub host: String,
    pub port: u16,
    /// Directory holding state.json, emails.json and gmail-tokens.json;
    /// defaults to the config directory
    pub data_dir: Option<PathBuf>,
    /// Only sync history for messages carrying this label
    pub label_filter: Option<String>,
    /// Upper bound for each Gmail API request
    pub request_timeout_secs: u64,
    /// Attempts per Gmail request for transient failures
    pub fetch_retries: u32,
    /// Pub/Sub topic used by `relay watch`
    pub watch_topic: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            data_dir: None,
            label_filter: Some("INBOX".to_string()),
            request_timeout_secs: 15,
            fetch_retries: 3,
            watch_topic: None,
        }
    }
}

impl ServiceConfig {
    /// Load `relay.json` if present, then apply environment overrides
    /// (`PORT`, `RELAY_HOST`)
    pub fn load() -> Result<Self> {
        let base = if config::config_exists(SERVICE_FILE) {
            config::load_json(SERVICE_FILE)?
        } else {
            Self::default()
        };

        base.with_overrides(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("RELAY_HOST").ok().as_deref(),
        )
    }

    /// Apply port/host overrides given as raw strings
    pub fn with_overrides(mut self, port: Option<&str>, host: Option<&str>) -> Result<Self> {
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid port: {}", port))?;
        }
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.host = host.to_string();
        }
        Ok(self)
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config::config_dir().context("Could not determine config directory"),
        }
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(STATE_FILE))
    }

    pub fn pool_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(POOL_FILE))
    }

    pub fn token_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(TOKEN_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
