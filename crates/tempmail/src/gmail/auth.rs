//! Gmail OAuth2 token management
//!
//! The relay only ever refreshes tokens; it never starts an interactive
//! flow from the sync path. The one-time authorization code flow (local
//! callback server + browser) is exposed through [`GmailAuth::authorize`]
//! for the `relay authorize` subcommand.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::GmailCredentials;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

/// Stored token data
///
/// `access_token` is optional so a file holding only a refresh token
/// (as written by other OAuth tooling) is still usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(default)]
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl StoredToken {
    /// Access token still valid for at least five minutes
    fn fresh_access_token(&self) -> Option<&str> {
        let expires_at = self.expires_at?;
        let now = chrono::Utc::now().timestamp();
        if expires_at > now + 300 {
            self.access_token.as_deref()
        } else {
            None
        }
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: String,
}

impl GmailAuth {
    /// Gmail API OAuth2 endpoints
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// The relay only reads mail
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create a new GmailAuth instance
    ///
    /// # Arguments
    /// * `credentials` - OAuth2 client from Google Cloud Console
    /// * `token_path` - Where tokens are stored between runs
    pub fn new(credentials: GmailCredentials, token_path: impl Into<PathBuf>) -> Self {
        Self {
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            token_path: token_path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing it if needed
    ///
    /// Never prompts: if there is no refresh token the caller gets an
    /// error telling the operator to run `relay authorize`.
    pub fn access_token(&self, agent: &ureq::Agent) -> Result<String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow::anyhow!("Token cache lock poisoned"))?;

        if cached.is_none() {
            *cached = self.load_token().ok();
        }

        let Some(token) = cached.as_ref() else {
            anyhow::bail!(
                "No Gmail token at {}; run `relay authorize` first",
                self.token_path.display()
            );
        };

        if let Some(access_token) = token.fresh_access_token() {
            return Ok(access_token.to_string());
        }

        let refresh_token = token.refresh_token.clone().with_context(|| {
            format!(
                "Gmail token at {} has expired and has no refresh token; run `relay authorize`",
                self.token_path.display()
            )
        })?;

        let response = self.refresh_access_token(agent, &refresh_token)?;
        let stored = self.save_token_response(&response)?;
        let access_token = response.access_token;
        *cached = Some(stored);
        Ok(access_token)
    }

    /// Run the one-time authorization code flow and store the tokens
    pub fn authorize(&self, agent: &ureq::Agent) -> Result<()> {
        let token = self.authorization_code_auth(agent)?;
        let stored = self.save_token_response(&token)?;
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(stored);
        }
        Ok(())
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self, agent: &ureq::Agent) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        info!("Opening browser for Gmail authorization");
        info!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        info!("Waiting for authorization callback on port {}...", port);
        let code = self.wait_for_callback(listener)?;

        let mut response = agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        info!("Authorization successful");
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for OAuth callback and extract authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        // Format: GET /?code=AUTH_CODE&scope=... HTTP/1.1
        let code = callback_param(&request_line, "code");
        let error = callback_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authorization successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authorization failed. Please try again.")
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }

        code.context("No authorization code received")
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, agent: &ureq::Agent, refresh_token: &str) -> Result<TokenResponse> {
        let response = agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Preserve the refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    /// Load stored token from disk
    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        let token: StoredToken = serde_json::from_str(&content)?;
        Ok(token)
    }

    /// Save token response to disk
    fn save_token_response(&self, token: &TokenResponse) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: Some(token.access_token.clone()),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };

        config::save_json_file(&self.token_path, &stored)?;
        Ok(stored)
    }

    /// Check whether a token file with a refresh token is present
    pub fn is_authorized(&self) -> bool {
        self.load_token()
            .map(|t| t.refresh_token.is_some() || t.fresh_access_token().is_some())
            .unwrap_or(false)
    }
}

/// Extract a query parameter from an HTTP request line
fn callback_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key == name {
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}
