//! Configuration module for the Graph backend and server settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `MAIL_FORWARD_<KEY>`. Every key has a default, so an empty environment yields
//! a server bound to localhost that talks to the public Graph endpoint.

use std::env;
use std::env::VarError;
use std::net::SocketAddr;

use crate::criteria::ResolutionPolicy;
use crate::errors::{AppError, AppResult};

/// Default Graph REST root
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Server-wide configuration
///
/// Immutable after startup. Shared with request handlers via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Graph REST root, without trailing slash
    pub graph_base_url: String,
    /// Mailbox owner: `me` or a user principal name
    pub mailbox: String,
    /// Folder id or well-known name the original is moved to after sending
    pub archive_folder: String,
    /// Which discriminating fields the resolver uses
    pub policy: ResolutionPolicy,
    /// Fallback-to-search value applied when a request omits the flag
    pub fallback_default: bool,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for each backend call in milliseconds
    pub request_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set to a malformed value.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_FORWARD_BIND_ADDR=0.0.0.0:7071
    /// MAIL_FORWARD_MAILBOX=shared-inbox@contoso.com
    /// MAIL_FORWARD_ARCHIVE_FOLDER=archive
    /// MAIL_FORWARD_RESOLVER_STRATEGY=subject_time
    /// MAIL_FORWARD_FALLBACK_DEFAULT=true
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let graph_base_url = optional_env("MAIL_FORWARD_GRAPH_BASE_URL", DEFAULT_GRAPH_BASE_URL)?;
        validate_base_url(&graph_base_url)?;

        let strategy = optional_env("MAIL_FORWARD_RESOLVER_STRATEGY", "standard")?;
        let policy = ResolutionPolicy::from_name(&strategy).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid MAIL_FORWARD_RESOLVER_STRATEGY '{strategy}'; expected one of standard, subject, subject_time, subject_snippet"
            ))
        })?;

        Ok(Self {
            bind_addr: parse_socket_addr_env("MAIL_FORWARD_BIND_ADDR", "127.0.0.1:7071")?,
            graph_base_url: graph_base_url.trim_end_matches('/').to_owned(),
            mailbox: optional_env("MAIL_FORWARD_MAILBOX", "me")?,
            archive_folder: optional_env("MAIL_FORWARD_ARCHIVE_FOLDER", "deleteditems")?,
            policy,
            fallback_default: parse_bool_env("MAIL_FORWARD_FALLBACK_DEFAULT", false)?,
            connect_timeout_ms: parse_u64_env("MAIL_FORWARD_CONNECT_TIMEOUT_MS", 10_000)?,
            request_timeout_ms: parse_u64_env("MAIL_FORWARD_REQUEST_TIMEOUT_MS", 30_000)?,
        })
    }

    /// Graph path segment addressing the configured mailbox
    ///
    /// `me` stays as-is; anything else becomes `users/{upn}` with the UPN
    /// percent-encoded.
    pub fn mailbox_path(&self) -> String {
        if self.mailbox.eq_ignore_ascii_case("me") {
            "me".to_owned()
        } else {
            format!("users/{}", urlencoding::encode(&self.mailbox))
        }
    }
}

/// Read an optional string variable, trimmed, falling back to `default`
fn optional_env(key: &str, default: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_owned()),
        Ok(_) | Err(VarError::NotPresent) => Ok(default.to_owned()),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Require an absolute http(s) URL for the Graph root
fn validate_base_url(url: &str) -> AppResult<()> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "MAIL_FORWARD_GRAPH_BASE_URL must be an absolute http(s) URL: '{url}'"
        )))
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a socket address environment variable with default fallback
fn parse_socket_addr_env(key: &str, default: &str) -> AppResult<SocketAddr> {
    let raw = optional_env(key, default)?;
    raw.parse::<SocketAddr>().map_err(|_| {
        AppError::InvalidInput(format!("invalid socket address environment variable {key}: '{raw}'"))
    })
}

#[cfg(test)]
pub(crate) fn test_config(graph_base_url: &str) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("static addr parses"),
        graph_base_url: graph_base_url.trim_end_matches('/').to_owned(),
        mailbox: "me".to_owned(),
        archive_folder: "deleteditems".to_owned(),
        policy: ResolutionPolicy::STANDARD,
        fallback_default: false,
        connect_timeout_ms: 2_000,
        request_timeout_ms: 5_000,
    }
}
