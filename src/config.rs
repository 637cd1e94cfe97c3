//! Command-line and environment configuration.
//!
//! Every flag has an `ANYCRAWL_*` environment fallback. The mode decides which
//! transport binding `main` starts.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::api::{AnyCrawlClient, DEFAULT_BASE_URL};
use crate::error::{Error, Result};
use crate::registry::{ClosePolicy, RegistryConfig};
use crate::router::McpRouter;
use crate::tools;
use crate::transport::EngineFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP POST /mcp, no sessions
    Stateless,
    /// HTTP /mcp with Mcp-Session-Id sessions
    Streamable,
    /// Per-API-key routing: /{key}/mcp, /{key}/sse
    MultiTenant,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Stdio => "stdio",
            Mode::Stateless => "stateless",
            Mode::Streamable => "streamable",
            Mode::MultiTenant => "multi-tenant",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "anycrawl-mcp")]
#[command(about = "MCP server for the AnyCrawl scraping, crawling and search API", long_about = None)]
#[command(version)]
pub struct Config {
    /// Transport binding to serve
    #[arg(short, long, env = "ANYCRAWL_MODE", default_value = "stdio")]
    pub mode: Mode,

    /// Address to bind in HTTP modes
    #[arg(long, env = "ANYCRAWL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind in HTTP modes
    #[arg(short, long, env = "ANYCRAWL_PORT", default_value_t = 3000)]
    pub port: u16,

    /// AnyCrawl API key (not used in multi-tenant mode)
    #[arg(long, env = "ANYCRAWL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// AnyCrawl API base URL
    #[arg(long, env = "ANYCRAWL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Upper bound for one protocol request, including crawl polling
    #[arg(
        long,
        env = "ANYCRAWL_REQUEST_TIMEOUT_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub request_timeout_secs: u64,

    /// How long a session whose stream closed can still be resumed
    #[arg(long, env = "ANYCRAWL_GRACE_PERIOD_SECS", default_value_t = 300)]
    pub grace_period_secs: u64,

    /// Interval between sweeps for expired sessions
    #[arg(
        long,
        env = "ANYCRAWL_SWEEP_INTERVAL_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,

    /// Maximum concurrent sessions per transport kind
    #[arg(long, env = "ANYCRAWL_MAX_SESSIONS", default_value_t = 10_000)]
    pub max_sessions: usize,

    /// Log level (RUST_LOG overrides)
    #[arg(
        short,
        long,
        env = "ANYCRAWL_LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,
}

impl Config {
    /// Check settings clap can not check on its own
    pub fn validate(&self) -> Result<()> {
        if self.mode != Mode::MultiTenant
            && self
                .api_key
                .as_deref()
                .is_none_or(|k| k.trim().is_empty())
        {
            return Err(Error::Internal(format!(
                "ANYCRAWL_API_KEY is required in {} mode",
                self.mode.as_str()
            )));
        }
        if self.max_sessions == 0 {
            return Err(Error::Internal("max-sessions must be at least 1".to_string()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::Internal(format!("invalid base URL {}: {}", self.base_url, e)))?;
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn registry_config(&self, close_policy: ClosePolicy) -> RegistryConfig {
        RegistryConfig::default()
            .close_policy(close_policy)
            .grace_period(Duration::from_secs(self.grace_period_secs))
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .max_sessions(self.max_sessions)
    }

    /// Builds one engine per session, each with its own AnyCrawl client.
    ///
    /// In multi-tenant mode the tenant credential is the client's API key;
    /// otherwise every engine uses the configured key.
    pub fn engine_factory(&self) -> EngineFactory {
        let base_url = self.base_url.clone();
        let server_key = self.api_key.clone();
        let per_tenant = self.mode == Mode::MultiTenant;
        let api_timeout = self.request_timeout();

        Arc::new(move |tenant: &str| -> Result<McpRouter> {
            let api_key = if per_tenant {
                Some(tenant.to_string())
            } else {
                server_key.clone()
            };
            let client = AnyCrawlClient::new(&base_url, api_key, api_timeout)?;
            let catalog = tools::catalog(Arc::new(client))?;
            Ok(McpRouter::new(catalog).instructions(tools::INSTRUCTIONS))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("anycrawl-mcp").chain(args.iter().copied());
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--api-key", "ac-key"]);
        assert_eq!(config.mode, Mode::Stdio);
        assert_eq!(config.addr(), "127.0.0.1:3000");
        assert_eq!(config.request_timeout(), Duration::from_secs(300));

        let registry = config.registry_config(ClosePolicy::Deferred);
        assert_eq!(registry.grace_period, Duration::from_secs(300));
        assert_eq!(registry.sweep_interval, Duration::from_secs(30));
        assert_eq!(registry.max_sessions, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_names() {
        let config = parse(&["--mode", "multi-tenant", "--port", "8080"]);
        assert_eq!(config.mode, Mode::MultiTenant);
        assert_eq!(config.mode.as_str(), "multi-tenant");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_api_key_required_outside_multi_tenant() {
        let config = parse(&["--mode", "streamable", "--api-key", " "]);
        assert!(config.validate().is_err());

        let config = parse(&["--mode", "multi-tenant"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let argv = ["anycrawl-mcp", "--sweep-interval-secs", "0"];
        assert!(Config::try_parse_from(argv).is_err());

        let argv = ["anycrawl-mcp", "--log-level", "loud"];
        assert!(Config::try_parse_from(argv).is_err());

        let config = parse(&["--api-key", "k", "--base-url", "not a url"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_factory_builds_independent_engines() {
        let engines = parse(&["--api-key", "ac-key"]).engine_factory();
        let a = engines("default").unwrap();
        let b = engines("default").unwrap();
        assert_eq!(a.catalog().len(), 6);
        a.session().mark_initializing();
        assert!(!b.session().is_initialized());
        assert_eq!(
            b.session().phase(),
            crate::session::SessionPhase::Uninitialized
        );
    }
}
