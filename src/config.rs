//! Run configuration resolved from the command line and environment.

use std::env;
use std::path::PathBuf;

use crate::activity_sync::MergeStrategy;

pub const TOKEN_DIR_ENV: &str = "GARMINTOKENS";
const DEFAULT_TOKEN_DIR: &str = "~/.garminconnect";

/// Which regional Garmin Connect deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Domain {
    #[default]
    Com,
    Cn,
}

impl Domain {
    pub fn api_base(&self) -> &'static str {
        match self {
            Domain::Com => "https://connectapi.garmin.com",
            Domain::Cn => "https://connectapi.garmin.cn",
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth-service/oauth/token", self.api_base())
    }
}

/// Base URLs of one Garmin Connect deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub token_url: String,
}

impl From<Domain> for Endpoints {
    fn from(domain: Domain) -> Self {
        Self {
            api_base: domain.api_base().to_string(),
            token_url: domain.token_url(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// Page size of the single activity list request.
    pub count: u32,
    pub output: PathBuf,
    pub strategy: MergeStrategy,
    pub endpoints: Endpoints,
    pub only_running: bool,
    pub token_dir: PathBuf,
}

impl Config {
    /// Upstream category filter for the list call, if any.
    pub fn activity_filter(&self) -> Option<&'static str> {
        self.only_running.then_some("running")
    }
}

/// Token cache location: `$GARMINTOKENS` or `~/.garminconnect`, with `~` expanded.
pub fn token_dir_from_env() -> PathBuf {
    let raw = env::var(TOKEN_DIR_ENV).unwrap_or_else(|_| DEFAULT_TOKEN_DIR.to_string());
    expand_home(&raw, env::var("HOME").ok().as_deref())
}

pub fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            PathBuf::from(format!("{home}{rest}"))
        }
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home("~/.garminconnect", Some("/home/me")),
            PathBuf::from("/home/me/.garminconnect")
        );
        assert_eq!(expand_home("~", Some("/home/me")), PathBuf::from("/home/me"));
        assert_eq!(expand_home("/tmp/tokens", Some("/home/me")), PathBuf::from("/tmp/tokens"));
        // ~user forms are left alone
        assert_eq!(expand_home("~bob/x", Some("/home/me")), PathBuf::from("~bob/x"));
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }

    #[test]
    fn test_domain_endpoints() {
        assert_eq!(Domain::Cn.api_base(), "https://connectapi.garmin.cn");
        assert!(Domain::Com.token_url().starts_with("https://connectapi.garmin.com/"));

        let endpoints = Endpoints::from(Domain::Cn);
        assert_eq!(endpoints.api_base, "https://connectapi.garmin.cn");
        assert_eq!(
            endpoints.token_url,
            "https://connectapi.garmin.cn/oauth-service/oauth/token"
        );
    }
}
