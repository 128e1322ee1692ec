//! Parsing of git remote URLs into host/owner/repo parts.
//!
//! Handles scp-like remotes (`git@github.com:owner/repo.git`) as well as
//! `https://`, `ssh://`, `git://` and `file://` URLs. Owners may contain
//! slashes for hosts with nested groups.

use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GitUrlError {
    #[error("'{0}' is not a git remote URL")]
    Unparseable(String),
    #[error("'{0}' does not name an owner and repository")]
    MissingRepository(String),
}

/// Decomposed git remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub protocol: String,
    pub host: String,
    pub owner: String,
    pub repo: String,
    /// Path portion as written, without the leading slash.
    pub pathname: String,
    /// The remote exactly as given.
    pub url: String,
}

impl GitUrl {
    pub fn parse(input: &str) -> Result<Self, GitUrlError> {
        let trimmed = input.trim();
        let (protocol, host, pathname) = match scp_like_parts(trimmed) {
            Some((host, path)) => ("ssh".to_string(), host.to_string(), path.to_string()),
            None => {
                let parsed = Url::parse(trimmed).map_err(|_| GitUrlError::Unparseable(trimmed.to_string()))?;
                (
                    parsed.scheme().to_string(),
                    parsed.host_str().unwrap_or_default().to_string(),
                    parsed.path().trim_start_matches('/').to_string(),
                )
            }
        };

        let repository_path = pathname.trim_end_matches('/').trim_end_matches(".git");
        let (owner, repo) = repository_path
            .rsplit_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
            .ok_or_else(|| GitUrlError::MissingRepository(trimmed.to_string()))?;

        Ok(Self {
            protocol,
            host,
            owner: owner.to_string(),
            repo: repo.to_string(),
            pathname,
            url: trimmed.to_string(),
        })
    }

    /// `owner/repo`.
    pub fn owner_repo(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Browsable `https://host/owner/repo` form.
    pub fn https_url(&self) -> String {
        format!("https://{}/{}", self.host, self.owner_repo())
    }

    pub fn to_value(&self) -> Value {
        json!({
            "protocol": self.protocol,
            "host": self.host,
            "owner": self.owner,
            "repo": self.repo,
            "pathname": self.pathname,
            "url": self.url,
            "href": self.https_url(),
        })
    }
}

/// Splits `user@host:path` remotes. Anything with a scheme is left to the URL parser.
fn scp_like_parts(input: &str) -> Option<(&str, &str)> {
    if input.contains("://") {
        return None;
    }
    let (authority, path) = input.split_once(':')?;
    let host = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some((host, path.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scp_like_remote() {
        let remote = GitUrl::parse("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(remote.protocol, "ssh");
        assert_eq!(remote.host, "github.com");
        assert_eq!(remote.owner_repo(), "acme/widgets");
    }

    #[test]
    fn parses_https_remote_with_nested_groups() {
        let remote = GitUrl::parse("https://gitlab.example.com/platform/tools/widgets").unwrap();
        assert_eq!(remote.protocol, "https");
        assert_eq!(remote.owner, "platform/tools");
        assert_eq!(remote.repo, "widgets");
        assert_eq!(remote.https_url(), "https://gitlab.example.com/platform/tools/widgets");
    }

    #[test]
    fn parses_ssh_scheme_remote() {
        let remote = GitUrl::parse("ssh://git@github.com/acme/widgets.git").unwrap();
        assert_eq!(remote.protocol, "ssh");
        assert_eq!(remote.to_value()["repo"], "widgets");
    }

    #[test]
    fn rejects_values_without_repository() {
        assert_eq!(
            GitUrl::parse("https://github.com/acme"),
            Err(GitUrlError::MissingRepository("https://github.com/acme".into()))
        );
        assert!(GitUrl::parse("not a url").is_err());
    }
}
