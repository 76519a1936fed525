//! Source repository references

use std::fmt;

use url::Url;

use crate::errors::PipelineError;

/// A validated `https://{host}/{owner}/{repo}` repository reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    url: Url,
    owner: String,
    repo: String,
}

impl SourceRef {
    /// Validate a user-supplied repository URL.
    ///
    /// A missing scheme defaults to https and a leading `www.` is dropped.
    /// When `accepted_hosts` is non-empty the host must be one of them.
    pub fn parse(raw: &str, accepted_hosts: &[String]) -> Result<Self, PipelineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidInput("gitURL is required".to_string()));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| PipelineError::InvalidInput(format!("malformed gitURL {raw:?}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::InvalidInput(format!(
                "unsupported scheme {:?} in gitURL",
                url.scheme()
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(PipelineError::InvalidInput(
                "gitURL must not embed credentials".to_string(),
            ));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(PipelineError::InvalidInput(
                "gitURL must not carry a query or fragment".to_string(),
            ));
        }

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_lowercase())
            .ok_or_else(|| PipelineError::InvalidInput("gitURL has no host".to_string()))?;

        if !accepted_hosts.is_empty() && !accepted_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            return Err(PipelineError::InvalidInput(format!(
                "repositories on {host} are not accepted"
            )));
        }

        let segments: Vec<&str> = url
            .path()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let &[owner, repo] = segments.as_slice() else {
            return Err(PipelineError::InvalidInput(format!(
                "gitURL must look like https://{host}/<owner>/<repo>"
            )));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if repo.is_empty() || !is_path_safe(owner) || !is_path_safe(repo) {
            return Err(PipelineError::InvalidInput(format!(
                "invalid repository path {owner}/{repo}"
            )));
        }

        let mut normalized = Url::parse(&format!("https://{host}"))
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        if let Some(port) = url.port() {
            // Port cannot fail to set on an https URL
            let _ = normalized.set_port(Some(port));
        }
        normalized.set_path(&format!("{owner}/{repo}"));

        Ok(Self {
            url: normalized,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn is_path_safe(segment: &str) -> bool {
    segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
