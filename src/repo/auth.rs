use std::process::Command;

use anyhow::{Result, anyhow};

fn non_empty(name: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim().to_string();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is empty after trimming"));
    }
    Ok(trimmed)
}

fn token_from_env_var(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(raw) => non_empty(&format!("token env {name}"), &raw).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow!("failed to read env {name}: {e}")),
    }
}

fn token_from_gh_auth_token(api_base: Option<&str>) -> Result<String> {
    let mut cmd = Command::new("gh");
    cmd.args(["auth", "token"]);

    let host = api_base
        .and_then(|base| reqwest::Url::parse(base).ok())
        .and_then(|url| url.host_str().map(str::to_string))
        .or_else(|| std::env::var("GH_HOST").ok());
    if let Some(host) = host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        cmd.args(["--hostname", host]);
    }

    let output = cmd
        .output()
        .map_err(|e| anyhow!("failed to execute `gh auth token`: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "`gh auth token` failed (exit {}): {}",
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    non_empty("`gh auth token` output", &stdout)
}

/// Resolve a GitHub token.
///
/// Priority:
/// 1) `token` from the account configuration
/// 2) `GITHUB_TOKEN`
/// 3) `gh auth token` (for the host of `api_base`, else `GH_HOST`)
pub fn resolve_github_token(configured: Option<&str>, api_base: Option<&str>) -> Result<String> {
    if let Some(token) = configured {
        return non_empty("configured GitHub token", token);
    }
    if let Some(token) = token_from_env_var("GITHUB_TOKEN")? {
        return Ok(token);
    }
    token_from_gh_auth_token(api_base)
}

/// Resolve an Azure DevOps personal access token, falling back to
/// `AZURE_DEVOPS_EXT_PAT` (the variable the Azure CLI uses).
pub fn resolve_azure_pat(configured: Option<&str>) -> Result<String> {
    if let Some(pat) = configured {
        return non_empty("configured Azure DevOps pat", pat);
    }
    token_from_env_var("AZURE_DEVOPS_EXT_PAT")?
        .ok_or_else(|| anyhow!("Azure DevOps pat is required (config `pat` or env AZURE_DEVOPS_EXT_PAT)"))
}
