use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Parse a free-form `-flag value` parameter string, keeping only the flags
/// in `keys`. Unrecognized flags and flags without a value are ignored.
pub fn parse_args(parameter: &str, keys: &[&str]) -> HashMap<String, String> {
    let mut args = HashMap::new();
    let mut tokens = parameter.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let Some(flag) = token.strip_prefix('-') else {
            continue;
        };
        let flag = flag.trim_start_matches('-');
        if !keys.contains(&flag) {
            continue;
        }
        if let Some(value) = tokens.peek()
            && !value.starts_with('-')
        {
            args.insert(flag.to_string(), tokens.next().unwrap_or_default().to_string());
        }
    }

    args
}

/// Name for a scratch result file under a tool's working directory.
pub fn scratch_file_name() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Run an external command with a hard wall-clock cap, killing the process
/// if it overruns. Stdout/stderr are discarded; tools are asked to write
/// results to files instead.
pub async fn execute_command_with_timeout(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<()> {
    debug!(program = %program.display(), ?args, "executing command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {}", program.display()))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => {
            let status =
                waited.with_context(|| format!("failed waiting for {}", program.display()))?;
            if !status.success() {
                bail!("{} exited with {status}", program.display());
            }
            Ok(())
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(program = %program.display(), error = %e, "failed to kill timed-out command");
            }
            bail!(
                "{} timed out after {}s",
                program.display(),
                timeout.as_secs()
            );
        }
    }
}

/// Download `primary` to `dest`, falling back to `fallback` when the
/// primary source is unreachable or errors.
pub async fn download_file(
    client: &reqwest::Client,
    primary: &str,
    fallback: &str,
    dest: &Path,
) -> Result<()> {
    match fetch_to(client, primary, dest).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(url = primary, error = %e, "primary download failed, trying fallback");
            fetch_to(client, fallback, dest)
                .await
                .with_context(|| format!("fallback download from {fallback} failed"))
        }
    }
}

async fn fetch_to(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("{url} returned HTTP {status}");
    }

    let body = response
        .bytes()
        .await
        .with_context(|| format!("reading body from {url} failed"))?;
    tokio::fs::write(dest, &body)
        .await
        .with_context(|| format!("writing {} failed", dest.display()))?;
    Ok(())
}
