use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::item::{Item, SubdomainRecord};
use crate::plugin::{InvocationContext, Plugin};
use crate::util;

const PRIMARY_TOOL_BASE: &str = "https://raw.githubusercontent.com/dragnet-sec/tools/main";
const FALLBACK_TOOL_BASE: &str = "https://mirror.dragnet-sec.dev/tools";

/// Hard cap on one subfinder run; the tool's own `-timeout` bounds
/// individual sources, this bounds the whole process.
const EXEC_TIMEOUT: Duration = Duration::from_secs(3600);

/// Passive subdomain enumeration via the external `subfinder` binary.
///
/// Self-provisions the binary into the tool directory on `install`, runs it
/// with `-t`/`-timeout` taken from the invocation parameter, and emits one
/// subdomain record per line of output.
pub struct Subfinder {
    tool_dir: PathBuf,
    file_name: &'static str,
    os_dir: &'static str,
    primary_base: String,
    fallback_base: String,
    client: reqwest::Client,
}

impl Subfinder {
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        let (os_dir, file_name) = if cfg!(windows) {
            ("win", "subfinder.exe")
        } else if cfg!(target_os = "macos") {
            ("darwin", "subfinder")
        } else {
            ("linux", "subfinder")
        };
        Self {
            tool_dir: tool_dir.into(),
            file_name,
            os_dir,
            primary_base: PRIMARY_TOOL_BASE.to_string(),
            fallback_base: FALLBACK_TOOL_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the download sources (mirrors, air-gapped setups).
    pub fn with_sources(mut self, primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        self.primary_base = primary.into();
        self.fallback_base = fallback.into();
        self
    }

    fn home(&self) -> PathBuf {
        self.tool_dir.join("subfinder")
    }

    fn executable(&self) -> PathBuf {
        self.home().join(self.file_name)
    }

    fn result_dir(&self) -> PathBuf {
        self.home().join("result")
    }

    fn build_args(domain: &str, parameter: &str, result_file: &Path) -> Vec<String> {
        let args = util::parse_args(parameter, &["t", "timeout"]);
        let threads = args.get("t").map(String::as_str).unwrap_or("10");
        let timeout = args.get("timeout").map(String::as_str).unwrap_or("30");

        vec![
            "-d".into(),
            domain.into(),
            "-t".into(),
            threads.into(),
            "-timeout".into(),
            timeout.into(),
            "-silent".into(),
            "-o".into(),
            result_file.display().to_string(),
        ]
    }
}

#[async_trait]
impl Plugin for Subfinder {
    fn name(&self) -> &str {
        "subfinder"
    }

    fn module(&self) -> &str {
        "SubdomainScan"
    }

    async fn install(&self) -> anyhow::Result<()> {
        fs::create_dir_all(self.result_dir())
            .await
            .context("failed to create subfinder directories")?;

        let executable = self.executable();
        if fs::try_exists(&executable).await.unwrap_or(false) {
            debug!(path = %executable.display(), "subfinder already provisioned");
            return Ok(());
        }

        let primary = format!("{}/{}/{}", self.primary_base, self.os_dir, self.file_name);
        let fallback = format!("{}/{}/{}", self.fallback_base, self.os_dir, self.file_name);
        util::download_file(&self.client, &primary, &fallback, &executable).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
                .await
                .context("failed to mark subfinder executable")?;
        }
        Ok(())
    }

    async fn check(&self) -> anyhow::Result<()> {
        let executable = self.executable();
        if !fs::try_exists(&executable).await.unwrap_or(false) {
            anyhow::bail!("subfinder binary missing at {}", executable.display());
        }
        Ok(())
    }

    async fn execute(&self, item: Item, ctx: &InvocationContext) -> anyhow::Result<()> {
        let domain = item.as_target()?;
        let result_file = self.result_dir().join(util::scratch_file_name());
        let args = Self::build_args(domain, ctx.parameter(), &result_file);

        if let Err(e) =
            util::execute_command_with_timeout(&self.executable(), &args, EXEC_TIMEOUT).await
        {
            // keep whatever partial output the tool managed to write
            warn!(domain, error = %e, "subfinder run did not finish cleanly");
        }

        let output = match fs::read_to_string(&result_file).await {
            Ok(output) => output,
            Err(_) => {
                debug!(domain, "no subfinder output produced");
                return Ok(());
            }
        };
        fs::remove_file(&result_file).await.ok();

        for line in output.lines() {
            let host = line.trim();
            if host.is_empty() {
                continue;
            }
            ctx.emit(Item::Subdomain(SubdomainRecord {
                host: host.to_string(),
                record_type: String::new(),
                values: vec![],
                ips: vec![],
            }))
            .await;
        }
        Ok(())
    }
}
