use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::MirrorConfig;
use crate::error::{AppError, Result};
use crate::traits::Mirror;

const REMOTE_NAME: &str = "nextcloud";

/// WebDAV credentials for the Nextcloud remote.
#[derive(Clone)]
pub struct MirrorCredentials {
    pub url: String,
    pub user: String,
    pub pass: String,
}

impl MirrorCredentials {
    /// Reads `NEXTCLOUD_URL`, `NEXTCLOUD_USER` and `NEXTCLOUD_PASS`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| AppError::Config(format!("{name} is not set")))
        };
        Ok(Self {
            url: var("NEXTCLOUD_URL")?,
            user: var("NEXTCLOUD_USER")?,
            pass: var("NEXTCLOUD_PASS")?,
        })
    }
}

/// One-way mirror of the output directory through `rclone sync`. The remote
/// is defined through `RCLONE_CONFIG_*` variables, so no config file is
/// written to disk.
pub struct RcloneMirror {
    binary: String,
    remote_folder: String,
    resync: bool,
    credentials: MirrorCredentials,
}

impl RcloneMirror {
    pub fn new(config: &MirrorConfig, credentials: MirrorCredentials) -> Self {
        Self {
            binary: config.rclone_binary.clone(),
            remote_folder: config.remote_folder.clone(),
            resync: config.resync,
            credentials,
        }
    }

    fn sync_args(&self, local_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "sync".into(),
            local_dir.as_os_str().to_owned(),
            format!("{REMOTE_NAME}:{}", self.remote_folder).into(),
        ];
        if self.resync {
            args.push("--ignore-times".into());
        }
        args
    }

    /// rclone only accepts obscured passwords in its config.
    async fn obscure(&self, pass: &str) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["obscure", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits without reading stdin shows up in the exit status
            if let Err(e) = stdin.write_all(pass.as_bytes()).await {
                tracing::debug!("Failed to pass password to rclone obscure: {}", e);
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(AppError::Sync(format!(
                "rclone obscure exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Mirror for RcloneMirror {
    async fn sync(&self, local_dir: &Path) -> Result<()> {
        let obscured = self.obscure(&self.credentials.pass).await?;
        let prefix = format!("RCLONE_CONFIG_{}", REMOTE_NAME.to_ascii_uppercase());

        let output = Command::new(&self.binary)
            .args(self.sync_args(local_dir))
            .env(format!("{prefix}_TYPE"), "webdav")
            .env(format!("{prefix}_VENDOR"), "nextcloud")
            .env(format!("{prefix}_URL"), &self.credentials.url)
            .env(format!("{prefix}_USER"), &self.credentials.user)
            .env(format!("{prefix}_PASS"), obscured)
            .output()
            .await?;

        tracing::debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "rclone output");

        if output.status.success() {
            tracing::info!("Mirrored {} to {}:{}", local_dir.display(), REMOTE_NAME, self.remote_folder);
            Ok(())
        } else {
            Err(AppError::Sync(format!(
                "rclone sync exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
