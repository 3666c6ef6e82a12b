//! Performance log: every dispatched message, timestamped relative to the
//! moment the log was opened.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::relay::Message;

pub struct SessionLog {
    path: PathBuf,
    file: File,
    started: Instant,
}

impl SessionLog {
    /// Create `server-log-DDMMYY_HHMMSS.txt` under `dir`, creating `dir` if
    /// needed.
    pub async fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create log directory: {:?}", dir))?;

        let name = chrono::Local::now()
            .format("server-log-%d%m%y_%H%M%S.txt")
            .to_string();
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open session log: {:?}", path))?;

        info!("Logging session to {}", path.display());
        Ok(Self {
            path,
            file,
            started: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `<seconds> <json>` for one message.
    pub async fn record(&mut self, message: &Message) -> Result<()> {
        let line = format!(
            "{:.4} {}\n",
            self.started.elapsed().as_secs_f64(),
            serde_json::to_string(message)?
        );
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}
