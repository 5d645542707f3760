use std::path::{Path, PathBuf};
use tokio::fs;

use super::AudioFormat;
use crate::Result;

/// An uploaded audio file staged on local disk
#[derive(Debug, Clone)]
pub struct LocalAudio {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size: u64,
    pub title: String,
}

impl LocalAudio {
    /// Check the staged file exists, is non-empty, within the size cap and a known format
    pub async fn inspect(path: &Path, display_name: &str, max_bytes: u64) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("File does not exist: {}", path.display());
        }

        let metadata = fs::metadata(path)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot access file {}: {}", path.display(), e))?;

        let size = metadata.len();
        if size == 0 {
            anyhow::bail!("File is empty: {}", display_name);
        }

        if size > max_bytes {
            anyhow::bail!(
                "{} is {} (limit {})",
                display_name,
                crate::utils::format_file_size(size),
                crate::utils::format_file_size(max_bytes)
            );
        }

        let format = AudioFormat::from_path(Path::new(display_name))
            .or_else(|| AudioFormat::from_path(path))
            .ok_or_else(|| anyhow::anyhow!("Unsupported audio format: {}", display_name))?;

        let title = Path::new(display_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Uploaded audio")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            format,
            size,
            title,
        })
    }
}
