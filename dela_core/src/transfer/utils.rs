use super::constants::MAX_FILENAME_LENGTH;
use super::receiver::ReceivedFile;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

const FALLBACK_FILE_NAME: &str = "unknown_file";

/// Windows device names that cannot be used as file names
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a peer supplied name to a single safe path component
pub fn sanitize_file_name(file_name: &str) -> String {
    // Peers may send either separator; keep only the last component
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or_default();

    let clean: String = last
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    let clean = clean.trim();

    if clean.is_empty()
        || clean == "."
        || clean == ".."
        || RESERVED_NAMES.iter().any(|r| clean.eq_ignore_ascii_case(r))
    {
        return FALLBACK_FILE_NAME.to_string();
    }

    truncate_keeping_extension(clean, MAX_FILENAME_LENGTH)
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx < 20 => name.split_at(idx),
        _ => (name, ""),
    };
    let mut cutoff = max_len - ext.len();
    while !stem.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    format!("{}{}", &stem[..cutoff], ext)
}

/// Create a file that does not exist yet, adding ` (n)` before the
/// extension until the name is free
async fn create_unique(dir: &Path, file_name: &str) -> Result<(File, PathBuf)> {
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    };

    for n in 0u32.. {
        let candidate = if n == 0 {
            file_name.to_string()
        } else {
            format!("{} ({}){}", stem, n, ext)
        };
        let path = dir.join(&candidate);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        match options.open(&path).await {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot create {}", path.display()));
            }
        }
    }
    anyhow::bail!("No free file name for {}", file_name)
}

impl ReceivedFile {
    /// Write the file into `dir` under a sanitized, non-clobbering name
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Cannot create download dir {}", dir.display()))?;

        let name = sanitize_file_name(&self.file_name);
        let (mut file, path) = create_unique(dir, &name).await?;
        file.write_all(&self.data).await?;
        file.flush().await?;

        tracing::info!("Saved {} ({} bytes)", path.display(), self.data.len());
        Ok(path)
    }
}
