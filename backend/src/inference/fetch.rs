use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Model artifact {0} not found and no download URL configured")]
    Missing(PathBuf),
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn verify(path: &Path, data: &[u8], expected: Option<&str>) -> Result<(), FetchError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = sha256_hex(data);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(FetchError::Checksum {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Makes sure a model artifact exists at `path`, downloading it from `url`
/// on first use. A file already on disk is reused as a cache.
pub async fn ensure_artifact(
    path: &Path,
    url: Option<&str>,
    sha256: Option<&str>,
) -> Result<PathBuf, FetchError> {
    if path.exists() {
        if sha256.is_some() {
            let data = std::fs::read(path)?;
            verify(path, &data, sha256)?;
        }
        log::info!("Using cached model artifact {}", path.display());
        return Ok(path.to_path_buf());
    }

    let url = url.ok_or_else(|| FetchError::Missing(path.to_path_buf()))?;
    log::info!("Downloading model artifact {} from {}", path.display(), url);

    let response = reqwest::get(url).await?.error_for_status()?;
    let data = response.bytes().await?;
    verify(path, &data, sha256)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let partial = path.with_extension("part");
    std::fs::write(&partial, &data)?;
    std::fs::rename(&partial, path)?;

    log::info!(
        "Stored model artifact {} ({} bytes)",
        path.display(),
        data.len()
    );
    Ok(path.to_path_buf())
}
