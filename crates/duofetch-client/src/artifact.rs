use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Write the whole buffer to `path` in one go, replacing any existing file.
/// A write that fails partway leaves nothing behind.
pub(crate) async fn save(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    if let Err(source) = fs::write(path, data).await {
        discard(path).await;
        return Err(FetchError::Save {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Remove whatever sits at `path` after a failed transfer.
pub(crate) async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_known_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn save_overwrites_and_discard_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("duofetch_artifact_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("out.bin");

        save(&path, b"first version").await.unwrap();
        save(&path, b"second").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"second");

        discard(&path).await;
        assert!(!path.exists());
        discard(&path).await;

        fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn failed_save_reports_path_and_leaves_nothing() {
        let dir = std::env::temp_dir().join(format!("duofetch_artifact_{}", uuid::Uuid::new_v4()));
        let path = dir.join("no_such_subdir").join("out.bin");

        let err = save(&path, b"data").await.unwrap_err();
        match err {
            FetchError::Save { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("expected save error, got {:?}", other),
        }
        assert!(!path.exists());
    }
}
