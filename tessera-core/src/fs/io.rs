use crate::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub size: u64,
    /// SHA-256 of the written bytes, hex-encoded.
    pub checksum: String,
}

/// Drains `reader` into a new file at `path` through `buf`, hashing as it goes.
/// The file is fsynced before returning.
pub async fn write_file<R>(reader: &mut R, path: &Path, buf: &mut [u8]) -> Result<Written>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        size += n as u64;
    }

    file.sync_all().await?;
    drop(file);

    Ok(Written {
        size,
        checksum: hex::encode(hasher.finalize()),
    })
}

/// Renames a finished workfile into its final location.
pub async fn finalize(workfqn: &Path, fqn: &Path) -> Result<()> {
    if let Some(parent) = fqn.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(workfqn, fqn).await?;
    Ok(())
}

/// Best-effort removal of a workfile left behind by a failed write.
pub async fn remove_quietly(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove {}: {}", path.display(), error);
        }
    }
}

pub async fn checksum_file(path: &Path, buf: &mut [u8]) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    loop {
        let n = file.read(buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn compute_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_file_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work/put.obj.x.1");
        let dst = dir.path().join("final/obj");

        let data = b"hello tessera".to_vec();
        let mut reader = std::io::Cursor::new(data.clone());
        let mut buf = vec![0u8; 4];
        let written = write_file(&mut reader, &work, &mut buf).await.unwrap();

        assert_eq!(written.size, data.len() as u64);
        assert_eq!(written.checksum, compute_hash(&data));

        finalize(&work, &dst).await.unwrap();
        assert!(!work.exists());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), data);
        assert_eq!(checksum_file(&dst, &mut buf).await.unwrap(), written.checksum);

        remove_quietly(&work).await;
    }
}
