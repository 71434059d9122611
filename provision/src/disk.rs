use std::path::{Path, PathBuf};

use nixvm_fs::{self as fs, FsError};
use nixvm_system::DiskSize;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("failed to allocate {size} disk image '{path}': {source}")]
    Allocate {
        path: PathBuf,
        size: DiskSize,
        #[source]
        source: FsError,
    },

    #[error("disk size {size} does not fit in a file length")]
    TooLarge { size: DiskSize },
}

/// Create a zero-filled disk image of `size`, replacing whatever is at `path`.
///
/// Any existing image is destroyed, including an installed system.
#[instrument(skip_all, fields(path = %path.display(), %size))]
pub async fn allocate_disk(path: &Path, size: DiskSize) -> Result<(), DiskError> {
    let len = size.as_bytes().ok_or(DiskError::TooLarge { size })?;
    info!("creating disk image");
    fs::allocate_file(path, len)
        .await
        .map_err(|source| DiskError::Allocate {
            path: path.to_path_buf(),
            size,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_allocation_replaces_first() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = tmp.path().join("disk.img");

        allocate_disk(&disk, DiskSize::from_gib(2)).await.unwrap();
        allocate_disk(&disk, DiskSize::from_gib(1)).await.unwrap();

        let len = tokio::fs::metadata(&disk).await.unwrap().len();
        assert_eq!(Some(len), DiskSize::from_gib(1).as_bytes());
    }

    #[tokio::test]
    async fn missing_parent_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = tmp.path().join("missing").join("disk.img");

        let err = allocate_disk(&disk, DiskSize::from_gib(1)).await.unwrap_err();
        match err {
            DiskError::Allocate { path, .. } => assert_eq!(path, disk),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_disk_is_rejected_before_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = tmp.path().join("disk.img");

        let err = allocate_disk(&disk, DiskSize::from_gib(u64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, DiskError::TooLarge { .. }));
        assert!(!disk.exists());
    }
}
