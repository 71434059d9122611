use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Cannot create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot remove directory '{path}': {source}")]
    RemoveDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot create file '{path}': {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot determine if path exists '{path}': {source}")]
    PathExists {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot resize file '{path}' to {len} bytes: {source}")]
    SetLen {
        path: PathBuf,
        len: u64,
        source: std::io::Error,
    },

    #[error("Cannot set permissions on '{path}': {source}")]
    SetPermissions {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Create a directory and any missing parents. An existing directory is fine.
pub async fn create_dir<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::create_dir_all(p)
        .await
        .map_err(|source| FsError::CreateDir {
            path: p.to_path_buf(),
            source,
        })
}

/// Remove an empty directory. Never recurses, so a directory that still has
/// something mounted on it is left alone.
pub async fn remove_empty_dir<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::remove_dir(p)
        .await
        .map_err(|source| FsError::RemoveDir {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn create_file<P: AsRef<Path>>(path: P) -> Result<tokio::fs::File, FsError> {
    let p = path.as_ref();
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(p)
        .await
        .map_err(|source| FsError::CreateFile {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn path_exists<P: AsRef<Path>>(path: P) -> Result<bool, FsError> {
    let p = path.as_ref();
    fs::try_exists(p)
        .await
        .map_err(|source| FsError::PathExists {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn write_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), FsError> {
    let p = path.as_ref();
    let mut file = create_file(p).await?;
    file.write_all(data)
        .await
        .map_err(|source| FsError::WriteFile {
            path: p.to_path_buf(),
            source,
        })?;
    file.flush().await.map_err(|source| FsError::WriteFile {
        path: p.to_path_buf(),
        source,
    })
}

pub async fn read_file_to_string<P: AsRef<Path>>(path: P) -> Result<String, FsError> {
    let p = path.as_ref();
    fs::read_to_string(p)
        .await
        .map_err(|source| FsError::ReadFile {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn copy_file<F: AsRef<Path>, T: AsRef<Path>>(from: F, to: T) -> Result<u64, FsError> {
    let from_p = from.as_ref();
    let to_p = to.as_ref();
    fs::copy(from_p, to_p)
        .await
        .map_err(|source| FsError::CopyFile {
            from: from_p.to_path_buf(),
            to: to_p.to_path_buf(),
            source,
        })
}

/// Truncate (or create) `path` and set it to exactly `len` zero bytes.
///
/// Extending with `set_len` leaves a hole on filesystems that support sparse
/// files, so this is cheap even for multi-gigabyte disk images.
pub async fn allocate_file<P: AsRef<Path>>(path: P, len: u64) -> Result<(), FsError> {
    let p = path.as_ref();
    let file = create_file(p).await?;
    file.set_len(len).await.map_err(|source| FsError::SetLen {
        path: p.to_path_buf(),
        len,
        source,
    })?;
    file.sync_all().await.map_err(|source| FsError::WriteFile {
        path: p.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
pub async fn set_mode<P: AsRef<Path>>(path: P, mode: u32) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;

    let p = path.as_ref();
    fs::set_permissions(p, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|source| FsError::SetPermissions {
            path: p.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nixos-install");
        create_dir(&dir).await.unwrap();
        create_dir(&dir).await.unwrap();
        assert!(path_exists(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn allocate_file_replaces_previous_length() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = tmp.path().join("disk.img");

        allocate_file(&disk, 8192).await.unwrap();
        allocate_file(&disk, 4096).await.unwrap();

        let meta = tokio::fs::metadata(&disk).await.unwrap();
        assert_eq!(meta.len(), 4096);
        let data = tokio::fs::read(&disk).await.unwrap();
        assert!(data.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn remove_empty_dir_refuses_non_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("mnt");
        create_dir(&dir).await.unwrap();
        write_file(dir.join("grub.cfg"), b"menuentry").await.unwrap();

        let err = remove_empty_dir(&dir).await.unwrap_err();
        assert!(matches!(err, FsError::RemoveDir { .. }));
    }

    #[tokio::test]
    async fn copy_file_reports_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let err = copy_file(tmp.path().join("bzImage"), tmp.path().join("kernel"))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::CopyFile { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn set_mode_marks_executable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("boot-installer");
        write_file(&script, b"#!/bin/sh\n").await.unwrap();
        set_mode(&script, 0o755).await.unwrap();

        let mode = tokio::fs::metadata(&script).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
