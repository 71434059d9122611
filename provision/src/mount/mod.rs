mod hdiutil;

#[cfg(test)]
pub(crate) mod fake;

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use nixvm_cmd::CommandError;
use nixvm_fs::{self as fs, FsError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::hdiutil::HdiutilMounter;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("failed to attach '{image}': {source}")]
    Attach {
        image: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("attaching '{image}' did not report a device:\n{output}")]
    NoDevice { image: PathBuf, output: String },

    #[error("failed to mount {device} at '{mount_point}': {source}")]
    Mount {
        device: String,
        mount_point: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to unmount '{mount_point}': {source}")]
    Unmount {
        mount_point: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to detach {device}: {source}")]
    Detach {
        device: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to prepare mount point: {0}")]
    MountPoint(#[source] FsError),
}

/// An attached image device and where its filesystem is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountHandle {
    pub device: String,
    pub mount_point: PathBuf,
}

/// Host capability to expose an image file as a block device and mount it
/// read-only.
#[async_trait]
pub trait BlockImageMounter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this mounter can work on the current host.
    fn platform_supported(&self) -> bool;

    /// Attach `image` and mount its filesystem at the existing, empty
    /// `mount_point`. Nothing may be left attached when this fails.
    async fn attach_and_mount(
        &self,
        image: &Path,
        mount_point: &Path,
    ) -> Result<MountHandle, MountError>;

    /// Unmount and detach. Both halves are attempted even if the first fails.
    async fn detach(&self, handle: &MountHandle) -> Result<(), MountError>;
}

/// Mount `image` on a fresh directory under `temp_root`, run `f` with the
/// mount point, then always unmount, detach and remove the directory.
///
/// Teardown problems are logged and dropped, so `f`'s own error is what the
/// caller sees.
pub async fn with_mounted_image<M, F, Fut, T, E>(
    mounter: &M,
    image: &Path,
    temp_root: &Path,
    f: F,
) -> Result<T, E>
where
    M: BlockImageMounter + ?Sized,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<MountError>,
{
    let mount_point = temp_root.join(format!("nixvm-iso-{}", cuid2::create_id()));
    fs::create_dir(&mount_point)
        .await
        .map_err(MountError::MountPoint)?;

    info!(
        mounter = mounter.name(),
        mount_point = %mount_point.display(),
        "mounting installer image"
    );
    let handle = match mounter.attach_and_mount(image, &mount_point).await {
        Ok(handle) => handle,
        Err(error) => {
            remove_mount_point(&mount_point).await;
            return Err(error.into());
        }
    };
    debug!(device = %handle.device, "installer image mounted");

    let result = f(mount_point.clone()).await;

    info!(device = %handle.device, "unmounting installer image");
    match mounter.detach(&handle).await {
        Ok(()) => remove_mount_point(&mount_point).await,
        Err(error) => {
            // The directory may still be a live mount, so leave it.
            warn!("failed to tear down installer image mount: {error}");
        }
    }

    result
}

async fn remove_mount_point(mount_point: &Path) {
    if let Err(error) = fs::remove_empty_dir(mount_point).await {
        warn!("{error}");
    }
}
