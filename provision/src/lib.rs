mod disk;
mod extract;
mod images;
mod launcher;
mod mount;
mod paths;
mod pipeline;

use std::path::PathBuf;

use nixvm_cmd::CommandError;
use nixvm_fs::FsError;
use nixvm_system::Platform;
use thiserror::Error;
use url::Url;

pub use crate::disk::{allocate_disk, DiskError};
pub use crate::extract::{
    copy_boot_artifacts, extract_command_line, BootCommandLine, ExtractError,
    HEADLESS_CMDLINE_SUFFIX,
};
pub use crate::images::{
    fetch_image, FetchError, FetchOutcome, ImageEntry, ImageSources, ImagesList,
    ImagesListError, LocatorError, PullPolicy,
};
pub use crate::launcher::{
    write_launcher, BootSpec, Launcher, LauncherError, DEFAULT_RUNTIME,
};
pub use crate::mount::{
    with_mounted_image, BlockImageMounter, HdiutilMounter, MountError, MountHandle,
};
pub use crate::paths::{WorkPaths, DEFAULT_WORK_DIR};
pub use crate::pipeline::{PreparedInstaller, ProvisionOptions, Provisioner};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("cannot resolve work directory '{path}': {source}")]
    ResolveWorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare work directory: {0}")]
    WorkDir(#[source] FsError),

    #[error("unsupported platform '{platform}': the {mounter} mounter cannot run here")]
    UnsupportedPlatform {
        platform: Platform,
        mounter: &'static str,
    },

    #[error("unsupported architecture: '{identifier}'")]
    UnsupportedArchitecture { identifier: String },

    #[error("failed to download {url}: {source}")]
    DownloadFailed {
        url: Url,
        #[source]
        source: FetchError,
    },

    #[error("failed to attach installer image: {0}")]
    AttachFailed(#[source] MountError),

    #[error("failed to mount installer image: {0}")]
    MountFailed(#[source] MountError),

    #[error("no kernel found on installer image mounted at '{mount_point}'")]
    KernelNotFound { mount_point: PathBuf },

    #[error("no kernel command line found{}", extract::found_in(.path))]
    CommandLineNotFound { path: Option<PathBuf> },

    #[error("failed to copy boot artifacts: {0}")]
    CopyFailed(#[source] FsError),

    #[error(transparent)]
    DiskAllocationFailed(#[from] DiskError),

    #[error(transparent)]
    WriteFailed(#[from] LauncherError),

    #[error("cannot resolve installer helper '{path}': {source}")]
    ResolveInstallerHelper {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("installer helper failed: {0}")]
    InstallerFailed(#[source] CommandError),
}

impl From<LocatorError> for ProvisionError {
    fn from(error: LocatorError) -> Self {
        match error {
            LocatorError::UnsupportedArchitecture { identifier } => {
                ProvisionError::UnsupportedArchitecture { identifier }
            }
        }
    }
}

impl From<MountError> for ProvisionError {
    fn from(error: MountError) -> Self {
        match error {
            MountError::Attach { .. } | MountError::NoDevice { .. } => {
                ProvisionError::AttachFailed(error)
            }
            MountError::Mount { .. }
            | MountError::Unmount { .. }
            | MountError::Detach { .. }
            | MountError::MountPoint(_) => ProvisionError::MountFailed(error),
        }
    }
}

impl From<ExtractError> for ProvisionError {
    fn from(error: ExtractError) -> Self {
        match error {
            ExtractError::KernelNotFound { mount_point } => {
                ProvisionError::KernelNotFound { mount_point }
            }
            ExtractError::CommandLineNotFound { path } => {
                ProvisionError::CommandLineNotFound { path }
            }
            ExtractError::Fs(error) => ProvisionError::CopyFailed(error),
        }
    }
}
