use std::path::{Path, PathBuf};

use nixvm_cmd::Command;
use nixvm_fs as fs;
use nixvm_http::HttpClient;
use nixvm_system::{CpuCount, DiskSize, MemorySize, Platform};
use tracing::{info, warn};
use url::Url;

use crate::{
    disk::allocate_disk,
    extract::{copy_boot_artifacts, BootCommandLine},
    images::{fetch_image, FetchOutcome, ImageSources, PullPolicy},
    launcher::{write_launcher, BootSpec, Launcher, DEFAULT_RUNTIME},
    mount::{with_mounted_image, BlockImageMounter},
    paths::{WorkPaths, DEFAULT_WORK_DIR},
    ProvisionError,
};

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub work_dir: PathBuf,
    /// Host architecture identifier, e.g. `x86_64` or `arm`.
    pub arch: String,
    pub images: ImageSources,
    pub pull: PullPolicy,
    pub disk_size: DiskSize,
    pub cpu_count: CpuCount,
    pub memory_size: MemorySize,
    /// VM runtime binary the install script execs.
    pub runtime: String,
    /// Parent of the temporary mount point.
    pub temp_dir: PathBuf,
}

impl ProvisionOptions {
    pub fn new(images: ImageSources) -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            arch: std::env::consts::ARCH.to_owned(),
            images,
            pull: PullPolicy::default(),
            disk_size: DiskSize::default(),
            cpu_count: CpuCount::default(),
            memory_size: MemorySize::default(),
            runtime: DEFAULT_RUNTIME.to_owned(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Result of the install-boot phase.
#[derive(Debug, Clone)]
pub struct PreparedInstaller {
    pub paths: WorkPaths,
    pub url: Url,
    pub fetch: FetchOutcome,
    pub cmdline: BootCommandLine,
}

pub struct Provisioner<M> {
    options: ProvisionOptions,
    paths: WorkPaths,
    mounter: M,
    http: HttpClient,
}

impl<M: BlockImageMounter> Provisioner<M> {
    pub fn new(
        options: ProvisionOptions,
        mounter: M,
        http: HttpClient,
    ) -> Result<Self, ProvisionError> {
        // The install script cds here, so it has to be absolute.
        let work_dir = std::path::absolute(&options.work_dir).map_err(|source| {
            ProvisionError::ResolveWorkDir {
                path: options.work_dir.clone(),
                source,
            }
        })?;
        Ok(Self {
            paths: WorkPaths::new(work_dir),
            options,
            mounter,
            http,
        })
    }

    pub fn paths(&self) -> &WorkPaths {
        &self.paths
    }

    /// Download the install CD, pull kernel, initrd and command line off it,
    /// create the disk and write the script that boots the installer.
    pub async fn prepare_installer<F>(
        &self,
        on_progress: F,
    ) -> Result<PreparedInstaller, ProvisionError>
    where
        F: FnMut(u8),
    {
        let paths = &self.paths;
        fs::create_dir(paths.work_dir())
            .await
            .map_err(ProvisionError::WorkDir)?;

        if !self.mounter.platform_supported() {
            return Err(ProvisionError::UnsupportedPlatform {
                platform: Platform::host(),
                mounter: self.mounter.name(),
            });
        }

        let url = self.options.images.resolve_url(&self.options.arch)?.clone();
        info!(arch = %self.options.arch, %url, "resolved installer image");

        let iso_path = paths.iso_path();
        let fetch = fetch_image(&self.http, &url, &iso_path, self.options.pull, on_progress)
            .await
            .map_err(|source| ProvisionError::DownloadFailed {
                url: url.clone(),
                source,
            })?;

        let cmdline = with_mounted_image(
            &self.mounter,
            &iso_path,
            &self.options.temp_dir,
            |mount_point| async move {
                copy_boot_artifacts(&mount_point, paths)
                    .await
                    .map_err(ProvisionError::from)
            },
        )
        .await?;

        let disk_path = paths.disk_path();
        if matches!(fs::path_exists(&disk_path).await, Ok(true)) {
            warn!(path = %disk_path.display(), "replacing existing disk image");
        }
        allocate_disk(&disk_path, self.options.disk_size).await?;

        let boot = BootSpec::new(
            cmdline.clone(),
            self.options.cpu_count,
            self.options.memory_size,
        );
        let launcher = Launcher::install_script(paths.work_dir(), &self.options.runtime, boot);
        write_launcher(&paths.install_script_path(), &launcher).await?;

        Ok(PreparedInstaller {
            paths: paths.clone(),
            url,
            fetch,
            cmdline,
        })
    }

    /// Run the external helper which drives the interactive installer. It
    /// starts in the work dir and shares this process's terminal. A relative
    /// `helper` is taken from the current directory, not the work dir.
    pub async fn run_installer_helper(&self, helper: &Path) -> Result<(), ProvisionError> {
        let helper = std::path::absolute(helper).map_err(|source| {
            ProvisionError::ResolveInstallerHelper {
                path: helper.to_path_buf(),
                source,
            }
        })?;
        info!(helper = %helper.display(), "running installer helper");
        Command::new(&helper)
            .current_dir(self.paths.work_dir())
            .run_interactive()
            .await
            .map_err(ProvisionError::InstallerFailed)
    }

    /// Write `vm.conf` for booting the installed system.
    pub async fn write_config(&self) -> Result<PathBuf, ProvisionError> {
        let boot = BootSpec::new(
            BootSpec::installed_cmdline(),
            self.options.cpu_count,
            self.options.memory_size,
        );
        fs::create_dir(self.paths.work_dir())
            .await
            .map_err(ProvisionError::WorkDir)?;
        let path = self.paths.vm_conf_path();
        write_launcher(&path, &Launcher::vm_conf(boot)).await?;
        Ok(path)
    }

    /// Installer, helper, then config: the whole job in one go.
    pub async fn provision<F>(
        &self,
        helper: &Path,
        on_progress: F,
    ) -> Result<PreparedInstaller, ProvisionError>
    where
        F: FnMut(u8),
    {
        let prepared = self.prepare_installer(on_progress).await?;
        self.run_installer_helper(helper).await?;
        self.write_config().await?;
        Ok(prepared)
    }
}
