use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use nixvm_fs::{self as fs, FsError};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::paths::WorkPaths;

/// Kernel locations inside the install CD, in order of preference. x86_64
/// ships `bzImage`, aarch64 ships `Image`.
pub const KERNEL_CANDIDATES: [&str; 2] = ["boot/bzImage", "boot/Image"];
pub const INITRD_PATH: &str = "boot/initrd";
pub const GRUB_CONFIG_PATH: &str = "EFI/boot/grub.cfg";

/// Appended to every command line: serial console on the virtio console, and
/// quieter boot logging, since the guest runs headless.
pub const HEADLESS_CMDLINE_SUFFIX: &str = "console=hvc0 loglevel=4";

static CMDLINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"init=[\w/.-]* *root=LABEL=[\w/.-]*").expect("command line pattern is valid")
});

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no kernel found under '{mount_point}' (looked for {})", KERNEL_CANDIDATES.join(", "))]
    KernelNotFound { mount_point: PathBuf },

    /// `path` is the boot loader config the text came from, when known.
    #[error("no `init=... root=LABEL=...` command line found{}", found_in(.path))]
    CommandLineNotFound { path: Option<PathBuf> },

    #[error(transparent)]
    Fs(#[from] FsError),
}

pub(crate) fn found_in(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in '{}'", path.display()),
        None => String::new(),
    }
}

/// Kernel command line ready to hand to the VM runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCommandLine(String);

impl BootCommandLine {
    /// `base` with [`HEADLESS_CMDLINE_SUFFIX`] appended.
    pub fn headless(base: &str) -> Self {
        let base = base.trim();
        if base.is_empty() {
            Self(HEADLESS_CMDLINE_SUFFIX.to_owned())
        } else {
            Self(format!("{base} {HEADLESS_CMDLINE_SUFFIX}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BootCommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First `init=<path> root=LABEL=<label>` in a boot loader config.
pub fn extract_command_line(config: &str) -> Result<String, ExtractError> {
    CMDLINE_PATTERN
        .find(config)
        .map(|found| found.as_str().to_owned())
        .ok_or(ExtractError::CommandLineNotFound { path: None })
}

async fn find_kernel(mount_point: &Path) -> Result<PathBuf, ExtractError> {
    for candidate in KERNEL_CANDIDATES {
        let path = mount_point.join(candidate);
        if fs::path_exists(&path).await? {
            return Ok(path);
        }
    }
    Err(ExtractError::KernelNotFound {
        mount_point: mount_point.to_path_buf(),
    })
}

/// Copy kernel and initrd from a mounted install CD into the work dir and
/// read the kernel command line from its grub config.
#[instrument(skip_all, fields(mount_point = %mount_point.display()))]
pub async fn copy_boot_artifacts(
    mount_point: &Path,
    paths: &WorkPaths,
) -> Result<BootCommandLine, ExtractError> {
    info!("copying kernel and initrd");

    let kernel = find_kernel(mount_point).await?;
    debug!(kernel = %kernel.display(), "found kernel");
    fs::copy_file(&kernel, paths.kernel_path()).await?;
    fs::copy_file(mount_point.join(INITRD_PATH), paths.initrd_path()).await?;

    let grub_config = mount_point.join(GRUB_CONFIG_PATH);
    if !fs::path_exists(&grub_config).await? {
        return Err(ExtractError::CommandLineNotFound {
            path: Some(grub_config),
        });
    }
    let config = fs::read_file_to_string(&grub_config).await?;
    let base = extract_command_line(&config).map_err(|_| ExtractError::CommandLineNotFound {
        path: Some(grub_config.clone()),
    })?;

    let cmdline = BootCommandLine::headless(&base);
    debug!(%cmdline, "extracted kernel command line");
    Ok(cmdline)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRUB_CFG: &str = r#"
menuentry 'NixOS 21.11 Installer' --class installer {
  linux /boot/bzImage ${isoboot} init=/nix/store/8nj2g1b0-nixos-system-nixos-21.11/init root=LABEL=nixos-minimal-21.11-x86_64 boot.shell_on_fail loglevel=4
  initrd /boot/initrd
}
menuentry 'NixOS 21.11 Installer (nomodeset)' --class nomodeset {
  linux /boot/bzImage ${isoboot} init=/nix/store/other/init root=LABEL=other nomodeset
}
"#;

    async fn mount_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let target = dir.path().join(path);
            fs::create_dir(target.parent().unwrap()).await.unwrap();
            fs::write_file(&target, contents.as_bytes()).await.unwrap();
        }
        dir
    }

    #[test]
    fn extracts_exact_match() {
        let text = "... init=/nix/var/nix/profiles/system/init root=LABEL=nixos ...";
        assert_eq!(
            extract_command_line(text).unwrap(),
            "init=/nix/var/nix/profiles/system/init root=LABEL=nixos"
        );
    }

    #[test]
    fn takes_first_match() {
        assert_eq!(
            extract_command_line(GRUB_CFG).unwrap(),
            "init=/nix/store/8nj2g1b0-nixos-system-nixos-21.11/init root=LABEL=nixos-minimal-21.11-x86_64"
        );
    }

    #[test]
    fn no_init_token() {
        let err = extract_command_line("linux /boot/bzImage quiet splash").unwrap_err();
        assert!(matches!(err, ExtractError::CommandLineNotFound { path: None }));
        assert_eq!(
            err.to_string(),
            "no `init=... root=LABEL=...` command line found"
        );
    }

    #[test]
    fn headless_suffix() {
        let cmdline = BootCommandLine::headless("init=/init root=LABEL=nixos");
        assert_eq!(
            cmdline.as_str(),
            "init=/init root=LABEL=nixos console=hvc0 loglevel=4"
        );
    }

    #[tokio::test]
    async fn copies_primary_kernel() {
        let mnt = mount_tree(&[
            ("boot/bzImage", "bz"),
            ("boot/Image", "img"),
            ("boot/initrd", "rd"),
            ("EFI/boot/grub.cfg", GRUB_CFG),
        ])
        .await;
        let work = tempfile::tempdir().unwrap();
        let paths = WorkPaths::new(work.path());

        let cmdline = copy_boot_artifacts(mnt.path(), &paths).await.unwrap();

        assert_eq!(tokio::fs::read(paths.kernel_path()).await.unwrap(), b"bz");
        assert_eq!(tokio::fs::read(paths.initrd_path()).await.unwrap(), b"rd");
        assert!(cmdline.as_str().ends_with(" console=hvc0 loglevel=4"));
    }

    #[tokio::test]
    async fn falls_back_to_image_kernel() {
        let mnt = mount_tree(&[
            ("boot/Image", "img"),
            ("boot/initrd", "rd"),
            ("EFI/boot/grub.cfg", GRUB_CFG),
        ])
        .await;
        let work = tempfile::tempdir().unwrap();
        let paths = WorkPaths::new(work.path());

        copy_boot_artifacts(mnt.path(), &paths).await.unwrap();

        assert_eq!(tokio::fs::read(paths.kernel_path()).await.unwrap(), b"img");
    }

    #[tokio::test]
    async fn missing_kernel() {
        let mnt = mount_tree(&[("boot/initrd", "rd"), ("EFI/boot/grub.cfg", GRUB_CFG)]).await;
        let work = tempfile::tempdir().unwrap();
        let paths = WorkPaths::new(work.path());

        let err = copy_boot_artifacts(mnt.path(), &paths).await.unwrap_err();

        assert!(matches!(err, ExtractError::KernelNotFound { .. }));
        assert!(!paths.kernel_path().exists());
    }

    #[tokio::test]
    async fn grub_config_without_command_line() {
        let mnt = mount_tree(&[
            ("boot/bzImage", "bz"),
            ("boot/initrd", "rd"),
            ("EFI/boot/grub.cfg", "menuentry 'memtest' {}"),
        ])
        .await;
        let work = tempfile::tempdir().unwrap();

        let err = copy_boot_artifacts(mnt.path(), &WorkPaths::new(work.path()))
            .await
            .unwrap_err();

        match err {
            ExtractError::CommandLineNotFound { path } => {
                assert_eq!(path, Some(mnt.path().join(GRUB_CONFIG_PATH)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_grub_config() {
        let mnt = mount_tree(&[("boot/bzImage", "bz"), ("boot/initrd", "rd")]).await;
        let work = tempfile::tempdir().unwrap();

        let err = copy_boot_artifacts(mnt.path(), &WorkPaths::new(work.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::CommandLineNotFound { .. }));
    }
}
