use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use nixvm_fs::{self as fs, FsError};
use nixvm_system::{CpuCount, MemorySize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::extract::BootCommandLine;
use crate::paths::{DISK_FILE, INITRD_FILE, ISO_FILE, KERNEL_FILE};

pub const DEFAULT_RUNTIME: &str = "vmcli";

/// Init of whatever system profile is current, for booting an installed NixOS.
pub const INSTALLED_INIT: &str = "init=/nix/var/nix/profiles/system/init";

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("failed to write launcher '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: FsError,
    },
}

/// What the VM runtime needs to boot the guest. Paths are relative to the
/// work dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSpec {
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub disk: PathBuf,
    pub cmdline: BootCommandLine,
    pub cpu_count: CpuCount,
    pub memory_size: MemorySize,
}

impl BootSpec {
    /// Boot files under their usual names in the work dir.
    pub fn new(cmdline: BootCommandLine, cpu_count: CpuCount, memory_size: MemorySize) -> Self {
        Self {
            kernel: PathBuf::from(KERNEL_FILE),
            initrd: PathBuf::from(INITRD_FILE),
            disk: PathBuf::from(DISK_FILE),
            cmdline,
            cpu_count,
            memory_size,
        }
    }

    /// Command line for a system installed from the CD.
    pub fn installed_cmdline() -> BootCommandLine {
        BootCommandLine::headless(INSTALLED_INIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Shell script booting the install CD through the VM runtime.
    InstallScript {
        work_dir: PathBuf,
        runtime: String,
        cdrom: PathBuf,
        boot: BootSpec,
    },
    /// `key=value` config for booting the installed system.
    VmConf { boot: BootSpec },
}

impl Launcher {
    pub fn install_script(work_dir: &Path, runtime: &str, boot: BootSpec) -> Self {
        Launcher::InstallScript {
            work_dir: work_dir.to_path_buf(),
            runtime: runtime.to_owned(),
            cdrom: PathBuf::from(ISO_FILE),
            boot,
        }
    }

    pub fn vm_conf(boot: BootSpec) -> Self {
        Launcher::VmConf { boot }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Launcher::InstallScript { .. } => 0o755,
            Launcher::VmConf { .. } => 0o644,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Launcher::InstallScript {
                work_dir,
                runtime,
                cdrom,
                boot,
            } => render_install_script(work_dir, runtime, cdrom, boot),
            Launcher::VmConf { boot } => render_vm_conf(boot),
        }
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(value))
}

fn render_install_script(work_dir: &Path, runtime: &str, cdrom: &Path, boot: &BootSpec) -> String {
    let cpu_count = boot.cpu_count.to_string();
    let memory_size = boot.memory_size.to_string();
    let disk = boot.disk.to_string_lossy();
    let cdrom = cdrom.to_string_lossy();
    let kernel = boot.kernel.to_string_lossy();
    let initrd = boot.initrd.to_string_lossy();

    let args: [(&str, &str); 7] = [
        ("--cpu-count", &cpu_count),
        ("--memory-size", &memory_size),
        ("--disk", &disk),
        ("--cdrom", &cdrom),
        ("--kernel", &kernel),
        ("--initrd", &initrd),
        ("--cmdline", boot.cmdline.as_str()),
    ];

    let args = args
        .iter()
        .map(|(flag, value)| format!("{flag} {}", escape(value)))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "#!/bin/sh\ncd {}\necho Booting NixOS install CD, please be patient...\nexec {} {args}\n",
        escape(&work_dir.to_string_lossy()),
        escape(runtime),
    )
}

fn render_vm_conf(boot: &BootSpec) -> String {
    format!(
        "kernel={}\ninitrd={}\ncmdline={}\ncpu-count={}\nmemory-size={}\ndisk={}\n",
        boot.kernel.display(),
        boot.initrd.display(),
        boot.cmdline,
        boot.cpu_count,
        boot.memory_size,
        boot.disk.display(),
    )
}

#[instrument(skip_all, fields(path = %path.display()))]
pub async fn write_launcher(path: &Path, launcher: &Launcher) -> Result<(), LauncherError> {
    info!("writing launcher");
    let map_err = |source| LauncherError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write_file(path, launcher.render().as_bytes())
        .await
        .map_err(map_err)?;

    #[cfg(unix)]
    fs::set_mode(path, launcher.mode()).await.map_err(map_err)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HEADLESS_CMDLINE_SUFFIX;
    use bytesize::ByteSize;

    fn install_boot() -> BootSpec {
        BootSpec::new(
            BootCommandLine::headless("init=/nix/store/abc/init root=LABEL=nixos-21.11"),
            CpuCount::default(),
            MemorySize::default(),
        )
    }

    #[test]
    fn install_script_invokes_runtime() {
        let launcher = Launcher::install_script(
            Path::new("/Users/me/nixos-install"),
            DEFAULT_RUNTIME,
            install_boot(),
        );

        assert_eq!(
            launcher.render(),
            "#!/bin/sh\n\
             cd /Users/me/nixos-install\n\
             echo Booting NixOS install CD, please be patient...\n\
             exec vmcli --cpu-count 4 --memory-size 4096 --disk disk.img \
             --cdrom nixos-install.iso --kernel kernel --initrd initrd \
             --cmdline 'init=/nix/store/abc/init root=LABEL=nixos-21.11 console=hvc0 loglevel=4'\n"
        );
    }

    #[test]
    fn install_script_quotes_work_dir() {
        let launcher = Launcher::install_script(
            Path::new("/Users/me/VM images"),
            DEFAULT_RUNTIME,
            install_boot(),
        );
        assert!(launcher.render().contains("cd '/Users/me/VM images'\n"));
    }

    #[test]
    fn cpu_count_is_independent_of_disk() {
        let mut boot = install_boot();
        boot.cpu_count = CpuCount::new(2);
        boot.memory_size = MemorySize::new(ByteSize::gib(8));
        let script = Launcher::install_script(Path::new("/w"), "vmcli", boot).render();
        assert!(script.contains("--cpu-count 2 --memory-size 8192 "));
    }

    #[test]
    fn vm_conf_for_installed_system() {
        let boot = BootSpec::new(
            BootSpec::installed_cmdline(),
            CpuCount::default(),
            MemorySize::default(),
        );

        assert_eq!(
            Launcher::vm_conf(boot).render(),
            "kernel=kernel\n\
             initrd=initrd\n\
             cmdline=init=/nix/var/nix/profiles/system/init console=hvc0 loglevel=4\n\
             cpu-count=4\n\
             memory-size=4096\n\
             disk=disk.img\n"
        );
    }

    #[test]
    fn installed_cmdline_has_headless_suffix() {
        assert!(
            BootSpec::installed_cmdline()
                .as_str()
                .ends_with(HEADLESS_CMDLINE_SUFFIX)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_is_executable_and_conf_is_not() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("boot-installer");
        let conf = tmp.path().join("vm.conf");

        write_launcher(&script, &Launcher::install_script(tmp.path(), "vmcli", install_boot()))
            .await
            .unwrap();
        write_launcher(&conf, &Launcher::vm_conf(install_boot()))
            .await
            .unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&script), 0o755);
        assert_eq!(mode(&conf), 0o644);
    }

    #[tokio::test]
    async fn unwritable_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = tmp.path().join("missing").join("vm.conf");

        let err = write_launcher(&conf, &Launcher::vm_conf(install_boot()))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Write { .. }));
    }
}
