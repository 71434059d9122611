use std::path::{Path, PathBuf};

pub const DEFAULT_WORK_DIR: &str = "nixos-install";

pub const ISO_FILE: &str = "nixos-install.iso";
pub const KERNEL_FILE: &str = "kernel";
pub const INITRD_FILE: &str = "initrd";
pub const DISK_FILE: &str = "disk.img";
pub const INSTALL_SCRIPT_FILE: &str = "boot-installer";
pub const VM_CONF_FILE: &str = "vm.conf";

/// Everything a run produces lives directly in the work dir.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    work_dir: PathBuf,
}

impl WorkPaths {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn iso_path(&self) -> PathBuf {
        self.work_dir.join(ISO_FILE)
    }

    pub fn kernel_path(&self) -> PathBuf {
        self.work_dir.join(KERNEL_FILE)
    }

    pub fn initrd_path(&self) -> PathBuf {
        self.work_dir.join(INITRD_FILE)
    }

    pub fn disk_path(&self) -> PathBuf {
        self.work_dir.join(DISK_FILE)
    }

    pub fn install_script_path(&self) -> PathBuf {
        self.work_dir.join(INSTALL_SCRIPT_FILE)
    }

    pub fn vm_conf_path(&self) -> PathBuf {
        self.work_dir.join(VM_CONF_FILE)
    }
}
