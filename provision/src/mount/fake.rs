use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use nixvm_cmd::CommandError;

use super::{BlockImageMounter, MountError, MountHandle};

/// Stands in for a host mounter: "mounting" writes a fixed file tree into the
/// mount point and detaching empties it again.
pub(crate) struct FakeMounter {
    files: Vec<(PathBuf, Vec<u8>)>,
    supported: bool,
    fail_attach: bool,
    fail_mount: bool,
    fail_detach: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeMounter {
    pub(crate) fn new<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(path, contents)| (PathBuf::from(path), contents.as_bytes().to_vec()))
                .collect(),
            supported: true,
            fail_attach: false,
            fail_mount: false,
            fail_detach: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub(crate) fn failing_attach(mut self) -> Self {
        self.fail_attach = true;
        self
    }

    pub(crate) fn failing_mount(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    pub(crate) fn failing_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BlockImageMounter for FakeMounter {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn platform_supported(&self) -> bool {
        self.supported
    }

    async fn attach_and_mount(
        &self,
        image: &Path,
        mount_point: &Path,
    ) -> Result<MountHandle, MountError> {
        self.record("attach_and_mount");

        if self.fail_attach {
            return Err(MountError::Attach {
                image: image.to_path_buf(),
                source: CommandError::Failure {
                    command: "hdiutil attach -nomount".to_owned(),
                    stderr: "hdiutil: attach failed - image not recognized".to_owned(),
                },
            });
        }

        if self.fail_mount {
            return Err(MountError::Mount {
                device: "/dev/disk9".to_owned(),
                mount_point: mount_point.to_path_buf(),
                source: CommandError::Failure {
                    command: "mount -t cd9660".to_owned(),
                    stderr: "mount_cd9660: Device not configured".to_owned(),
                },
            });
        }

        for (path, contents) in &self.files {
            let target = mount_point.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, contents).unwrap();
        }

        Ok(MountHandle {
            device: "/dev/disk9".to_owned(),
            mount_point: mount_point.to_path_buf(),
        })
    }

    async fn detach(&self, handle: &MountHandle) -> Result<(), MountError> {
        self.record("detach");

        if self.fail_detach {
            return Err(MountError::Unmount {
                mount_point: handle.mount_point.clone(),
                source: CommandError::Failure {
                    command: "umount".to_owned(),
                    stderr: "Resource busy".to_owned(),
                },
            });
        }

        for entry in std::fs::read_dir(&handle.mount_point).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                std::fs::remove_dir_all(path).unwrap();
            } else {
                std::fs::remove_file(path).unwrap();
            }
        }
        Ok(())
    }
}
