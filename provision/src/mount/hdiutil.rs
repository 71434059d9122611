use std::{path::Path, time::Duration};

use async_trait::async_trait;
use nixvm_cmd::Command;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{BlockImageMounter, MountError, MountHandle};

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// macOS disk images: `hdiutil attach -nomount` then `mount -t cd9660`.
#[derive(Debug, Clone)]
pub struct HdiutilMounter {
    settle_delay: Duration,
}

impl Default for HdiutilMounter {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl HdiutilMounter {
    /// Pause between attaching and mounting. Mounting straight after attach
    /// fails intermittently on fast Apple Silicon machines; waiting makes
    /// that rarer but does not rule it out.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    async fn detach_device(device: &str) -> Result<(), MountError> {
        Command::new("hdiutil")
            .args(["detach", device])
            .run()
            .await
            .map(|_| ())
            .map_err(|source| MountError::Detach {
                device: device.to_owned(),
                source,
            })
    }
}

/// The device node is the first field of the first line `hdiutil attach`
/// prints, e.g. `/dev/disk4` from `/dev/disk4  FDisk_partition_scheme`.
pub(crate) fn parse_attach_device(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .next()
        .filter(|device| device.starts_with("/dev/"))
}

#[async_trait]
impl BlockImageMounter for HdiutilMounter {
    fn name(&self) -> &'static str {
        "hdiutil"
    }

    fn platform_supported(&self) -> bool {
        cfg!(target_os = "macos")
    }

    async fn attach_and_mount(
        &self,
        image: &Path,
        mount_point: &Path,
    ) -> Result<MountHandle, MountError> {
        let output = Command::new("hdiutil")
            .args(["attach", "-nomount"])
            .arg(image)
            .run()
            .await
            .map_err(|source| MountError::Attach {
                image: image.to_path_buf(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let device = parse_attach_device(&stdout)
            .ok_or_else(|| MountError::NoDevice {
                image: image.to_path_buf(),
                output: stdout.to_string(),
            })?
            .to_owned();
        debug!(%device, "attached");

        sleep(self.settle_delay).await;

        let mounted = Command::new("mount")
            .args(["-t", "cd9660"])
            .arg(&device)
            .arg(mount_point)
            .run()
            .await;

        if let Err(source) = mounted {
            if let Err(error) = Self::detach_device(&device).await {
                warn!("{error}");
            }
            return Err(MountError::Mount {
                device,
                mount_point: mount_point.to_path_buf(),
                source,
            });
        }

        Ok(MountHandle {
            device,
            mount_point: mount_point.to_path_buf(),
        })
    }

    async fn detach(&self, handle: &MountHandle) -> Result<(), MountError> {
        let unmounted = Command::new("umount")
            .arg(&handle.mount_point)
            .run()
            .await
            .map(|_| ())
            .map_err(|source| MountError::Unmount {
                mount_point: handle.mount_point.clone(),
                source,
            });

        if let Err(error) = &unmounted {
            warn!("{error}");
        }

        let detached = Self::detach_device(&handle.device).await;

        unmounted.and(detached)
    }
}
