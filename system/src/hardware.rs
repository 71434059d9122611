use std::fmt::{self, Display, Formatter};

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("cpu count must be at least 1")]
    ZeroCpuCount,

    #[error("memory size must be a whole number of MiB, at least 1 MiB: got {size}")]
    MemoryNotWholeMib { size: ByteSize },

    #[error("disk size of {gib} GiB is too large")]
    DiskTooLarge { gib: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuCount(u16);

impl CpuCount {
    pub const fn new(count: u16) -> Self {
        Self(count)
    }

    pub fn try_new(count: u16) -> Result<Self, SizeError> {
        if count == 0 {
            return Err(SizeError::ZeroCpuCount);
        }
        Ok(Self(count))
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl Default for CpuCount {
    fn default() -> Self {
        Self(4)
    }
}

impl Display for CpuCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const MIB: u64 = 1024 * 1024;

/// Guest memory. VM runtimes take this in whole mebibytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySize(ByteSize);

impl MemorySize {
    pub const fn new(size: ByteSize) -> Self {
        Self(size)
    }

    /// Accepts only sizes that render exactly as a non-zero MiB count.
    pub fn try_new(size: ByteSize) -> Result<Self, SizeError> {
        let bytes = size.as_u64();
        if bytes == 0 || bytes % MIB != 0 {
            return Err(SizeError::MemoryNotWholeMib { size });
        }
        Ok(Self(size))
    }

    pub fn as_mib(&self) -> u64 {
        self.0.as_u64() / MIB
    }
}

impl Default for MemorySize {
    fn default() -> Self {
        Self(ByteSize::mib(4096))
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_mib())
    }
}

/// Size of the guest's virtual disk, in whole gibibytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib)
    }

    /// Like [`DiskSize::from_gib`], but rejects sizes whose byte count does
    /// not fit in a `u64`.
    pub fn try_from_gib(gib: u64) -> Result<Self, SizeError> {
        let size = Self(gib);
        match size.as_bytes() {
            Some(_) => Ok(size),
            None => Err(SizeError::DiskTooLarge { gib }),
        }
    }

    pub fn as_gib(&self) -> u64 {
        self.0
    }

    /// `None` when the byte count overflows.
    pub fn as_bytes(&self) -> Option<u64> {
        self.0.checked_mul(ByteSize::gib(1).as_u64())
    }
}

impl Default for DiskSize {
    fn default() -> Self {
        Self(4)
    }
}

impl Display for DiskSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} GiB", self.0)
    }
}
