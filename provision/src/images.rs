use std::{collections::BTreeMap, path::Path};

use nixvm_fs::{self as fs, FsError};
use nixvm_http::{HttpClient, HttpError};
use nixvm_system::{Arch, UnsupportedArchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("unsupported architecture: '{identifier}'")]
    UnsupportedArchitecture { identifier: String },
}

impl From<UnsupportedArchError> for LocatorError {
    fn from(error: UnsupportedArchError) -> Self {
        LocatorError::UnsupportedArchitecture {
            identifier: error.identifier,
        }
    }
}

#[derive(Error, Debug)]
pub enum ImagesListError {
    #[error("Failed to parse images list: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("images list has more than one image for {arch}: '{first}' and '{second}'")]
    DuplicateArch {
        arch: Arch,
        first: String,
        second: String,
    },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub arch: Arch,
    pub url: Url,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesList(BTreeMap<String, ImageEntry>);

/// Installer image URL for each supported architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSources(BTreeMap<Arch, Url>);

impl ImageSources {
    /// The images shipped with this crate.
    pub fn builtin() -> Result<Self, ImagesListError> {
        let images_str = include_str!("../images.toml");
        let images_list: ImagesList = toml::from_str(images_str)?;
        Self::from_list(images_list)
    }

    pub fn from_list(list: ImagesList) -> Result<Self, ImagesListError> {
        let mut names: BTreeMap<Arch, String> = BTreeMap::new();
        let mut sources = BTreeMap::new();
        for (name, ImageEntry { arch, url }) in list.0 {
            if let Some(first) = names.insert(arch, name.clone()) {
                return Err(ImagesListError::DuplicateArch {
                    arch,
                    first,
                    second: name,
                });
            }
            sources.insert(arch, url);
        }
        Ok(Self(sources))
    }

    pub fn with_url(mut self, arch: Arch, url: Url) -> Self {
        self.0.insert(arch, url);
        self
    }

    pub fn get(&self, arch: Arch) -> Option<&Url> {
        self.0.get(&arch)
    }

    /// Look up the installer URL for a host architecture identifier such as
    /// `x86_64` or `arm`.
    pub fn resolve_url(&self, identifier: &str) -> Result<&Url, LocatorError> {
        let arch: Arch = identifier.parse()?;
        self.get(arch)
            .ok_or_else(|| LocatorError::UnsupportedArchitecture {
                identifier: identifier.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Download on every run, replacing any earlier image.
    #[default]
    Always,
    /// Reuse an image already in the work dir.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: u64 },
    Reused,
}

#[instrument(skip_all, fields(url = %url, path = %image_path.display(), ?pull))]
pub async fn fetch_image<F>(
    http: &HttpClient,
    url: &Url,
    image_path: &Path,
    pull: PullPolicy,
    on_progress: F,
) -> Result<FetchOutcome, FetchError>
where
    F: FnMut(u8),
{
    if pull == PullPolicy::Missing && fs::path_exists(image_path).await? {
        info!("reusing existing installer image");
        return Ok(FetchOutcome::Reused);
    }

    info!("downloading installer image");
    let bytes = http.download_file(url, image_path, on_progress).await?;
    info!(bytes, "installer image downloaded");

    Ok(FetchOutcome::Downloaded { bytes })
}
