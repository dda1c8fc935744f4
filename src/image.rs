use std::{fmt::Display, str::FromStr, sync::OnceLock};

use docker_api::opts::ImageFilter;
use regex::Regex;

use crate::error::{Error, Result};

/// A parsed image reference: `[registry/]repository[:tag|@sha256:digest]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerImage {
    raw_name: String,
    registry: Option<String>,
    repository: String,
    version: Version,
}

impl DockerImage {
    pub fn full_name(&self) -> &str {
        &self.raw_name
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Same registry and repository, pinned to `tag`.
    pub fn with_tag(&self, tag: &str) -> Result<DockerImage> {
        let name = match &self.registry {
            Some(registry) => format!("{registry}/{}:{tag}", self.repository),
            None => format!("{}:{tag}", self.repository),
        };
        name.parse()
    }
}

impl Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw_name)
    }
}

impl FromStr for DockerImage {
    type Err = Error;

    fn from_str(full_image_name: &str) -> Result<Self> {
        let (registry, repository_and_version) = match full_image_name.split_once('/') {
            Some((registry, repository_and_version))
                if registry.contains('.')
                    || registry.contains(':')
                    || registry.contains("localhost") =>
            {
                (Some(registry), repository_and_version)
            }
            _ => (None, full_image_name),
        };

        let (repository, version) = match repository_and_version.split_once("@sha256:") {
            Some((repository, digest)) => (repository, Version::from_sha256(full_image_name, digest)?),
            None => match repository_and_version.split_once(':') {
                Some((repository, tag)) => (repository, Version::from_tag(full_image_name, tag)?),
                None => (repository_and_version, Version::Any),
            },
        };
        if repository.is_empty() || repository.contains('@') || repository.contains(':') {
            return Err(Error::invalid_image(
                full_image_name,
                format!("invalid repository name: {repository}"),
            ));
        }
        Ok(DockerImage {
            raw_name: full_image_name.into(),
            registry: registry.map(Into::into),
            repository: repository.into(),
            version,
        })
    }
}

impl From<&DockerImage> for ImageFilter {
    fn from(image: &DockerImage) -> Self {
        let reference = match &image.registry {
            Some(registry) => format!("{registry}/{}", image.repository),
            None => image.repository.clone(),
        };
        let tag = match &image.version {
            Version::Any => None,
            Version::Sha256(digest) => Some(digest.clone()),
            Version::Tag(tag) => Some(tag.clone()),
        };
        ImageFilter::Reference(reference, tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Version {
    Any,
    Sha256(String),
    Tag(String),
}

impl Version {
    fn from_sha256(image: &str, hash: &str) -> Result<Version> {
        static DIGEST: OnceLock<Regex> = OnceLock::new();
        let re_hash = DIGEST.get_or_init(|| {
            Regex::new("^[0-9a-fA-F]{32,}$").expect("digest pattern is a valid regex")
        });
        if re_hash.is_match(hash) {
            Ok(Version::Sha256(hash.into()))
        } else {
            Err(Error::invalid_image(image, format!("invalid sha256 hash version: {hash}")))
        }
    }

    fn from_tag(image: &str, tag: &str) -> Result<Version> {
        static TAG: OnceLock<Regex> = OnceLock::new();
        let re_tag = TAG.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("tag pattern is a valid regex")
        });
        if re_tag.is_match(tag) {
            Ok(Version::Tag(tag.into()))
        } else {
            Err(Error::invalid_image(image, format!("invalid tag version: {tag}")))
        }
    }
}
