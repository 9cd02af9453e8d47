//! Base images and the references the image cache keys on.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Bump to invalidate every cached intermediate image.
pub const BUILDD_REVISION: u32 = 0;

/// A base image: version plus a revision of the bootstrap applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Image version, e.g. `20.04`.
    pub version: String,
    /// Bootstrap revision.
    pub revision: u32,
}

impl ImageRef {
    /// Create an image reference.
    pub fn new(version: impl Into<String>, revision: u32) -> Self {
        Self {
            version: version.into(),
            revision,
        }
    }

    /// `major.minor` of the version as integers, if it has that shape.
    pub fn numeric_version(&self) -> Option<(u32, u32)> {
        let (major, minor) = self.version.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    /// Cache alias for this image on `remote_name`: `<remote>-<ver>-r<rev>`
    /// with dots in the version replaced by dashes.
    pub fn cache_alias(&self, remote_name: &str) -> String {
        format!(
            "{remote_name}-{}-r{}",
            self.version.replace('.', "-"),
            self.revision
        )
    }
}

/// Ubuntu buildd images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilddImage {
    /// 16.04
    Xenial,
    /// 18.04
    Bionic,
    /// 20.04
    Focal,
}

impl BuilddImage {
    /// Version string as published on the image remote.
    pub fn version(&self) -> &'static str {
        match self {
            Self::Xenial => "16.04",
            Self::Bionic => "18.04",
            Self::Focal => "20.04",
        }
    }

    /// Reference at the current bootstrap revision.
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::new(self.version(), BUILDD_REVISION)
    }
}

impl fmt::Display for BuilddImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version())
    }
}

impl FromStr for BuilddImage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "16.04" | "xenial" => Ok(Self::Xenial),
            "18.04" | "bionic" => Ok(Self::Bionic),
            "20.04" | "focal" => Ok(Self::Focal),
            other => Err(CoreError::Config(format!("unknown buildd image: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_alias() {
        let image = ImageRef::new("20.04", 0);
        assert_eq!(image.cache_alias("ubuntu-buildd"), "ubuntu-buildd-20-04-r0");
        assert_eq!(
            ImageRef::new("18.04", 3).cache_alias("mirror"),
            "mirror-18-04-r3"
        );
    }

    #[test]
    fn test_numeric_version() {
        assert_eq!(ImageRef::new("18.04", 0).numeric_version(), Some((18, 4)));
        assert_eq!(ImageRef::new("focal", 0).numeric_version(), None);
    }

    #[test]
    fn test_buildd_image_parse() {
        assert_eq!("focal".parse::<BuilddImage>().unwrap(), BuilddImage::Focal);
        assert_eq!("16.04".parse::<BuilddImage>().unwrap(), BuilddImage::Xenial);
        assert!("22.04".parse::<BuilddImage>().is_err());
        assert_eq!(BuilddImage::Bionic.image_ref(), ImageRef::new("18.04", 0));
    }
}
