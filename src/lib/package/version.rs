//! `PackageDescriptor.version` (spec §3): an exact semver, a 10-char git SHA
//! prefix, or the fixed `0.0.0` mirror sentinel.
//!
//! `elba::package::PackageId` carries a bare `semver::Version`; this is
//! generalized into a closed enum so the git/mirror invariants (spec §3:
//! "if `fromGit` then `version` is a 10-char hex prefix of a commit") are
//! enforced by construction rather than by convention.

use semver::Version;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use util::errors::{Error, ErrorKind};

pub const GIT_SHA_LEN: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageVersion {
    Exact(Version),
    GitSha(String),
    Mirror,
}

impl PackageVersion {
    pub fn exact(v: Version) -> Self {
        PackageVersion::Exact(v)
    }

    /// Build a `GitSha`, truncating (and validating) to the 10-hex-char
    /// prefix spec §3 requires.
    pub fn git_sha(full_sha: &str) -> Result<Self, Error> {
        if full_sha.len() < GIT_SHA_LEN || !full_sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ErrorKind::InvalidDescriptor(format!(
                "not a valid commit sha: {}",
                full_sha
            ))
            .into());
        }
        Ok(PackageVersion::GitSha(full_sha[..GIT_SHA_LEN].to_string()))
    }

    pub fn mirror() -> Self {
        PackageVersion::Mirror
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, PackageVersion::Exact(_))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PackageVersion::Exact(v) => write!(f, "{}", v),
            PackageVersion::GitSha(sha) => write!(f, "{}", sha),
            PackageVersion::Mirror => write!(f, "0.0.0"),
        }
    }
}

impl FromStr for PackageVersion {
    type Err = Error;

    /// Parses a *non-git, non-mirror* version string, i.e. an exact semver.
    /// Git and mirror versions are constructed explicitly by the request
    /// parser (spec §4.A), which already knows which case it's in.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
            .map(PackageVersion::Exact)
            .map_err(|e| ErrorKind::InvalidDescriptor(format!("invalid version `{}`: {}", s, e)).into())
    }
}

impl Serialize for PackageVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "0.0.0" {
            return Ok(PackageVersion::Mirror);
        }
        if s.len() == GIT_SHA_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(PackageVersion::GitSha(s));
        }
        PackageVersion::from_str(&s).map_err(de::Error::custom)
    }
}
