//! `PackageDescriptor` (spec §3): the canonical identity of a buildable
//! package unit.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use package::name::Name;
use package::version::PackageVersion;

/// Canonical identity of a buildable package unit (spec §3).
///
/// Two descriptors are equal iff `name`, `version`, and `submodule` match;
/// `from_git`/`from_mirror` are provenance flags, not part of identity,
/// since the same `(name, version, submodule)` triple always resolves to
/// the same artifact regardless of how the version was discovered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: Name,
    pub version: PackageVersion,
    /// Path fragment with known module suffixes and a trailing `/index`
    /// stripped (spec §3). `None` means "the package's main entry".
    pub submodule: Option<String>,
    pub from_git: bool,
    pub from_mirror: bool,
}

impl PackageDescriptor {
    pub fn new(name: Name, version: PackageVersion, submodule: Option<String>) -> Self {
        PackageDescriptor {
            name,
            version,
            submodule,
            from_git: false,
            from_mirror: false,
        }
    }

    pub fn git(name: Name, version: PackageVersion, submodule: Option<String>) -> Self {
        PackageDescriptor {
            name,
            version,
            submodule,
            from_git: true,
            from_mirror: false,
        }
    }

    pub fn mirror(name: Name, submodule: Option<String>) -> Self {
        PackageDescriptor {
            name,
            version: PackageVersion::mirror(),
            submodule,
            from_git: false,
            from_mirror: true,
        }
    }

    /// The filename stem used in the build identifier (spec §4.D):
    /// `submodule` if set, else the unscoped basename of `name`.
    pub fn filename(&self) -> &str {
        match &self.submodule {
            Some(sub) => sub,
            None => self.name.unscoped(),
        }
    }
}

/// Strip a known module suffix (`.js`, `.mjs`, `.cjs`) and a trailing
/// `/index`, per spec §3's `submodule` normalization rule.
pub fn normalize_submodule(raw: &str) -> Option<String> {
    let raw = raw.trim_matches('/');
    if raw.is_empty() {
        return None;
    }
    let mut s = raw;
    for suffix in &[".mjs", ".cjs", ".js"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped;
            break;
        }
    }
    let s = s.strip_suffix("/index").unwrap_or(s);
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl fmt::Display for PackageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.submodule {
            Some(sub) => write!(f, "{}@{}/{}", self.name, self.version, sub),
            None => write!(f, "{}@{}", self.name, self.version),
        }
    }
}

impl PartialEq for PackageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.submodule == other.submodule
    }
}

impl Eq for PackageDescriptor {}

impl PartialOrd for PackageDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageDescriptor {
    /// Pins are sorted by the lexicographic order of their canonical
    /// `Display` form (spec §3 `DependencyPinSet`).
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}
