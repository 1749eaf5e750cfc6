//! Package name identity (spec §3 `PackageDescriptor.name`, §4.A).
//!
//! Generalized from `elba::package::Name`, which cached a package's
//! canonical `group/name` serialization behind an `Rc` so that cloning an
//! identity never re-allocates or re-validates the string. Registry names
//! here aren't forced into a two-part split: a name may be unscoped
//! (`"react"`), scoped (`"@babel/core"`), or a content-mirror identity
//! (`"~1a2b3c4d"`).

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use util::errors::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    inner: Rc<String>,
}

impl Name {
    /// Validate and construct a `Name` from its canonical string form.
    ///
    /// Non-empty is the only hard invariant (spec §3); scoping and mirror
    /// detection are read off the string rather than enforced here, since a
    /// `~`-prefixed name is validated for hex-ness only when `fromMirror`
    /// resolution actually runs (spec §4.A).
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ErrorKind::InvalidDescriptor("empty package name".to_string()).into());
        }
        Ok(Name {
            inner: Rc::new(raw),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// `true` for scoped registry names (`@scope/name`).
    pub fn is_scoped(&self) -> bool {
        self.inner.starts_with('@')
    }

    /// `true` for content-mirror identities (`~<hex>`), spec §4.A.
    pub fn is_mirror(&self) -> bool {
        self.inner.starts_with('~')
            && self.inner.len() > 1
            && self.inner[1..].chars().all(|c| c.is_ascii_hexdigit())
    }

    /// The bare name with any `@scope/` prefix stripped, used to probe a
    /// sibling `@types/<name>` declaration-only package (spec §4.C step 2).
    pub fn unscoped(&self) -> &str {
        match self.inner.find('/') {
            Some(idx) if self.is_scoped() => &self.inner[idx + 1..],
            _ => &self.inner,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::new(s.to_string())
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Name::new(s).map_err(de::Error::custom)
    }
}
