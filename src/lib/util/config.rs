//! Process-wide configuration (spec §6 "Environment").
//!
//! Mirrors the `FromStr` + `toml::from_str` + `.context(...)` shape of
//! `elba`'s `index::config::IndexConfig`.

use directories::ProjectDirs;
use failure::ResultExt;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::str::FromStr;

use util::errors::{Error, ErrorKind};

/// The three required environment items from spec §6, plus the optional
/// override tables spec §4.A/§4.G consult.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EsmConfig {
    /// Global artifact schema version. Bumping it invalidates every prior
    /// cache entry, since it's embedded in every build identifier.
    pub schema: u32,
    /// Host used for absolute URL substitution in emitted artifacts.
    pub public_domain: String,
    /// Root directory backing the blob store.
    pub storage_dir: PathBuf,
    /// `(name, version-prefix) -> fixed version` static override table
    /// consulted by request-path version resolution (spec §4.A).
    #[serde(default)]
    pub version_overrides: IndexMap<String, String>,
    /// `bare specifier -> registry package name` table consulted by the
    /// external rewriter when polyfilling a platform module that isn't one
    /// of the built-in `_node_*`/`_deno_std_node_*` shims (spec §4.G step 3).
    #[serde(default)]
    pub polyfill_packages: IndexMap<String, String>,
}

impl EsmConfig {
    /// `"development"`/`"production"`, matching the `process.env.NODE_ENV`
    /// define and the rewriter's build banner (spec §4.F/§4.G).
    pub fn node_env(dev: bool) -> &'static str {
        if dev {
            "development"
        } else {
            "production"
        }
    }
}

impl Default for EsmConfig {
    fn default() -> Self {
        let storage_dir = ProjectDirs::from("dev", "esm-cdn", "esm-cdn")
            .map(|dirs| dirs.cache_dir().join("builds"))
            .unwrap_or_else(|| PathBuf::from("builds"));

        EsmConfig {
            schema: 135,
            public_domain: "esm.sh".to_string(),
            storage_dir,
            version_overrides: IndexMap::new(),
            polyfill_packages: IndexMap::new(),
        }
    }
}

impl FromStr for EsmConfig {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        toml::from_str(raw)
            .context(ErrorKind::StoreError("invalid config".to_string()))
            .map_err(Error::from)
    }
}
