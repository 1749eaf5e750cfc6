//! Component B: Registry & Install Adapter (spec §4.B, §6 "Registry
//! contract").
//!
//! The wire-level registry transport and installer process are external
//! collaborators (spec §1); this module owns the *shape* of that boundary
//! (the `RegistryClient` trait and the `RegistryPackage` metadata value)
//! plus one concrete default implementation (`http`) good enough to drive
//! the rest of the pipeline end to end.

pub mod http;

use indexmap::IndexMap;
use semver::Version;
use serde_json::Value;
use std::path::Path;

use package::descriptor::PackageDescriptor;
use util::errors::Res;

/// Registry metadata for a single package version (spec §6). A superset of
/// this (plus build-time derived fields) becomes a `ResolvedMeta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryPackage {
    pub name: String,
    pub version: Version,
    pub main: Option<String>,
    pub module: Option<String>,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub types: Option<String>,
    pub typings: Option<String>,
    pub exports: Option<Value>,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: IndexMap<String, String>,
}

impl RegistryPackage {
    /// `true` if the sibling `@types/<name>` package would actually be
    /// useful (spec §4.C step 2: "it declares any of `types`, `typings`, `main`").
    pub fn declares_any_entry(&self) -> bool {
        self.types.is_some() || self.typings.is_some() || self.main.is_some()
    }
}

/// A single ref from a git remote's ref advertisement (spec §4.A, §4.B
/// `listRepoRefs`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitRef {
    /// `HEAD`, `refs/tags/<v>`, or `refs/heads/<v>`.
    pub name: String,
    pub sha: String,
}

/// Error classification a `RegistryClient` surfaces (spec §4.B): callers
/// match on `ErrorKind` via `failure::Fail::downcast` where they need to
/// distinguish `NotFound` from transport failure (e.g. the `@types/<name>`
/// probe in component C, spec §4.C step 2).
pub trait RegistryClient {
    /// Fetch metadata for `(name, versionSpec)`. `versionSpec` may be an
    /// exact version, a range, or `"latest"`. Returns the concrete resolved
    /// package plus the submodule fragment, if the front-end's path
    /// targeted one (unused by most adapters; kept for contract parity with
    /// spec §6).
    fn get_package_info(&self, name: &str, version_spec: &str) -> Res<(RegistryPackage, Option<String>)>;

    /// Install `specs` (and their transitive dependency closures) into a
    /// node-style module tree rooted at `dir/node_modules`.
    fn install_closure(&self, dir: &Path, specs: &[PackageDescriptor]) -> Res<()>;

    /// List the remote's ref advertisement for git-based resolution
    /// (spec §4.A).
    fn list_repo_refs(&self, git_url: &str) -> Res<Vec<GitRef>>;
}
