//! Default `RegistryClient`: a blocking HTTP registry fetch plus a
//! content-addressed local package store, symlinked into each build's
//! scratch `node_modules` (spec §4.B).
//!
//! Grounded on `elba::retrieve::cache::Cache::load`'s check-before-fetch
//! shape (look in the local store first, only hit the network on a miss)
//! and the tarball-extraction/flat-layout approach common to npm-compatible
//! installers (see `other_examples` npm installer references).

use failure::ResultExt;
use flate2::read::GzDecoder;
use git2::Remote;
use shell_escape;
use slog::Logger;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;

use package::descriptor::PackageDescriptor;
use registry::{GitRef, RegistryClient, RegistryPackage};
use util::errors::{ErrorKind, Res};
use util::hash::hash_parts;

pub struct HttpRegistryClient {
    client: reqwest::Client,
    registry_url: String,
    /// Content-addressed store of previously-installed packages, shared
    /// across builds so repeated dependencies aren't re-downloaded.
    store_dir: PathBuf,
    logger: Logger,
}

impl HttpRegistryClient {
    pub fn new(registry_url: impl Into<String>, store_dir: PathBuf, logger: Logger) -> Self {
        let _ = fs::create_dir_all(&store_dir);
        HttpRegistryClient {
            client: reqwest::Client::new(),
            registry_url: registry_url.into(),
            store_dir,
            logger,
        }
    }

    fn store_path(&self, spec: &PackageDescriptor) -> PathBuf {
        let hash = hash_parts(vec![spec.name.as_str(), &spec.version.to_string()]);
        self.store_dir.join(hash)
    }

    fn fetch_and_extract(&self, spec: &PackageDescriptor, dest: &Path) -> Res<()> {
        let tarball_url = format!(
            "{}/{}/-/{}-{}.tgz",
            self.registry_url,
            spec.name,
            spec.name.as_str().rsplit('/').next().unwrap_or(spec.name.as_str()),
            spec.version
        );

        let mut resp = self
            .client
            .get(&tarball_url)
            .send()
            .context(ErrorKind::NetworkError(format!("fetching {}", tarball_url)))?;

        if !resp.status().is_success() {
            return Err(ErrorKind::NotFound(format!(
                "{} responded {}",
                tarball_url,
                resp.status()
            ))
            .into());
        }

        slog::debug!(
            self.logger,
            "reproduce manually";
            "cmd" => format!("curl {} | tar xz", shell_escape::escape(tarball_url.clone().into()))
        );

        let mut bytes = Vec::new();
        resp.read_to_end(&mut bytes)
            .context(ErrorKind::NetworkError("reading tarball body".to_string()))?;

        fs::create_dir_all(dest)
            .context(ErrorKind::InstallError("creating store entry".to_string()))?;

        let decoder = GzDecoder::new(bytes.as_slice());
        let mut archive = Archive::new(decoder);
        archive
            .unpack(dest)
            .context(ErrorKind::InstallError(format!("unpacking {}", tarball_url)))?;

        Ok(())
    }
}

impl RegistryClient for HttpRegistryClient {
    fn get_package_info(&self, name: &str, version_spec: &str) -> Res<(RegistryPackage, Option<String>)> {
        let url = format!("{}/{}/{}", self.registry_url, name, version_spec);
        let mut resp = self
            .client
            .get(&url)
            .send()
            .context(ErrorKind::NetworkError(format!("fetching {}", url)))?;

        if resp.status().as_u16() == 404 {
            return Err(ErrorKind::NotFound(format!("{}@{}", name, version_spec)).into());
        }
        if !resp.status().is_success() {
            return Err(ErrorKind::NetworkError(format!("{} responded {}", url, resp.status())).into());
        }

        let pkg: RegistryPackage = resp
            .json()
            .context(ErrorKind::NetworkError("decoding registry metadata".to_string()))?;

        Ok((pkg, None))
    }

    fn install_closure(&self, dir: &Path, specs: &[PackageDescriptor]) -> Res<()> {
        let node_modules = dir.join("node_modules");
        fs::create_dir_all(&node_modules)
            .context(ErrorKind::InstallError("creating node_modules".to_string()))?;

        for spec in specs {
            let store_entry = self.store_path(spec);
            if !store_entry.exists() {
                slog::info!(self.logger, "installing"; "package" => spec.to_string());
                self.fetch_and_extract(spec, &store_entry)?;
            } else {
                slog::debug!(self.logger, "reusing store entry"; "package" => spec.to_string());
            }

            let link_name = node_modules.join(spec.name.as_str());
            if let Some(parent) = link_name.parent() {
                fs::create_dir_all(parent).ok();
            }
            if link_name.exists() || link_name.symlink_metadata().is_ok() {
                continue;
            }
            symlink::symlink_dir(&store_entry, &link_name)
                .context(ErrorKind::InstallError(format!(
                    "linking {} into node_modules",
                    spec.name
                )))?;
        }

        Ok(())
    }

    fn list_repo_refs(&self, git_url: &str) -> Res<Vec<GitRef>> {
        let mut remote = Remote::create_detached(git_url)
            .context(ErrorKind::NetworkError(format!("invalid git remote {}", git_url)))?;
        remote
            .connect(git2::Direction::Fetch)
            .context(ErrorKind::NetworkError(format!("connecting to {}", git_url)))?;

        let heads = remote
            .list()
            .context(ErrorKind::NetworkError(format!("listing refs for {}", git_url)))?;

        Ok(heads
            .iter()
            .map(|h| GitRef {
                name: h.name().to_string(),
                sha: h.oid().to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_path_is_deterministic() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let client = HttpRegistryClient::new(
            "https://registry.example",
            ::std::env::temp_dir().join("esm-cdn-store-test"),
            logger,
        );
        let spec = PackageDescriptor::new(
            ::package::name::Name::new("react").unwrap(),
            ::package::version::PackageVersion::exact(::semver::Version::parse("17.0.2").unwrap()),
            None,
        );
        let a = client.store_path(&spec);
        let b = client.store_path(&spec);
        assert_eq!(a, b);
    }
}
