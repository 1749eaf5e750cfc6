//! Component A: parse an HTTP front-end's request path into a
//! `(PackageDescriptor, query)` pair (spec §4.A).
//!
//! This is the only place in the crate that talks to `RegistryClient` for
//! version resolution, since descriptor identity can't be finalized without
//! it (a `latest` spec, a float-y semver range, or a git ref all need to be
//! pinned to something concrete before the rest of the pipeline can key a
//! cache entry on it).

use indexmap::IndexMap;
use semver::Version;
use url::percent_encoding::percent_decode;

use package::descriptor::{normalize_submodule, PackageDescriptor};
use package::name::Name;
use package::version::{PackageVersion, GIT_SHA_LEN};
use registry::RegistryClient;
use util::config::EsmConfig;
use util::errors::{ErrorKind, Res};

pub type Query = IndexMap<String, String>;

/// Parse a request path into a fully resolved descriptor and its query
/// parameters, resolving whatever version spec the caller provided (git
/// ref, registry range, `latest`, or an exact pin) to a concrete version.
pub fn parse_request_path(
    path: &str,
    registry: &dyn RegistryClient,
    config: &EsmConfig,
) -> Res<(PackageDescriptor, Query)> {
    let (raw_path, pending_git) = rewrite_gh_prefix(path);
    let raw_path = raw_path.trim_start_matches('/');

    let (pkg_segment, rest) = split_package_segment(raw_path);
    // The query starts at the first `&` in the package segment, so it must be
    // split off before hunting for the name/version `@` — `deps=<name>@<ver>`
    // puts an `@` of its own inside the query, which would otherwise win the
    // `rfind` below (spec §4.A, §8 scenario 6).
    let (name_and_version, query_str) = split_at_first(pkg_segment, '&');
    let (raw_name, raw_version) = split_name_and_version(name_and_version);

    let name = Name::new(raw_name.to_string())?;
    let from_mirror = name.is_mirror();

    let (subpath, query) = recombine_subpath_and_query(query_str, rest)?;
    let submodule = normalize_submodule(&subpath);

    let version = if from_mirror {
        PackageVersion::mirror()
    } else if pending_git {
        resolve_git_version(&name, raw_version, registry)?
    } else {
        resolve_registry_version(&name, raw_version, registry, config)?
    };

    let descriptor = PackageDescriptor {
        name,
        version,
        submodule,
        from_git: pending_git,
        from_mirror,
    };

    Ok((descriptor, query))
}

/// `/gh/<owner>/<repo>[...]` → `/@<owner>/<repo>[...]`, marked `fromGit`
/// (spec §4.A bullet 1).
fn rewrite_gh_prefix(path: &str) -> (String, bool) {
    if let Some(rest) = path.strip_prefix("/gh/") {
        (format!("/@{}", rest), true)
    } else {
        (path.to_string(), false)
    }
}

/// Split `raw_path` into the package segment (name, optional `@version`)
/// and everything after it (the raw subpath-and-query tail), respecting
/// scoped names (spec §4.A bullet 2).
fn split_package_segment(raw_path: &str) -> (&str, &str) {
    let boundary = if raw_path.starts_with('@') {
        raw_path
            .char_indices()
            .filter(|(_, c)| *c == '/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        raw_path.find('/')
    };

    match boundary {
        Some(idx) => (&raw_path[..idx], &raw_path[idx..]),
        None => (raw_path, ""),
    }
}

/// Split a name-and-version segment (query already removed) into
/// `(name, raw_version)`, where the version is the suffix after the last `@`
/// (spec §4.A bullet 3). Scoped names skip their own leading `@` when
/// searching; mirror names never carry an embedded version.
fn split_name_and_version(segment: &str) -> (&str, &str) {
    if segment.starts_with('~') {
        return (segment, "");
    }

    let search_from = if segment.starts_with('@') { 1 } else { 0 };
    match segment[search_from..].rfind('@') {
        Some(idx) => {
            let at = search_from + idx;
            (&segment[..at], &segment[at + 1..])
        }
        None => (segment, ""),
    }
}

fn split_at_first(s: &str, sep: char) -> (&str, &str) {
    match s.find(sep) {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

/// Implements spec §4.A's "Subpath/query re-combination" rule.
fn recombine_subpath_and_query(query_str: &str, raw_subpath: &str) -> Res<(String, Query)> {
    if query_str.is_empty() {
        return Ok((raw_subpath.trim_start_matches('/').to_string(), Query::new()));
    }

    let combined = format!("{}/{}", query_str, raw_subpath);
    let mut entries: Vec<String> = combined.split('&').map(str::to_string).collect();

    let subpath = match entries.last().cloned() {
        Some(last) if last.starts_with('/') => {
            entries.pop();
            last[1..].to_string()
        }
        Some(last) if last.contains('/') && !last.contains('=') => {
            let (left, right) = split_at_first(&last, '/');
            let left = left.to_string();
            let right = right.to_string();
            if let Some(slot) = entries.last_mut() {
                *slot = left;
            }
            right
        }
        _ => String::new(),
    };

    let mut query = Query::new();
    for entry in entries {
        if entry.is_empty() {
            continue;
        }
        let decoded = decode(&entry);
        let (key, value) = split_at_first(&decoded, '=');
        query.insert(key.to_string(), value.to_string());
    }

    Ok((subpath, query))
}

fn decode(s: &str) -> String {
    percent_decode(s.as_bytes()).decode_utf8_lossy().into_owned()
}

fn looks_like_git_sha(s: &str) -> bool {
    s.len() >= GIT_SHA_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// spec §4.A bullet: git version resolution against the remote's ref list.
fn resolve_git_version(
    name: &Name,
    raw_version: &str,
    registry: &dyn RegistryClient,
) -> Res<PackageVersion> {
    // Already resolved shape: a 10+ hex-char commit prefix needs no remote
    // call at all. A full semver-looking ref (e.g. a `v1.0.0` tag) still
    // has to be turned into a commit sha to satisfy the data model's
    // invariant that a git descriptor's version IS a commit prefix, so it
    // falls through to the ref-list match below rather than being returned
    // as-is (see DESIGN.md open questions).
    if looks_like_git_sha(raw_version) {
        return PackageVersion::git_sha(raw_version);
    }

    if raw_version.starts_with("semver:") {
        return Err(ErrorKind::NotFound(format!(
            "semver: git version prefix is unimplemented ({})",
            raw_version
        ))
        .into());
    }

    let (owner, repo) = split_scoped(name)?;
    let git_url = format!("https://github.com/{}/{}.git", owner, repo);
    let refs = registry.list_repo_refs(&git_url)?;

    let wants_head = raw_version.is_empty() || raw_version == "HEAD";
    let tag_ref = format!("refs/tags/{}", raw_version);
    let branch_ref = format!("refs/heads/{}", raw_version);

    let found = refs.iter().find(|r| {
        (wants_head && r.name == "HEAD")
            || r.name == tag_ref
            || r.name == branch_ref
    });

    match found {
        Some(r) => PackageVersion::git_sha(&r.sha),
        None => Err(ErrorKind::NotFound(format!(
            "no ref matching `{}` for {}",
            raw_version, git_url
        ))
        .into()),
    }
}

fn split_scoped(name: &Name) -> Res<(String, String)> {
    let s = name.as_str();
    let s = s.strip_prefix('@').unwrap_or(s);
    match s.find('/') {
        Some(idx) => Ok((s[..idx].to_string(), s[idx + 1..].to_string())),
        None => Err(ErrorKind::InvalidDescriptor(format!(
            "git descriptor `{}` is missing an owner/repo split",
            name
        ))
        .into()),
    }
}

/// spec §4.A: static override table, then full pinned semver short-circuit,
/// then registry resolution.
fn resolve_registry_version(
    name: &Name,
    raw_version: &str,
    registry: &dyn RegistryClient,
    config: &EsmConfig,
) -> Res<PackageVersion> {
    let override_key = format!("{}@{}", name, raw_version);
    if let Some(fixed) = config.version_overrides.get(&override_key) {
        return Version::parse(fixed)
            .map(PackageVersion::Exact)
            .map_err(|e| ErrorKind::InvalidDescriptor(format!("invalid override version: {}", e)).into());
    }

    if let Ok(v) = Version::parse(raw_version) {
        return Ok(PackageVersion::Exact(v));
    }

    let (pkg, _submodule) = registry.get_package_info(name.as_str(), raw_version)?;
    Ok(PackageVersion::Exact(pkg.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::{GitRef, RegistryPackage};
    use std::cell::RefCell;

    struct FakeRegistry {
        refs: Vec<GitRef>,
        calls: RefCell<u32>,
    }

    impl RegistryClient for FakeRegistry {
        fn get_package_info(
            &self,
            name: &str,
            _spec: &str,
        ) -> Res<(RegistryPackage, Option<String>)> {
            *self.calls.borrow_mut() += 1;
            Ok((
                RegistryPackage {
                    name: name.to_string(),
                    version: Version::parse("1.2.3").unwrap(),
                    main: None,
                    module: None,
                    r#type: None,
                    types: None,
                    typings: None,
                    exports: None,
                    dependencies: Default::default(),
                    peer_dependencies: Default::default(),
                },
                None,
            ))
        }

        fn install_closure(
            &self,
            _dir: &::std::path::Path,
            _specs: &[PackageDescriptor],
        ) -> Res<()> {
            Ok(())
        }

        fn list_repo_refs(&self, _git_url: &str) -> Res<Vec<GitRef>> {
            Ok(self.refs.clone())
        }
    }

    fn fake(refs: Vec<GitRef>) -> FakeRegistry {
        FakeRegistry {
            refs,
            calls: RefCell::new(0),
        }
    }

    #[test]
    fn parses_plain_pinned_version() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let (d, q) = parse_request_path("/react@17.0.2", &registry, &config).unwrap();
        assert_eq!(d.name.as_str(), "react");
        assert_eq!(d.version.to_string(), "17.0.2");
        assert!(d.submodule.is_none());
        assert!(q.is_empty());
        assert_eq!(*registry.calls.borrow(), 0);
    }

    #[test]
    fn parses_scoped_name_with_submodule() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let (d, _q) =
            parse_request_path("/@babel/core@7.20.0/lib/index.js", &registry, &config).unwrap();
        assert_eq!(d.name.as_str(), "@babel/core");
        assert_eq!(d.submodule, Some("lib".to_string()));
    }

    #[test]
    fn resolves_latest_via_registry() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let (d, _q) = parse_request_path("/react", &registry, &config).unwrap();
        assert_eq!(d.version.to_string(), "1.2.3");
        assert_eq!(*registry.calls.borrow(), 1);
    }

    #[test]
    fn recombines_subpath_with_trailing_slash_segment() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let (d, q) =
            parse_request_path("/react@17.0.2&dev&deps=scheduler@0.20.2/hooks", &registry, &config)
                .unwrap();
        assert_eq!(d.submodule, Some("hooks".to_string()));
        assert_eq!(q.get("dev").map(String::as_str), Some(""));
        assert_eq!(q.get("deps").map(String::as_str), Some("scheduler@0.20.2"));
    }

    #[test]
    fn marks_mirror_and_forces_zero_version() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let (d, _q) = parse_request_path("/~1a2b3c4d5e/sub", &registry, &config).unwrap();
        assert!(d.from_mirror);
        assert_eq!(d.version.to_string(), "0.0.0");
    }

    #[test]
    fn resolves_gh_prefix_against_ref_list() {
        let registry = fake(vec![GitRef {
            name: "refs/tags/v1.0.0".to_string(),
            sha: "abcdef0123456789".to_string(),
        }]);
        let config = EsmConfig::default();
        let (d, _q) = parse_request_path("/gh/facebook/react@v1.0.0", &registry, &config).unwrap();
        assert!(d.from_git);
        assert_eq!(d.version.to_string(), "abcdef0123");
    }

    #[test]
    fn git_ref_not_found_is_not_found_error() {
        let registry = fake(vec![]);
        let config = EsmConfig::default();
        let err = parse_request_path("/gh/facebook/react@nope", &registry, &config).unwrap_err();
        assert!(err.to_string().contains("no ref matching"));
    }
}
