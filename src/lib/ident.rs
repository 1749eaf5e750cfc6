//! Component D: Artifact Addressing (spec §4.D, §3 `BuildRequest`/`BuildIdentifier`).
//!
//! Grounded on `elba::package::PackageId`'s `Display`-as-identity composition
//! style: the identifier is built once, by concatenation, and two requests
//! that denote the same artifact must produce byte-identical strings (spec
//! §3: "equal inputs yield bit-identical identifiers").

use std::fmt;
use std::str::FromStr;

use package::descriptor::PackageDescriptor;
use package::name::Name;
use package::pins::DependencyPinSet;
use package::request::Query;
use package::version::PackageVersion;
use registry::RegistryClient;
use util::errors::{ErrorKind, Res};

/// Compile target baseline (spec §6). `EngineNext` is the bleeding-edge
/// alias; the `baseline-*` variants name a fixed feature-support year.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    EngineNext,
    Baseline2015,
    Baseline2016,
    Baseline2017,
    Baseline2018,
    Baseline2019,
    Baseline2020,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Target::EngineNext => "engine-next",
            Target::Baseline2015 => "baseline-2015",
            Target::Baseline2016 => "baseline-2016",
            Target::Baseline2017 => "baseline-2017",
            Target::Baseline2018 => "baseline-2018",
            Target::Baseline2019 => "baseline-2019",
            Target::Baseline2020 => "baseline-2020",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Target {
    type Err = ::util::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "engine-next" => Ok(Target::EngineNext),
            "baseline-2015" => Ok(Target::Baseline2015),
            "baseline-2016" => Ok(Target::Baseline2016),
            "baseline-2017" => Ok(Target::Baseline2017),
            "baseline-2018" => Ok(Target::Baseline2018),
            "baseline-2019" => Ok(Target::Baseline2019),
            "baseline-2020" => Ok(Target::Baseline2020),
            other => Err(ErrorKind::InvalidDescriptor(format!("unknown target `{}`", other)).into()),
        }
    }
}

/// `{ descriptor, pins, target, dev }` (spec §3): everything the front-end
/// supplied, fully resolved. Combined with the process-wide `SCHEMA` to
/// produce a `BuildIdentifier`.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub descriptor: PackageDescriptor,
    pub pins: DependencyPinSet,
    pub target: Target,
    pub dev: bool,
}

impl BuildRequest {
    /// Build a request from component A's output: the `target` query
    /// parameter (defaulting to `engine-next` when absent), the `dev` flag
    /// (present with any value, including empty), and the `deps` query
    /// parameter (a comma-joined `name@version` list, each pinned to an
    /// exact registry version).
    pub fn from_query(descriptor: PackageDescriptor, query: &Query, registry: &dyn RegistryClient) -> Res<Self> {
        let target = match query.get("target") {
            Some(t) => Target::from_str(t)?,
            None => Target::EngineNext,
        };
        let dev = query.contains_key("dev");
        let pins = match query.get("deps") {
            Some(raw) if !raw.is_empty() => DependencyPinSet::new(parse_pins(raw, registry)?),
            _ => DependencyPinSet::default(),
        };

        Ok(BuildRequest {
            descriptor,
            pins,
            target,
            dev,
        })
    }

    pub fn identifier(&self, schema: u32) -> BuildIdentifier {
        BuildIdentifier {
            schema,
            descriptor: self.descriptor.clone(),
            pins: self.pins.clone(),
            target: self.target,
            dev: self.dev,
        }
    }
}

fn parse_pins(raw: &str, registry: &dyn RegistryClient) -> Res<Vec<PackageDescriptor>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|entry| parse_pin(entry, registry))
        .collect()
}

fn parse_pin(entry: &str, registry: &dyn RegistryClient) -> Res<PackageDescriptor> {
    let search_from = if entry.starts_with('@') { 1 } else { 0 };
    let (name, version_spec) = match entry[search_from..].rfind('@') {
        Some(idx) => {
            let at = search_from + idx;
            (&entry[..at], &entry[at + 1..])
        }
        None => (entry, ""),
    };

    let name = Name::new(name.to_string())?;
    let version = if version_spec.is_empty() {
        let (pkg, _) = registry.get_package_info(name.as_str(), "latest")?;
        PackageVersion::exact(pkg.version)
    } else {
        match ::semver::Version::parse(version_spec) {
            Ok(v) => PackageVersion::exact(v),
            Err(_) => {
                let (pkg, _) = registry.get_package_info(name.as_str(), version_spec)?;
                PackageVersion::exact(pkg.version)
            }
        }
    };

    Ok(PackageDescriptor::new(name, version, None))
}

/// `v<SCHEMA>/<name>@<version>/[deps=<token>/]<target>/<filename>[.development]`
/// (spec §3, §4.D). This is the identifier as stored/routed; blob storage
/// appends `.js`/`.css`.
#[derive(Clone, Debug)]
pub struct BuildIdentifier {
    pub schema: u32,
    pub descriptor: PackageDescriptor,
    pub pins: DependencyPinSet,
    pub target: Target,
    pub dev: bool,
}

impl BuildIdentifier {
    fn filename(&self) -> String {
        if self.dev {
            format!("{}.development", self.descriptor.filename())
        } else {
            self.descriptor.filename().to_string()
        }
    }

    pub fn js_path(&self) -> String {
        format!("{}.js", self)
    }

    pub fn css_path(&self) -> String {
        format!("{}.css", self)
    }
}

impl fmt::Display for BuildIdentifier {
    /// `name`/`version`/`target` are rendered verbatim; when `pins` is
    /// non-empty the target segment is prefixed with its canonical sorted
    /// token so permuting `pins` input order never changes the identifier
    /// (spec §3 invariant 2, §4.D).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let target_segment = if self.pins.is_empty() {
            self.target.to_string()
        } else {
            format!("deps={}/{}", self.pins, self.target)
        };

        write!(
            f,
            "v{}/{}@{}/{}/{}",
            self.schema,
            self.descriptor.name,
            self.descriptor.version,
            target_segment,
            self.filename()
        )
    }
}
