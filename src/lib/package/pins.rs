//! `DependencyPinSet` (spec §3): a user-supplied, sorted set of exact
//! dependency versions honored verbatim in emitted URLs.

use itertools::Itertools;
use std::fmt;

use package::descriptor::PackageDescriptor;
use package::name::Name;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyPinSet {
    pins: Vec<PackageDescriptor>,
}

impl DependencyPinSet {
    /// Build a pin set from an arbitrary-order input, canonicalizing it by
    /// sorting on each descriptor's full string form (spec §3, §4.D,
    /// invariant 2: identifier is invariant under permutation of `pins`).
    pub fn new(pins: Vec<PackageDescriptor>) -> Self {
        let pins = pins.into_iter().sorted().collect();
        DependencyPinSet { pins }
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageDescriptor> {
        self.pins.iter()
    }

    /// Whether a pin exists for the given package name. Named `contains_name`
    /// (not `has`) to sidestep the inverted-predicate bug spec §9 flags in
    /// the original `PkgSlice.Has`: this returns `true` on a match, plainly.
    pub fn contains_name(&self, name: &Name) -> bool {
        self.pins.iter().any(|p| &p.name == name)
    }

    pub fn find(&self, name: &Name) -> Option<&PackageDescriptor> {
        self.pins.iter().find(|p| &p.name == name)
    }
}

impl fmt::Display for DependencyPinSet {
    /// The comma-joined list of per-descriptor canonical forms, then `/` is
    /// replaced by `_` so the token is slash-free for identifier embedding
    /// (spec §4.A).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let joined = self.pins.iter().map(PackageDescriptor::to_string).join(",");
        write!(f, "{}", joined.replace('/', "_"))
    }
}
