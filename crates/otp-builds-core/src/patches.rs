//! Version- and platform-conditional source patches.
//!
//! Each patch is one row of [`PATCH_RULES`]: a platform predicate, a version
//! predicate and an embedded unified diff. Selection keeps every matching row
//! in table order; platform-specific rows come first. Supporting a new
//! OS/version combination means adding a row.

use serde::Serialize;

use crate::platform::OsFamily;
use crate::version::SemanticTriple;

/// Which component of a [`SemanticTriple`] a bound reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Major,
    Minor,
    /// `rest[0]`
    Patch,
}

impl Component {
    fn read(&self, triple: &SemanticTriple) -> Option<u64> {
        match self {
            Component::Major => triple.major,
            Component::Minor => triple.minor,
            Component::Patch => triple.patch(),
        }
    }
}

/// Inclusive or exclusive bound on one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Lt(u64),
    Le(u64),
    Eq(u64),
    Ge(u64),
    Gt(u64),
}

impl Bound {
    fn holds(&self, value: u64) -> bool {
        match *self {
            Bound::Lt(b) => value < b,
            Bound::Le(b) => value <= b,
            Bound::Eq(b) => value == b,
            Bound::Ge(b) => value >= b,
            Bound::Gt(b) => value > b,
        }
    }
}

/// Closed-form version predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPredicate {
    Always,
    /// False when the component is undefined.
    Cmp(Component, Bound),
    All(&'static [VersionPredicate]),
    Any(&'static [VersionPredicate]),
}

impl VersionPredicate {
    pub fn matches(&self, triple: &SemanticTriple) -> bool {
        match self {
            VersionPredicate::Always => true,
            VersionPredicate::Cmp(component, bound) => component
                .read(triple)
                .map(|v| bound.holds(v))
                .unwrap_or(false),
            VersionPredicate::All(preds) => preds.iter().all(|p| p.matches(triple)),
            VersionPredicate::Any(preds) => preds.iter().any(|p| p.matches(triple)),
        }
    }
}

/// Which platforms a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformPredicate {
    Any,
    Only(OsFamily),
}

impl PlatformPredicate {
    pub fn matches(&self, family: OsFamily) -> bool {
        match self {
            PlatformPredicate::Any => true,
            PlatformPredicate::Only(f) => *f == family,
        }
    }

    pub fn is_platform_specific(&self) -> bool {
        matches!(self, PlatformPredicate::Only(_))
    }
}

/// A named conditional source patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatchRule {
    pub name: &'static str,
    pub platform: PlatformPredicate,
    pub versions: VersionPredicate,
    #[serde(skip)]
    pub payload: &'static str,
}

impl PatchRule {
    pub fn applies(&self, family: OsFamily, triple: &SemanticTriple) -> bool {
        self.platform.matches(family) && self.versions.matches(triple)
    }
}

use Bound::*;
use Component::*;
use VersionPredicate::{All, Any, Cmp};

/// Patch table, in application order.
pub const PATCH_RULES: &[PatchRule] = &[
    // OTP 19.2 up to and including 22.3.0 link NIFs with weak imports that
    // the Catalina SDK rejects.
    PatchRule {
        name: "darwin-catalina-no-weak-imports",
        platform: PlatformPredicate::Only(OsFamily::Darwin),
        versions: Any(&[
            All(&[Cmp(Major, Gt(19)), Cmp(Major, Lt(22))]),
            All(&[Cmp(Major, Eq(19)), Cmp(Minor, Gt(1))]),
            All(&[Cmp(Major, Eq(22)), Cmp(Minor, Lt(3))]),
            All(&[Cmp(Major, Eq(22)), Cmp(Minor, Eq(3)), Cmp(Patch, Lt(1))]),
        ]),
        payload: include_str!("../patches/darwin-catalina-no-weak-imports.patch"),
    },
    PatchRule {
        name: "darwin-wx-sdk-headers",
        platform: PlatformPredicate::Only(OsFamily::Darwin),
        versions: All(&[Cmp(Major, Ge(17)), Cmp(Major, Le(20))]),
        payload: include_str!("../patches/darwin-wx-sdk-headers.patch"),
    },
    PatchRule {
        name: "openssl-1.1-compat",
        platform: PlatformPredicate::Any,
        versions: All(&[Cmp(Major, Ge(17)), Cmp(Major, Le(19))]),
        payload: include_str!("../patches/openssl-1.1-compat.patch"),
    },
    PatchRule {
        name: "gcc10-fno-common",
        platform: PlatformPredicate::Any,
        versions: Any(&[
            All(&[Cmp(Major, Ge(20)), Cmp(Major, Le(21))]),
            All(&[Cmp(Major, Eq(22)), Cmp(Minor, Lt(3))]),
        ]),
        payload: include_str!("../patches/gcc10-fno-common.patch"),
    },
];

/// Every rule from [`PATCH_RULES`] that applies, in table order.
pub fn select_patches(family: OsFamily, triple: &SemanticTriple) -> Vec<&'static PatchRule> {
    select_from(PATCH_RULES, family, triple)
}

/// Same as [`select_patches`] over an arbitrary table.
pub fn select_from<'a>(
    rules: &'a [PatchRule],
    family: OsFamily,
    triple: &SemanticTriple,
) -> Vec<&'a PatchRule> {
    rules.iter().filter(|r| r.applies(family, triple)).collect()
}
