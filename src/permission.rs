//! Permission atoms, composites, and the accumulated grant set

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{PathguardError, Result};

/// The closed set of permission atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    View,
    Execute,
    Admin,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::View,
        Action::Execute,
        Action::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Read => "READ",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::View => "VIEW",
            Action::Execute => "EXECUTE",
            Action::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = PathguardError;

    /// Case-insensitive atom lookup.
    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| PathguardError::InvalidPermission { raw: s.to_string() })
    }
}

/// A requested permission: a single atom or a named composite.
///
/// Composites model demands like "READ and (VIEW or ADMIN)":
/// `Intersection("x", [Atom(Read), Union("y", [Atom(View), Atom(Admin)])])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Atom(Action),
    Union(String, Vec<Permission>),
    Intersection(String, Vec<Permission>),
}

impl Permission {
    /// Whether this permission satisfies `requested`.
    ///
    /// An atom implies only an equal atom. A union implies whatever some
    /// member implies. An intersection implies an atom when every member
    /// does, implies a union when it implies any of its members, and
    /// implies an intersection when it implies all of its members.
    pub fn implies(&self, requested: &Permission) -> bool {
        match self {
            Permission::Atom(a) => matches!(requested, Permission::Atom(b) if a == b),
            Permission::Union(_, members) => members.iter().any(|m| m.implies(requested)),
            Permission::Intersection(_, members) => match requested {
                Permission::Union(_, asked) => asked.iter().any(|q| self.implies(q)),
                Permission::Intersection(_, asked) => asked.iter().all(|q| self.implies(q)),
                atom => members.iter().all(|m| m.implies(atom)),
            },
        }
    }
}

impl From<Action> for Permission {
    fn from(action: Action) -> Self {
        Permission::Atom(action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Atom(a) => write!(f, "{}", a),
            Permission::Union(name, _) => write!(f, "{}", name),
            Permission::Intersection(name, _) => write!(f, "{}", name),
        }
    }
}

/// Accumulated grants for one owner along an artifact path.
///
/// Merging is pure set union; an atom appearing in both sets is denied
/// because exclusion dominates at `implies` time. Ordered sets keep the
/// result independent of the order grants were applied in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    owner: String,
    include: BTreeSet<Action>,
    exclude: BTreeSet<Action>,
    filters: BTreeSet<String>,
    services: BTreeSet<String>,
}

impl PermissionSet {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn include(&mut self, action: Action) {
        self.include.insert(action);
    }

    pub fn exclude(&mut self, action: Action) {
        self.exclude.insert(action);
    }

    pub fn add_filter(&mut self, name: impl Into<String>) {
        self.filters.insert(name.into());
    }

    pub fn add_service(&mut self, name: impl Into<String>) {
        self.services.insert(name.into());
    }

    /// Apply one encoded grant value:
    /// `filter=<name>`, `service=<name>`, or `<ATOM>=true|false`.
    /// Anything other than `true` on an atom grant excludes, matching
    /// the stored-row behavior this format comes from.
    pub fn apply_grant_value(&mut self, raw: &str) -> Result<()> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| PathguardError::InvalidPermission { raw: raw.to_string() })?;
        if key.eq_ignore_ascii_case("filter") {
            self.add_filter(value);
        } else if key.eq_ignore_ascii_case("service") {
            self.add_service(value);
        } else {
            let action: Action = key.parse()?;
            if value.eq_ignore_ascii_case("true") {
                self.include(action);
            } else {
                self.exclude(action);
            }
        }
        Ok(())
    }

    /// Union every set of `other` into this one. The owner is unchanged.
    pub fn merge(&mut self, other: &PermissionSet) {
        self.include.extend(other.include.iter().copied());
        self.exclude.extend(other.exclude.iter().copied());
        self.filters.extend(other.filters.iter().cloned());
        self.services.extend(other.services.iter().cloned());
    }

    /// Clear all accumulated sets, keeping the owner.
    pub fn reset(&mut self) {
        self.include.clear();
        self.exclude.clear();
        self.filters.clear();
        self.services.clear();
    }

    /// The atoms actually granted: include minus exclude.
    pub fn net_include(&self) -> BTreeSet<Action> {
        self.include.difference(&self.exclude).copied().collect()
    }

    pub fn filters(&self) -> &BTreeSet<String> {
        &self.filters
    }

    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.filters.is_empty()
            && self.services.is_empty()
    }

    fn implies_atom(&self, action: Action) -> bool {
        self.include.contains(&action) && !self.exclude.contains(&action)
    }

    /// Whether the accumulated grants satisfy `requested`.
    pub fn implies(&self, requested: &Permission) -> bool {
        match requested {
            Permission::Atom(a) => self.implies_atom(*a),
            Permission::Union(_, members) => members.iter().any(|m| self.implies(m)),
            Permission::Intersection(_, members) => members.iter().all(|m| self.implies(m)),
        }
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.owner)?;
        for a in &self.include {
            write!(f, "+{}", a)?;
        }
        for a in &self.exclude {
            write!(f, "-{}", a)?;
        }
        for name in &self.filters {
            write!(f, " filter={}", name)?;
        }
        for name in &self.services {
            write!(f, " service={}", name)?;
        }
        write!(f, "]")
    }
}
