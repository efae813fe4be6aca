//! Execution artifacts - the named units of code that form the execution path

use std::fmt;

/// What kind of code unit an artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Screen,
    Service,
    Entity,
    Template,
    Other,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Screen => "screen",
            ArtifactKind::Service => "service",
            ArtifactKind::Entity => "entity",
            ArtifactKind::Template => "template",
            ArtifactKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A named unit of code participating in the execution path.
/// The name contributes one path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind) -> Self {
        Self { name: name.into(), kind }
    }

    /// An artifact with no better classification, e.g. one named by a
    /// template directive.
    pub fn generic(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Other)
    }
}
