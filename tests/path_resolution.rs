//! Path-pattern resolution tests
//!
//! These exercise the grant trie and the permission model directly, with
//! no storage behind them.

use pathguard::{Action, ArtifactPath, PathNode, Permission, PermissionSet};

fn grant(owner: &str, value: &str) -> PermissionSet {
    let mut set = PermissionSet::new(owner);
    set.apply_grant_value(value).unwrap();
    set
}

fn resolve(root: &PathNode, path: &str) -> PermissionSet {
    let mut found = PermissionSet::new("query");
    root.get_permissions(&ArtifactPath::parse(path), &mut found);
    found
}

// ============================================================================
// Literal Matching
// ============================================================================

#[test]
fn literal_pattern_matches_exact_path_only() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/module/view"), grant("alice", "VIEW=true"));

    assert!(resolve(&root, "/module/view").implies(&Permission::Atom(Action::View)));
    assert!(!resolve(&root, "/module").implies(&Permission::Atom(Action::View)));
    assert!(!resolve(&root, "/module/view/detail").implies(&Permission::Atom(Action::View)));
    assert!(!resolve(&root, "/other/view").implies(&Permission::Atom(Action::View)));
}

#[test]
fn segments_are_case_sensitive() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/Module"), grant("alice", "READ=true"));

    assert!(resolve(&root, "/Module").implies(&Permission::Atom(Action::Read)));
    assert!(!resolve(&root, "/module").implies(&Permission::Atom(Action::Read)));
}

// ============================================================================
// Wildcard Matching
// ============================================================================

/// A `*` pattern covers every path under its prefix, including the
/// prefix itself (zero consumed segments).
#[test]
fn wildcard_matches_any_run_of_segments() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/module/*"), grant("alice", "READ=true"));

    let read = Permission::Atom(Action::Read);
    assert!(resolve(&root, "/module").implies(&read));
    assert!(resolve(&root, "/module/a").implies(&read));
    assert!(resolve(&root, "/module/a/b/c").implies(&read));
    assert!(!resolve(&root, "/").implies(&read));
    assert!(!resolve(&root, "/other").implies(&read));
}

#[test]
fn wildcard_in_the_middle_resumes_literal_matching() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/a/*/c"), grant("alice", "READ=true"));

    let read = Permission::Atom(Action::Read);
    assert!(resolve(&root, "/a/c").implies(&read));
    assert!(resolve(&root, "/a/x/c").implies(&read));
    assert!(resolve(&root, "/a/x/y/c").implies(&read));
    assert!(!resolve(&root, "/a/x/d").implies(&read));
    assert!(!resolve(&root, "/a").implies(&read));
}

#[test]
fn substitution_consumes_exactly_one_segment() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/a/?/c"), grant("alice", "READ=true"));

    let read = Permission::Atom(Action::Read);
    assert!(resolve(&root, "/a/x/c").implies(&read));
    assert!(resolve(&root, "/a/y/c").implies(&read));
    assert!(!resolve(&root, "/a/c").implies(&read));
    assert!(!resolve(&root, "/a/x/y/c").implies(&read));
}

// ============================================================================
// Merging
// ============================================================================

/// Every matching pattern contributes; no grant shadows another.
#[test]
fn all_matching_patterns_merge() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/module/*"), grant("g1", "READ=true"));
    root.insert(&ArtifactPath::parse("/module/view"), grant("g2", "VIEW=true"));
    root.insert(&ArtifactPath::parse("/module/?"), grant("g3", "UPDATE=true"));

    let found = resolve(&root, "/module/view");
    assert!(found.implies(&Permission::Atom(Action::Read)));
    assert!(found.implies(&Permission::Atom(Action::View)));
    assert!(found.implies(&Permission::Atom(Action::Update)));
}

#[test]
fn later_grants_merge_into_the_same_node() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/x"), grant("alice", "READ=true"));
    root.insert(&ArtifactPath::parse("/x"), grant("alice", "VIEW=true"));

    let found = resolve(&root, "/x");
    assert!(found.implies(&Permission::Atom(Action::Read)));
    assert!(found.implies(&Permission::Atom(Action::View)));
}

/// Resolution is independent of the order grants were inserted in.
#[test]
fn merge_is_commutative() {
    let grants = [
        ("/module/*", "READ=true"),
        ("/module/secret", "DELETE=false"),
        ("/module/?", "VIEW=true"),
        ("/module/secret", "DELETE=true"),
        ("/*", "CREATE=true"),
    ];
    let mut forward = PathNode::new();
    for (path, value) in grants {
        forward.insert(&ArtifactPath::parse(path), grant("alice", value));
    }
    let mut reverse = PathNode::new();
    for (path, value) in grants.iter().rev() {
        reverse.insert(&ArtifactPath::parse(path), grant("alice", value));
    }

    for path in ["/module/secret", "/module/x", "/module", "/"] {
        assert_eq!(resolve(&forward, path), resolve(&reverse, path), "path {}", path);
    }
}

/// An atom excluded anywhere along the matching set stays denied, no
/// matter how many grants include it.
#[test]
fn exclude_dominates_include() {
    let mut root = PathNode::new();
    root.insert(&ArtifactPath::parse("/module/*"), grant("group", "DELETE=true"));
    root.insert(&ArtifactPath::parse("/module/secret"), grant("alice", "DELETE=false"));

    let delete = Permission::Atom(Action::Delete);
    assert!(!resolve(&root, "/module/secret").implies(&delete));
    assert!(resolve(&root, "/module/other").implies(&delete));
}

// ============================================================================
// Grant Value Parsing
// ============================================================================

#[test]
fn grant_values_parse_case_insensitively() {
    let mut set = PermissionSet::new("alice");
    set.apply_grant_value("read=TRUE").unwrap();
    set.apply_grant_value("View=true").unwrap();
    set.apply_grant_value("DELETE=false").unwrap();
    set.apply_grant_value("filter=rowFilter").unwrap();
    set.apply_grant_value("service=chkQuota").unwrap();

    assert!(set.implies(&Permission::Atom(Action::Read)));
    assert!(set.implies(&Permission::Atom(Action::View)));
    assert!(!set.implies(&Permission::Atom(Action::Delete)));
    assert!(set.filters().contains("rowFilter"));
    assert!(set.services().contains("chkQuota"));
}

#[test]
fn malformed_grant_values_are_rejected() {
    let mut set = PermissionSet::new("alice");
    assert!(set.apply_grant_value("no-separator").is_err());
    assert!(set.apply_grant_value("BOGUS=true").is_err());
}

// ============================================================================
// Composite Permissions
// ============================================================================

#[test]
fn accumulator_satisfies_composites() {
    let mut set = PermissionSet::new("alice");
    set.include(Action::Read);
    set.include(Action::View);

    let view_or_admin = Permission::Union(
        "viewOrAdmin".into(),
        vec![Permission::Atom(Action::View), Permission::Atom(Action::Admin)],
    );
    assert!(set.implies(&view_or_admin));

    let read_and_view_or_admin = Permission::Intersection(
        "readAndViewOrAdmin".into(),
        vec![Permission::Atom(Action::Read), view_or_admin.clone()],
    );
    assert!(set.implies(&read_and_view_or_admin));

    let needs_delete = Permission::Intersection(
        "needsDelete".into(),
        vec![Permission::Atom(Action::Delete), view_or_admin],
    );
    assert!(!set.implies(&needs_delete));
}

#[test]
fn intersection_implies_follows_the_requested_shape() {
    let read = Permission::Atom(Action::Read);
    let view = Permission::Atom(Action::View);
    let both = Permission::Intersection("both".into(), vec![read.clone(), view.clone()]);

    // an intersection implies a union when it implies any member
    let either = Permission::Union("either".into(), vec![view.clone(), Permission::Atom(Action::Admin)]);
    assert!(both.implies(&either));

    // it implies an intersection when it implies every member... but an
    // intersection of two atoms cannot imply a single different atom
    let smaller = Permission::Intersection("smaller".into(), vec![view.clone()]);
    assert!(both.implies(&smaller));
    assert!(!both.implies(&read));

    // a union implies whatever some member implies
    let any = Permission::Union("any".into(), vec![read.clone(), view]);
    assert!(any.implies(&read));
    assert!(!any.implies(&Permission::Atom(Action::Admin)));
}

// ============================================================================
// Presence Matching (audit trie)
// ============================================================================

#[test]
fn marked_patterns_match_whole_paths() {
    let mut root = PathNode::new();
    root.mark(&ArtifactPath::parse("/admin/*"));
    root.mark(&ArtifactPath::parse("/payroll/?/export"));

    assert!(root.matches(&ArtifactPath::parse("/admin")));
    assert!(root.matches(&ArtifactPath::parse("/admin/console")));
    assert!(root.matches(&ArtifactPath::parse("/payroll/2024/export")));
    assert!(!root.matches(&ArtifactPath::parse("/payroll/export")));
    assert!(!root.matches(&ArtifactPath::parse("/reports")));
}

#[test]
fn path_display_is_canonical() {
    assert_eq!(ArtifactPath::parse("/a/b/c").to_string(), "/a/b/c");
    assert_eq!(ArtifactPath::parse("a/b").to_string(), "/a/b");
    assert_eq!(ArtifactPath::parse("/a//b/").to_string(), "/a/b");
    assert_eq!(ArtifactPath::root().to_string(), "/");
}
