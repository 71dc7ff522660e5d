//! Reserved namespace layout and well-known type, mixin and property names.
//!
//! The namespace is partitioned under [`ARBOR_ROOT`] into a shared library
//! area, per-user workspace homes, and an environment area holding profiles
//! and validation rules.

use crate::path;

/// The system user bypasses workspace partitioning and access checks.
pub const SYSTEM_USER: &str = "SYSTEM";

pub const REPO_ROOT: &str = path::ROOT;
pub const ARBOR_ROOT: &str = "/arbor";
pub const WORKSPACE_ROOT: &str = "/arbor/workspace";
pub const LIBRARY_ROOT: &str = "/arbor/library";
pub const ENVIRONMENT_ROOT: &str = "/arbor/environment";
pub const PROFILES_ROOT: &str = "/arbor/environment/profiles";
pub const VALIDATION_ROOT: &str = "/arbor/environment/validation";

/// Primary node types.
pub mod types {
    pub const ROOT: &str = "arbor:rootFolder";
    pub const ARBOR: &str = "arbor:root";
    pub const WORKSPACE: &str = "arbor:workspace";
    pub const LIBRARY: &str = "arbor:library";
    pub const ENVIRONMENT: &str = "arbor:environment";
    pub const PROFILES: &str = "arbor:profiles";
    pub const PROFILE: &str = "arbor:profile";
    pub const VALIDATION: &str = "arbor:validation";
    pub const HOME: &str = "arbor:home";
    pub const UNSTRUCTURED: &str = "nt:unstructured";
}

/// Mixin types.
pub mod mixins {
    pub const LIBRARY_COMPONENT: &str = "arbor:libraryComponent";
    pub const DERIVED: &str = "arbor:derived";
}

/// Well-known property names.
pub mod props {
    pub const DESCRIPTION: &str = "arbor:description";
    pub const ARTIFACT_VERSION: &str = "arbor:version";
}

/// Virtual database model vocabulary used by the DDL sequencer trigger.
pub mod vdb {
    pub const MODEL: &str = "vdb:model";
    pub const MODEL_DEFINITION: &str = "vdb:modelDefinition";
}

/// Node types and properties produced by DDL sequencing.
pub mod ddl {
    pub const CREATE_TABLE: &str = "ddl:createTable";
    pub const CREATE_VIEW: &str = "ddl:createView";
    pub const COLUMN: &str = "ddl:columnDefinition";
    pub const TABLE_KIND: &str = "ddl:tableKind";
    pub const DATATYPE: &str = "ddl:datatypeName";
    pub const DATATYPE_LENGTH: &str = "ddl:datatypeLength";
    pub const QUERY: &str = "ddl:queryExpression";
    pub const STATEMENT: &str = "ddl:statement";
}

/// Returns `true` for the system user.
pub fn is_system_user(user: &str) -> bool {
    user == SYSTEM_USER
}

/// Absolute path of a user's workspace home.
///
/// The system user's workspace is the workspace root itself.
pub fn workspace_path(user: &str) -> String {
    if user.is_empty() || is_system_user(user) {
        WORKSPACE_ROOT.to_string()
    } else {
        path::join(WORKSPACE_ROOT, user)
    }
}

/// Absolute path of a user's profile node.
pub fn profile_path(user: &str) -> String {
    if user.is_empty() || is_system_user(user) {
        PROFILES_ROOT.to_string()
    } else {
        path::join(PROFILES_ROOT, user)
    }
}

/// The fixed reserved roots, parent before child.
pub fn reserved_roots() -> [(&'static str, &'static str); 6] {
    [
        (ARBOR_ROOT, types::ARBOR),
        (WORKSPACE_ROOT, types::WORKSPACE),
        (LIBRARY_ROOT, types::LIBRARY),
        (ENVIRONMENT_ROOT, types::ENVIRONMENT),
        (PROFILES_ROOT, types::PROFILES),
        (VALIDATION_ROOT, types::VALIDATION),
    ]
}

/// Returns `true` if `p` is a reserved root or a user home directory.
pub fn is_reserved_path(p: &str) -> bool {
    let p = if p.len() > 1 { p.trim_end_matches(path::SEPARATOR) } else { p };
    if p == REPO_ROOT || reserved_roots().iter().any(|(root, _)| *root == p) {
        return true;
    }
    // A single segment beneath the workspace root is a home directory.
    path::parent(p) == Some(WORKSPACE_ROOT)
}

/// All reserved paths visible to `user`, including their own home.
pub fn reserved_paths(user: &str) -> Vec<String> {
    let mut paths: Vec<String> = reserved_roots()
        .iter()
        .map(|(root, _)| root.to_string())
        .collect();
    let home = workspace_path(user);
    if !paths.contains(&home) {
        paths.push(home);
    }
    paths
}
