//! Per-user access rules over the reserved namespace.
//!
//! The system user may do anything. Everyone else may read the reserved
//! roots, the library, the validation area and their own home and profile;
//! may add children inside their own home, profile or the validation area;
//! and may modify nodes strictly beneath their own home or profile.

use arbor_types::lexicon::{self, LIBRARY_ROOT, VALIDATION_ROOT};
use arbor_types::path;

use crate::error::{RepoError, RepoResult};

/// Kind of access requested on a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Add or remove children of the node at the path.
    AddChild,
    /// Change the node's properties or mixins.
    Modify,
}

impl Access {
    fn verb(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::AddChild => "add children to",
            Self::Modify => "modify",
        }
    }
}

pub fn is_permitted(user: &str, access: Access, p: &str) -> bool {
    if lexicon::is_system_user(user) {
        return true;
    }
    let home = lexicon::workspace_path(user);
    let profile = lexicon::profile_path(user);
    match access {
        Access::Read => {
            p == path::ROOT
                || lexicon::reserved_paths(user).iter().any(|r| r == p)
                || path::is_within(p, LIBRARY_ROOT)
                || path::is_within(p, VALIDATION_ROOT)
                || path::is_within(p, &home)
                || path::is_within(p, &profile)
        }
        Access::AddChild => {
            path::is_within(p, &home)
                || path::is_within(p, &profile)
                || path::is_within(p, VALIDATION_ROOT)
        }
        Access::Modify => path::is_descendant(p, &home) || path::is_descendant(p, &profile),
    }
}

pub fn check(user: &str, access: Access, p: &str) -> RepoResult<()> {
    if is_permitted(user, access, p) {
        Ok(())
    } else {
        Err(RepoError::AccessDenied {
            user: user.to_string(),
            operation: access.verb(),
            path: p.to_string(),
        })
    }
}

/// Resolve a caller-supplied path. Relative paths are taken from the user's
/// workspace home.
pub fn resolve(user: &str, p: &str) -> RepoResult<String> {
    let p = p.trim();
    if p.is_empty() {
        return Err(RepoError::InvalidArgument("path must not be empty".into()));
    }
    if p.starts_with(path::SEPARATOR) {
        Ok(path::normalize(p)?)
    } else {
        let home = lexicon::workspace_path(user);
        Ok(path::normalize(&format!("{home}/{p}"))?)
    }
}
