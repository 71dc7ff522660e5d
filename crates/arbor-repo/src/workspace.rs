use tracing::debug;

use arbor_store::ChangeOp;
use arbor_types::lexicon::{self, types, PROFILES_ROOT, WORKSPACE_ROOT};
use arbor_types::{path, NodeId};

use crate::access::{self, Access};
use crate::error::RepoResult;
use crate::nodes::Node;
use crate::repository::Repository;
use crate::transaction::UnitOfWork;

impl Repository {
    /// Resolve a path in the caller's workspace.
    ///
    /// `None` returns the caller's home node, creating it (and the caller's
    /// profile) inside `tx` when absent. Anything else resolves relative to
    /// the home and may be `None`.
    pub fn get_from_workspace(&self, tx: &UnitOfWork, relative: Option<&str>) -> RepoResult<Option<Node>> {
        self.ensure_reachable()?;
        let home = self.provision_home(tx)?;
        match relative {
            None => Ok(Some(home)),
            Some(rel) => {
                let rel = rel.trim().trim_start_matches(path::SEPARATOR);
                if rel.is_empty() {
                    return Ok(Some(home));
                }
                let target = access::resolve(tx.user(), rel)?;
                access::check(tx.user(), Access::Read, &target)?;
                tx.read("get from workspace", &*self.store, |v| Ok(v.get_path(&target)))
            }
        }
    }

    /// Get or create the caller's home.
    ///
    /// Created nodes are provisional: if another transaction commits the same
    /// home first, this transaction's commit reuses that node instead of
    /// failing on the duplicate path.
    pub(crate) fn provision_home(&self, tx: &UnitOfWork) -> RepoResult<Node> {
        let user = tx.user();
        let home = lexicon::workspace_path(user);
        tx.mutate("provision home", &*self.store, |s| {
            if let Some(node) = s.view().get_path(&home) {
                return Ok(node);
            }

            let workspace = s.view().require_path(WORKSPACE_ROOT)?;
            let id = NodeId::new();
            s.apply(ChangeOp::AddNode {
                id,
                parent: workspace.id,
                name: path::name(&home).to_string(),
                primary_type: types::HOME.to_string(),
                provisional: true,
            })?;

            let profile = lexicon::profile_path(user);
            if s.view().get_path(&profile).is_none() {
                if let Some(profiles) = s.view().get_path(PROFILES_ROOT) {
                    s.apply(ChangeOp::AddNode {
                        id: NodeId::new(),
                        parent: profiles.id,
                        name: path::name(&profile).to_string(),
                        primary_type: types::PROFILE.to_string(),
                        provisional: true,
                    })?;
                }
            }

            debug!(tx = %tx.name(), user, home = %home, "home staged");
            s.require(&id)
        })
    }
}
