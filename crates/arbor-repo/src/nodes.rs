//! Node operations addressed through a unit of work.
//!
//! Paths may be absolute or relative to the caller's workspace home. Reads
//! see the transaction's own buffered changes over the committed tree;
//! writes are buffered until commit.

use std::io::Read;

use arbor_search::glob_matches;
use arbor_store::{ChangeOp, NodeRecord};
use arbor_types::lexicon::{self, types};
use arbor_types::{path, NodeId, Property};

use crate::access::{self, Access};
use crate::error::{RepoError, RepoResult};
use crate::repository::Repository;
use crate::transaction::UnitOfWork;

/// A node as seen by one transaction at the time of the call.
pub type Node = NodeRecord;

impl Repository {
    /// Append a child named `name` to `parent`, or to the caller's home when
    /// `parent` is `None`. The primary type defaults to `nt:unstructured`.
    pub fn add(
        &self,
        tx: &UnitOfWork,
        parent: Option<&str>,
        name: &str,
        primary_type: Option<&str>,
    ) -> RepoResult<Node> {
        self.ensure_reachable()?;
        let parent_path = match parent {
            Some(p) => access::resolve(tx.user(), p)?,
            None => lexicon::workspace_path(tx.user()),
        };
        access::check(tx.user(), Access::AddChild, &parent_path)?;
        path::validate_name(name)?;
        if path::is_within(&parent_path, &lexicon::workspace_path(tx.user())) {
            self.provision_home(tx)?;
        }

        let primary_type = primary_type.unwrap_or(types::UNSTRUCTURED);
        tx.mutate("add", &*self.store, |s| {
            let parent = s.view().require_path(&parent_path)?;
            let id = NodeId::new();
            s.apply(ChangeOp::AddNode {
                id,
                parent: parent.id,
                name: name.to_string(),
                primary_type: primary_type.to_string(),
                provisional: false,
            })?;
            s.require(&id)
        })
    }

    /// Remove every node in `paths` with its subtree, or none of them.
    ///
    /// Fails with [`RepoError::NotFound`] naming the first path that does not
    /// resolve.
    pub fn remove(&self, tx: &UnitOfWork, paths: &[&str]) -> RepoResult<()> {
        self.ensure_reachable()?;
        if paths.is_empty() {
            return Err(RepoError::InvalidArgument("no paths to remove".into()));
        }
        let resolved = paths
            .iter()
            .map(|p| self.removable(tx.user(), p))
            .collect::<RepoResult<Vec<String>>>()?;

        tx.mutate("remove", &*self.store, |s| {
            let ids = resolved
                .iter()
                .map(|p| s.view().require_path(p).map(|n| n.id))
                .collect::<RepoResult<Vec<NodeId>>>()?;
            for id in ids {
                // Already gone when an earlier path was its ancestor.
                if s.view().node(&id).is_some() {
                    s.apply(ChangeOp::RemoveNode { id })?;
                }
            }
            Ok(())
        })
    }

    /// Resolve a path and check that `user` may remove it.
    pub(crate) fn removable(&self, user: &str, p: &str) -> RepoResult<String> {
        let resolved = access::resolve(user, p)?;
        let Some(parent) = path::parent(&resolved) else {
            return Err(RepoError::InvalidArgument("the root cannot be removed".into()));
        };
        if lexicon::reserved_roots().iter().any(|(root, _)| *root == resolved) {
            return Err(RepoError::InvalidArgument(format!(
                "reserved path '{resolved}' cannot be removed"
            )));
        }
        access::check(user, Access::AddChild, parent)?;
        if !lexicon::is_system_user(user) && lexicon::is_reserved_path(&resolved) {
            return Err(RepoError::AccessDenied {
                user: user.to_string(),
                operation: "remove",
                path: resolved,
            });
        }
        Ok(resolved)
    }

    /// The node at `p`, if any.
    pub fn get(&self, tx: &UnitOfWork, p: &str) -> RepoResult<Option<Node>> {
        let p = self.readable(tx, p)?;
        tx.read("get", &*self.store, |v| Ok(v.get_path(&p)))
    }

    pub fn get_by_id(&self, tx: &UnitOfWork, id: &NodeId) -> RepoResult<Option<Node>> {
        self.ensure_reachable()?;
        let node = tx.read("get", &*self.store, |v| Ok(v.node(id)))?;
        if let Some(node) = &node {
            access::check(tx.user(), Access::Read, &node.path)?;
        }
        Ok(node)
    }

    /// Parent of the node at `p`; `None` for the root.
    pub fn parent(&self, tx: &UnitOfWork, p: &str) -> RepoResult<Option<Node>> {
        let p = self.readable(tx, p)?;
        tx.read("get parent", &*self.store, |v| {
            let node = v.require_path(&p)?;
            Ok(node.parent.and_then(|id| v.node(&id)))
        })
    }

    pub fn has_child(&self, tx: &UnitOfWork, p: &str, name: &str) -> RepoResult<bool> {
        let p = self.readable(tx, p)?;
        tx.read("check child", &*self.store, |v| {
            let node = v.require_path(&p)?;
            Ok(v.get_path(&path::join(&node.path, name)).is_some())
        })
    }

    /// Children of `p` in insertion order, filtered by name globs when any
    /// are given.
    pub fn children(&self, tx: &UnitOfWork, p: &str, name_patterns: &[&str]) -> RepoResult<Vec<Node>> {
        let p = self.readable(tx, p)?;
        tx.read("list children", &*self.store, |v| {
            let node = v.require_path(&p)?;
            Ok(v.children(&node.id)
                .into_iter()
                .filter(|c| name_patterns.is_empty() || name_patterns.iter().any(|pat| glob_matches(pat, &c.name)))
                .collect())
        })
    }

    /// Children of `p` whose primary type or a mixin is `type_name`.
    pub fn children_of_type(&self, tx: &UnitOfWork, p: &str, type_name: &str) -> RepoResult<Vec<Node>> {
        Ok(self
            .children(tx, p, &[])?
            .into_iter()
            .filter(|c| c.is_of_type(type_name))
            .collect())
    }

    pub fn get_property(&self, tx: &UnitOfWork, p: &str, name: &str) -> RepoResult<Option<Property>> {
        let p = self.readable(tx, p)?;
        tx.read("get property", &*self.store, |v| {
            Ok(v.require_path(&p)?.properties.get(name).cloned())
        })
    }

    pub fn has_property(&self, tx: &UnitOfWork, p: &str, name: &str) -> RepoResult<bool> {
        Ok(self.get_property(tx, p, name)?.is_some())
    }

    pub fn property_names(&self, tx: &UnitOfWork, p: &str) -> RepoResult<Vec<String>> {
        let p = self.readable(tx, p)?;
        tx.read("list properties", &*self.store, |v| {
            Ok(v.require_path(&p)?.properties.keys().cloned().collect())
        })
    }

    /// Set (or replace) a property.
    pub fn set_property(&self, tx: &UnitOfWork, p: &str, property: Property) -> RepoResult<()> {
        let p = self.modifiable(tx, p)?;
        tx.mutate("set property", &*self.store, |s| {
            let id = s.view().require_path(&p)?.id;
            s.apply(ChangeOp::SetProperty { id, property })
        })
    }

    /// Set a binary property from a stream.
    pub fn set_binary<R: Read>(&self, tx: &UnitOfWork, p: &str, name: &str, reader: R) -> RepoResult<()> {
        let property = Property::binary_from_reader(name, reader).map_err(|e| {
            RepoError::InvalidArgument(format!("reading content for property '{name}': {e}"))
        })?;
        self.set_property(tx, p, property)
    }

    pub fn remove_property(&self, tx: &UnitOfWork, p: &str, name: &str) -> RepoResult<()> {
        let p = self.modifiable(tx, p)?;
        tx.mutate("remove property", &*self.store, |s| {
            let node = s.view().require_path(&p)?;
            if !node.properties.contains_key(name) {
                return Err(RepoError::NotFound(format!("{p}@{name}")));
            }
            s.apply(ChangeOp::RemoveProperty {
                id: node.id,
                name: name.to_string(),
            })
        })
    }

    pub fn add_mixin(&self, tx: &UnitOfWork, p: &str, mixin: &str) -> RepoResult<()> {
        let p = self.modifiable(tx, p)?;
        tx.mutate("add mixin", &*self.store, |s| {
            let id = s.view().require_path(&p)?.id;
            s.apply(ChangeOp::AddMixin {
                id,
                mixin: mixin.to_string(),
            })
        })
    }

    pub fn remove_mixin(&self, tx: &UnitOfWork, p: &str, mixin: &str) -> RepoResult<()> {
        let p = self.modifiable(tx, p)?;
        tx.mutate("remove mixin", &*self.store, |s| {
            let id = s.view().require_path(&p)?.id;
            s.apply(ChangeOp::RemoveMixin {
                id,
                mixin: mixin.to_string(),
            })
        })
    }

    /// Returns `true` if `tx` has buffered mutations.
    pub fn has_changes(&self, tx: &UnitOfWork) -> bool {
        tx.has_changes()
    }

    fn readable(&self, tx: &UnitOfWork, p: &str) -> RepoResult<String> {
        self.ensure_reachable()?;
        let p = access::resolve(tx.user(), p)?;
        access::check(tx.user(), Access::Read, &p)?;
        Ok(p)
    }

    fn modifiable(&self, tx: &UnitOfWork, p: &str) -> RepoResult<String> {
        self.ensure_reachable()?;
        let p = access::resolve(tx.user(), p)?;
        access::check(tx.user(), Access::Modify, &p)?;
        Ok(p)
    }
}
