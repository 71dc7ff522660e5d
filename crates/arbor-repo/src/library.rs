//! Shared library of published artifacts under `/arbor/library`.

use serde::{Deserialize, Serialize};
use tracing::info;

use arbor_store::{ChangeOp, NodeRecord};
use arbor_types::lexicon::{mixins, props, types, LIBRARY_ROOT};
use arbor_types::{path, NodeId, Property, Value};

use crate::access::{self, Access};
use crate::error::{RepoError, RepoResult};
use crate::nodes::Node;
use crate::repository::Repository;
use crate::transaction::{Staging, UnitOfWork, View};

/// Identity of a library artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Location relative to the library root, e.g. `dataservices/orders`.
    pub path: String,
    /// Primary type given to the published node.
    pub artifact_type: String,
    pub description: String,
    pub version: i64,
}

impl ArtifactDescriptor {
    pub fn new(path: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            artifact_type: artifact_type.into(),
            description: String::new(),
            version: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Absolute path of the artifact node.
    pub fn library_path(&self) -> RepoResult<String> {
        library_path(&self.path)
    }

    fn from_node(node: &NodeRecord) -> Self {
        Self {
            path: path::rebase(&node.path, LIBRARY_ROOT, path::ROOT)
                .map(|p| p.trim_start_matches(path::SEPARATOR).to_string())
                .unwrap_or_default(),
            artifact_type: node.primary_type.clone(),
            description: node
                .property(props::DESCRIPTION)
                .and_then(|p| p.text())
                .unwrap_or_default(),
            version: node
                .property(props::ARTIFACT_VERSION)
                .and_then(|p| p.value())
                .and_then(Value::as_long)
                .unwrap_or(1),
        }
    }
}

/// A published artifact with its node.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub descriptor: ArtifactDescriptor,
    pub node: Node,
}

fn library_path(relative: &str) -> RepoResult<String> {
    let relative = relative.trim().trim_start_matches(path::SEPARATOR);
    if relative.is_empty() {
        return Err(RepoError::InvalidArgument("artifact path must not be empty".into()));
    }
    Ok(path::normalize(&path::join(LIBRARY_ROOT, relative))?)
}

/// A subtree read before the copy is written.
struct Subtree {
    record: NodeRecord,
    children: Vec<Subtree>,
}

impl Subtree {
    fn read(view: &View<'_>, record: NodeRecord) -> Self {
        let children = view
            .children(&record.id)
            .into_iter()
            .map(|child| Self::read(view, child))
            .collect();
        Self { record, children }
    }

    fn write(&self, s: &mut Staging<'_>, parent: NodeId, name: &str, primary_type: &str) -> RepoResult<NodeId> {
        let id = NodeId::new();
        s.apply(ChangeOp::AddNode {
            id,
            parent,
            name: name.to_string(),
            primary_type: primary_type.to_string(),
            provisional: false,
        })?;
        for mixin in &self.record.mixins {
            s.apply(ChangeOp::AddMixin {
                id,
                mixin: mixin.clone(),
            })?;
        }
        for property in self.record.properties.values() {
            s.apply(ChangeOp::SetProperty {
                id,
                property: property.clone(),
            })?;
        }
        for child in &self.children {
            child.write(s, id, &child.record.name, &child.record.primary_type)?;
        }
        Ok(id)
    }
}

impl Repository {
    /// Copy the subtree at `source` into the library as an artifact.
    ///
    /// Fails with [`RepoError::DuplicatePath`] when the artifact exists and
    /// `overwrite` is not set.
    pub fn publish(
        &self,
        tx: &UnitOfWork,
        overwrite: bool,
        descriptor: &ArtifactDescriptor,
        source: &str,
    ) -> RepoResult<Artifact> {
        self.ensure_reachable()?;
        if descriptor.artifact_type.trim().is_empty() {
            return Err(RepoError::InvalidArgument("artifact type must not be empty".into()));
        }
        let source = access::resolve(tx.user(), source)?;
        access::check(tx.user(), Access::Read, &source)?;
        let target = descriptor.library_path()?;
        if path::is_within(&target, &source) || path::is_within(&source, &target) {
            return Err(RepoError::InvalidArgument(format!(
                "cannot publish '{source}' onto overlapping path '{target}'"
            )));
        }

        let node = tx.mutate("publish", &*self.store, |s| {
            let subtree = Subtree::read(&s.view(), s.view().require_path(&source)?);

            if let Some(existing) = s.view().get_path(&target) {
                if !overwrite {
                    return Err(RepoError::DuplicatePath(target.clone()));
                }
                s.apply(ChangeOp::RemoveNode { id: existing.id })?;
            }

            let parent = ensure_folders(s, path::parent(&target).unwrap_or(LIBRARY_ROOT))?;
            let id = subtree.write(s, parent, path::name(&target), &descriptor.artifact_type)?;
            s.apply(ChangeOp::AddMixin {
                id,
                mixin: mixins::LIBRARY_COMPONENT.to_string(),
            })?;
            s.apply(ChangeOp::SetProperty {
                id,
                property: Property::single(props::DESCRIPTION, descriptor.description.as_str()),
            })?;
            s.apply(ChangeOp::SetProperty {
                id,
                property: Property::single(props::ARTIFACT_VERSION, descriptor.version),
            })?;
            s.require(&id)
        })?;

        info!(tx = %tx.name(), source = %source, artifact = %target, "artifact staged for publishing");
        Ok(Artifact {
            descriptor: descriptor.clone(),
            node,
        })
    }

    /// Look up published artifacts by library-relative path.
    pub fn retrieve(&self, tx: &UnitOfWork, paths: &[&str]) -> RepoResult<Vec<Artifact>> {
        self.ensure_reachable()?;
        let targets = paths
            .iter()
            .map(|p| library_path(p))
            .collect::<RepoResult<Vec<String>>>()?;
        tx.read("retrieve", &*self.store, |v| {
            targets
                .iter()
                .map(|target| {
                    let node = artifact_node(v, target)?;
                    Ok(Artifact {
                        descriptor: ArtifactDescriptor::from_node(&node),
                        node,
                    })
                })
                .collect()
        })
    }

    /// Remove published artifacts, all or none.
    pub fn unpublish(&self, tx: &UnitOfWork, paths: &[&str]) -> RepoResult<()> {
        self.ensure_reachable()?;
        if paths.is_empty() {
            return Err(RepoError::InvalidArgument("no artifacts to unpublish".into()));
        }
        let targets = paths
            .iter()
            .map(|p| library_path(p))
            .collect::<RepoResult<Vec<String>>>()?;
        tx.mutate("unpublish", &*self.store, |s| {
            let ids = targets
                .iter()
                .map(|t| artifact_node(&s.view(), t).map(|n| n.id))
                .collect::<RepoResult<Vec<NodeId>>>()?;
            for id in ids {
                if s.view().node(&id).is_some() {
                    s.apply(ChangeOp::RemoveNode { id })?;
                }
            }
            Ok(())
        })?;
        info!(tx = %tx.name(), artifacts = targets.len(), "artifacts staged for removal");
        Ok(())
    }
}

fn artifact_node(view: &View<'_>, target: &str) -> RepoResult<NodeRecord> {
    view.get_path(target)
        .filter(|n| n.has_mixin(mixins::LIBRARY_COMPONENT))
        .ok_or_else(|| RepoError::NotFound(format!("artifact {target}")))
}

/// Create missing folders from the library root down to `folder`.
fn ensure_folders(s: &mut Staging<'_>, folder: &str) -> RepoResult<NodeId> {
    let mut current = s.view().require_path(LIBRARY_ROOT)?;
    let Some(rest) = path::rebase(folder, LIBRARY_ROOT, path::ROOT) else {
        return Err(RepoError::InvalidArgument(format!("'{folder}' is outside the library")));
    };
    for segment in path::segments(&rest) {
        let next = path::join(&current.path, segment);
        current = match s.view().get_path(&next) {
            Some(node) => node,
            None => {
                let id = NodeId::new();
                s.apply(ChangeOp::AddNode {
                    id,
                    parent: current.id,
                    name: segment.to_string(),
                    primary_type: types::UNSTRUCTURED.to_string(),
                    provisional: true,
                })?;
                s.require(&id)?
            }
        };
    }
    Ok(current.id)
}
