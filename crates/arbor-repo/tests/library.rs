mod common;

use arbor_repo::lexicon::{mixins, props, SYSTEM_USER};
use arbor_repo::{ArtifactDescriptor, Property, RepoError, Repository};

use common::open;

const DATASERVICE: &str = "test:dataservice";

fn workspace_source(repo: &Repository) {
    let tx = repo.create_transaction("gina", "build", false, None).unwrap();
    repo.add(&tx, None, "orders", Some("test:vdb")).unwrap();
    repo.set_property(&tx, "orders", Property::single("test:owner", "gina")).unwrap();
    repo.add(&tx, Some("orders"), "model", Some("test:model")).unwrap();
    repo.commit(&tx).unwrap();
}

#[test]
fn publish_and_retrieve() {
    let repo = open();
    workspace_source(&repo);

    let tx = repo.create_transaction("gina", "publish", false, None).unwrap();
    let descriptor = ArtifactDescriptor::new("dataservices/orders", DATASERVICE)
        .with_description("order service")
        .with_version(3);
    let artifact = repo.publish(&tx, false, &descriptor, "orders").unwrap();
    assert_eq!(artifact.node.path, "/arbor/library/dataservices/orders");
    repo.commit(&tx).unwrap();

    let reader = repo.create_transaction("hank", "read", false, None).unwrap();
    let found = repo.retrieve(&reader, &["dataservices/orders"]).unwrap();
    assert_eq!(found.len(), 1);
    let artifact = &found[0];
    assert_eq!(artifact.descriptor, descriptor);
    assert_eq!(artifact.node.primary_type, DATASERVICE);
    assert!(artifact.node.has_mixin(mixins::LIBRARY_COMPONENT));
    assert_eq!(
        artifact.node.property(props::DESCRIPTION).unwrap().string_value(),
        Some("order service")
    );
    assert_eq!(
        artifact.node.property("test:owner").unwrap().string_value(),
        Some("gina")
    );
    let children = repo.children(&reader, &artifact.node.path, &[]).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].primary_type, "test:model");

    // The source stays in the workspace.
    let source = repo.create_transaction("gina", "source", false, None).unwrap();
    assert!(repo.get(&source, "orders/model").unwrap().is_some());
}

#[test]
fn publishing_twice_requires_overwrite() {
    let repo = open();
    workspace_source(&repo);
    let descriptor = ArtifactDescriptor::new("orders", DATASERVICE);

    let tx = repo.create_transaction("gina", "first", false, None).unwrap();
    repo.publish(&tx, false, &descriptor, "orders").unwrap();
    repo.commit(&tx).unwrap();

    let tx = repo.create_transaction("gina", "again", false, None).unwrap();
    assert!(matches!(
        repo.publish(&tx, false, &descriptor, "orders"),
        Err(RepoError::DuplicatePath(p)) if p == "/arbor/library/orders"
    ));
    let updated = descriptor.clone().with_version(2);
    repo.publish(&tx, true, &updated, "orders").unwrap();
    repo.commit(&tx).unwrap();

    let reader = repo.create_transaction(SYSTEM_USER, "read", false, None).unwrap();
    let found = repo.retrieve(&reader, &["orders"]).unwrap();
    assert_eq!(found[0].descriptor.version, 2);
    assert_eq!(repo.search_by_path(&reader, "/arbor/library/orders").unwrap().len(), 1);
}

#[test]
fn unpublish_removes_all_or_nothing() {
    let repo = open();
    workspace_source(&repo);
    let tx = repo.create_transaction("gina", "publish", false, None).unwrap();
    repo.publish(&tx, false, &ArtifactDescriptor::new("a", DATASERVICE), "orders").unwrap();
    repo.publish(&tx, false, &ArtifactDescriptor::new("b", DATASERVICE), "orders").unwrap();
    repo.commit(&tx).unwrap();

    let tx = repo.create_transaction("gina", "unpublish", false, None).unwrap();
    assert!(matches!(
        repo.unpublish(&tx, &["a", "missing"]),
        Err(RepoError::NotFound(_))
    ));
    assert_eq!(repo.retrieve(&tx, &["a", "b"]).unwrap().len(), 2);

    repo.unpublish(&tx, &["a", "b"]).unwrap();
    repo.commit(&tx).unwrap();

    let reader = repo.create_transaction("gina", "read", false, None).unwrap();
    assert!(matches!(
        repo.retrieve(&reader, &["a"]),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn publish_rejects_overlapping_paths() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "overlap", false, None).unwrap();
    repo.add(&tx, Some("/arbor/library"), "seed", None).unwrap();
    assert!(matches!(
        repo.publish(&tx, false, &ArtifactDescriptor::new("seed/copy", DATASERVICE), "/arbor/library/seed"),
        Err(RepoError::InvalidArgument(_))
    ));
}
