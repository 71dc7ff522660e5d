mod common;

use std::sync::Arc;

use arbor_repo::lexicon::{ddl, mixins, vdb};
use arbor_repo::{EventKind, EventLatch, Property, TxState};

use common::{open, WAIT};

const DEFINITION: &str = "CREATE FOREIGN TABLE accounts (id integer, name string(255)); \
                          CREATE VIEW totals (n long) AS SELECT COUNT(*) FROM accounts;";

#[test]
fn derived_nodes_are_visible_when_commit_returns() {
    let repo = open();
    let completed = Arc::new(EventLatch::new(EventKind::SequencingCompleted, 1));
    repo.add_observer(Some(EventKind::SequencingCompleted), completed.clone());

    let tx = repo.create_transaction("ivy", "model", false, None).unwrap();
    repo.add(&tx, None, "ledger", Some(vdb::MODEL)).unwrap();
    repo.set_property(&tx, "ledger", Property::single(vdb::MODEL_DEFINITION, DEFINITION))
        .unwrap();
    let handle = repo.commit(&tx).unwrap();
    assert_eq!(handle.state(), TxState::Committed);
    assert!(handle.is_settled());

    let reader = repo.create_transaction("ivy", "read", false, None).unwrap();
    let tables = repo.children_of_type(&reader, "ledger", ddl::CREATE_TABLE).unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "accounts");
    assert!(tables[0].has_mixin(mixins::DERIVED));
    let columns = repo.children(&reader, &tables[0].path, &[]).unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(repo.children_of_type(&reader, "ledger", ddl::CREATE_VIEW).unwrap().len(), 1);

    assert!(completed.wait(WAIT));
}

#[test]
fn redefining_a_model_replaces_derived_nodes() {
    let repo = open();
    let tx = repo.create_transaction("ivy", "first", false, None).unwrap();
    repo.add(&tx, None, "ledger", Some(vdb::MODEL)).unwrap();
    repo.set_property(&tx, "ledger", Property::single(vdb::MODEL_DEFINITION, DEFINITION))
        .unwrap();
    repo.commit(&tx).unwrap();

    let tx = repo.create_transaction("ivy", "second", false, None).unwrap();
    repo.set_property(
        &tx,
        "ledger",
        Property::single(vdb::MODEL_DEFINITION, "CREATE FOREIGN TABLE audit (at timestamp);"),
    )
    .unwrap();
    repo.commit(&tx).unwrap();

    let reader = repo.create_transaction("ivy", "read", false, None).unwrap();
    let derived: Vec<String> = repo
        .children(&reader, "ledger", &[])
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(derived, vec!["audit".to_string()]);
}

#[test]
fn nodes_without_a_matching_rule_are_not_sequenced() {
    let repo = open();
    let tx = repo.create_transaction("ivy", "plain", false, None).unwrap();
    repo.add(&tx, None, "notes", None).unwrap();
    repo.set_property(&tx, "notes", Property::single(vdb::MODEL_DEFINITION, DEFINITION))
        .unwrap();
    repo.commit(&tx).unwrap();

    let reader = repo.create_transaction("ivy", "read", false, None).unwrap();
    assert!(repo.children(&reader, "notes", &[]).unwrap().is_empty());
    assert_eq!(repo.outstanding_sequencing(), 0);
}
