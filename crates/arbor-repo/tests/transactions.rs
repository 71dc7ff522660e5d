mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use arbor_repo::lexicon::{types, SYSTEM_USER};
use arbor_repo::{
    Property, RepoError, Repository, RepositoryConfig, SequencingError, TxState, Value,
};

use common::{open, Gated, Received, RecordingListener, GATED_INPUT, GATED_TYPE, WAIT};

#[test]
fn synchronous_commit_is_visible_to_a_fresh_search() {
    let repo = open();
    let tx = repo.create_transaction("alice", "create", false, None).unwrap();
    repo.add(&tx, None, "vdb1", Some("test:vdb")).unwrap();
    repo.add(&tx, Some("vdb1"), "model", Some("test:model")).unwrap();
    let handle = repo.commit(&tx).unwrap();
    assert!(handle.is_settled());
    assert_eq!(tx.state(), TxState::Committed);

    let reader = repo.create_transaction("alice", "read", false, None).unwrap();
    let hits = repo.search_by_type(&reader, "test:model").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/arbor/workspace/alice/vdb1/model");
}

#[test]
fn uncommitted_changes_stay_private() {
    let repo = open();
    let writer = repo.create_transaction(SYSTEM_USER, "writer", false, None).unwrap();
    repo.add(&writer, Some("/"), "pending", None).unwrap();

    assert!(repo.get(&writer, "/pending").unwrap().is_some());
    assert!(repo.search_by_path(&writer, "/pending").unwrap().is_empty());

    let other = repo.create_transaction(SYSTEM_USER, "other", false, None).unwrap();
    assert!(repo.get(&other, "/pending").unwrap().is_none());

    repo.commit(&writer).unwrap();
    assert!(repo.get(&other, "/pending").unwrap().is_some());
}

#[test]
fn listener_waits_for_sequencing_to_finish() {
    let repo = open();
    let (gate, finished) = Gated::register(&repo);
    let listener = RecordingListener::watching(finished.clone());

    let tx = repo
        .create_transaction(SYSTEM_USER, "gated", false, Some(listener.clone()))
        .unwrap();
    repo.add(&tx, Some("/"), "g", Some(GATED_TYPE)).unwrap();
    repo.set_property(&tx, "/g", Property::single(GATED_INPUT, "go")).unwrap();
    let handle = repo.commit(&tx).unwrap();

    // Persisted, but sequencing is still running.
    assert_eq!(tx.state(), TxState::Committed);
    assert!(!handle.is_settled());
    assert!(listener.wait(Duration::from_millis(200)).is_none());
    assert_eq!(repo.outstanding_sequencing(), 1);

    gate.notify_one();
    let (received, finished_at_call) = listener.wait(WAIT).unwrap();
    assert!(finished_at_call);
    assert!(finished.load(Ordering::SeqCst));
    match received {
        Received::Outcome(outcome) => {
            assert_eq!(outcome.state, TxState::Committed);
            let report = outcome.sequencing.unwrap();
            assert_eq!(report.tasks.len(), 1);
            assert_eq!(report.derived(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(repo.outstanding_sequencing(), 0);
    assert!(handle.is_settled());

    let reader = repo.create_transaction(SYSTEM_USER, "read", false, None).unwrap();
    assert!(repo.get(&reader, "/g/derived").unwrap().is_some());
}

#[test]
fn listener_fires_even_without_sequencing_work() {
    let repo = open();
    let listener = RecordingListener::new();
    let tx = repo
        .create_transaction("alice", "plain", false, Some(listener.clone()))
        .unwrap();
    repo.add(&tx, None, "folder", None).unwrap();
    let handle = repo.commit(&tx).unwrap();

    match listener.wait(WAIT) {
        Some((Received::Outcome(outcome), _)) => {
            assert!(outcome.commit.is_some());
            assert!(outcome.sequencing.unwrap().tasks.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(listener.calls(), 1);
    assert_eq!(handle.wait(WAIT).unwrap().state, TxState::Committed);
}

#[test]
fn remove_is_all_or_nothing() {
    let repo = open();
    let setup = repo.create_transaction(SYSTEM_USER, "setup", false, None).unwrap();
    repo.add(&setup, Some("/"), "a", None).unwrap();
    repo.add(&setup, Some("/"), "b", None).unwrap();
    repo.commit(&setup).unwrap();

    let tx = repo.create_transaction(SYSTEM_USER, "remove", false, None).unwrap();
    let err = repo.remove(&tx, &["/a", "/b", "/doesNotExist"]).unwrap_err();
    match err {
        RepoError::NotFound(p) => assert_eq!(p, "/doesNotExist"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!tx.has_changes());
    assert!(repo.get(&tx, "/a").unwrap().is_some());
    assert!(repo.get(&tx, "/b").unwrap().is_some());

    repo.commit(&tx).unwrap();
    let check = repo.create_transaction(SYSTEM_USER, "check", false, None).unwrap();
    assert_eq!(repo.search_by_path(&check, "/a").unwrap().len(), 1);
    assert_eq!(repo.search_by_path(&check, "/b").unwrap().len(), 1);
}

#[test]
fn remove_of_nested_paths() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "nested", false, None).unwrap();
    repo.add(&tx, Some("/"), "a", None).unwrap();
    repo.add(&tx, Some("/a"), "b", None).unwrap();
    repo.remove(&tx, &["/a", "/a/b"]).unwrap();
    assert!(repo.get(&tx, "/a").unwrap().is_none());
    assert!(repo.remove(&tx, &["/arbor/library"]).is_err());
}

#[test]
fn rollback_only_transaction_never_commits() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "dry-run", true, None).unwrap();
    repo.add(&tx, Some("/"), "never", None).unwrap();
    let handle = repo.commit(&tx).unwrap();

    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(handle.state(), TxState::RolledBack);
    assert!(handle.commit().is_none());

    let check = repo.create_transaction(SYSTEM_USER, "check", false, None).unwrap();
    assert!(repo.get(&check, "/never").unwrap().is_none());
}

#[test]
fn rollback_discards_and_tells_listener() {
    let repo = open();
    let listener = RecordingListener::new();
    let tx = repo
        .create_transaction(SYSTEM_USER, "abandon", false, Some(listener.clone()))
        .unwrap();
    repo.add(&tx, Some("/"), "gone", None).unwrap();
    let outcome = repo.rollback(&tx).unwrap();
    assert_eq!(outcome.state, TxState::RolledBack);
    assert_eq!(outcome.changes, 1);

    match listener.wait(WAIT) {
        Some((Received::Outcome(o), _)) => assert_eq!(o.state, TxState::RolledBack),
        other => panic!("unexpected {other:?}"),
    }
    let check = repo.create_transaction(SYSTEM_USER, "check", false, None).unwrap();
    assert!(repo.get(&check, "/gone").unwrap().is_none());
}

#[test]
fn finished_transactions_refuse_further_work() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "once", false, None).unwrap();
    assert_eq!(tx.state(), TxState::NotStarted);
    repo.add(&tx, Some("/"), "x", None).unwrap();
    assert_eq!(tx.state(), TxState::Running);
    repo.commit(&tx).unwrap();

    assert!(matches!(
        repo.commit(&tx),
        Err(RepoError::State { state: TxState::Committed, .. })
    ));
    assert!(matches!(repo.rollback(&tx), Err(RepoError::State { .. })));
    assert!(matches!(repo.add(&tx, Some("/"), "y", None), Err(RepoError::State { .. })));
    assert!(matches!(repo.get(&tx, "/x"), Err(RepoError::State { .. })));
    assert!(matches!(repo.search_by_type(&tx, types::UNSTRUCTURED), Err(RepoError::State { .. })));
}

#[test]
fn empty_commit_settles() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "empty", false, None).unwrap();
    let outcome = repo.commit(&tx).unwrap().wait(WAIT).unwrap();
    assert_eq!(outcome.changes, 0);
    assert!(outcome.commit.is_none());
    assert_eq!(tx.state(), TxState::Committed);
}

#[test]
fn synchronous_commit_times_out() {
    let repo =
        Repository::open(RepositoryConfig::in_memory().with_commit_timeout(Duration::from_millis(100)))
            .unwrap();
    let (gate, _) = Gated::register(&repo);

    let tx = repo.create_transaction(SYSTEM_USER, "slow", false, None).unwrap();
    repo.add(&tx, Some("/"), "g", Some(GATED_TYPE)).unwrap();
    repo.set_property(&tx, "/g", Property::single(GATED_INPUT, "go")).unwrap();
    assert!(matches!(repo.commit(&tx), Err(RepoError::Timeout { .. })));
    // The changes were persisted regardless.
    assert_eq!(tx.state(), TxState::Committed);

    gate.notify_one();
}

#[test]
fn sequencing_failure_keeps_persisted_changes() {
    use arbor_repo::lexicon::vdb;

    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "bad ddl", false, None).unwrap();
    repo.add(&tx, Some("/"), "model", Some(vdb::MODEL)).unwrap();
    repo.set_property(&tx, "/model", Property::single(vdb::MODEL_DEFINITION, "CREATE TABLE (")).unwrap();

    match repo.commit(&tx) {
        Err(RepoError::Sequencing(SequencingError::Failed { path, .. })) => assert_eq!(path, "/model"),
        other => panic!("unexpected {other:?}"),
    }
    let check = repo.create_transaction(SYSTEM_USER, "check", false, None).unwrap();
    let model = repo.get(&check, "/model").unwrap().unwrap();
    assert!(model.property(vdb::MODEL_DEFINITION).is_some());
    assert!(model.children.is_empty());
}

#[test]
fn asynchronous_persist_failure_reaches_listener() {
    let repo = open();
    let first = repo.create_transaction(SYSTEM_USER, "first", false, None).unwrap();
    let listener = RecordingListener::new();
    let second = repo
        .create_transaction(SYSTEM_USER, "second", false, Some(listener.clone()))
        .unwrap();
    repo.add(&first, Some("/"), "contested", None).unwrap();
    repo.add(&second, Some("/"), "contested", None).unwrap();

    repo.commit(&first).unwrap();
    let handle = repo.commit(&second).unwrap();
    assert!(matches!(handle.wait(WAIT), Err(RepoError::DuplicatePath(_))));
    assert_eq!(second.state(), TxState::RolledBack);
    match listener.wait(WAIT) {
        Some((Received::Error(RepoError::DuplicatePath(p)), _)) => assert_eq!(p, "/contested"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn properties_round_trip() {
    let repo = open();
    let tx = repo.create_transaction("alice", "props", false, None).unwrap();
    repo.add(&tx, None, "doc", None).unwrap();
    let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    repo.set_binary(&tx, "doc", "content", content.as_slice()).unwrap();
    repo.set_property(
        &tx,
        "doc",
        Property::multiple("tags", vec![Value::from("a"), Value::from("b")]).unwrap(),
    )
    .unwrap();
    repo.set_property(&tx, "doc", Property::single("size", 4096i64)).unwrap();
    repo.add_mixin(&tx, "doc", "test:tagged").unwrap();
    repo.commit(&tx).unwrap();

    let read = repo.create_transaction("alice", "read", false, None).unwrap();
    let binary = repo.get_property(&read, "doc", "content").unwrap().unwrap();
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut binary.binary_reader().unwrap(), &mut bytes).unwrap();
    assert_eq!(bytes, content);
    assert_eq!(
        repo.get_property(&read, "doc", "tags").unwrap().unwrap().values().len(),
        2
    );
    assert_eq!(
        repo.property_names(&read, "doc").unwrap(),
        vec!["content".to_string(), "size".to_string(), "tags".to_string()]
    );
    assert!(repo.has_property(&read, "doc", "size").unwrap());
    let doc = repo.get(&read, "doc").unwrap().unwrap();
    assert!(doc.has_mixin("test:tagged"));
    assert_eq!(repo.parent(&read, "doc").unwrap().unwrap().primary_type, types::HOME);

    repo.remove_property(&read, "doc", "size").unwrap();
    assert!(!repo.has_property(&read, "doc", "size").unwrap());
    assert!(matches!(
        repo.remove_property(&read, "doc", "size"),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn children_filters() {
    let repo = open();
    let tx = repo.create_transaction(SYSTEM_USER, "children", false, None).unwrap();
    repo.add(&tx, Some("/"), "parent", None).unwrap();
    for name in ["test1", "test2", "other"] {
        repo.add(&tx, Some("/parent"), name, Some("test:node")).unwrap();
    }
    repo.add(&tx, Some("/parent"), "folder", None).unwrap();

    let all = repo.children(&tx, "/parent", &[]).unwrap();
    let names: Vec<&str> = all.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["test1", "test2", "other", "folder"]);
    assert_eq!(repo.children(&tx, "/parent", &["test*"]).unwrap().len(), 2);
    assert_eq!(repo.children(&tx, "/parent", &["test1", "oth*"]).unwrap().len(), 2);
    assert_eq!(repo.children_of_type(&tx, "/parent", "test:node").unwrap().len(), 3);
    assert!(repo.has_child(&tx, "/parent", "folder").unwrap());
    assert!(!repo.has_child(&tx, "/parent", "missing").unwrap());

    let id = all[0].id;
    assert_eq!(repo.get_by_id(&tx, &id).unwrap().unwrap().path, "/parent/test1");
    assert!(matches!(
        repo.add(&tx, Some("/parent"), "test1", None),
        Err(RepoError::DuplicatePath(_))
    ));
    assert!(matches!(repo.add(&tx, Some("/nowhere"), "x", None), Err(RepoError::NotFound(_))));
}

#[test]
fn mixin_removal_and_node_lookups() {
    let repo = open();
    let tx = repo.create_transaction("alice", "mixins", false, None).unwrap();
    let created = repo.add(&tx, None, "doc", None).unwrap();
    repo.add_mixin(&tx, "doc", "test:tagged").unwrap();
    repo.add_mixin(&tx, "doc", "test:reviewed").unwrap();
    repo.commit(&tx).unwrap();

    let edit = repo.create_transaction("alice", "edit", false, None).unwrap();
    repo.remove_mixin(&edit, "doc", "test:tagged").unwrap();
    repo.remove_mixin(&edit, "doc", "test:absent").unwrap();
    let staged = repo.get(&edit, "doc").unwrap().unwrap();
    assert!(!staged.has_mixin("test:tagged"));
    assert!(staged.has_mixin("test:reviewed"));

    let reader = repo.create_transaction("alice", "read", false, None).unwrap();
    assert!(repo.get(&reader, "doc").unwrap().unwrap().has_mixin("test:tagged"));
    repo.commit(&edit).unwrap();
    let doc = repo.get(&reader, "doc").unwrap().unwrap();
    assert!(!doc.has_mixin("test:tagged"));
    assert!(doc.has_mixin("test:reviewed"));
    assert!(matches!(
        repo.remove_mixin(&reader, "missing", "test:tagged"),
        Err(RepoError::NotFound(_))
    ));

    let by_id = repo.get_by_id(&reader, &created.id).unwrap().unwrap();
    assert_eq!(by_id.path, "/arbor/workspace/alice/doc");
    assert!(repo.get_by_id(&reader, &arbor_repo::NodeId::new()).unwrap().is_none());

    assert!(repo.property_names(&reader, "doc").unwrap().is_empty());
    assert!(repo.children_of_type(&reader, "doc", "test:node").unwrap().is_empty());
    let home = repo.parent(&reader, "doc").unwrap().unwrap();
    assert_eq!(home.path, "/arbor/workspace/alice");

    let system = repo.create_transaction(SYSTEM_USER, "root", false, None).unwrap();
    assert!(repo.parent(&system, "/").unwrap().is_none());
}

#[test]
fn terminal_transactions_refuse_mutations() {
    let repo = open();
    let committed = repo.create_transaction(SYSTEM_USER, "committed", false, None).unwrap();
    repo.add(&committed, Some("/"), "n", None).unwrap();
    repo.set_property(&committed, "/n", Property::single("p", "v")).unwrap();
    repo.commit(&committed).unwrap();

    let state_error = |r: Result<(), RepoError>, expected: TxState| {
        assert!(
            matches!(r, Err(RepoError::State { state, .. }) if state == expected),
            "expected a {expected} state error"
        );
    };
    state_error(repo.add(&committed, Some("/n"), "child", None).map(|_| ()), TxState::Committed);
    state_error(
        repo.set_property(&committed, "/n", Property::single("p", "w")),
        TxState::Committed,
    );
    state_error(repo.set_binary(&committed, "/n", "b", &b"bytes"[..]), TxState::Committed);
    state_error(repo.remove_property(&committed, "/n", "p"), TxState::Committed);
    state_error(repo.add_mixin(&committed, "/n", "test:m"), TxState::Committed);
    state_error(repo.remove_mixin(&committed, "/n", "test:m"), TxState::Committed);
    state_error(repo.remove(&committed, &["/n"]), TxState::Committed);

    let rolled_back = repo.create_transaction(SYSTEM_USER, "rolled back", false, None).unwrap();
    repo.add(&rolled_back, Some("/"), "m", None).unwrap();
    repo.rollback(&rolled_back).unwrap();
    state_error(
        repo.set_property(&rolled_back, "/n", Property::single("p", "w")),
        TxState::RolledBack,
    );
    state_error(repo.add(&rolled_back, Some("/"), "m", None).map(|_| ()), TxState::RolledBack);

    let check = repo.create_transaction(SYSTEM_USER, "check", false, None).unwrap();
    assert_eq!(
        repo.get_property(&check, "/n", "p").unwrap().unwrap().string_value(),
        Some("v")
    );
    assert!(repo.get(&check, "/m").unwrap().is_none());
}

#[test]
fn listener_is_told_before_shutdown_returns() {
    for round in 0..20 {
        let repo = open();
        let listener = RecordingListener::new();
        let tx = repo
            .create_transaction("alice", "late", false, Some(listener.clone()))
            .unwrap();
        repo.add(&tx, None, "folder", None).unwrap();
        repo.commit(&tx).unwrap();
        repo.shutdown().unwrap();
        drop(repo);
        assert_eq!(listener.calls(), 1, "listener not called in round {round}");
    }
}

#[test]
fn rollback_listener_is_told_before_shutdown_returns() {
    let repo = open();
    let listener = RecordingListener::new();
    let tx = repo
        .create_transaction("alice", "discard", false, Some(listener.clone()))
        .unwrap();
    repo.add(&tx, None, "folder", None).unwrap();
    repo.rollback(&tx).unwrap();
    repo.shutdown().unwrap();
    drop(repo);
    assert!(matches!(
        listener.wait(Duration::ZERO),
        Some((Received::Outcome(ref o), _)) if o.state == TxState::RolledBack
    ));
}
