use std::sync::Arc;

use tracing::debug;

use arbor_store::{NodeRecord, NodeTree};

use crate::criteria::SearchCriteria;

/// Evaluates [`SearchCriteria`] against one committed snapshot.
///
/// The engine holds the snapshot for its whole lifetime, so consecutive
/// searches on the same engine see the same state even while commits land.
pub struct SearchEngine {
    snapshot: Arc<NodeTree>,
}

impl SearchEngine {
    pub fn new(snapshot: Arc<NodeTree>) -> Self {
        Self { snapshot }
    }

    /// Commit sequence number of the snapshot being searched.
    pub fn seq(&self) -> u64 {
        self.snapshot.seq()
    }

    /// Run a search. Results are sorted by path.
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<NodeRecord> {
        let tree = &*self.snapshot;
        let mut hits: Vec<&NodeRecord> = match criteria {
            SearchCriteria::Type(types) => {
                let mut hits: Vec<&NodeRecord> =
                    types.iter().flat_map(|t| tree.of_primary_type(t)).collect();
                hits.sort_by(|a, b| a.path.cmp(&b.path));
                hits.dedup_by(|a, b| a.id == b.id);
                hits
            }
            SearchCriteria::Path(p) => tree.get_by_path(p).into_iter().collect(),
            SearchCriteria::PathPattern(pattern) => {
                let prefix = pattern.literal_prefix();
                match tree.get_by_path(&prefix) {
                    Some(start) => tree
                        .descendants(&start.id)
                        .into_iter()
                        .filter(|r| pattern.matches(&r.path))
                        .collect(),
                    None => Vec::new(),
                }
            }
            SearchCriteria::Keyword {
                type_name,
                property,
                criteria,
                keywords,
            } => tree
                .of_primary_type(type_name)
                .filter(|r| {
                    r.property(property)
                        .and_then(|p| p.text())
                        .is_some_and(|text| criteria.matches(&text, keywords))
                })
                .collect(),
        };

        hits.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(criteria = %criteria, seq = tree.seq(), hits = hits.len(), "search");
        hits.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::KeywordCriteria;
    use arbor_store::{ChangeOp, ChangeSet};
    use arbor_types::{NodeId, Property};

    fn add(ops: &mut Vec<ChangeOp>, parent: NodeId, name: &str, ty: &str) -> NodeId {
        let id = NodeId::new();
        ops.push(ChangeOp::AddNode {
            id,
            parent,
            name: name.into(),
            primary_type: ty.into(),
            provisional: false,
        });
        id
    }

    fn sample_tree() -> NodeTree {
        let mut tree = NodeTree::new();
        let mut ops = Vec::new();
        let models = add(&mut ops, NodeId::ROOT, "models", "nt:unstructured");
        for i in 1..=5 {
            let id = add(&mut ops, models, &format!("ddl{i}"), "test:model");
            ops.push(ChangeOp::SetProperty {
                id,
                property: Property::single("test:modelType", "DDL"),
            });
            let id = add(&mut ops, models, &format!("teiid{i}"), "test:model");
            ops.push(ChangeOp::SetProperty {
                id,
                property: Property::single("test:modelType", "TEIIDSQL"),
            });
        }
        for i in 1..=5 {
            add(&mut ops, models, &format!("test{i}"), "test:other");
        }
        tree.apply(ChangeSet::new("SYSTEM", ops)).unwrap();
        tree
    }

    #[test]
    fn by_type() {
        let engine = SearchEngine::new(Arc::new(sample_tree()));
        let criteria = SearchCriteria::by_type(["test:model"]).unwrap();
        assert_eq!(engine.search(&criteria).len(), 10);

        let criteria = SearchCriteria::by_type(["test:model", "test:other"]).unwrap();
        assert_eq!(engine.search(&criteria).len(), 15);

        let criteria = SearchCriteria::by_type(["unknown"]).unwrap();
        assert!(engine.search(&criteria).is_empty());
    }

    #[test]
    fn by_keyword_any() {
        let engine = SearchEngine::new(Arc::new(sample_tree()));
        let criteria =
            SearchCriteria::by_keyword("test:model", "test:modelType", KeywordCriteria::Any, ["DDL"])
                .unwrap();
        let hits = engine.search(&criteria);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|r| r.name.starts_with("ddl")));
    }

    #[test]
    fn by_keyword_none_and_all() {
        let engine = SearchEngine::new(Arc::new(sample_tree()));
        let none = SearchCriteria::by_keyword(
            "test:model",
            "test:modelType",
            KeywordCriteria::None,
            ["DDL"],
        )
        .unwrap();
        assert!(engine.search(&none).iter().all(|r| r.name.starts_with("teiid")));

        let all = SearchCriteria::by_keyword(
            "test:model",
            "test:modelType",
            KeywordCriteria::All,
            ["TEIID", "SQL"],
        )
        .unwrap();
        assert_eq!(engine.search(&all).len(), 5);
    }

    #[test]
    fn by_exact_path_never_returns_siblings() {
        let engine = SearchEngine::new(Arc::new(sample_tree()));
        for i in 1..=5 {
            let criteria = SearchCriteria::by_path(&format!("/models/test{i}")).unwrap();
            let hits = engine.search(&criteria);
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].name, format!("test{i}"));
        }
        assert!(engine
            .search(&SearchCriteria::by_path("/models/test9").unwrap())
            .is_empty());
    }

    #[test]
    fn by_path_pattern() {
        let engine = SearchEngine::new(Arc::new(sample_tree()));
        let hits = engine.search(&SearchCriteria::by_path("/models/test*").unwrap());
        let names: Vec<&str> = hits.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["test1", "test2", "test3", "test4", "test5"]);

        let everything = engine.search(&SearchCriteria::by_path("/**").unwrap());
        assert_eq!(everything.len(), 1 + 1 + 15);
    }

    #[test]
    fn results_are_stable_and_snapshot_isolated() {
        let mut tree = sample_tree();
        let engine = SearchEngine::new(Arc::new(tree.clone()));
        let criteria = SearchCriteria::by_type(["test:model"]).unwrap();
        let first = engine.search(&criteria);

        let models = tree.get_by_path("/models").unwrap().id;
        let mut ops = Vec::new();
        add(&mut ops, models, "late", "test:model");
        tree.apply(ChangeSet::new("SYSTEM", ops)).unwrap();

        assert_eq!(engine.search(&criteria), first);
        assert_eq!(SearchEngine::new(Arc::new(tree)).search(&criteria).len(), 11);
    }
}
