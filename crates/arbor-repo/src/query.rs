use tracing::debug;

use arbor_search::{KeywordCriteria, SearchCriteria, SearchEngine};

use crate::access::{self, Access};
use crate::error::RepoResult;
use crate::nodes::Node;
use crate::repository::Repository;
use crate::transaction::UnitOfWork;

impl Repository {
    /// Run a search over committed state only. The transaction's own
    /// buffered changes are not visible; nodes the caller may not read are
    /// left out. Results are sorted by path.
    pub fn search(&self, tx: &UnitOfWork, criteria: &SearchCriteria) -> RepoResult<Vec<Node>> {
        self.ensure_reachable()?;
        tx.ensure_open("search")?;
        let engine = SearchEngine::new(self.store.snapshot());
        let hits: Vec<Node> = engine
            .search(criteria)
            .into_iter()
            .filter(|n| access::is_permitted(tx.user(), Access::Read, &n.path))
            .collect();
        debug!(tx = %tx.name(), seq = engine.seq(), hits = hits.len(), "search evaluated");
        Ok(hits)
    }

    pub fn search_by_type(&self, tx: &UnitOfWork, type_name: &str) -> RepoResult<Vec<Node>> {
        self.search(tx, &SearchCriteria::by_type([type_name])?)
    }

    /// Exact path, or a `*`/`**` pattern. Relative paths resolve against the
    /// caller's home.
    pub fn search_by_path(&self, tx: &UnitOfWork, p: &str) -> RepoResult<Vec<Node>> {
        let p = access::resolve(tx.user(), p)?;
        self.search(tx, &SearchCriteria::by_path(&p)?)
    }

    pub fn search_by_keyword(
        &self,
        tx: &UnitOfWork,
        type_name: &str,
        property: &str,
        criteria: KeywordCriteria,
        keywords: &[&str],
    ) -> RepoResult<Vec<Node>> {
        self.search(
            tx,
            &SearchCriteria::by_keyword(type_name, property, criteria, keywords.iter().copied())?,
        )
    }
}
