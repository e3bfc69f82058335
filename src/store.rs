//! Seams between reference resolution and the metadata store.

use crate::error::Result;
use crate::model::{Dump, PackageReference, RepositorySummary};

/// Pages through package references matching one package.
///
/// A pager holds a read transaction open until [`ReferencePager::close`];
/// dropping it without closing abandons the transaction.
pub trait ReferencePager: Send {
    /// Returns up to the pager's limit of rows starting at `offset`.
    fn page_from_offset(&mut self, offset: usize) -> Result<Vec<PackageReference>>;

    fn close(self: Box<Self>) -> Result<()>;
}

pub trait Store: Send + Sync {
    fn get_dump_by_id(&self, id: i64) -> Result<Option<Dump>>;

    /// Returns the dump providing the package, if any.
    fn get_package(&self, scheme: &str, name: &str, version: &str) -> Result<Option<Dump>>;

    /// Candidate dumps for a path at a commit, closest first.
    fn find_closest_dumps(
        &self,
        repository_id: i64,
        commit: &str,
        path: &str,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>>;

    /// References to the package from dumps of the same repository visible
    /// from `commit`. Returns the total row count and the pager.
    fn same_repo_pager(
        &self,
        repository_id: i64,
        commit: &str,
        scheme: &str,
        name: &str,
        version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)>;

    /// References to the package from tip-visible dumps of other repositories.
    fn package_reference_pager(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
        repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)>;

    fn list_indexed_repositories(&self) -> Result<Vec<RepositorySummary>>;
}
