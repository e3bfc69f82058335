//! In-memory stand-ins for the store and bundle manager.

use crate::bloom::BloomFilter;
use crate::bundle::BundleClient;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::{
    Dump, Location, Moniker, MonikerKind, ModelType, PackageInformation, PackageReference, Range,
    RepositorySummary,
};
use crate::store::{ReferencePager, Store};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn dump(id: i64, repository_id: i64, root: &str) -> Dump {
    Dump {
        id,
        repository_id,
        commit: "deadbeef".to_string(),
        root: root.to_string(),
        indexer: "lsif-go".to_string(),
        visible_at_tip: true,
        state: "completed".to_string(),
        uploaded_at: 0,
        started_at: None,
        finished_at: None,
    }
}

pub fn range(n: u32) -> Range {
    Range::new(n, n + 1, n + 2, n + 3)
}

pub fn loc(dump_id: i64, path: &str, range: Range) -> Location {
    Location {
        dump_id,
        path: path.to_string(),
        range,
    }
}

pub fn moniker(kind: MonikerKind, scheme: &str, identifier: &str) -> Moniker {
    Moniker {
        kind,
        scheme: scheme.to_string(),
        identifier: identifier.to_string(),
        package_information_id: None,
    }
}

pub fn import_moniker(scheme: &str, identifier: &str, package_information_id: &str) -> Moniker {
    Moniker {
        package_information_id: Some(package_information_id.to_string()),
        ..moniker(MonikerKind::Import, scheme, identifier)
    }
}

/// A package reference whose filter contains exactly `identifiers`.
pub fn package_reference(dump_id: i64, identifiers: &[&str]) -> PackageReference {
    let mut filter = BloomFilter::new(1024 * 8, 16);
    for identifier in identifiers {
        filter.add(identifier);
    }
    PackageReference {
        dump_id,
        scheme: "gomod".to_string(),
        name: "leftpad".to_string(),
        version: "0.1.0".to_string(),
        filter: filter.encode().unwrap(),
    }
}

#[derive(Default)]
pub struct PagerStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub abandoned: AtomicUsize,
}

impl PagerStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct FakePager {
    rows: Vec<PackageReference>,
    limit: usize,
    fail_at: Option<usize>,
    stats: Arc<PagerStats>,
    closed: bool,
}

impl ReferencePager for FakePager {
    fn page_from_offset(&mut self, offset: usize) -> Result<Vec<PackageReference>> {
        if self.fail_at == Some(offset) {
            return Err(Error::Bundle(format!("page at offset {offset} failed")));
        }
        Ok(self
            .rows
            .iter()
            .skip(offset)
            .take(self.limit)
            .cloned()
            .collect())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakePager {
    fn drop(&mut self) {
        if !self.closed {
            self.stats.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct FakeStore {
    dumps: HashMap<i64, Dump>,
    packages: HashMap<(String, String, String), i64>,
    closest: Vec<Dump>,
    same_repo_rows: Vec<PackageReference>,
    remote_rows: Vec<PackageReference>,
    fail_pages_at: Option<usize>,
    repositories: Vec<RepositorySummary>,
    pub same_repo_stats: Arc<PagerStats>,
    pub remote_stats: Arc<PagerStats>,
    pub repository_lists: Arc<AtomicUsize>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dumps(mut self, dumps: impl IntoIterator<Item = Dump>) -> Self {
        for dump in dumps {
            self.dumps.insert(dump.id, dump);
        }
        self
    }

    pub fn with_package(mut self, scheme: &str, name: &str, version: &str, dump_id: i64) -> Self {
        self.packages.insert(
            (scheme.to_string(), name.to_string(), version.to_string()),
            dump_id,
        );
        self
    }

    pub fn with_closest(mut self, dumps: Vec<Dump>) -> Self {
        self.closest = dumps;
        self
    }

    pub fn with_same_repo_references(mut self, rows: Vec<PackageReference>) -> Self {
        self.same_repo_rows = rows;
        self
    }

    pub fn with_remote_references(mut self, rows: Vec<PackageReference>) -> Self {
        self.remote_rows = rows;
        self
    }

    pub fn failing_pages_at(mut self, offset: usize) -> Self {
        self.fail_pages_at = Some(offset);
        self
    }

    pub fn with_repositories(mut self, repositories: Vec<RepositorySummary>) -> Self {
        self.repositories = repositories;
        self
    }

    fn pager(
        &self,
        rows: &[PackageReference],
        limit: usize,
        stats: &Arc<PagerStats>,
    ) -> (usize, Box<dyn ReferencePager>) {
        stats.opened.fetch_add(1, Ordering::SeqCst);
        let pager = FakePager {
            rows: rows.to_vec(),
            limit,
            fail_at: self.fail_pages_at,
            stats: Arc::clone(stats),
            closed: false,
        };
        (rows.len(), Box::new(pager))
    }
}

impl Store for FakeStore {
    fn get_dump_by_id(&self, id: i64) -> Result<Option<Dump>> {
        Ok(self.dumps.get(&id).cloned())
    }

    fn get_package(&self, scheme: &str, name: &str, version: &str) -> Result<Option<Dump>> {
        let key = (scheme.to_string(), name.to_string(), version.to_string());
        Ok(self
            .packages
            .get(&key)
            .and_then(|id| self.dumps.get(id))
            .cloned())
    }

    fn find_closest_dumps(
        &self,
        _repository_id: i64,
        _commit: &str,
        path: &str,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        Ok(self
            .closest
            .iter()
            .filter(|dump| dump.encloses(path))
            .filter(|dump| indexer.is_none_or(|indexer| dump.indexer == indexer))
            .cloned()
            .collect())
    }

    fn same_repo_pager(
        &self,
        _repository_id: i64,
        _commit: &str,
        _scheme: &str,
        _name: &str,
        _version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)> {
        Ok(self.pager(&self.same_repo_rows, limit, &self.same_repo_stats))
    }

    fn package_reference_pager(
        &self,
        _scheme: &str,
        _name: &str,
        _version: &str,
        _repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager>)> {
        Ok(self.pager(&self.remote_rows, limit, &self.remote_stats))
    }

    fn list_indexed_repositories(&self) -> Result<Vec<RepositorySummary>> {
        self.repository_lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.repositories.clone())
    }
}

type PositionKey = (i64, String, u32, u32);

fn position_key(dump_id: i64, path: &str, line: u32, character: u32) -> PositionKey {
    (dump_id, path.to_string(), line, character)
}

/// One recorded `moniker_results` call: (dump id, identifier, skip, take).
pub type MonikerResultsCall = (i64, String, usize, usize);

#[derive(Default)]
pub struct FakeBundle {
    exists: HashSet<(i64, String)>,
    missing_bundles: HashSet<i64>,
    definitions: HashMap<PositionKey, Vec<Location>>,
    references: HashMap<PositionKey, Vec<Location>>,
    hovers: HashMap<PositionKey, (String, Range)>,
    monikers: HashMap<PositionKey, Vec<Vec<Moniker>>>,
    moniker_results: HashMap<(i64, ModelType, String, String), Vec<Location>>,
    package_information: HashMap<(i64, String, String), PackageInformation>,
    pub moniker_calls: Mutex<Vec<MonikerResultsCall>>,
    cancels: Option<RequestContext>,
}

impl FakeBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels `ctx` whenever the bundle is queried. The query itself still
    /// answers normally.
    pub fn canceling(mut self, ctx: &RequestContext) -> Self {
        self.cancels = Some(ctx.clone());
        self
    }

    pub fn with_path(mut self, dump_id: i64, path: &str) -> Self {
        self.exists.insert((dump_id, path.to_string()));
        self
    }

    pub fn with_missing_bundle(mut self, dump_id: i64) -> Self {
        self.missing_bundles.insert(dump_id);
        self
    }

    pub fn with_definitions(
        mut self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
        locations: Vec<Location>,
    ) -> Self {
        self.definitions
            .insert(position_key(dump_id, path, line, character), locations);
        self
    }

    pub fn with_references(
        mut self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
        locations: Vec<Location>,
    ) -> Self {
        self.references
            .insert(position_key(dump_id, path, line, character), locations);
        self
    }

    pub fn with_hover(
        mut self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
        text: &str,
        range: Range,
    ) -> Self {
        self.hovers.insert(
            position_key(dump_id, path, line, character),
            (text.to_string(), range),
        );
        self
    }

    pub fn with_monikers(
        mut self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
        monikers: Vec<Vec<Moniker>>,
    ) -> Self {
        self.monikers
            .insert(position_key(dump_id, path, line, character), monikers);
        self
    }

    /// Registers a moniker's full result set; calls are answered by slicing
    /// it with their skip and take.
    pub fn with_moniker_results(
        mut self,
        dump_id: i64,
        model_type: ModelType,
        scheme: &str,
        identifier: &str,
        locations: Vec<Location>,
    ) -> Self {
        self.moniker_results.insert(
            (dump_id, model_type, scheme.to_string(), identifier.to_string()),
            locations,
        );
        self
    }

    pub fn with_package_information(
        mut self,
        dump_id: i64,
        path: &str,
        package_information_id: &str,
        name: &str,
        version: &str,
    ) -> Self {
        self.package_information.insert(
            (dump_id, path.to_string(), package_information_id.to_string()),
            PackageInformation {
                name: name.to_string(),
                version: version.to_string(),
            },
        );
        self
    }

    pub fn moniker_calls(&self) -> Vec<MonikerResultsCall> {
        self.moniker_calls.lock().unwrap().clone()
    }

    fn check_bundle(&self, dump_id: i64) -> Result<()> {
        if let Some(ctx) = &self.cancels {
            ctx.cancel();
        }
        if self.missing_bundles.contains(&dump_id) {
            return Err(Error::BundleNotFound(dump_id));
        }
        Ok(())
    }
}

impl BundleClient for FakeBundle {
    fn exists(&self, dump_id: i64, path: &str) -> Result<bool> {
        self.check_bundle(dump_id)?;
        Ok(self.exists.contains(&(dump_id, path.to_string())))
    }

    fn definitions(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        self.check_bundle(dump_id)?;
        Ok(self
            .definitions
            .get(&position_key(dump_id, path, line, character))
            .cloned()
            .unwrap_or_default())
    }

    fn references(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        self.check_bundle(dump_id)?;
        Ok(self
            .references
            .get(&position_key(dump_id, path, line, character))
            .cloned()
            .unwrap_or_default())
    }

    fn hover(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>> {
        self.check_bundle(dump_id)?;
        Ok(self
            .hovers
            .get(&position_key(dump_id, path, line, character))
            .cloned())
    }

    fn monikers_by_position(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<Moniker>>> {
        self.check_bundle(dump_id)?;
        Ok(self
            .monikers
            .get(&position_key(dump_id, path, line, character))
            .cloned()
            .unwrap_or_default())
    }

    fn moniker_results(
        &self,
        dump_id: i64,
        model_type: ModelType,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<Location>, usize)> {
        self.check_bundle(dump_id)?;
        self.moniker_calls
            .lock()
            .unwrap()
            .push((dump_id, identifier.to_string(), skip, take));
        let all = self
            .moniker_results
            .get(&(dump_id, model_type, scheme.to_string(), identifier.to_string()))
            .cloned()
            .unwrap_or_default();
        let count = all.len();
        Ok((all.into_iter().skip(skip).take(take).collect(), count))
    }

    fn package_information(
        &self,
        dump_id: i64,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformation>> {
        self.check_bundle(dump_id)?;
        Ok(self
            .package_information
            .get(&(dump_id, path.to_string(), package_information_id.to_string()))
            .cloned())
    }
}
