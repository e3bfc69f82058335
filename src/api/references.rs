//! Cursor-driven references resolution.
//!
//! A request walks four phases in order: the originating dump, the dumps
//! providing the symbol's imported packages, other dumps of the same
//! repository that reference those packages, and tip-visible dumps of other
//! repositories. Each call produces at most one page and a cursor to resume
//! from.

use super::cursor::{Cursor, Phase};
use super::locations::{MONIKER_RESULTS_PAGE, lookup_moniker, resolve_locations_with_dump};
use crate::bloom::apply_bloom_filter;
use crate::bundle::BundleClient;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::{Dump, Location, ModelType, MonikerKind, PackageReference, Range, ResolvedLocation};
use crate::store::{ReferencePager, Store};
use std::collections::HashSet;

type Page = (Vec<ResolvedLocation>, Option<Cursor>);

pub struct ReferencePageResolver<'a> {
    store: &'a dyn Store,
    bundle: &'a dyn BundleClient,
    ctx: &'a RequestContext,
    repository_id: i64,
    commit: String,
    remote_dump_limit: usize,
}

impl<'a> ReferencePageResolver<'a> {
    pub fn new(
        store: &'a dyn Store,
        bundle: &'a dyn BundleClient,
        ctx: &'a RequestContext,
        repository_id: i64,
        commit: &str,
        remote_dump_limit: usize,
    ) -> Self {
        Self {
            store,
            bundle,
            ctx,
            repository_id,
            commit: commit.to_string(),
            remote_dump_limit: remote_dump_limit.max(1),
        }
    }

    /// Collects up to `limit` locations starting at `cursor`, crossing phase
    /// boundaries as needed. Returns the locations and the cursor to resume
    /// from, or `None` once every phase is exhausted.
    pub fn resolve_page(&self, cursor: Cursor, limit: usize) -> Result<Page> {
        let mut locations = Vec::new();
        let mut remaining = limit;
        let mut cursor = Some(cursor);

        while remaining > 0 {
            let Some(current) = cursor.take() else {
                break;
            };
            self.ctx.check()?;

            let phase = current.phase;
            let (page, next) = self.dispatch(current, remaining)?;
            if let Some(next) = &next {
                if next.phase < phase {
                    return Err(anyhow::anyhow!(
                        "cursor moved backwards from {phase} to {}",
                        next.phase
                    )
                    .into());
                }
                if next.phase != phase {
                    tracing::debug!(from = %phase, to = %next.phase, "references phase transition");
                }
            }

            remaining = remaining.saturating_sub(page.len());
            locations.extend(page);
            cursor = next;
        }

        self.ctx.check()?;
        Ok((locations, cursor))
    }

    /// Runs the handler for the cursor's phase once.
    pub fn dispatch(&self, cursor: Cursor, limit: usize) -> Result<Page> {
        match cursor.phase {
            Phase::SameDump => self.handle_same_dump(cursor, limit),
            Phase::DefinitionMonikers => self.handle_definition_monikers(cursor, limit),
            Phase::SameRepo | Phase::RemoteRepo => self.handle_package_scan(cursor, limit),
        }
    }

    fn dump(&self, id: i64) -> Result<Dump> {
        self.store.get_dump_by_id(id)?.ok_or(Error::DumpNotFound(id))
    }

    /// Direct references in the originating dump, followed by the dump's own
    /// moniker results not already present. Moniker results are read only
    /// until one location past the requested page is known.
    fn handle_same_dump(&self, cursor: Cursor, limit: usize) -> Result<Page> {
        let dump = self.dump(cursor.dump_id)?;
        let mut locations =
            self.bundle
                .references(dump.id, &cursor.path, cursor.line, cursor.character)?;
        let wanted = cursor.skip_results + limit + 1;

        let mut seen: HashSet<(String, Range)> = locations
            .iter()
            .map(|location| (location.path.clone(), location.range))
            .collect();
        for moniker in &cursor.monikers {
            let mut skip = 0;
            while locations.len() < wanted {
                self.ctx.check()?;
                let take = (wanted - locations.len()).min(MONIKER_RESULTS_PAGE);
                let (results, count) = self.bundle.moniker_results(
                    dump.id,
                    ModelType::References,
                    &moniker.scheme,
                    &moniker.identifier,
                    skip,
                    take,
                )?;
                if results.is_empty() {
                    break;
                }
                skip += results.len();
                for location in results {
                    if seen.insert((location.path.clone(), location.range)) {
                        locations.push(location);
                    }
                }
                if skip >= count {
                    break;
                }
            }
            if locations.len() >= wanted {
                break;
            }
        }

        // Either everything was read, or at least one location lies past
        // this page.
        let total = locations.len();
        let page: Vec<Location> = locations
            .into_iter()
            .skip(cursor.skip_results)
            .take(limit)
            .collect();
        let new_offset = cursor.skip_results + page.len();
        let resolved = resolve_locations_with_dump(&dump, page);

        if new_offset < total {
            return Ok((
                resolved,
                Some(Cursor {
                    skip_results: new_offset,
                    ..cursor
                }),
            ));
        }

        let next = Cursor {
            phase: Phase::DefinitionMonikers,
            dump_id: cursor.dump_id,
            path: cursor.path,
            monikers: cursor.monikers,
            ..Cursor::default()
        };
        Ok((resolved, Some(next)))
    }

    /// References recorded in the dumps that provide the symbol's imported
    /// packages.
    fn handle_definition_monikers(&self, cursor: Cursor, limit: usize) -> Result<Page> {
        let mut next_phase = None;
        for moniker in &cursor.monikers {
            let Some(package_information_id) = moniker.package_information_id.as_deref() else {
                continue;
            };
            let Some(package) = self.bundle.package_information(
                cursor.dump_id,
                &cursor.path,
                package_information_id,
            )?
            else {
                continue;
            };
            next_phase = Some(Cursor::package_scan(
                Phase::SameRepo,
                cursor.dump_id,
                &moniker.scheme,
                &moniker.identifier,
                &package.name,
                &package.version,
            ));
            break;
        }

        let mut found = None;
        for moniker in cursor.monikers.iter().filter(|m| m.kind == MonikerKind::Import) {
            let (locations, count) = lookup_moniker(
                self.store,
                self.bundle,
                cursor.dump_id,
                &cursor.path,
                ModelType::References,
                moniker,
                cursor.skip_results,
                limit,
            )?;
            if !locations.is_empty() {
                found = Some((locations, count));
                break;
            }
        }

        let Some((locations, count)) = found else {
            return Ok((Vec::new(), next_phase));
        };
        let new_offset = cursor.skip_results + locations.len();
        if new_offset < count {
            return Ok((
                locations,
                Some(Cursor {
                    skip_results: new_offset,
                    ..cursor
                }),
            ));
        }
        Ok((locations, next_phase))
    }

    fn open_pager(&self, cursor: &Cursor) -> Result<(usize, Box<dyn ReferencePager>)> {
        match cursor.phase {
            Phase::SameRepo => self.store.same_repo_pager(
                self.repository_id,
                &self.commit,
                &cursor.scheme,
                &cursor.name,
                &cursor.version,
                self.remote_dump_limit,
            ),
            _ => self.store.package_reference_pager(
                &cursor.scheme,
                &cursor.name,
                &cursor.version,
                self.repository_id,
                self.remote_dump_limit,
            ),
        }
    }

    /// Pulls the next batch of candidate dumps whose bloom filters may
    /// contain the identifier. Returns the batch and the new outer offset.
    fn fill_batch(
        &self,
        pager: &mut dyn ReferencePager,
        total: usize,
        identifier: &str,
        offset: usize,
    ) -> Result<(Vec<PackageReference>, usize)> {
        let mut batch = Vec::new();
        let mut new_offset = offset;
        while batch.len() < self.remote_dump_limit && new_offset < total {
            self.ctx.check()?;
            let page = pager.page_from_offset(new_offset)?;
            if page.is_empty() {
                break;
            }
            let (matches, scanned) =
                apply_bloom_filter(page, identifier, self.remote_dump_limit - batch.len());
            batch.extend(matches);
            new_offset += scanned;
        }
        Ok((batch, new_offset))
    }

    /// Shared batching walk for the same-repo and remote-repo phases.
    fn handle_package_scan(&self, mut cursor: Cursor, limit: usize) -> Result<Page> {
        if cursor.dump_ids.is_empty() {
            let (total, mut pager) = self.open_pager(&cursor)?;
            // An error drops the pager, which abandons its transaction.
            let (batch, new_offset) = self.fill_batch(
                pager.as_mut(),
                total,
                &cursor.identifier,
                cursor.skip_dumps_when_batching,
            )?;
            pager.close()?;

            tracing::debug!(
                phase = %cursor.phase,
                total,
                offset = cursor.skip_dumps_when_batching,
                new_offset,
                batch = batch.len(),
                "filled candidate dump batch"
            );

            // No forward progress means the pager ran dry early.
            cursor.skip_dumps_when_batching = if new_offset > cursor.skip_dumps_when_batching {
                new_offset
            } else {
                total
            };
            cursor.total_dumps_when_batching = total;
            cursor.dump_ids = batch.iter().map(|reference| reference.dump_id).collect();
            cursor.skip_dumps_in_batch = 0;
            cursor.skip_results_in_dump = 0;
        }

        let mut locations = Vec::new();
        let mut remaining = limit;
        let batch_len = cursor.dump_ids.len();

        for index in cursor.skip_dumps_in_batch..batch_len {
            self.ctx.check()?;
            let batch_dump_id = cursor.dump_ids[index];
            let skip = std::mem::take(&mut cursor.skip_results_in_dump);

            // Already covered by the same-dump phase.
            if batch_dump_id == cursor.dump_id {
                continue;
            }
            let Some(dump) = self.store.get_dump_by_id(batch_dump_id)? else {
                tracing::warn!(dump_id = batch_dump_id, "skipping missing dump in reference batch");
                continue;
            };

            let (results, count) = self.bundle.moniker_results(
                dump.id,
                ModelType::References,
                &cursor.scheme,
                &cursor.identifier,
                skip,
                remaining,
            )?;
            if results.is_empty() {
                continue;
            }

            let new_offset = skip + results.len();
            remaining = remaining.saturating_sub(results.len());
            locations.extend(resolve_locations_with_dump(&dump, results));

            if new_offset < count {
                cursor.skip_dumps_in_batch = index;
                cursor.skip_results_in_dump = new_offset;
                return Ok((locations, Some(cursor)));
            }
            if remaining == 0 && index + 1 < batch_len {
                cursor.skip_dumps_in_batch = index + 1;
                cursor.skip_results_in_dump = 0;
                return Ok((locations, Some(cursor)));
            }
        }

        if cursor.skip_dumps_when_batching < cursor.total_dumps_when_batching {
            cursor.dump_ids = Vec::new();
            cursor.skip_dumps_in_batch = 0;
            cursor.skip_results_in_dump = 0;
            return Ok((locations, Some(cursor)));
        }

        let next = match cursor.phase {
            Phase::SameRepo => Some(Cursor::package_scan(
                Phase::RemoteRepo,
                cursor.dump_id,
                &cursor.scheme,
                &cursor.identifier,
                &cursor.name,
                &cursor.version,
            )),
            _ => None,
        };
        Ok((locations, next))
    }
}
