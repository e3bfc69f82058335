//! Code intelligence queries over the metadata store and bundle manager.

use crate::bundle::BundleClient;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::{Dump, Range, ResolvedLocation};
use crate::store::Store;
use std::sync::Arc;

pub mod cursor;
pub mod locations;
pub mod references;
#[cfg(test)]
pub(crate) mod testing;

pub use cursor::{Cursor, Phase};
pub use references::ReferencePageResolver;

pub struct CodeIntelApi {
    store: Arc<dyn Store>,
    bundle: Arc<dyn BundleClient>,
    remote_dump_limit: usize,
}

impl CodeIntelApi {
    pub fn new(store: Arc<dyn Store>, bundle: Arc<dyn BundleClient>, remote_dump_limit: usize) -> Self {
        Self {
            store,
            bundle,
            remote_dump_limit: remote_dump_limit.max(1),
        }
    }

    /// Dumps near `commit` that can answer queries about `path`, closest
    /// first. Candidates whose bundle lacks the file are dropped.
    pub fn find_closest_dumps(
        &self,
        ctx: &RequestContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        ctx.check()?;
        let candidates = self
            .store
            .find_closest_dumps(repository_id, commit, path, indexer)?;
        let bundle = self.bundle.as_ref();

        let checks: Vec<Result<bool>> = std::thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|dump| scope.spawn(move || exists_in_dump(ctx, bundle, dump, path)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("exists check panicked").into()))
                })
                .collect()
        });

        let mut dumps = Vec::new();
        for (dump, exists) in candidates.into_iter().zip(checks) {
            if exists? {
                dumps.push(dump);
            }
        }
        Ok(dumps)
    }

    pub fn definitions(
        &self,
        ctx: &RequestContext,
        path: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedLocation>> {
        ctx.check()?;
        let dump = self.dump(dump_id)?;
        let definitions = locations::definitions_raw(
            self.store.as_ref(),
            self.bundle.as_ref(),
            &dump,
            dump.path_in_bundle(path),
            line,
            character,
        )?;
        ctx.check()?;
        Ok(definitions)
    }

    /// Hover text at a position. When the dump has none, the hover at the
    /// symbol's first definition is used instead.
    pub fn hover(
        &self,
        ctx: &RequestContext,
        path: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Option<(String, Range)>> {
        ctx.check()?;
        let dump = self.dump(dump_id)?;
        let path_in_bundle = dump.path_in_bundle(path);

        let hover = self.bundle.hover(dump.id, path_in_bundle, line, character)?;
        ctx.check()?;
        if let Some((text, range)) = hover {
            if !text.is_empty() {
                return Ok(Some((text, range)));
            }
        }

        ctx.check()?;
        let definitions = locations::definitions_raw(
            self.store.as_ref(),
            self.bundle.as_ref(),
            &dump,
            path_in_bundle,
            line,
            character,
        )?;
        ctx.check()?;
        let Some(definition) = definitions.first() else {
            return Ok(None);
        };

        let hover = self.bundle.hover(
            definition.dump.id,
            definition.dump.path_in_bundle(&definition.path),
            definition.range.start.line,
            definition.range.start.character,
        )?;
        ctx.check()?;
        Ok(hover)
    }

    /// Decodes a caller-supplied cursor, or starts a new one at the position.
    pub fn decode_or_create_cursor(
        &self,
        ctx: &RequestContext,
        path: &str,
        line: u32,
        character: u32,
        dump_id: i64,
        raw_cursor: Option<&str>,
    ) -> Result<Cursor> {
        if let Some(raw) = raw_cursor.filter(|raw| !raw.is_empty()) {
            return Cursor::decode(raw);
        }

        ctx.check()?;
        let dump = self.dump(dump_id)?;
        let path_in_bundle = dump.path_in_bundle(path);
        let monikers = self
            .bundle
            .monikers_by_position(dump.id, path_in_bundle, line, character)?
            .into_iter()
            .flatten()
            .collect();

        Ok(Cursor::same_dump(dump.id, path_in_bundle, line, character, monikers))
    }

    pub fn references(
        &self,
        ctx: &RequestContext,
        repository_id: i64,
        commit: &str,
        limit: usize,
        cursor: Cursor,
    ) -> Result<(Vec<ResolvedLocation>, Option<Cursor>)> {
        ReferencePageResolver::new(
            self.store.as_ref(),
            self.bundle.as_ref(),
            ctx,
            repository_id,
            commit,
            self.remote_dump_limit,
        )
        .resolve_page(cursor, limit)
    }

    fn dump(&self, id: i64) -> Result<Dump> {
        self.store.get_dump_by_id(id)?.ok_or(Error::DumpNotFound(id))
    }
}

fn exists_in_dump(
    ctx: &RequestContext,
    bundle: &dyn BundleClient,
    dump: &Dump,
    path: &str,
) -> Result<bool> {
    ctx.check()?;
    match bundle.exists(dump.id, dump.path_in_bundle(path)) {
        Err(Error::BundleNotFound(dump_id)) => {
            tracing::warn!(dump_id, "bundle missing for candidate dump");
            Ok(false)
        }
        other => other,
    }
}
