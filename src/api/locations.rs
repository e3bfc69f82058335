//! Moniker lookups and conversion of dump-local locations into
//! repository-relative ones.

use crate::bundle::BundleClient;
use crate::error::Result;
use crate::model::{Dump, Location, Moniker, MonikerKind, ModelType, ResolvedLocation};
use crate::store::Store;

/// Page size used when a moniker's whole result set is needed.
pub(super) const MONIKER_RESULTS_PAGE: usize = 100;

/// Prefixes each dump-local path with the dump's root.
pub fn resolve_locations_with_dump(dump: &Dump, locations: Vec<Location>) -> Vec<ResolvedLocation> {
    locations
        .into_iter()
        .map(|location| ResolvedLocation {
            dump: dump.clone(),
            path: format!("{}{}", dump.root, location.path),
            range: location.range,
        })
        .collect()
}

/// Reads every result of a moniker from one dump, page by page.
pub fn moniker_results_all(
    bundle: &dyn BundleClient,
    dump_id: i64,
    model_type: ModelType,
    scheme: &str,
    identifier: &str,
) -> Result<Vec<Location>> {
    let mut all = Vec::new();
    loop {
        let (page, count) = bundle.moniker_results(
            dump_id,
            model_type,
            scheme,
            identifier,
            all.len(),
            MONIKER_RESULTS_PAGE,
        )?;
        if page.is_empty() {
            break;
        }
        all.extend(page);
        if all.len() >= count {
            break;
        }
    }
    Ok(all)
}

/// Finds the dump providing the package a moniker was imported from.
fn providing_dump(
    store: &dyn Store,
    bundle: &dyn BundleClient,
    dump_id: i64,
    path: &str,
    moniker: &Moniker,
) -> Result<Option<Dump>> {
    let Some(package_information_id) = moniker.package_information_id.as_deref() else {
        return Ok(None);
    };
    let Some(package) = bundle.package_information(dump_id, path, package_information_id)? else {
        return Ok(None);
    };
    store.get_package(&moniker.scheme, &package.name, &package.version)
}

/// Pages through a moniker's results in the dump providing its package.
/// Returns the page, resolved against the providing dump, and the total
/// result count. Monikers without package information yield nothing.
#[allow(clippy::too_many_arguments)]
pub fn lookup_moniker(
    store: &dyn Store,
    bundle: &dyn BundleClient,
    dump_id: i64,
    path: &str,
    model_type: ModelType,
    moniker: &Moniker,
    skip: usize,
    take: usize,
) -> Result<(Vec<ResolvedLocation>, usize)> {
    let Some(dump) = providing_dump(store, bundle, dump_id, path, moniker)? else {
        return Ok((Vec::new(), 0));
    };

    let (locations, count) = bundle.moniker_results(
        dump.id,
        model_type,
        &moniker.scheme,
        &moniker.identifier,
        skip,
        take,
    )?;
    Ok((resolve_locations_with_dump(&dump, locations), count))
}

/// Definitions of the symbol at a position. Falls back to monikers,
/// innermost range first, when the bundle has no direct definition: imports
/// are looked up in the providing dump, anything else in this dump's own
/// definitions table.
pub fn definitions_raw(
    store: &dyn Store,
    bundle: &dyn BundleClient,
    dump: &Dump,
    path_in_bundle: &str,
    line: u32,
    character: u32,
) -> Result<Vec<ResolvedLocation>> {
    let direct = bundle.definitions(dump.id, path_in_bundle, line, character)?;
    if !direct.is_empty() {
        return Ok(resolve_locations_with_dump(dump, direct));
    }

    for monikers in bundle.monikers_by_position(dump.id, path_in_bundle, line, character)? {
        for moniker in &monikers {
            let resolved = if moniker.kind == MonikerKind::Import {
                match providing_dump(store, bundle, dump.id, path_in_bundle, moniker)? {
                    Some(provider) => {
                        let locations = moniker_results_all(
                            bundle,
                            provider.id,
                            ModelType::Definitions,
                            &moniker.scheme,
                            &moniker.identifier,
                        )?;
                        resolve_locations_with_dump(&provider, locations)
                    }
                    None => Vec::new(),
                }
            } else {
                let locations = moniker_results_all(
                    bundle,
                    dump.id,
                    ModelType::Definitions,
                    &moniker.scheme,
                    &moniker.identifier,
                )?;
                resolve_locations_with_dump(dump, locations)
            };

            if !resolved.is_empty() {
                return Ok(resolved);
            }
        }
    }

    Ok(Vec::new())
}
