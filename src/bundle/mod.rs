//! Access to per-dump index bundles.
//!
//! Paths passed to a bundle are relative to the dump's root, and locations
//! it returns are dump-local. The client stamps each location with the dump
//! it was read from.

use crate::error::Result;
use crate::model::{Location, Moniker, ModelType, PackageInformation, Range};

pub mod http;

pub use http::HttpBundleClient;

pub trait BundleClient: Send + Sync {
    fn exists(&self, dump_id: i64, path: &str) -> Result<bool>;

    fn definitions(&self, dump_id: i64, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>>;

    fn references(&self, dump_id: i64, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>>;

    /// Hover text and the range it applies to, if the bundle has any.
    fn hover(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>>;

    /// Monikers of every range enclosing the position, innermost first.
    fn monikers_by_position(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<Moniker>>>;

    /// One page of the moniker's result set plus the total result count.
    fn moniker_results(
        &self,
        dump_id: i64,
        model_type: ModelType,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<Location>, usize)>;

    fn package_information(
        &self,
        dump_id: i64,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformation>>;
}
