use super::BundleClient;
use crate::error::{Error, Result};
use crate::model::{Location, Moniker, ModelType, PackageInformation, Range};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Deserialize)]
struct BundleLocation {
    path: String,
    range: Range,
}

impl BundleLocation {
    fn stamp(self, dump_id: i64) -> Location {
        Location {
            dump_id,
            path: self.path,
            range: self.range,
        }
    }
}

#[derive(Deserialize)]
struct HoverPayload {
    text: String,
    range: Range,
}

#[derive(Deserialize)]
struct MonikerResultsPayload {
    locations: Vec<BundleLocation>,
    count: usize,
}

/// Bundle manager client speaking the `/dbs/{id}/...` HTTP API.
pub struct HttpBundleClient {
    base_url: String,
    client: Client,
}

impl HttpBundleClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get<T: DeserializeOwned>(
        &self,
        dump_id: i64,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/dbs/{}/{}", self.base_url, dump_id, endpoint);
        let response = self.client.get(&url).query(query).send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::BundleNotFound(dump_id));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Bundle(format!(
                "{endpoint} for dump {dump_id} returned {status}: {body}"
            )));
        }
        Ok(response.json()?)
    }

    fn locations(
        &self,
        dump_id: i64,
        endpoint: &str,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let locations: Vec<BundleLocation> =
            self.get(dump_id, endpoint, &position_query(path, line, character))?;
        Ok(locations
            .into_iter()
            .map(|location| location.stamp(dump_id))
            .collect())
    }
}

fn position_query(path: &str, line: u32, character: u32) -> Vec<(&'static str, String)> {
    vec![
        ("path", path.to_string()),
        ("line", line.to_string()),
        ("character", character.to_string()),
    ]
}

impl BundleClient for HttpBundleClient {
    fn exists(&self, dump_id: i64, path: &str) -> Result<bool> {
        self.get(dump_id, "exists", &[("path", path.to_string())])
    }

    fn definitions(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        self.locations(dump_id, "definitions", path, line, character)
    }

    fn references(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        self.locations(dump_id, "references", path, line, character)
    }

    fn hover(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>> {
        let hover: Option<HoverPayload> =
            self.get(dump_id, "hover", &position_query(path, line, character))?;
        Ok(hover.map(|hover| (hover.text, hover.range)))
    }

    fn monikers_by_position(
        &self,
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<Moniker>>> {
        self.get(
            dump_id,
            "monikersByPosition",
            &position_query(path, line, character),
        )
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
        let payload: MonikerResultsPayload = self.get(
            dump_id,
            "monikerResults",
            &[
                ("modelType", model_type.as_str().to_string()),
                ("scheme", scheme.to_string()),
                ("identifier", identifier.to_string()),
                ("skip", skip.to_string()),
                ("take", take.to_string()),
            ],
        )?;
        let locations = payload
            .locations
            .into_iter()
            .map(|location| location.stamp(dump_id))
            .collect();
        Ok((locations, payload.count))
    }

    fn package_information(
        &self,
        dump_id: i64,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformation>> {
        self.get(
            dump_id,
            "packageInformation",
            &[
                ("path", path.to_string()),
                ("packageInformationId", package_information_id.to_string()),
            ],
        )
    }
}
