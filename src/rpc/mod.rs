mod handlers;

use crate::api::CodeIntelApi;
use crate::bundle::{BundleClient, HttpBundleClient};
use crate::config::Config;
use crate::context::RequestContext;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::RepositorySummary;
use crate::repo_cache::RefreshingCache;
use crate::store::Store;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: &'static str,
    message: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ExistsParams {
    #[serde(alias = "repositoryId")]
    repository_id: i64,
    commit: String,
    path: String,
    indexer: Option<String>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct PositionParams {
    path: String,
    line: u32,
    character: u32,
    #[serde(alias = "dumpId", alias = "upload_id", alias = "uploadId")]
    dump_id: i64,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ReferencesParams {
    #[serde(alias = "repositoryId")]
    repository_id: i64,
    commit: String,
    path: String,
    line: u32,
    character: u32,
    #[serde(alias = "dumpId", alias = "upload_id", alias = "uploadId")]
    dump_id: i64,
    limit: Option<usize>,
    /// Continuation token from a previous page.
    cursor: Option<String>,
}

struct MethodDoc {
    name: &'static str,
    summary: &'static str,
    key_params: &'static [&'static str],
}

const METHOD_DOCS: &[MethodDoc] = &[
    MethodDoc {
        name: "exists",
        summary: "Dumps near a commit that can answer queries about a path, closest first.",
        key_params: &["repository_id", "commit", "path", "indexer"],
    },
    MethodDoc {
        name: "definitions",
        summary: "Definitions of the symbol at a position, following imports into other repositories.",
        key_params: &["path", "line", "character", "dump_id"],
    },
    MethodDoc {
        name: "references",
        summary: "One page of references to the symbol at a position. Follow next_hops for the next page.",
        key_params: &["repository_id", "commit", "path", "line", "character", "dump_id", "limit", "cursor"],
    },
    MethodDoc {
        name: "hover",
        summary: "Hover text at a position, falling back to the hover at the symbol's definition.",
        key_params: &["path", "line", "character", "dump_id"],
    },
    MethodDoc {
        name: "repositories",
        summary: "Repositories with at least one completed dump.",
        key_params: &[],
    },
    MethodDoc {
        name: "help",
        summary: "This listing.",
        key_params: &[],
    },
];

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    simplify_schema(raw)
}

/// Return a simplified JSON Schema for the params struct of the given method.
pub fn method_param_schema(method: &str) -> Value {
    match method {
        "exists" => schema_value::<ExistsParams>(),
        "definitions" | "hover" => schema_value::<PositionParams>(),
        "references" => schema_value::<ReferencesParams>(),
        // Paramless methods
        _ => json!({"type": "object"}),
    }
}

/// Drops schemars metadata callers don't need.
fn simplify_schema(mut schema: Value) -> Value {
    if let Some(map) = schema.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
    }
    schema
}

fn method_help() -> Value {
    let methods: Vec<Value> = METHOD_DOCS
        .iter()
        .map(|doc| {
            json!({
                "name": doc.name,
                "summary": doc.summary,
                "key_params": doc.key_params,
                "params": method_param_schema(doc.name),
            })
        })
        .collect();
    json!({
        "summary": "codenav answers definitions, references and hover queries over precomputed dumps via JSONL RPC over stdin/stdout.",
        "start_here": "Use exists to find dumps for a file, then pass a dump_id to definitions, references or hover.",
        "methods": methods,
    })
}

pub fn serve(db_path: &Path, bundle_manager_url: &str) -> anyhow::Result<()> {
    let app = App::new(db_path, bundle_manager_url, Config::get())?;
    tracing::info!(db = %db_path.display(), bundle_manager_url, "serving JSONL RPC on stdin");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => app.handle_request(request),
            Err(err) => error_response(
                Value::Null,
                &Error::InvalidRequest(format!("malformed request: {err}")),
            ),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

pub fn call(
    db_path: &Path,
    bundle_manager_url: &str,
    method: String,
    params_raw: &str,
    id_raw: &str,
) -> anyhow::Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let app = App::new(db_path, bundle_manager_url, Config::get())?;
    let request = RpcRequest { id, method, params };
    let response = app.handle_request(request);
    Ok(serde_json::to_string(&response)?)
}

pub(crate) struct App {
    api: CodeIntelApi,
    repositories: RefreshingCache<Vec<RepositorySummary>>,
    default_limit: usize,
    max_limit: usize,
    request_timeout: Duration,
    slow_query: Duration,
}

impl App {
    fn new(db_path: &Path, bundle_manager_url: &str, config: &Config) -> anyhow::Result<Self> {
        let db = Db::new(db_path)?;
        let bundle = HttpBundleClient::new(
            bundle_manager_url,
            Duration::from_secs(config.bundle_timeout_secs),
        )
        .with_context(|| format!("create bundle manager client for {bundle_manager_url}"))?;
        Ok(Self::from_parts(Arc::new(db), Arc::new(bundle), config))
    }

    pub(crate) fn from_parts(
        store: Arc<dyn Store>,
        bundle: Arc<dyn BundleClient>,
        config: &Config,
    ) -> Self {
        let repositories = {
            let store = Arc::clone(&store);
            RefreshingCache::new(config.repo_cache_ttl(), move || {
                store.list_indexed_repositories()
            })
        };
        Self {
            api: CodeIntelApi::new(store, bundle, config.remote_dump_limit),
            repositories,
            default_limit: config.default_references_limit.max(1),
            max_limit: config.max_response_limit.max(1),
            request_timeout: config.request_timeout(),
            slow_query: Duration::from_millis(config.slow_query_ms),
        }
    }

    fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        match self.handle_method(&req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => {
                if err.code() == "internal" {
                    tracing::error!(method = %req.method, "rpc method failed: {err}");
                }
                error_response(id, &err)
            }
        }
    }

    pub(crate) fn handle_method(&self, method: &str, params: Value) -> Result<Value> {
        let start = Instant::now();
        let ctx = RequestContext::with_timeout(self.request_timeout);
        let value = match method {
            "help" => method_help(),
            "exists" => handlers::handle_exists(self, &ctx, params)?,
            "definitions" => handlers::handle_definitions(self, &ctx, params)?,
            "references" => handlers::handle_references(self, &ctx, params)?,
            "hover" => handlers::handle_hover(self, &ctx, params)?,
            "repositories" => handlers::handle_repositories(self)?,
            other => {
                return Err(Error::InvalidRequest(format!("unknown method: {other}")));
            }
        };

        let elapsed = start.elapsed();
        if elapsed > self.slow_query {
            tracing::warn!(method, elapsed_ms = elapsed.as_millis() as u64, "slow rpc method");
        }

        Ok(value)
    }

    /// Page size for a references request: the default when absent, clamped
    /// to the response limit.
    fn references_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|err| Error::InvalidRequest(format!("{method} params: {err}")))
}

fn error_response(id: Value, err: &Error) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            code: err.code(),
            message: err.to_string(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{
        FakeBundle, FakeStore, dump, import_moniker, loc, package_reference, range,
    };
    use crate::model::ModelType;
    use pretty_assertions::assert_eq;

    fn app(store: FakeStore, bundle: FakeBundle) -> App {
        let config = Config {
            default_references_limit: 3,
            max_response_limit: 4,
            ..Config::default()
        };
        App::from_parts(Arc::new(store), Arc::new(bundle), &config)
    }

    fn request(app: &App, method: &str, params: Value) -> Value {
        let response = app.handle_request(RpcRequest {
            id: json!(7),
            method: method.to_string(),
            params,
        });
        serde_json::to_value(response).unwrap()
    }

    fn cross_repo_fixture() -> (FakeStore, FakeBundle) {
        let store = FakeStore::new()
            .with_dumps([dump(42, 100, "sub1/"), dump(50, 200, "sub2/"), dump(60, 100, "")])
            .with_package("gomod", "leftpad", "0.1.0", 50)
            .with_same_repo_references(vec![package_reference(60, &["pad"])]);
        let bundle = FakeBundle::new()
            .with_monikers(
                42,
                "main.go",
                10,
                5,
                vec![vec![import_moniker("gomod", "pad", "1234")]],
            )
            .with_package_information(42, "main.go", "1234", "leftpad", "0.1.0")
            .with_moniker_results(
                50,
                ModelType::References,
                "gomod",
                "pad",
                vec![
                    loc(50, "foo.go", range(1)),
                    loc(50, "bar.go", range(2)),
                    loc(50, "baz.go", range(3)),
                    loc(50, "bonk.go", range(4)),
                ],
            )
            .with_moniker_results(
                60,
                ModelType::References,
                "gomod",
                "pad",
                vec![loc(60, "cmd/main.go", range(5))],
            );
        (store, bundle)
    }

    #[test]
    fn unknown_method_is_a_bad_request() {
        let app = app(FakeStore::new(), FakeBundle::new());
        let response = request(&app, "find_symbol", json!({}));
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["error"]["code"], json!("bad_request"));
        assert!(response.get("result").is_none());
    }

    #[test]
    fn malformed_params_are_a_bad_request() {
        let app = app(FakeStore::new(), FakeBundle::new());
        let response = request(&app, "definitions", json!({"path": "main.go"}));
        assert_eq!(response["error"]["code"], json!("bad_request"));
    }

    #[test]
    fn missing_dump_is_not_found() {
        let app = app(FakeStore::new(), FakeBundle::new());
        let response = request(
            &app,
            "hover",
            json!({"path": "main.go", "line": 1, "character": 2, "dump_id": 9}),
        );
        assert_eq!(response["error"]["code"], json!("not_found"));
        assert_eq!(response["error"]["message"], json!("dump 9 not found"));
    }

    #[test]
    fn definitions_serialize_repository_locations() {
        let store = FakeStore::new().with_dumps([dump(42, 100, "sub1/")]);
        let bundle = FakeBundle::new().with_definitions(
            42,
            "main.go",
            10,
            5,
            vec![loc(42, "util.go", range(1))],
        );
        let app = app(store, bundle);

        let response = request(
            &app,
            "definitions",
            json!({"path": "sub1/main.go", "line": 10, "character": 5, "dumpId": 42}),
        );
        assert_eq!(
            response["result"]["locations"],
            json!([{
                "repositoryId": 100,
                "commit": "deadbeef",
                "path": "sub1/util.go",
                "range": {
                    "start": {"line": 1, "character": 2},
                    "end": {"line": 3, "character": 4}
                }
            }])
        );
    }

    #[test]
    fn exists_lists_dumps_containing_the_path() {
        let store = FakeStore::new().with_closest(vec![dump(1, 100, ""), dump(2, 100, "")]);
        let bundle = FakeBundle::new().with_path(2, "main.go");
        let app = app(store, bundle);

        let response = request(
            &app,
            "exists",
            json!({"repository_id": 100, "commit": "deadbeef", "path": "main.go"}),
        );
        let dumps = response["result"]["dumps"].as_array().unwrap();
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0]["id"], json!(2));
    }

    #[test]
    fn references_follow_next_hops_until_exhausted() {
        let (store, bundle) = cross_repo_fixture();
        let app = app(store, bundle);

        let mut params = json!({
            "repository_id": 100,
            "commit": "deadbeef",
            "path": "sub1/main.go",
            "line": 10,
            "character": 5,
            "dump_id": 42,
        });
        let mut paths = Vec::new();
        let mut pages = 0;
        loop {
            let response = request(&app, "references", params.clone());
            let result = &response["result"];
            for location in result["locations"].as_array().unwrap() {
                paths.push(location["path"].as_str().unwrap().to_string());
            }
            pages += 1;
            assert!(pages < 20, "pagination did not terminate");

            let hops = result["next_hops"].as_array().unwrap();
            match hops.first() {
                Some(hop) => {
                    assert_eq!(hop["method"], json!("references"));
                    assert_eq!(hop["params"]["cursor"], result["cursor"]);
                    params = hop["params"].clone();
                }
                None => {
                    assert!(result.get("cursor").is_none());
                    break;
                }
            }
        }

        assert_eq!(
            paths,
            vec![
                "sub2/foo.go",
                "sub2/bar.go",
                "sub2/baz.go",
                "sub2/bonk.go",
                "cmd/main.go",
            ]
        );
    }

    #[test]
    fn references_limit_defaults_and_clamps() {
        let app = app(FakeStore::new(), FakeBundle::new());
        assert_eq!(app.references_limit(None), 3);
        assert_eq!(app.references_limit(Some(2)), 2);
        assert_eq!(app.references_limit(Some(1000)), 4);
        assert_eq!(app.references_limit(Some(0)), 1);
    }

    #[test]
    fn corrupt_cursor_is_a_bad_request() {
        let store = FakeStore::new().with_dumps([dump(42, 100, "")]);
        let app = app(store, FakeBundle::new());
        let response = request(
            &app,
            "references",
            json!({
                "repository_id": 100,
                "commit": "deadbeef",
                "path": "main.go",
                "line": 1,
                "character": 1,
                "dump_id": 42,
                "cursor": "!!not-a-cursor!!",
            }),
        );
        assert_eq!(response["error"]["code"], json!("bad_request"));
    }

    #[test]
    fn repositories_are_served_from_cache() {
        let store = FakeStore::new().with_repositories(vec![RepositorySummary {
            repository_id: 100,
            dump_count: 2,
        }]);
        let lists = Arc::clone(&store.repository_lists);
        let app = app(store, FakeBundle::new());

        for _ in 0..3 {
            let response = request(&app, "repositories", Value::Null);
            assert_eq!(
                response["result"]["repositories"],
                json!([{"repositoryId": 100, "dumpCount": 2}])
            );
        }
        assert_eq!(lists.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn help_lists_every_method() {
        let app = app(FakeStore::new(), FakeBundle::new());
        let response = request(&app, "help", Value::Null);
        let names: Vec<&str> = response["result"]["methods"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["exists", "definitions", "references", "hover", "repositories", "help"]
        );
        assert!(response["result"]["methods"][2]["params"]["properties"]["cursor"].is_object());
    }

    #[test]
    fn request_id_is_parsed_as_json_when_possible() {
        assert_eq!(parse_value("1"), json!(1));
        assert_eq!(parse_value("abc"), json!("abc"));
    }
}
