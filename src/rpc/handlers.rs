//! Handler functions for RPC methods.
//! Each function corresponds to a match arm in `handle_method`.

use super::*;
use crate::model::ApiLocation;

pub(super) fn handle_exists(app: &App, ctx: &RequestContext, params: Value) -> Result<Value> {
    let params: ExistsParams = parse_params("exists", params)?;
    let dumps = app.api.find_closest_dumps(
        ctx,
        params.repository_id,
        &params.commit,
        &params.path,
        params.indexer.as_deref(),
    )?;
    Ok(json!({ "dumps": dumps }))
}

pub(super) fn handle_definitions(app: &App, ctx: &RequestContext, params: Value) -> Result<Value> {
    let params: PositionParams = parse_params("definitions", params)?;
    let locations = app.api.definitions(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
    )?;
    let locations: Vec<ApiLocation> = locations.iter().map(ApiLocation::from).collect();
    Ok(json!({ "locations": locations }))
}

pub(super) fn handle_hover(app: &App, ctx: &RequestContext, params: Value) -> Result<Value> {
    let params: PositionParams = parse_params("hover", params)?;
    let hover = app
        .api
        .hover(ctx, &params.path, params.line, params.character, params.dump_id)?;
    Ok(match hover {
        Some((text, range)) => json!({ "text": text, "range": range }),
        None => Value::Null,
    })
}

pub(super) fn handle_references(app: &App, ctx: &RequestContext, params: Value) -> Result<Value> {
    let params: ReferencesParams = parse_params("references", params)?;
    let limit = app.references_limit(params.limit);
    let cursor = app.api.decode_or_create_cursor(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
        params.cursor.as_deref(),
    )?;
    let (locations, next) =
        app.api
            .references(ctx, params.repository_id, &params.commit, limit, cursor)?;
    let locations: Vec<ApiLocation> = locations.iter().map(ApiLocation::from).collect();

    let mut payload = serde_json::Map::new();
    payload.insert("locations".to_string(), json!(locations));

    let mut next_hops = Vec::new();
    if let Some(next) = next {
        let encoded = next.encode()?;
        next_hops.push(json!({
            "method": "references",
            "params": {
                "repository_id": params.repository_id,
                "commit": params.commit,
                "path": params.path,
                "line": params.line,
                "character": params.character,
                "dump_id": params.dump_id,
                "limit": limit,
                "cursor": encoded,
            },
            "label": format!("Next {limit} references"),
        }));
        payload.insert("cursor".to_string(), Value::String(encoded));
    }
    payload.insert("next_hops".to_string(), json!(next_hops));

    Ok(Value::Object(payload))
}

pub(super) fn handle_repositories(app: &App) -> Result<Value> {
    let repositories = app.repositories.get()?;
    Ok(json!({ "repositories": repositories }))
}
