//! Opaque pagination state for references requests.

use crate::error::{Error, Result};
use crate::model::Moniker;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution stage. Declaration order is the order a request moves through
/// them; a cursor never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    SameDump,
    DefinitionMonikers,
    SameRepo,
    RemoteRepo,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::SameDump,
        Phase::DefinitionMonikers,
        Phase::SameRepo,
        Phase::RemoteRepo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::SameDump => "same-dump",
            Phase::DefinitionMonikers => "definition-monikers",
            Phase::SameRepo => "same-repo",
            Phase::RemoteRepo => "remote-repo",
        }
    }

    fn parse(raw: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.as_str() == raw)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat cursor; only the fields used by `phase` are meaningful.
///
/// - same-dump / definition-monikers: `dump_id`, `path`, `line`,
///   `character`, `monikers`, `skip_results`.
/// - same-repo / remote-repo: `dump_id` (the originating dump), `scheme`,
///   `identifier`, `name`, `version` and the batching offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cursor {
    pub phase: Phase,
    pub dump_id: i64,
    pub path: String,
    pub line: u32,
    pub character: u32,
    pub monikers: Vec<Moniker>,
    pub skip_results: usize,
    pub scheme: String,
    pub identifier: String,
    pub name: String,
    pub version: String,
    pub dump_ids: Vec<i64>,
    pub total_dumps_when_batching: usize,
    pub skip_dumps_when_batching: usize,
    pub skip_dumps_in_batch: usize,
    pub skip_results_in_dump: usize,
}

impl Cursor {
    /// Starting cursor for the symbol at a position in a dump.
    pub fn same_dump(
        dump_id: i64,
        path: &str,
        line: u32,
        character: u32,
        monikers: Vec<Moniker>,
    ) -> Self {
        Cursor {
            phase: Phase::SameDump,
            dump_id,
            path: path.to_string(),
            line,
            character,
            monikers,
            ..Cursor::default()
        }
    }

    /// Cursor that scans package references for a moniker. Batching offsets
    /// start at zero.
    pub fn package_scan(
        phase: Phase,
        dump_id: i64,
        scheme: &str,
        identifier: &str,
        name: &str,
        version: &str,
    ) -> Self {
        Cursor {
            phase,
            dump_id,
            scheme: scheme.to_string(),
            identifier: identifier.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            ..Cursor::default()
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &str) -> Result<Cursor> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|err| Error::InvalidCursor(format!("not base64: {err}")))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| Error::InvalidCursor(format!("not json: {err}")))?;

        let phase = value
            .get("phase")
            .and_then(|phase| phase.as_str())
            .ok_or_else(|| Error::InvalidCursor("missing phase".to_string()))?;
        if Phase::parse(phase).is_none() {
            return Err(Error::UnknownCursorPhase(phase.to_string()));
        }

        serde_json::from_value(value).map_err(|err| Error::InvalidCursor(err.to_string()))
    }
}
