use serde::{Deserialize, Serialize};

/// A processed index of one repository at one commit, scoped to `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dump {
    pub id: i64,
    pub repository_id: i64,
    pub commit: String,
    pub root: String,
    pub indexer: String,
    pub visible_at_tip: bool,
    pub state: String,
    pub uploaded_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Dump {
    /// Strips this dump's root from a repository-relative path.
    pub fn path_in_bundle<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.root.as_str()).unwrap_or(path)
    }

    pub fn encloses(&self, path: &str) -> bool {
        path.starts_with(self.root.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(start_line, start_character),
            end: Position::new(end_line, end_character),
        }
    }
}

/// A dump-local location as returned by the bundle manager, stamped with the
/// dump it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub dump_id: i64,
    pub path: String,
    pub range: Range,
}

/// A location whose path has been made repository-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub dump: Dump,
    pub path: String,
    pub range: Range,
}

/// Wire form of a resolved location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLocation {
    pub repository_id: i64,
    pub commit: String,
    pub path: String,
    pub range: Range,
}

impl From<&ResolvedLocation> for ApiLocation {
    fn from(location: &ResolvedLocation) -> Self {
        ApiLocation {
            repository_id: location.dump.repository_id,
            commit: location.dump.commit.clone(),
            path: location.path.clone(),
            range: location.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerKind {
    Import,
    Export,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moniker {
    pub kind: MonikerKind,
    pub scheme: String,
    pub identifier: String,
    #[serde(
        rename = "packageInformationID",
        alias = "packageInformationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub package_information_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInformation {
    pub name: String,
    pub version: String,
}

/// Links a dump to a package it imports from, with a bloom filter over the
/// identifiers it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub dump_id: i64,
    pub scheme: String,
    pub name: String,
    pub version: String,
    pub filter: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    pub repository_id: i64,
    pub dump_count: i64,
}

/// Which bundle result set a moniker query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Definitions,
    References,
}

impl ModelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Definitions => "definitions",
            ModelType::References => "references",
        }
    }
}
