use serde::{Deserialize, Serialize};

/// Compact column ids substituted for the source's display labels when the
/// table has the expected shape.
pub const CANONICAL_COLUMNS: [&str; 13] = [
    "Country",
    "Cases",
    "NCases",
    "Deaths",
    "NDeaths",
    "Recovered",
    "Active",
    "Critical",
    "CPM",
    "DPM",
    "Tests",
    "TPM",
    "Continents",
];

pub const INT_COLUMNS: [&str; 8] = [
    "Cases",
    "NCases",
    "Deaths",
    "NDeaths",
    "Recovered",
    "Active",
    "Critical",
    "Tests",
];

pub const FLOAT_COLUMNS: [&str; 3] = ["CPM", "DPM", "TPM"];

/// One table cell after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(_) => None,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatsRow {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Cases")]
    pub cases: i64,
    #[serde(rename = "NCases")]
    pub new_cases: i64,
    #[serde(rename = "Deaths")]
    pub deaths: i64,
    #[serde(rename = "NDeaths")]
    pub new_deaths: i64,
    #[serde(rename = "Recovered")]
    pub recovered: i64,
    #[serde(rename = "Active")]
    pub active: i64,
    #[serde(rename = "Critical")]
    pub critical: i64,
    #[serde(rename = "CPM")]
    pub cases_per_million: f64,
    #[serde(rename = "DPM")]
    pub deaths_per_million: f64,
    #[serde(rename = "Tests")]
    pub tests: i64,
    #[serde(rename = "TPM")]
    pub tests_per_million: f64,
    #[serde(rename = "Continents")]
    pub continent: String,
}

/// Live table as served to the dashboard. `rows` hold one cell per entry of
/// `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatsSnapshot {
    pub columns: Vec<String>,
    pub display_columns: Vec<String>,
    pub sorting_allowed: bool,
    pub rows: Vec<Vec<Cell>>,
}

impl LiveStatsSnapshot {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Typed view of the rows. Only available when the canonical schema
    /// applies; numeric cells that stayed text read as 0.
    pub fn typed_rows(&self) -> Option<Vec<LiveStatsRow>> {
        if !self.sorting_allowed {
            return None;
        }
        Some(self.rows.iter().map(Vec::as_slice).map(typed_row).collect())
    }
}

fn typed_row(cells: &[Cell]) -> LiveStatsRow {
    let int = |i: usize| cells.get(i).and_then(Cell::as_i64).unwrap_or(0);
    let float = |i: usize| cells.get(i).and_then(Cell::as_f64).unwrap_or(0.0);
    let text = |i: usize| cells.get(i).map(Cell::text).unwrap_or_default();

    LiveStatsRow {
        country: text(0),
        cases: int(1),
        new_cases: int(2),
        deaths: int(3),
        new_deaths: int(4),
        recovered: int(5),
        active: int(6),
        critical: int(7),
        cases_per_million: float(8),
        deaths_per_million: float(9),
        tests: int(10),
        tests_per_million: float(11),
        continent: text(12),
    }
}
