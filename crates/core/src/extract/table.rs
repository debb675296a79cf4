use crate::domain::live::{Cell, CANONICAL_COLUMNS, FLOAT_COLUMNS, INT_COLUMNS};
use crate::error::CoercionError;

/// A `<th>` split into the pieces the source renders it from.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// A text node directly under the header cell.
    Text(String),
    /// The full text of a nested element (`<br>`, `<span>`, ...).
    Element(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<Vec<Fragment>>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    /// Canonical ids when the shape matched, raw labels otherwise.
    pub columns: Vec<String>,
    pub display_columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub sorting_allowed: bool,
    pub coercion_errors: Vec<CoercionError>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Int,
    Float,
}

impl Target {
    fn name(self) -> &'static str {
        match self {
            Target::Int => "int",
            Target::Float => "float",
        }
    }
}

fn is_label_noise(c: char) -> bool {
    c == ',' || c == '+' || c.is_whitespace()
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn header_label(fragments: &[Fragment]) -> String {
    let parts: Vec<String> = fragments
        .iter()
        .map(|f| match f {
            Fragment::Text(s) | Fragment::Element(s) => normalize_ws(s.trim_matches(is_label_noise)),
        })
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(" ")
}

/// `" +1,234 "` -> `"1234"`.
pub fn clean_cell(raw: &str) -> String {
    raw.trim()
        .replace(',', "")
        .trim_matches('+')
        .trim()
        .to_string()
}

/// Empty cells become the integer 0 in every column, text columns included.
/// Kept for compatibility with how the dashboard has always rendered blanks.
pub fn empty_cell_policy(value: String) -> Cell {
    if value.is_empty() {
        Cell::Int(0)
    } else {
        Cell::Text(value)
    }
}

pub fn normalize(raw: RawTable) -> NormalizedTable {
    let display_columns: Vec<String> = raw.headers.iter().map(|h| header_label(h)).collect();
    let width = display_columns.len();

    let sorting_allowed = width == CANONICAL_COLUMNS.len();
    let columns: Vec<String> = if sorting_allowed {
        CANONICAL_COLUMNS.iter().map(|s| s.to_string()).collect()
    } else {
        tracing::warn!(
            columns = width,
            expected = CANONICAL_COLUMNS.len(),
            "number of columns is not as expected; sorting will not work"
        );
        display_columns.clone()
    };

    let mut rows = Vec::with_capacity(raw.rows.len());
    let mut skipped: usize = 0;
    for row in raw.rows {
        if row.len() != width {
            skipped += 1;
            continue;
        }
        rows.push(
            row.iter()
                .map(|c| empty_cell_policy(clean_cell(c)))
                .collect::<Vec<_>>(),
        );
    }
    if skipped > 0 {
        tracing::warn!(skipped, width, "skipped table rows with unexpected cell count");
    }

    let mut coercion_errors = Vec::new();
    if sorting_allowed {
        let targets = INT_COLUMNS
            .iter()
            .map(|c| (*c, Target::Int))
            .chain(FLOAT_COLUMNS.iter().map(|c| (*c, Target::Float)));
        for (name, target) in targets {
            let Some(idx) = columns.iter().position(|c| c == name) else {
                continue;
            };
            if let Err(err) = coerce_column(&mut rows, idx, name, target) {
                tracing::error!(error = %err, "numeric coercion failed; column left as text");
                coercion_errors.push(err);
            }
        }
    }

    NormalizedTable {
        columns,
        display_columns,
        rows,
        sorting_allowed,
        coercion_errors,
    }
}

fn coerce_cell(cell: &Cell, target: Target) -> Option<Cell> {
    match (cell, target) {
        (Cell::Int(v), Target::Int) => Some(Cell::Int(*v)),
        (Cell::Int(v), Target::Float) => Some(Cell::Float(*v as f64)),
        (Cell::Float(v), Target::Float) => Some(Cell::Float(*v)),
        (Cell::Float(_), Target::Int) => None,
        (Cell::Text(s), Target::Int) => s.parse::<i64>().ok().map(Cell::Int),
        (Cell::Text(s), Target::Float) => s.parse::<f64>().ok().map(Cell::Float),
    }
}

// All or nothing: one bad cell leaves the whole column untouched.
fn coerce_column(
    rows: &mut [Vec<Cell>],
    idx: usize,
    name: &str,
    target: Target,
) -> Result<(), CoercionError> {
    let mut converted = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let cell = &row[idx];
        match coerce_cell(cell, target) {
            Some(c) => converted.push(c),
            None => {
                return Err(CoercionError {
                    column: name.to_string(),
                    target: target.name(),
                    value: cell.text(),
                })
            }
        }
    }
    for (row, cell) in rows.iter_mut().zip(converted) {
        row[idx] = cell;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(labels: &[&str]) -> Vec<Vec<Fragment>> {
        labels
            .iter()
            .map(|l| vec![Fragment::Text(l.to_string())])
            .collect()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    const SCENARIO_HEADERS: [&str; 13] = [
        "Country", "Cases", "NCases", "Deaths", "NDeaths", "Recovered", "Active", "Critical",
        "CPM", "DPM", "Tests", "TPM", "Continents",
    ];

    #[test]
    fn thirteen_columns_get_canonical_names_and_numeric_types() {
        let table = normalize(RawTable {
            headers: headers(&SCENARIO_HEADERS),
            rows: vec![row(&[
                "USA", "100", "5", "2", "0", "50", "48", "3", "0.3", "0.006", "1000", "3.0",
                "North America",
            ])],
        });

        assert!(table.sorting_allowed);
        assert_eq!(table.columns, CANONICAL_COLUMNS.to_vec());
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], Cell::Text("USA".to_string()));
        assert_eq!(table.rows[0][1], Cell::Int(100));
        assert_eq!(table.rows[0][8], Cell::Float(0.3));
        assert_eq!(table.rows[0][11], Cell::Float(3.0));
        assert_eq!(table.rows[0][12], Cell::Text("North America".to_string()));
        assert!(table.coercion_errors.is_empty());
    }

    #[test]
    fn canonical_names_replace_raw_labels_positionally() {
        let raw: Vec<String> = (0..13).map(|i| format!("Label {i}")).collect();
        let raw_refs: Vec<&str> = raw.iter().map(String::as_str).collect();
        let table = normalize(RawTable {
            headers: headers(&raw_refs),
            rows: vec![],
        });
        assert!(table.sorting_allowed);
        assert_eq!(table.columns[2], "NCases");
        assert_eq!(table.display_columns[2], "Label 2");
    }

    #[test]
    fn other_widths_keep_raw_names_and_skip_coercion() {
        let table = normalize(RawTable {
            headers: headers(&["Country,Other", "Total Cases", "New Cases"]),
            rows: vec![row(&["USA", "1,000", "+5"])],
        });

        assert!(!table.sorting_allowed);
        assert_eq!(table.columns, vec!["Country,Other", "Total Cases", "New Cases"]);
        assert_eq!(table.rows[0][1], Cell::Text("1000".to_string()));
        assert_eq!(table.rows[0][2], Cell::Text("5".to_string()));
    }

    #[test]
    fn empty_cells_become_zero_in_every_column() {
        let table = normalize(RawTable {
            headers: headers(&["Country", "Continent"]),
            rows: vec![row(&["", "  "])],
        });
        assert_eq!(table.rows[0], vec![Cell::Int(0), Cell::Int(0)]);

        let mut cells = vec![""; 13];
        cells[0] = "Nowhere";
        let table = normalize(RawTable {
            headers: headers(&SCENARIO_HEADERS),
            rows: vec![row(&cells)],
        });
        assert_eq!(table.rows[0][12], Cell::Int(0));
        assert_eq!(table.rows[0][9], Cell::Float(0.0));
    }

    #[test]
    fn coercion_failure_is_isolated_to_its_column() {
        let table = normalize(RawTable {
            headers: headers(&SCENARIO_HEADERS),
            rows: vec![
                row(&["A", "10", "1", "N/A", "", "", "", "", "1.5", "", "", "", "Asia"]),
                row(&["B", "20", "2", "4", "", "", "", "", "oops", "", "", "", "Asia"]),
            ],
        });

        assert!(table.sorting_allowed);
        assert_eq!(table.rows[0][1], Cell::Int(10));
        assert_eq!(table.rows[1][2], Cell::Int(2));
        assert_eq!(table.rows[0][3], Cell::Text("N/A".to_string()));
        assert_eq!(table.rows[1][3], Cell::Text("4".to_string()));
        assert_eq!(table.rows[0][8], Cell::Text("1.5".to_string()));
        assert_eq!(table.rows[0][9], Cell::Float(0.0));

        let failed: Vec<&str> = table
            .coercion_errors
            .iter()
            .map(|e| e.column.as_str())
            .collect();
        assert_eq!(failed, vec!["Deaths", "CPM"]);
    }

    #[test]
    fn header_label_joins_fragments_and_trims_noise() {
        let label = header_label(&[
            Fragment::Text("Total\n".to_string()),
            Fragment::Element(String::new()),
            Fragment::Text("Cases,".to_string()),
        ]);
        assert_eq!(label, "Total Cases");

        let label = header_label(&[
            Fragment::Text("Tot\u{a0}Cases/".to_string()),
            Fragment::Element(" 1M pop ".to_string()),
        ]);
        assert_eq!(label, "Tot Cases/ 1M pop");
    }

    #[test]
    fn clean_cell_strips_separators_and_plus() {
        assert_eq!(clean_cell(" +1,234 "), "1234");
        assert_eq!(clean_cell("5+"), "5");
        assert_eq!(clean_cell("S. Korea"), "S. Korea");
    }

    #[test]
    fn rows_with_wrong_width_are_skipped() {
        let table = normalize(RawTable {
            headers: headers(&["a", "b"]),
            rows: vec![row(&["1", "2"]), row(&["only one"])],
        });
        assert_eq!(table.rows.len(), 1);
    }
}
