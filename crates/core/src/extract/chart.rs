use crate::domain::history::{DailyRecord, Metric};
use crate::error::SourceError;
use std::collections::HashMap;

/// Highcharts container ids on a country page and the series each one plots.
pub const CHART_SERIES: [(&str, Metric); 5] = [
    ("coronavirus-cases-linear", Metric::TotalCases),
    ("graph-cases-daily", Metric::NewCases),
    ("graph-active-cases-total", Metric::ActiveCases),
    ("coronavirus-deaths-linear", Metric::TotalDeaths),
    ("graph-deaths-daily", Metric::NewDeaths),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub metric: Metric,
    pub categories: Vec<String>,
    pub data: Vec<Option<i64>>,
}

/// Body of the first `key: [ ... ]` in `script`, brackets excluded.
pub fn array_body<'a>(script: &'a str, key: &str) -> Result<&'a str, SourceError> {
    let token = format!("{key}: [");
    let start = script
        .find(&token)
        .ok_or_else(|| SourceError::parse("chart", format!("missing `{token}`")))?
        + token.len();
    let len = script[start..]
        .find(']')
        .ok_or_else(|| SourceError::parse("chart", format!("unterminated `{token}`")))?;
    Ok(&script[start..start + len])
}

pub fn parse_number_array(body: &str) -> Result<Vec<Option<i64>>, SourceError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    body.split(',').map(parse_number).collect()
}

fn parse_number(token: &str) -> Result<Option<i64>, SourceError> {
    let token = token.trim();
    if token == "null" {
        return Ok(None);
    }
    if let Ok(v) = token.parse::<i64>() {
        return Ok(Some(v));
    }
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v as i64)),
        _ => Err(SourceError::parse(
            "chart",
            format!("not an integer data point: {token:?}"),
        )),
    }
}

/// Quoted labels separated by commas. Accepts `"` and `'` quoting with
/// backslash escapes.
pub fn parse_string_array(body: &str) -> Result<Vec<String>, SourceError> {
    let mut out = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(quote) = chars.next() else {
            if out.is_empty() {
                return Ok(out);
            }
            return Err(SourceError::parse("chart", "trailing comma in categories"));
        };
        if quote != '"' && quote != '\'' {
            return Err(SourceError::parse(
                "chart",
                format!("expected quoted category, found {quote:?}"),
            ));
        }

        let mut label = String::new();
        loop {
            match chars.next() {
                None => return Err(SourceError::parse("chart", "unterminated category label")),
                Some('\\') => match chars.next() {
                    Some('n') => label.push('\n'),
                    Some('t') => label.push('\t'),
                    Some('u') => {
                        let hex: String = chars.by_ref().take(4).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                SourceError::parse("chart", format!("bad escape \\u{hex}"))
                            })?;
                        label.push(ch);
                    }
                    Some(c) => label.push(c),
                    None => {
                        return Err(SourceError::parse("chart", "unterminated category label"))
                    }
                },
                Some(c) if c == quote => break,
                Some(c) => label.push(c),
            }
        }
        out.push(label);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => return Ok(out),
            Some(',') => continue,
            Some(c) => {
                return Err(SourceError::parse(
                    "chart",
                    format!("expected ',' between categories, found {c:?}"),
                ))
            }
        }
    }
}

/// Reads one chart's arrays from a script block that mentions `chart_id`.
/// Arrays after the id are preferred; a script that declares them before the
/// id is read from the top.
pub fn extract_chart(script: &str, chart_id: &str, metric: Metric) -> Result<ChartSeries, SourceError> {
    let tail = script.find(chart_id).map(|i| &script[i..]).unwrap_or(script);
    let data_body = array_body(tail, "data").or_else(|_| array_body(script, "data"))?;
    let cat_body = array_body(tail, "categories").or_else(|_| array_body(script, "categories"))?;

    let data = parse_number_array(data_body)?;
    let categories = parse_string_array(cat_body)?;
    if data.len() != categories.len() {
        return Err(SourceError::parse(
            "chart",
            format!(
                "{chart_id}: {} data points for {} categories",
                data.len(),
                categories.len()
            ),
        ));
    }

    Ok(ChartSeries {
        metric,
        categories,
        data,
    })
}

/// Date-keyed accumulator that keeps first-seen order.
#[derive(Debug, Default)]
pub struct DateMerge {
    records: Vec<DailyRecord>,
    index: HashMap<String, usize>,
}

impl DateMerge {
    pub fn add(&mut self, chart: &ChartSeries) {
        for (date, value) in chart.categories.iter().zip(&chart.data) {
            let idx = match self.index.get(date) {
                Some(idx) => *idx,
                None => {
                    self.records.push(DailyRecord::new(date.clone()));
                    self.index.insert(date.clone(), self.records.len() - 1);
                    self.records.len() - 1
                }
            };
            let record = &mut self.records[idx];
            if value.is_some() {
                record.set(chart.metric, *value);
            }
            record.date = date.clone();
        }
    }

    pub fn into_records(self) -> Vec<DailyRecord> {
        self.records
    }
}

/// Merges every recognised chart found in `scripts` into per-date records.
/// Charts that fail to parse are logged and skipped.
pub fn extract_daily_records<S: AsRef<str>>(country: &str, scripts: &[S]) -> Vec<DailyRecord> {
    let mut merge = DateMerge::default();
    for script in scripts {
        let script = script.as_ref();
        for (chart_id, metric) in CHART_SERIES {
            if !script.contains(chart_id) {
                continue;
            }
            match extract_chart(script, chart_id, metric) {
                Ok(chart) => {
                    tracing::debug!(
                        country,
                        series = metric.label(),
                        points = chart.data.len(),
                        "populating chart series"
                    );
                    merge.add(&chart);
                }
                Err(err) => {
                    tracing::warn!(country, chart_id, error = %err, "skipping malformed chart");
                }
            }
        }
    }
    merge.into_records()
}
