use crate::domain::history::{DailyRecord, HistoricalSeries};
use serde::Serialize;

/// Plot-ready columns for one country. Deaths default to 0 on dates that
/// predate the deaths charts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountrySeries {
    pub country: String,
    pub dates: Vec<String>,
    pub total_cases: Vec<i64>,
    pub new_cases: Vec<i64>,
    pub total_deaths: Vec<i64>,
    pub new_deaths: Vec<i64>,
    pub active_cases: Vec<i64>,
    pub recovered: Vec<i64>,
    pub new_recovered: Vec<i64>,
}

impl CountrySeries {
    pub fn from_records(country: &str, records: &[DailyRecord]) -> Self {
        let mut out = Self {
            country: country.to_string(),
            ..Default::default()
        };

        let mut prev_recovered = 0;
        for r in records {
            let total = r.total_cases.unwrap_or(0);
            let active = r.active_cases.unwrap_or(0);
            let deaths = r.total_deaths.unwrap_or(0);
            let recovered = total - active - deaths;

            out.dates.push(r.date.clone());
            out.total_cases.push(total);
            out.new_cases.push(r.new_cases.unwrap_or(0));
            out.total_deaths.push(deaths);
            out.new_deaths.push(r.new_deaths.unwrap_or(0));
            out.active_cases.push(active);
            out.recovered.push(recovered);
            out.new_recovered.push(recovered - prev_recovered);
            prev_recovered = recovered;
        }
        out
    }
}

/// Countries ordered by their latest Total Cases, largest first.
pub fn top_countries(series: &HistoricalSeries, n: usize) -> Vec<String> {
    let mut ranked: Vec<(i64, &str)> = series
        .0
        .iter()
        .map(|(country, records)| {
            let latest = records.last().and_then(|r| r.total_cases).unwrap_or(0);
            (latest, country.as_str())
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ranked
        .into_iter()
        .take(n)
        .map(|(_, c)| c.to_string())
        .collect()
}
