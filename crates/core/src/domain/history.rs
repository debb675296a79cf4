use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One date of one country's chart data. Metrics absent from the source page
/// stay `None` and are omitted from the persisted JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: String,
    #[serde(rename = "Total Cases", default, skip_serializing_if = "Option::is_none")]
    pub total_cases: Option<i64>,
    #[serde(rename = "New Cases", default, skip_serializing_if = "Option::is_none")]
    pub new_cases: Option<i64>,
    #[serde(rename = "Active Cases", default, skip_serializing_if = "Option::is_none")]
    pub active_cases: Option<i64>,
    #[serde(rename = "Total Deaths", default, skip_serializing_if = "Option::is_none")]
    pub total_deaths: Option<i64>,
    #[serde(rename = "New Deaths", default, skip_serializing_if = "Option::is_none")]
    pub new_deaths: Option<i64>,
}

/// Series names as they appear in the persisted blob and the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    TotalCases,
    NewCases,
    ActiveCases,
    TotalDeaths,
    NewDeaths,
}

impl Metric {
    pub fn label(self) -> &'static str {
        match self {
            Metric::TotalCases => "Total Cases",
            Metric::NewCases => "New Cases",
            Metric::ActiveCases => "Active Cases",
            Metric::TotalDeaths => "Total Deaths",
            Metric::NewDeaths => "New Deaths",
        }
    }
}

impl DailyRecord {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, metric: Metric) -> Option<i64> {
        match metric {
            Metric::TotalCases => self.total_cases,
            Metric::NewCases => self.new_cases,
            Metric::ActiveCases => self.active_cases,
            Metric::TotalDeaths => self.total_deaths,
            Metric::NewDeaths => self.new_deaths,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<i64>) {
        let slot = match metric {
            Metric::TotalCases => &mut self.total_cases,
            Metric::NewCases => &mut self.new_cases,
            Metric::ActiveCases => &mut self.active_cases,
            Metric::TotalDeaths => &mut self.total_deaths,
            Metric::NewDeaths => &mut self.new_deaths,
        };
        *slot = value;
    }
}

/// Country name to date-ordered records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoricalSeries(pub BTreeMap<String, Vec<DailyRecord>>);

impl HistoricalSeries {
    pub fn get(&self, country: &str) -> Option<&[DailyRecord]> {
        self.0.get(country).map(Vec::as_slice)
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
