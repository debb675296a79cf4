use crate::error::SourceError;
use crate::extract::table::{Fragment, RawTable};
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryLink {
    pub name: String,
    pub url: String,
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::parse("selector", format!("{css}: {e:?}")))
}

/// Header fragments and body cells of the first `<table>` in the page.
pub fn first_table(page: &str) -> Result<RawTable, SourceError> {
    let doc = Html::parse_document(page);
    let table_sel = selector("table")?;
    let thead_sel = selector("thead")?;
    let th_sel = selector("th")?;
    let tbody_sel = selector("tbody")?;
    let tr_sel = selector("tr")?;
    let td_sel = selector("td")?;

    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| SourceError::parse("live_table", "no <table> in page"))?;
    let thead = table
        .select(&thead_sel)
        .next()
        .ok_or_else(|| SourceError::parse("live_table", "table has no <thead>"))?;
    let tbody = table
        .select(&tbody_sel)
        .next()
        .ok_or_else(|| SourceError::parse("live_table", "table has no <tbody>"))?;

    let headers: Vec<Vec<Fragment>> = thead.select(&th_sel).map(header_fragments).collect();
    if headers.is_empty() {
        return Err(SourceError::parse("live_table", "table header has no <th> cells"));
    }

    let rows = tbody
        .select(&tr_sel)
        .map(|tr| {
            tr.select(&td_sel)
                .map(|td| td.text().collect::<String>())
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(RawTable { headers, rows })
}

fn header_fragments(th: ElementRef<'_>) -> Vec<Fragment> {
    th.children()
        .filter_map(|child| match child.value() {
            Node::Text(text) => Some(Fragment::Text(String::from(&**text))),
            Node::Element(_) => ElementRef::wrap(child)
                .map(|el| Fragment::Element(el.text().collect::<String>())),
            _ => None,
        })
        .collect()
}

/// Text of every `<script>` block, in document order.
pub fn script_texts(page: &str) -> Result<Vec<String>, SourceError> {
    let doc = Html::parse_document(page);
    let script_sel = selector("script")?;
    Ok(doc
        .select(&script_sel)
        .map(|s| s.text().collect::<String>())
        .collect())
}

/// Links of the form `<a href="country/...">Name</a>`, resolved against
/// `base`. A name seen twice keeps its first position and its last URL.
pub fn country_links(page: &str, base: &Url) -> Result<Vec<CountryLink>, SourceError> {
    let doc = Html::parse_document(page);
    let a_sel = selector("a[href]")?;

    let mut out: Vec<CountryLink> = Vec::new();
    for a in doc.select(&a_sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !href.starts_with("country") {
            continue;
        }
        let name = a.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            continue;
        }
        let url = match base.join(href) {
            Ok(url) => url.to_string(),
            Err(err) => {
                tracing::warn!(%href, error = %err, "skipping unresolvable country link");
                continue;
            }
        };

        match out.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.url = url,
            None => out.push(CountryLink { name, url }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDING: &str = r#"
        <html><body>
        <table id="main_table_countries_today">
          <thead><tr>
            <th>Country,<br>Other</th>
            <th>Total<br>Cases</th>
            <th>New<br>Cases</th>
          </tr></thead>
          <tbody>
            <tr><td><a href="country/us/">USA</a></td><td>1,234</td><td>+56</td></tr>
            <tr><td>Diamond Princess</td><td>712</td><td></td></tr>
          </tbody>
        </table>
        <table><thead><tr><th>ignored</th></tr></thead><tbody></tbody></table>
        <a href="country/spain/">Spain</a>
        <a href="/about">About</a>
        <a href="country/us/">USA</a>
        </body></html>
    "#;

    #[test]
    fn first_table_reads_header_fragments_and_cells() {
        let table = first_table(LANDING).unwrap();
        assert_eq!(table.headers.len(), 3);
        assert_eq!(
            table.headers[0],
            vec![
                Fragment::Text("Country,".to_string()),
                Fragment::Element(String::new()),
                Fragment::Text("Other".to_string()),
            ]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["USA", "1,234", "+56"]);
        assert_eq!(table.rows[1][2], "");
    }

    #[test]
    fn page_without_table_is_a_parse_error() {
        let err = first_table("<html><body><p>maintenance</p></body></html>").unwrap_err();
        assert!(matches!(err, SourceError::Parse { stage: "live_table", .. }));
    }

    #[test]
    fn country_links_are_resolved_and_deduplicated() {
        let base = Url::parse("https://www.worldometers.info/coronavirus/").unwrap();
        let links = country_links(LANDING, &base).unwrap();
        let names: Vec<&str> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["USA", "Spain"]);
        assert_eq!(
            links[0].url,
            "https://www.worldometers.info/coronavirus/country/us/"
        );
    }

    #[test]
    fn script_texts_in_document_order() {
        let page = "<html><head><script>var a = 1;</script></head>\
                    <body><script>Highcharts.chart('x', {});</script></body></html>";
        let scripts = script_texts(page).unwrap();
        assert_eq!(scripts, vec!["var a = 1;", "Highcharts.chart('x', {});"]);
    }
}
