use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use super::{Page, PaperSource, SourceFuture};
use crate::error::SourceError;
use crate::models::{PaperMetadata, ValidatedQuery, strip_version};
use crate::rate_limit::check_response_status;

pub const DEFAULT_BASE_URL: &str = "http://export.arxiv.org/api/query";

/// Subject categories listed in [`SourceInfo`](crate::models::SourceInfo).
pub const CATEGORIES: &[&str] = &[
    "cs.AI",
    "cs.CL",
    "cs.CV",
    "cs.LG",
    "cs.NE",
    "cs.RO",
    "stat.ML",
    "math.OC",
    "physics.comp-ph",
    "quant-ph",
];

/// Earliest submission date used when only an upper date bound is given.
const EPOCH: &str = "19910101";

static FIELD_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:ti|au|abs|co|jr|cat|rn|id|all):").unwrap());

/// arXiv Atom export API.
pub struct Arxiv {
    base_url: String,
}

impl Default for Arxiv {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl Arxiv {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn get_feed(
        &self,
        url: &str,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Vec<PaperMetadata>, SourceError> {
        tracing::debug!(url, "arXiv request");
        let resp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&e))?;
        check_response_status(&resp)?;
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::from_reqwest(&e))?;
        parse_feed(&body)
    }
}

impl PaperSource for Arxiv {
    fn name(&self) -> &str {
        "arXiv"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn categories(&self) -> &[&'static str] {
        CATEGORIES
    }

    fn search<'a>(
        &'a self,
        query: &'a ValidatedQuery,
        page: Page,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<PaperMetadata>> {
        Box::pin(async move {
            let today = Utc::now().date_naive();
            let url = search_url(&self.base_url, query, page, today);
            self.get_feed(&url, client, timeout).await
        })
    }

    fn fetch_by_id<'a>(
        &'a self,
        id: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, PaperMetadata> {
        Box::pin(async move {
            let base_id = strip_version(id.trim());
            let url = format!(
                "{}?id_list={}&max_results=1",
                self.base_url,
                urlencoding::encode(base_id)
            );
            self.get_feed(&url, client, timeout)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| SourceError::NotFound(base_id.to_string()))
        })
    }

    fn fetch_pdf<'a>(
        &'a self,
        url: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<u8>> {
        Box::pin(async move {
            tracing::debug!(url, "PDF request");
            let resp = client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| SourceError::from_reqwest(&e))?;
            check_response_status(&resp)?;
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| SourceError::from_reqwest(&e))?;
            Ok(bytes.to_vec())
        })
    }
}

/// Build the `search_query` expression for a validated query.
///
/// Plain terms are searched across all fields; expressions that already use
/// arXiv field prefixes (`ti:`, `au:`, ...) pass through unchanged. An open
/// upper date bound is closed at `today`.
pub fn build_search_query(query: &ValidatedQuery, today: NaiveDate) -> String {
    let mut parts = Vec::new();

    if !query.terms.is_empty() {
        if FIELD_QUERY_RE.is_match(&query.terms) {
            parts.push(query.terms.clone());
        } else {
            parts.push(format!("all:{}", query.terms));
        }
    }
    if let Some(ref category) = query.category {
        parts.push(format!("cat:{}", category));
    }
    if query.from.is_some() || query.to.is_some() {
        let from = query
            .from
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| EPOCH.to_string());
        let to = query.to.unwrap_or(today).format("%Y%m%d");
        parts.push(format!("submittedDate:[{from}0000 TO {to}2359]"));
    }

    parts.join(" AND ")
}

pub fn search_url(base_url: &str, query: &ValidatedQuery, page: Page, today: NaiveDate) -> String {
    format!(
        "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
        base_url,
        urlencoding::encode(&build_search_query(query, today)),
        page.start,
        page.size
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    JournalRef,
    Doi,
    Comment,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
    current_author: String,
    categories: Vec<String>,
    primary_category: Option<String>,
    pdf_url: Option<String>,
    abstract_url: Option<String>,
    journal_ref: String,
    doi: String,
    comment: String,
}

impl EntryBuilder {
    fn push_text(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
            Field::AuthorName => &mut self.current_author,
            Field::JournalRef => &mut self.journal_ref,
            Field::Doi => &mut self.doi,
            Field::Comment => &mut self.comment,
        };
        target.push_str(text);
    }

    fn finish_author(&mut self) {
        let name = collapse_whitespace(&self.current_author);
        if !name.is_empty() {
            self.authors.push(name);
        }
        self.current_author.clear();
    }

    fn handle_element(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"link" => {
                let mut href = None;
                let mut title = None;
                let mut rel = None;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).to_string();
                    match attr.key.local_name().as_ref() {
                        b"href" => href = Some(value),
                        b"title" => title = Some(value),
                        b"rel" => rel = Some(value),
                        _ => {}
                    }
                }
                if let Some(href) = href {
                    if title.as_deref() == Some("pdf") {
                        self.pdf_url = Some(href);
                    } else if rel.as_deref() == Some("alternate") {
                        self.abstract_url = Some(href);
                    }
                }
            }
            b"category" | b"primary_category" => {
                let term = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"term")
                    .map(|a| String::from_utf8_lossy(&a.value).to_string());
                if let Some(term) = term {
                    if e.local_name().as_ref() == b"primary_category" {
                        self.primary_category = Some(term);
                    } else if !self.categories.contains(&term) {
                        self.categories.push(term);
                    }
                }
            }
            _ => {}
        }
    }

    /// Convert into metadata. `Ok(None)` means the entry is a placeholder
    /// (arXiv returns one for unknown ids) or lacks a usable date.
    fn finish(self) -> Result<Option<PaperMetadata>, SourceError> {
        let raw_id = self.id.trim();
        if raw_id.contains("/api/errors") {
            let message = collapse_whitespace(&self.summary);
            return Err(SourceError::Permanent {
                message: if message.is_empty() {
                    "arXiv API error".to_string()
                } else {
                    message
                },
                status: None,
            });
        }

        let title = collapse_whitespace(&self.title);
        if raw_id.is_empty() || title.is_empty() {
            return Ok(None);
        }

        let id = raw_id
            .rsplit_once("/abs/")
            .map(|(_, id)| id)
            .unwrap_or(raw_id)
            .to_string();

        let Some(published) = parse_atom_date(&self.published) else {
            tracing::warn!(id = %id, published = %self.published, "skipping arXiv entry without a valid published date");
            return Ok(None);
        };

        let pdf_url = self
            .pdf_url
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", id));
        let abstract_url = self.abstract_url.unwrap_or_else(|| raw_id.to_string());

        Ok(Some(PaperMetadata {
            title,
            authors: self.authors,
            abstract_text: collapse_whitespace(&self.summary),
            published,
            updated: parse_atom_date(&self.updated),
            categories: self.categories,
            primary_category: self.primary_category,
            pdf_url,
            abstract_url,
            journal_ref: non_empty(&self.journal_ref),
            doi: non_empty(&self.doi),
            comment: non_empty(&self.comment),
            id,
        }))
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: &str) -> Option<String> {
    let s = collapse_whitespace(s);
    (!s.is_empty()).then_some(s)
}

fn parse_atom_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn field_for(local: &[u8], in_author: bool) -> Option<Field> {
    match local {
        b"id" => Some(Field::Id),
        b"title" => Some(Field::Title),
        b"summary" => Some(Field::Summary),
        b"published" => Some(Field::Published),
        b"updated" => Some(Field::Updated),
        b"name" if in_author => Some(Field::AuthorName),
        b"journal_ref" => Some(Field::JournalRef),
        b"doi" => Some(Field::Doi),
        b"comment" => Some(Field::Comment),
        _ => None,
    }
}

/// Parse an arXiv Atom feed into paper metadata, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<PaperMetadata>, SourceError> {
    let mut reader = Reader::from_str(xml);

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"entry" {
                    entry = Some(EntryBuilder::default());
                    in_author = false;
                    field = None;
                } else if let Some(ref mut builder) = entry {
                    if local.as_ref() == b"author" {
                        in_author = true;
                    } else {
                        field = field_for(local.as_ref(), in_author);
                    }
                    builder.handle_element(e);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(ref mut builder) = entry {
                    builder.handle_element(e);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(builder), Some(f)) = (entry.as_mut(), field) {
                    let text = e.unescape().unwrap_or_default();
                    builder.push_text(f, &text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let (Some(builder), Some(f)) = (entry.as_mut(), field) {
                    builder.push_text(f, &String::from_utf8_lossy(&e[..]));
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(builder) = entry.take()
                        && let Some(paper) = builder.finish()?
                    {
                        papers.push(paper);
                    }
                    field = None;
                }
                b"author" => {
                    if let Some(ref mut builder) = entry {
                        builder.finish_author();
                    }
                    in_author = false;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::permanent(format!(
                    "arXiv XML parse error: {}",
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}
