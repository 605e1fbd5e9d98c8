//! Built-in spider that records pages and follows same-host links
//!
//! Every fetched page becomes a `page` record. Links are extracted from
//! `<a href>` and `<link rel="canonical">` and followed up to
//! `spider.max-depth` hops from a seed, staying on the seed's host.

use crate::config::SpiderConfig;
use crate::crawler::spider::{output, Output, OutputStream, RequestStream, Spider, SpiderError};
use crate::http::{Request, Response};
use crate::record::{FieldKind, Record, RecordSchema};
use crate::{ConfigError, ConfigResult};
use parking_lot::Mutex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Title and outgoing links of one HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,

    /// Absolute http(s) URLs, in document order
    pub links: Vec<String>,
}

/// Parses HTML and extracts the title and followable links
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
/// - Anything that is not http(s) after resolution
///
/// # Example
///
/// ```
/// use sumi_harvest::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(anchors) = Selector::parse("a[href]") {
        for element in document.select(&anchors) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let href = element.value().attr("href");
            if let Some(link) = href.and_then(|h| resolve_link(h, base_url)) {
                links.push(link);
            }
        }
    }

    if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical) {
            let href = element.value().attr("href");
            if let Some(link) = href.and_then(|h| resolve_link(h, base_url)) {
                links.push(link);
            }
        }
    }

    links
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    const SKIPPED: [&str; 4] = ["javascript:", "mailto:", "tel:", "data:"];
    if SKIPPED.iter().any(|scheme| href.starts_with(scheme)) {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}

/// Seeds from `spider.start-urls`, records pages, follows links
pub struct PageSpider {
    config: SpiderConfig,
    seeds: Vec<Url>,
    schema: Arc<RecordSchema>,
    seen: Mutex<HashSet<String>>,
}

impl PageSpider {
    /// Creates the spider
    ///
    /// # Returns
    ///
    /// * `Ok(PageSpider)` - Every start URL parsed
    /// * `Err(ConfigError::InvalidUrl)` - A start URL did not parse
    pub fn new(config: SpiderConfig) -> ConfigResult<Self> {
        let seeds = config
            .start_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let schema = RecordSchema::new("page")
            .required("url", FieldKind::String)
            .field("status", FieldKind::Integer)
            .field("title", FieldKind::String)
            .with_default("depth", FieldKind::Integer, 0)
            .finish()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(Self {
            config,
            seeds,
            schema,
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// Schema of the records this spider emits
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Marks a request as seen; false if it already was
    fn first_sighting(&self, request: &Request) -> bool {
        self.seen.lock().insert(request.content_hash())
    }

    fn on_seed_host(&self, url: &Url) -> bool {
        self.seeds
            .iter()
            .any(|seed| seed.host_str().is_some() && seed.host_str() == url.host_str())
    }

    fn page_record(
        &self,
        response: &Response,
        title: Option<String>,
        depth: u64,
    ) -> Result<Record, SpiderError> {
        let mut builder = self
            .schema
            .builder()
            .set("url", response.url())
            .set("status", response.status())
            .set("depth", depth);
        if let Some(title) = title {
            builder = builder.set("title", title);
        }
        Ok(builder.build()?)
    }
}

#[async_trait::async_trait]
impl Spider for PageSpider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn start_requests(&self) -> RequestStream {
        let requests: Vec<Request> = self
            .seeds
            .iter()
            .map(|seed| Request::get(seed.as_str()).with_meta("depth", 0))
            .filter(|request| self.first_sighting(request))
            .collect();
        tracing::info!("Seeding {} start URLs", requests.len());
        output::requests(requests)
    }

    fn parse(&self, response: Response) -> OutputStream {
        let depth = response
            .request()
            .meta()
            .get("depth")
            .and_then(|d| d.as_u64())
            .unwrap_or(0);

        let page = match Url::parse(response.url()) {
            Ok(base) if response.is_success() => parse_html(&response.text(), &base),
            _ => ParsedPage::default(),
        };

        let record = match self.page_record(&response, page.title, depth) {
            Ok(record) => record,
            Err(e) => return output::fail(e),
        };

        let mut outputs = vec![Output::from(record)];
        if depth < u64::from(self.config.max_depth) {
            let next_depth = depth + 1;
            for link in page.links {
                let Ok(url) = Url::parse(&link) else { continue };
                if !self.on_seed_host(&url) {
                    continue;
                }
                let request = Request::get(link)
                    .with_priority(next_depth as i64)
                    .with_meta("depth", next_depth);
                if self.first_sighting(&request) {
                    outputs.push(request.into());
                }
            }
        }

        tracing::debug!("{}: {} outputs at depth {}", response.url(), outputs.len(), depth);
        output::outputs(outputs)
    }
}
