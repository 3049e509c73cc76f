//! The `crawl` action: bounded same-site page harvesting.
//!
//! URLs are discovered from the site's sitemap and the current page's
//! anchors, filtered by scope mode and include/exclude patterns, deduped
//! (fragments and trailing slashes ignored), prioritised towards the
//! start page's path, capped, then visited serially on the driving page.
//! Each visit extracts the page's readable content in-page.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use sitemap::reader::{SiteMapEntity, SiteMapReader};
use sitemap::structs::Location;

use crate::driver::{Driver, EVALUATE_TIMEOUT, NAVIGATION_TIMEOUT, WaitUntil, with_retries};
use crate::error::{WorkflowError, WorkflowResult};

/// Scope mode for discovered URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Same host only.
    #[default]
    Domain,
    /// Host plus its subdomains.
    Subdomain,
    /// Same host, under the start URL's path.
    Path,
}

/// Configuration of one `crawl` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub mode: CrawlMode,
    /// Regex patterns a URL must match (any of).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    /// Regex patterns that disqualify a URL (any of).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    /// Consult `sitemap.xml` in addition to on-page anchors.
    #[serde(default = "default_true")]
    pub sitemap: bool,
}

fn default_true() -> bool {
    true
}

const DEFAULT_CRAWL_LIMIT: usize = 20;

/// In-page content extraction for one visited page.
const PAGE_CONTENT_SCRIPT: &str = r#"
(() => {
    const meta = {};
    document.querySelectorAll('meta').forEach(tag => {
        const name = tag.getAttribute('name') || tag.getAttribute('property');
        if (name) meta[name] = tag.getAttribute('content');
    });

    const links = Array.from(document.querySelectorAll('a[href]'))
        .map(a => {
            try {
                const abs = new URL(a.getAttribute('href'), window.location.href);
                return ['http:', 'https:'].includes(abs.protocol) ? abs.href : null;
            } catch (e) {
                return null;
            }
        })
        .filter(href => href !== null);

    const text = document.body ? document.body.innerText : '';
    return {
        title: document.title || null,
        description: meta['description'] || meta['og:description'] || null,
        text: text,
        html: document.documentElement ? document.documentElement.outerHTML : '',
        links: Array.from(new Set(links)),
        metadata: meta,
        wordCount: text.split(/\s+/).filter(w => w.length > 0).length
    };
})()
"#;

/// Anchor hrefs on the current page, absolute, http(s) only.
const ANCHOR_URLS_SCRIPT: &str = r#"
(() => {
    const out = [];
    for (const a of document.querySelectorAll('a[href]')) {
        try {
            const abs = new URL(a.getAttribute('href'), window.location.href);
            if (abs.protocol === 'http:' || abs.protocol === 'https:') out.push(abs.href);
        } catch (e) { /* malformed href */ }
    }
    return out;
})()
"#;

/// Run one crawl from the driver's current page.
///
/// Returns one record per visited page: `{url, title, description, text,
/// html, links, metadata, wordCount}`. Observes `abort` between visits
/// and returns whatever was gathered so far.
pub async fn run_crawl(
    driver: &Arc<dyn Driver>,
    options: &CrawlOptions,
    abort: &Arc<AtomicBool>,
) -> WorkflowResult<Vec<Value>> {
    let base = driver.current_url().await?;
    let base_url = Url::parse(&base)
        .map_err(|e| WorkflowError::ActionFailed {
            action: "crawl".to_string(),
            reason: format!("cannot parse current URL {base:?}: {e}"),
        })?;

    let filter = UrlFilter::new(&base_url, options)?;
    let limit = options.limit.unwrap_or(DEFAULT_CRAWL_LIMIT);

    let mut frontier = discover_urls(driver, &base_url, options).await;
    frontier.retain(|u| filter.accepts(u));
    let frontier = prioritise(dedupe(frontier), base_url.path());
    let frontier: Vec<String> = frontier.into_iter().take(limit).collect();
    debug!("crawl frontier holds {} urls", frontier.len());

    let mut records = Vec::new();
    for url in frontier {
        if abort.load(Ordering::Relaxed) {
            return Ok(records);
        }
        match visit(driver, &url).await {
            Ok(record) => records.push(record),
            Err(e) => warn!(url, "crawl visit failed: {e}"),
        }
    }
    Ok(records)
}

pub(crate) async fn visit(driver: &Arc<dyn Driver>, url: &str) -> WorkflowResult<Value> {
    driver
        .navigate(url, WaitUntil::Load, NAVIGATION_TIMEOUT)
        .await?;
    let mut record =
        with_retries(1, || driver.evaluate(PAGE_CONTENT_SCRIPT, EVALUATE_TIMEOUT)).await?;
    if let Some(map) = record.as_object_mut() {
        map.insert("url".to_string(), Value::String(url.to_string()));
    }
    Ok(record)
}

/// Sitemap URL entries plus on-page anchors.
async fn discover_urls(
    driver: &Arc<dyn Driver>,
    base_url: &Url,
    options: &CrawlOptions,
) -> Vec<String> {
    let mut urls = Vec::new();

    if options.sitemap {
        urls.extend(fetch_sitemap(base_url).await);
    }

    match driver.evaluate(ANCHOR_URLS_SCRIPT, EVALUATE_TIMEOUT).await {
        Ok(Value::Array(items)) => {
            urls.extend(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string)),
            );
        }
        Ok(_) => {}
        Err(e) => warn!("anchor discovery failed: {e}"),
    }

    urls
}

/// Bound on sitemap documents fetched per crawl (index files nest).
const MAX_SITEMAP_FETCHES: usize = 8;

/// Walk `/sitemap.xml`, following nested sitemap-index entries, and
/// collect every URL entry.
async fn fetch_sitemap(base_url: &Url) -> Vec<String> {
    let Ok(root) = base_url.join("/sitemap.xml") else {
        return Vec::new();
    };

    let mut pending = vec![root.to_string()];
    let mut urls = Vec::new();
    let mut fetched = 0usize;

    while let Some(sitemap_url) = pending.pop() {
        if fetched >= MAX_SITEMAP_FETCHES {
            debug!("sitemap fetch bound reached, {} documents left", pending.len() + 1);
            break;
        }
        fetched += 1;

        let Some(body) = fetch_sitemap_document(&sitemap_url).await else {
            continue;
        };
        for entity in SiteMapReader::new(body.as_bytes()) {
            match entity {
                SiteMapEntity::Url(url_entry) => {
                    if let Location::Url(url) = url_entry.loc {
                        urls.push(url.to_string());
                    }
                }
                SiteMapEntity::SiteMap(sitemap_entry) => {
                    if let Location::Url(url) = sitemap_entry.loc {
                        pending.push(url.to_string());
                    }
                }
                SiteMapEntity::Err(err) => {
                    debug!("malformed sitemap entry: {:?}", err.msg());
                }
            }
        }
    }
    urls
}

async fn fetch_sitemap_document(url: &str) -> Option<String> {
    match tokio::time::timeout(Duration::from_secs(10), reqwest::get(url)).await {
        Ok(Ok(resp)) if resp.status().is_success() => resp.text().await.ok(),
        Ok(Ok(resp)) => {
            debug!("sitemap fetch returned {}", resp.status());
            None
        }
        Ok(Err(e)) => {
            debug!("sitemap fetch failed: {e}");
            None
        }
        Err(_) => {
            debug!("sitemap fetch timed out");
            None
        }
    }
}

/// Scope + pattern filter for candidate URLs.
pub struct UrlFilter {
    base_host: String,
    base_path: String,
    mode: CrawlMode,
    include: Vec<regex::Regex>,
    exclude: Vec<regex::Regex>,
}

impl UrlFilter {
    pub fn new(base_url: &Url, options: &CrawlOptions) -> WorkflowResult<Self> {
        let compile = |patterns: &Option<Vec<String>>| -> WorkflowResult<Vec<regex::Regex>> {
            patterns
                .iter()
                .flatten()
                .map(|p| {
                    regex::Regex::new(p).map_err(|e| {
                        WorkflowError::Validation(format!("bad crawl pattern {p:?}: {e}"))
                    })
                })
                .collect()
        };
        Ok(Self {
            base_host: base_url.host_str().unwrap_or_default().to_string(),
            base_path: base_url.path().trim_end_matches('/').to_string(),
            mode: options.mode,
            include: compile(&options.include)?,
            exclude: compile(&options.exclude)?,
        })
    }

    /// Whether a discovered URL is in scope.
    #[must_use]
    pub fn accepts(&self, candidate: &str) -> bool {
        let Ok(url) = Url::parse(candidate) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let host = url.host_str().unwrap_or_default();
        let in_scope = match self.mode {
            CrawlMode::Domain => host == self.base_host,
            CrawlMode::Subdomain => {
                host == self.base_host || host.ends_with(&format!(".{}", self.base_host))
            }
            CrawlMode::Path => {
                let path = url.path().trim_end_matches('/');
                host == self.base_host
                    && (self.base_path.is_empty()
                        || path == self.base_path
                        || path.starts_with(&format!("{}/", self.base_path)))
            }
        };
        if !in_scope {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(candidate)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(candidate)) {
            return false;
        }
        true
    }
}

/// Canonical identity for dedup: no fragment, no trailing slash.
#[must_use]
pub fn normalise(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.trim_end_matches('/').to_string()
}

/// Dedupe by canonical identity, preserving first-seen order.
#[must_use]
pub fn dedupe(urls: Vec<String>) -> Vec<String> {
    let seen: DashSet<String> = DashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(normalise(u)))
        .collect()
}

/// Stable partition: URLs under the base pathname come first.
#[must_use]
pub fn prioritise(urls: Vec<String>, base_path: &str) -> Vec<String> {
    let base = base_path.trim_end_matches('/');
    let (mut near, far): (Vec<String>, Vec<String>) = urls.into_iter().partition(|u| {
        Url::parse(u)
            .map(|parsed| {
                let path = parsed.path().trim_end_matches('/').to_string();
                base.is_empty() || path == base || path.starts_with(&format!("{base}/"))
            })
            .unwrap_or(false)
    });
    near.extend(far);
    near
}
