//! Page-renderer seam and DOM sweep primitives.
//!
//! Adapters talk to a [`PageRenderer`] rather than an HTTP client or a
//! browser directly. The production implementation fetches over HTTP and
//! waits out a settle delay; tests use [`FixtureRenderer`] with captured
//! HTML. [`RenderedPage`] is plain data, so DOM queries happen synchronously
//! and `scraper`'s non-`Send` types never cross an await point.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CRATE_NAME: &str = "bidwatch-render";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("navigation timed out for {url}")]
    Timeout { url: String },
    #[error("selector parse error: {0}")]
    Selector(String),
}

/// Optional action performed after navigation, before extraction. NJSTART
/// style portals render an empty results table until a search is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    SubmitSearch,
}

#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub timeout: Duration,
    /// Render-stabilization delay awaited after the page loads.
    pub settle: Duration,
    pub trigger: Option<TriggerAction>,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            settle: Duration::from_secs(3),
            trigger: None,
        }
    }
}

impl NavigateOptions {
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerAction) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Navigate to `url`, perform the optional trigger action, and await the
    /// render-stable signal before returning the document.
    async fn navigate(
        &self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedPage, RenderError>;
}

/// A hyperlink with its text and the text of its nearest structural
/// ancestor (row, list item, block, or article) as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub text: String,
    pub href: String,
    pub context: String,
}

/// A card/row container's title element and companion link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCandidate {
    pub title: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub cells: Vec<String>,
    pub link: Option<String>,
}

/// A settled DOM snapshot: final URL plus document HTML.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
    pub rendered_at: DateTime<Utc>,
}

impl RenderedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            rendered_at: Utc::now(),
        }
    }

    /// Link-sweep primitive: every hyperlink on the page with absolutized
    /// target and ancestor context truncated to `context_bound` chars.
    pub fn links_with_context(&self, context_bound: usize) -> Result<Vec<PageLink>, RenderError> {
        let document = Html::parse_document(&self.html);
        let anchors = parse_selector("a[href]")?;

        let mut out = Vec::new();
        for link in document.select(&anchors) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(target) = absolutize(&self.url, href) else {
                continue;
            };
            let text = collapse_ws(&link.text().collect::<String>());
            let context = nearest_ancestor_context(link, context_bound).unwrap_or_default();
            out.push(PageLink {
                text,
                href: target,
                context,
            });
        }
        Ok(out)
    }

    /// Structured-card sweep: for each container matched by
    /// `container_selector`, extract the first title element and companion
    /// link. An empty result signals the caller to fall back to link-sweep.
    pub fn card_candidates(
        &self,
        container_selector: &str,
        title_selector: &str,
    ) -> Result<Vec<CardCandidate>, RenderError> {
        let document = Html::parse_document(&self.html);
        let containers = parse_selector(container_selector)?;
        let titles = parse_selector(title_selector)?;
        let anchors = parse_selector("a[href]")?;

        let mut out = Vec::new();
        for card in document.select(&containers) {
            let title = card
                .select(&titles)
                .next()
                .map(|el| collapse_ws(&el.text().collect::<String>()));
            let href = card
                .select(&anchors)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| absolutize(&self.url, href));
            if let (Some(title), Some(href)) = (title, href) {
                if !title.is_empty() {
                    out.push(CardCandidate { title, href });
                }
            }
        }
        Ok(out)
    }

    /// Row sweep: the first link inside each matched container, titled by
    /// the link text or, when the link has no text of its own, by the
    /// container's text truncated to `fallback_title_chars`. The container
    /// text doubles as context, bounded to `context_bound` chars.
    pub fn row_link_candidates(
        &self,
        container_selector: &str,
        fallback_title_chars: usize,
        context_bound: usize,
    ) -> Result<Vec<PageLink>, RenderError> {
        let document = Html::parse_document(&self.html);
        let containers = parse_selector(container_selector)?;
        let anchors = parse_selector("a[href]")?;

        let mut out = Vec::new();
        for container in document.select(&containers) {
            let Some(link) = container.select(&anchors).next() else {
                continue;
            };
            let Some(href) = link
                .value()
                .attr("href")
                .and_then(|href| absolutize(&self.url, href))
            else {
                continue;
            };
            let container_text = collapse_ws(&container.text().collect::<String>());
            let mut text = collapse_ws(&link.text().collect::<String>());
            if text.is_empty() {
                text = container_text.chars().take(fallback_title_chars).collect();
            }
            if !text.is_empty() {
                out.push(PageLink {
                    text,
                    href,
                    context: container_text.chars().take(context_bound).collect(),
                });
            }
        }
        Ok(out)
    }

    /// All table rows as cell-text vectors plus each row's first link.
    /// Header-only rows (no `td`) are skipped. Callers must not assume
    /// column semantics beyond "first non-empty cell is an identifier
    /// candidate".
    pub fn table_rows(&self) -> Result<Vec<TableRow>, RenderError> {
        let document = Html::parse_document(&self.html);
        let rows = parse_selector("table tr")?;
        let cells = parse_selector("td")?;
        let anchors = parse_selector("a[href]")?;

        let mut out = Vec::new();
        for row in document.select(&rows) {
            let cell_texts: Vec<String> = row
                .select(&cells)
                .map(|cell| collapse_ws(&cell.text().collect::<String>()))
                .collect();
            if cell_texts.is_empty() {
                continue;
            }
            let link = row
                .select(&anchors)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| absolutize(&self.url, href));
            out.push(TableRow {
                cells: cell_texts,
                link,
            });
        }
        Ok(out)
    }

    /// Target of the page's first form, used to resolve
    /// [`TriggerAction::SubmitSearch`] over plain HTTP.
    pub fn first_form_action(&self) -> Result<Option<String>, RenderError> {
        let document = Html::parse_document(&self.html);
        let forms = parse_selector("form[action]")?;
        Ok(document
            .select(&forms)
            .filter_map(|form| form.value().attr("action"))
            .filter(|action| !action.trim().is_empty())
            .find_map(|action| absolutize(&self.url, action)))
    }
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector).map_err(|e| RenderError::Selector(e.to_string()))
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `href` against `base`, keeping only http(s) targets.
fn absolutize(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let resolved = base.join(href.trim()).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

fn nearest_ancestor_context(element: ElementRef<'_>, bound: usize) -> Option<String> {
    for node in element.ancestors() {
        if let Some(ancestor) = ElementRef::wrap(node) {
            if matches!(ancestor.value().name(), "tr" | "li" | "div" | "article") {
                let text = collapse_ws(&ancestor.text().collect::<String>());
                return Some(text.chars().take(bound).collect());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// HTTP-backed renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRendererConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpRendererConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

/// Production renderer: plain HTTP fetch plus settle-delay waits. A real
/// browser-automation engine can replace this behind the same trait.
#[derive(Debug)]
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(config: HttpRendererConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str, options: &NavigateOptions) -> Result<RenderedPage, RenderError> {
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(url, err))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(RenderError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let html = response
            .text()
            .await
            .map_err(|err| classify_reqwest_error(&final_url, err))?;

        tokio::time::sleep(options.settle).await;
        Ok(RenderedPage::new(final_url, html))
    }
}

fn classify_reqwest_error(url: &str, err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Timeout {
            url: url.to_string(),
        }
    } else {
        RenderError::Navigation {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn navigate(
        &self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedPage, RenderError> {
        let page = self.fetch(url, options).await?;

        if let Some(TriggerAction::SubmitSearch) = options.trigger {
            // Empty-search submit: follow the first form's action. No form
            // on the page means the results are already rendered.
            match page.first_form_action()? {
                Some(action) => {
                    debug!(url, action, "submitting empty search");
                    return self.fetch(&action, options).await;
                }
                None => {
                    debug!(url, "no search form found; extracting as-is");
                }
            }
        }
        Ok(page)
    }
}

// ---------------------------------------------------------------------------
// Fixture renderer for offline tests
// ---------------------------------------------------------------------------

/// In-memory URL -> HTML map. Unknown URLs fail with a navigation error,
/// which doubles as the failure-injection hook in isolation tests.
#[derive(Debug, Default, Clone)]
pub struct FixtureRenderer {
    pages: HashMap<String, String>,
    triggered: HashMap<String, String>,
}

impl FixtureRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    /// Document served when the URL is navigated with a trigger action,
    /// standing in for post-search results.
    pub fn with_triggered_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.triggered.insert(url.into(), html.into());
        self
    }
}

#[async_trait]
impl PageRenderer for FixtureRenderer {
    async fn navigate(
        &self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedPage, RenderError> {
        let html = if options.trigger.is_some() {
            self.triggered.get(url).or_else(|| self.pages.get(url))
        } else {
            self.pages.get(url)
        };
        match html {
            Some(html) => Ok(RenderedPage::new(url, html.clone())),
            None => Err(RenderError::Navigation {
                url: url.to_string(),
                message: "no fixture page registered".to_string(),
            }),
        }
    }
}
