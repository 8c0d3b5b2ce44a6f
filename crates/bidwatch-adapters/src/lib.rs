//! Portal adapter contracts and one adapter per state portal.
//!
//! Every adapter implements [`PortalAdapter::extract`]: navigate the
//! portal's pages through the renderer seam and return raw candidates.
//! Classification and normalization happen downstream; adapters carry no
//! keyword lists of their own.

use async_trait::async_trait;
use bidwatch_core::{PortalId, RawCandidate, RecordType};
use bidwatch_render::{
    CardCandidate, NavigateOptions, PageLink, PageRenderer, RenderError, RenderedPage,
    TriggerAction,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "bidwatch-adapters";

/// Captured-context bound, chars.
pub const CONTEXT_BOUND: usize = 500;

/// One portal's navigable targets, as loaded from the portal registry.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub portal: PortalId,
    pub url: String,
    /// Second result set (active contracts), where the portal exposes one.
    #[serde(default)]
    pub contracts_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Member of the fast-subset run.
    #[serde(default)]
    pub quick: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait PortalAdapter: Send + Sync {
    fn portal(&self) -> PortalId;

    async fn extract(
        &self,
        renderer: &dyn PageRenderer,
        config: &PortalConfig,
    ) -> Result<Vec<RawCandidate>, AdapterError>;
}

/// Adapter registry, one polymorphic implementation per portal.
pub fn adapter_for(portal: PortalId) -> Box<dyn PortalAdapter> {
    match portal {
        PortalId::Va => Box::new(VirginiaAdapter),
        PortalId::Nj => Box::new(NewJerseyAdapter),
        PortalId::De => Box::new(DelawareAdapter),
        other => Box::new(LinkSweepAdapter { portal: other }),
    }
}

// ---------------------------------------------------------------------------
// Shared sweep strategies
// ---------------------------------------------------------------------------

fn link_to_candidate(link: PageLink) -> RawCandidate {
    RawCandidate {
        title: link.text,
        url: link.href,
        context: link.context,
        ..RawCandidate::default()
    }
}

fn card_to_candidate(card: CardCandidate) -> RawCandidate {
    RawCandidate {
        title: card.title,
        url: card.href,
        ..RawCandidate::default()
    }
}

/// Default extraction strategy: enumerate every hyperlink, keep those whose
/// text looks like a posting title rather than navigation chrome.
fn link_sweep(page: &RenderedPage, min_title: usize) -> Result<Vec<RawCandidate>, AdapterError> {
    let candidates = page
        .links_with_context(CONTEXT_BOUND)?
        .into_iter()
        .filter(|link| {
            let len = link.text.chars().count();
            len >= min_title && len <= 500
        })
        .map(link_to_candidate)
        .collect();
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Generic link-sweep portals: MD, PA, MA, DC, MN, WV
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct LinkSweepAdapter {
    portal: PortalId,
}

#[async_trait]
impl PortalAdapter for LinkSweepAdapter {
    fn portal(&self) -> PortalId {
        self.portal
    }

    async fn extract(
        &self,
        renderer: &dyn PageRenderer,
        config: &PortalConfig,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let page = renderer
            .navigate(&config.url, &NavigateOptions::default())
            .await?;
        link_sweep(&page, 10)
    }
}

// ---------------------------------------------------------------------------
// Virginia eVA: solicitation listings come as table rows or list items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct VirginiaAdapter;

#[async_trait]
impl PortalAdapter for VirginiaAdapter {
    fn portal(&self) -> PortalId {
        PortalId::Va
    }

    async fn extract(
        &self,
        renderer: &dyn PageRenderer,
        config: &PortalConfig,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let page = renderer
            .navigate(&config.url, &NavigateOptions::default())
            .await?;
        let rows = page.row_link_candidates(
            "table tr, .solicitation-item, .bid-item, li",
            200,
            CONTEXT_BOUND,
        )?;
        Ok(rows
            .into_iter()
            .filter(|row| row.text.chars().count() >= 10)
            .map(link_to_candidate)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Delaware BidX: card-based layout, slow to settle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct DelawareAdapter;

#[async_trait]
impl PortalAdapter for DelawareAdapter {
    fn portal(&self) -> PortalId {
        PortalId::De
    }

    async fn extract(
        &self,
        renderer: &dyn PageRenderer,
        config: &PortalConfig,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let options = NavigateOptions::default().with_settle(Duration::from_secs(5));
        let page = renderer.navigate(&config.url, &options).await?;

        let cards = page.card_candidates(
            ".opportunity-card, .bid-card, [class*=\"opportunity\"], [class*=\"bid\"]",
            "h2, h3, h4, .title, [class*=\"title\"]",
        )?;
        if !cards.is_empty() {
            return Ok(cards.into_iter().map(card_to_candidate).collect());
        }

        // No recognizable cards: fall back to a link sweep with a stricter
        // title gate to keep platform chrome out.
        debug!(portal = %self.portal(), "no card containers matched; falling back to link sweep");
        link_sweep(&page, 20)
    }
}

// ---------------------------------------------------------------------------
// New Jersey: two independent result sets, merged
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct NewJerseyAdapter;

impl NewJerseyAdapter {
    /// Active contracts on NJSTART: the results table stays empty until an
    /// empty search is submitted, and column order varies. The first
    /// non-empty cell is the contract number; the next non-empty cells are
    /// description and vendor candidates.
    async fn extract_contracts(
        &self,
        renderer: &dyn PageRenderer,
        contracts_url: &str,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let options = NavigateOptions::default()
            .with_settle(Duration::from_secs(5))
            .with_trigger(TriggerAction::SubmitSearch);
        let page = renderer.navigate(contracts_url, &options).await?;

        let mut out = Vec::new();
        for row in page.table_rows()? {
            let mut filled = row.cells.iter().filter(|c| !c.trim().is_empty());
            let Some(contract_number) = filled.next() else {
                continue;
            };
            let Some(description) = filled.next() else {
                continue;
            };
            if description.chars().count() <= 5 {
                continue;
            }
            let vendor = filled.next();

            let url = row.link.clone().unwrap_or_else(|| {
                format!("https://www.njstart.gov/contract/{contract_number}")
            });

            let mut candidate = RawCandidate {
                title: description.clone(),
                url,
                context: vendor.cloned().unwrap_or_default(),
                record_type: RecordType::Contract,
                ..RawCandidate::default()
            };
            candidate
                .extra
                .insert("contract_number".to_string(), contract_number.clone());
            // Contracts are discovered on the search page, not the
            // advertised-bids listing; keep the real origin.
            candidate
                .extra
                .insert("origin_url".to_string(), contracts_url.to_string());
            if let Some(vendor) = vendor {
                candidate.extra.insert("vendor".to_string(), vendor.clone());
            }
            out.push(candidate);
        }
        Ok(out)
    }

    /// Advertised solicitations: link sweep restricted to bid-looking
    /// targets (hrefs carrying `bid`, `rfp`, or `.pdf`).
    async fn extract_advertised(
        &self,
        renderer: &dyn PageRenderer,
        url: &str,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let page = renderer.navigate(url, &NavigateOptions::default()).await?;
        let candidates = page
            .links_with_context(CONTEXT_BOUND)?
            .into_iter()
            .filter(|link| {
                let href = link.href.to_lowercase();
                link.text.chars().count() >= 10
                    && (href.contains("bid") || href.contains("rfp") || href.contains(".pdf"))
            })
            .map(|link| RawCandidate {
                record_type: RecordType::Solicitation,
                ..link_to_candidate(link)
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl PortalAdapter for NewJerseyAdapter {
    fn portal(&self) -> PortalId {
        PortalId::Nj
    }

    async fn extract(
        &self,
        renderer: &dyn PageRenderer,
        config: &PortalConfig,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        let mut merged = Vec::new();

        // Each pass fails on its own; a dead contracts search must not cost
        // us the advertised solicitations, and vice versa.
        if let Some(contracts_url) = &config.contracts_url {
            match self.extract_contracts(renderer, contracts_url).await {
                Ok(contracts) => merged.extend(contracts),
                Err(err) => warn!(portal = "NJ", pass = "contracts", error = %err, "pass failed"),
            }
        }

        match self.extract_advertised(renderer, &config.url).await {
            Ok(bids) => merged.extend(bids),
            Err(err) => warn!(portal = "NJ", pass = "advertised", error = %err, "pass failed"),
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidwatch_render::FixtureRenderer;

    fn config(portal: PortalId, url: &str) -> PortalConfig {
        PortalConfig {
            portal,
            url: url.to_string(),
            contracts_url: None,
            enabled: true,
            quick: false,
            notes: None,
        }
    }

    #[tokio::test]
    async fn generic_adapter_sweeps_links_with_title_gate() {
        let html = r#"
            <ul>
              <li><a href="/bids/1">Custom Application Development RFP</a></li>
              <li><a href="/bids/2">Home</a></li>
            </ul>
        "#;
        let renderer = FixtureRenderer::new().with_page("https://md.example.gov/bids", html);
        let adapter = adapter_for(PortalId::Md);
        let cfg = config(PortalId::Md, "https://md.example.gov/bids");

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Custom Application Development RFP");
        assert_eq!(candidates[0].url, "https://md.example.gov/bids/1");
        assert_eq!(candidates[0].record_type, RecordType::Solicitation);
    }

    #[tokio::test]
    async fn virginia_adapter_reads_rows_and_list_items() {
        let html = r#"
            <table>
              <tr><td><a href="/sol/9">Computer Systems Design Solicitation</a></td></tr>
            </table>
            <li class="bid-item"><a href="/sol/10">Statewide Data Center Operations</a></li>
        "#;
        let renderer = FixtureRenderer::new().with_page("https://eva.example.gov/s", html);
        let adapter = adapter_for(PortalId::Va);
        let cfg = config(PortalId::Va, "https://eva.example.gov/s");

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        let titles: Vec<_> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert!(titles.contains(&"Computer Systems Design Solicitation"));
        assert!(titles.contains(&"Statewide Data Center Operations"));
    }

    #[tokio::test]
    async fn delaware_adapter_prefers_cards_then_falls_back() {
        let cards = r#"
            <div class="opportunity-card">
              <h3>Cloud Hosting Services Bid</h3>
              <a href="/opp/1">View</a>
            </div>
        "#;
        let renderer = FixtureRenderer::new().with_page("https://de.example.gov/opps", cards);
        let adapter = adapter_for(PortalId::De);
        let cfg = config(PortalId::De, "https://de.example.gov/opps");

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Cloud Hosting Services Bid");

        let no_cards = r#"
            <p><a href="/opp/2">Enterprise Software Licensing Opportunity</a></p>
            <p><a href="/nav">Skip to content</a></p>
        "#;
        let renderer = FixtureRenderer::new().with_page("https://de.example.gov/opps", no_cards);
        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].title,
            "Enterprise Software Licensing Opportunity"
        );
    }

    #[tokio::test]
    async fn new_jersey_adapter_merges_both_passes_with_record_types() {
        let contracts = r#"
            <table>
              <tr><th>Contract #</th><th>Description</th><th>Vendor</th></tr>
              <tr>
                <td>T3081</td>
                <td>Managed IT Infrastructure Services</td>
                <td>Acme Systems LLC</td>
              </tr>
              <tr><td></td><td>   </td></tr>
            </table>
        "#;
        let advertised = r#"
            <a href="/bids/rfp-2026-44.pdf">Network Equipment Refresh RFP</a>
            <a href="/news/groundbreaking">Governor announces new building</a>
        "#;
        let renderer = FixtureRenderer::new()
            .with_page("https://nj.example.gov/advertised", advertised)
            .with_triggered_page("https://nj.example.gov/contracts", contracts);

        let adapter = adapter_for(PortalId::Nj);
        let mut cfg = config(PortalId::Nj, "https://nj.example.gov/advertised");
        cfg.contracts_url = Some("https://nj.example.gov/contracts".to_string());

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 2);

        let contract = &candidates[0];
        assert_eq!(contract.record_type, RecordType::Contract);
        assert_eq!(contract.title, "Managed IT Infrastructure Services");
        assert_eq!(
            contract.extra.get("contract_number").map(String::as_str),
            Some("T3081")
        );
        assert_eq!(
            contract.extra.get("vendor").map(String::as_str),
            Some("Acme Systems LLC")
        );

        let bid = &candidates[1];
        assert_eq!(bid.record_type, RecordType::Solicitation);
        assert_eq!(bid.url, "https://nj.example.gov/bids/rfp-2026-44.pdf");
    }

    #[tokio::test]
    async fn new_jersey_reads_contract_rows_regardless_of_column_order() {
        // Leading empty and whitespace-only cells are common on NJSTART;
        // the identifier may only appear in a later column.
        let contracts = r#"
            <table>
              <tr>
                <td></td>
                <td>   </td>
                <td>G2290</td>
                <td>Statewide Application Maintenance Services</td>
                <td>Garden State Digital Inc</td>
              </tr>
            </table>
        "#;
        let renderer = FixtureRenderer::new()
            .with_page("https://nj.example.gov/advertised", "<p>nothing advertised</p>")
            .with_triggered_page("https://nj.example.gov/contracts", contracts);

        let adapter = adapter_for(PortalId::Nj);
        let mut cfg = config(PortalId::Nj, "https://nj.example.gov/advertised");
        cfg.contracts_url = Some("https://nj.example.gov/contracts".to_string());

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].extra.get("contract_number").map(String::as_str),
            Some("G2290")
        );
        assert_eq!(
            candidates[0].title,
            "Statewide Application Maintenance Services"
        );
        assert_eq!(
            candidates[0].extra.get("vendor").map(String::as_str),
            Some("Garden State Digital Inc")
        );
    }

    #[tokio::test]
    async fn new_jersey_synthesizes_contract_url_when_row_has_no_link() {
        let contracts = r#"
            <table>
              <tr><td>A88123</td><td>Data Processing Services Term Contract</td></tr>
            </table>
        "#;
        let renderer = FixtureRenderer::new()
            .with_page("https://nj.example.gov/advertised", "<p>no links today</p>")
            .with_triggered_page("https://nj.example.gov/contracts", contracts);

        let adapter = adapter_for(PortalId::Nj);
        let mut cfg = config(PortalId::Nj, "https://nj.example.gov/advertised");
        cfg.contracts_url = Some("https://nj.example.gov/contracts".to_string());

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://www.njstart.gov/contract/A88123");
    }

    #[tokio::test]
    async fn new_jersey_contract_pass_failure_keeps_advertised_results() {
        let advertised = r#"<a href="/bids/44">Cybersecurity Assessment Services Bid</a>"#;
        // No triggered page registered: the contracts pass fails.
        let renderer =
            FixtureRenderer::new().with_page("https://nj.example.gov/advertised", advertised);

        let adapter = adapter_for(PortalId::Nj);
        let mut cfg = config(PortalId::Nj, "https://nj.example.gov/advertised");
        cfg.contracts_url = Some("https://nj.example.gov/contracts".to_string());

        let candidates = adapter.extract(&renderer, &cfg).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Cybersecurity Assessment Services Bid");
    }

    #[tokio::test]
    async fn adapter_failure_surfaces_as_error_for_the_orchestrator() {
        let renderer = FixtureRenderer::new();
        let adapter = adapter_for(PortalId::Mn);
        let cfg = config(PortalId::Mn, "https://mn.example.gov/down");
        let err = adapter.extract(&renderer, &cfg).await.unwrap_err();
        assert!(matches!(err, AdapterError::Render(_)));
    }

    #[test]
    fn registry_covers_every_portal() {
        for portal in PortalId::ALL {
            assert_eq!(adapter_for(portal).portal(), portal);
        }
    }
}
