//! Run orchestration: serial portal sequencing, aggregation, dedup, and
//! the persistence sink.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bidwatch_adapters::{adapter_for, PortalConfig};
use bidwatch_core::{
    dedupe_by_url, Normalizer, Opportunity, PortalId, RawCandidate, RelevancePolicy, ScrapeReport,
};
use bidwatch_render::{HttpRenderer, HttpRendererConfig, PageRenderer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "bidwatch-pipeline";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_path: PathBuf,
    pub registry_path: PathBuf,
    pub user_agent: String,
    pub navigation_timeout: Duration,
    /// Fixed delay between portals regardless of outcome.
    pub politeness_delay: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            output_path: std::env::var("BIDWATCH_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/state-bids.json")),
            registry_path: std::env::var("BIDWATCH_PORTALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("portals.yaml")),
            user_agent: std::env::var("BIDWATCH_USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
            }),
            navigation_timeout: Duration::from_secs(
                std::env::var("BIDWATCH_NAV_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
            politeness_delay: Duration::from_millis(
                std::env::var("BIDWATCH_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2000),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Portal registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PortalRegistry {
    pub portals: Vec<PortalConfig>,
}

impl PortalRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Portals for this run, in registry order. An explicit selection wins
    /// over the enabled/quick flags; `quick` narrows to the fast subset.
    pub fn select(&self, quick: bool, explicit: &[PortalId]) -> Vec<PortalConfig> {
        self.portals
            .iter()
            .filter(|p| {
                if !explicit.is_empty() {
                    explicit.contains(&p.portal)
                } else {
                    p.enabled && (!quick || p.quick)
                }
            })
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalRunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalOutcome {
    pub portal: PortalId,
    pub state: PortalRunState,
    /// Raw candidates the adapter produced.
    pub extracted: usize,
    /// Candidates that survived classification + normalization.
    pub accepted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<PortalOutcome>,
    /// Grand total after dedup.
    pub total: usize,
    pub output_path: String,
}

// ---------------------------------------------------------------------------
// Persistence sink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn write(&self, report: &ScrapeReport) -> Result<()>;
}

/// Writes the report as pretty JSON via temp-file + atomic rename, fully
/// replacing the previous snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn write(&self, report: &ScrapeReport) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let bytes = serde_json::to_vec_pretty(report).context("serializing run report")?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "renaming {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    policy: RelevancePolicy,
    normalizer: Normalizer,
    renderer: Box<dyn PageRenderer>,
    sink: Box<dyn ReportSink>,
    politeness_delay: Duration,
    output_path: PathBuf,
}

impl Pipeline {
    /// Production wiring: HTTP renderer + JSON file sink. Failing here is
    /// the one unrecoverable startup fault.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let renderer = HttpRenderer::new(HttpRendererConfig {
            timeout: config.navigation_timeout,
            user_agent: config.user_agent.clone(),
        })
        .context("creating renderer session")?;
        Ok(Self {
            policy: RelevancePolicy::focus_consulting(),
            normalizer: Normalizer::default(),
            renderer: Box::new(renderer),
            sink: Box::new(JsonFileSink::new(config.output_path.clone())),
            politeness_delay: config.politeness_delay,
            output_path: config.output_path.clone(),
        })
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_policy(mut self, policy: RelevancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// One full run over `portals`, serially, with the politeness delay
    /// between portals. Per-portal failures are recorded and isolated; only
    /// a sink failure aborts.
    pub async fn run(&self, portals: &[PortalConfig]) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(portals.len());
        let mut aggregated: Vec<Opportunity> = Vec::new();

        for (index, portal_config) in portals.iter().enumerate() {
            let portal = portal_config.portal;
            let mut outcome = PortalOutcome {
                portal,
                state: PortalRunState::Running,
                extracted: 0,
                accepted: 0,
                error: None,
            };
            info!(portal = %portal, url = %portal_config.url, "scraping portal");

            let adapter = adapter_for(portal);
            match adapter.extract(self.renderer.as_ref(), portal_config).await {
                Ok(candidates) => {
                    outcome.extracted = candidates.len();
                    let admitted = self.admit(portal_config, candidates, started_at);
                    outcome.accepted = admitted.len();
                    outcome.state = PortalRunState::Succeeded;
                    info!(
                        portal = %portal,
                        extracted = outcome.extracted,
                        accepted = outcome.accepted,
                        "portal complete"
                    );
                    aggregated.extend(admitted);
                }
                Err(err) => {
                    outcome.state = PortalRunState::Failed;
                    outcome.error = Some(err.to_string());
                    warn!(portal = %portal, error = %err, "portal failed; continuing");
                }
            }
            outcomes.push(outcome);

            if index + 1 < portals.len() {
                // Be nice to third-party servers.
                tokio::time::sleep(self.politeness_delay).await;
            }
        }

        let deduped = dedupe_by_url(aggregated);
        let report = ScrapeReport::new(Utc::now(), deduped, self.policy.codes().to_vec());
        self.sink
            .write(&report)
            .await
            .context("persisting run report")?;

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            outcomes,
            total: report.total,
            output_path: self.output_path.display().to_string(),
        })
    }

    /// Classify then normalize one portal's candidates. Classification
    /// misses and normalization rejects are normal flow.
    fn admit(
        &self,
        portal_config: &PortalConfig,
        candidates: Vec<RawCandidate>,
        discovered_at: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        let mut admitted = Vec::new();
        for candidate in candidates {
            let text = format!("{} {}", candidate.title, candidate.context);
            let Some(matched) = self.policy.evaluate(&text, candidate.explicit_code()) else {
                continue;
            };
            let origin_url = candidate
                .extra
                .get("origin_url")
                .map(String::as_str)
                .unwrap_or(&portal_config.url);
            match self.normalizer.normalize(
                &candidate,
                portal_config.portal,
                origin_url,
                matched.tags,
                discovered_at,
            ) {
                Ok(opportunity) => admitted.push(opportunity),
                Err(reason) => {
                    debug!(portal = %portal_config.portal, ?reason, title = %candidate.title, "candidate rejected");
                }
            }
        }
        admitted
    }
}
