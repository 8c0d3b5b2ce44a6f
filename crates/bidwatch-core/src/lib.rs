//! Core domain model, relevance classification, normalization, and dedup
//! for BidWatch.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "bidwatch-core";

/// Length of the content-derived opportunity id (hex chars).
pub const ID_LEN: usize = 20;

/// The state procurement portals BidWatch knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortalId {
    Md,
    Va,
    Pa,
    Nj,
    Ma,
    Dc,
    Mn,
    Wv,
    De,
}

impl PortalId {
    pub const ALL: [PortalId; 9] = [
        PortalId::Md,
        PortalId::Va,
        PortalId::Pa,
        PortalId::Nj,
        PortalId::Ma,
        PortalId::Dc,
        PortalId::Mn,
        PortalId::Wv,
        PortalId::De,
    ];

    pub fn abbrev(&self) -> &'static str {
        match self {
            PortalId::Md => "MD",
            PortalId::Va => "VA",
            PortalId::Pa => "PA",
            PortalId::Nj => "NJ",
            PortalId::Ma => "MA",
            PortalId::Dc => "DC",
            PortalId::Mn => "MN",
            PortalId::Wv => "WV",
            PortalId::De => "DE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PortalId::Md => "Maryland",
            PortalId::Va => "Virginia",
            PortalId::Pa => "Pennsylvania",
            PortalId::Nj => "New Jersey",
            PortalId::Ma => "Massachusetts",
            PortalId::Dc => "Washington DC",
            PortalId::Mn => "Minnesota",
            PortalId::Wv => "West Virginia",
            PortalId::De => "Delaware",
        }
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

impl FromStr for PortalId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        PortalId::ALL
            .into_iter()
            .find(|p| p.abbrev() == wanted)
            .ok_or_else(|| format!("unknown portal abbreviation: {s}"))
    }
}

/// Some portals expose both advertised solicitations and active contracts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    #[default]
    Solicitation,
    Contract,
}

/// Ephemeral per-adapter extraction output. Never persisted; consumed by
/// classification + normalization immediately after one portal visit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCandidate {
    pub title: String,
    pub url: String,
    pub context: String,
    pub record_type: RecordType,
    pub extra: BTreeMap<String, String>,
}

impl RawCandidate {
    /// Portal-native identifier, when the adapter captured one (e.g. the
    /// NJSTART contract number).
    pub fn native_id(&self) -> Option<&str> {
        self.extra
            .get("contract_number")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn explicit_code(&self) -> Option<&str> {
        self.extra.get("naics_code").map(String::as_str)
    }
}

/// Canonical, persisted procurement posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub portal: PortalId,
    pub portal_name: String,
    pub url: String,
    pub origin_url: String,
    pub classification_tags: Vec<String>,
    pub record_type: RecordType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// Deterministic fixed-length id from the record's canonical key (portal
/// contract number when available, else the URL). Identical keys collide by
/// construction; distinct keys get distinct sha-256 prefixes.
pub fn content_id(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..ID_LEN].to_string()
}

/// Truncate to at most `max` chars without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ---------------------------------------------------------------------------
// Relevance classification
// ---------------------------------------------------------------------------

/// Which tier of the fallback chain accepted a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ExplicitCode,
    CodeInText,
    CodeDescription,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceMatch {
    pub tier: MatchTier,
    /// Matched classification codes. Empty when only the keyword fallback
    /// fired.
    pub tags: Vec<String>,
}

/// Target codes, code description phrases, and fallback keywords. An
/// explicit value object so tests can run several policies side by side.
#[derive(Debug, Clone)]
pub struct RelevancePolicy {
    codes: Vec<String>,
    descriptions: Vec<(String, String)>,
    keywords: Vec<String>,
}

impl RelevancePolicy {
    pub fn new(
        codes: Vec<String>,
        descriptions: Vec<(String, String)>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            codes,
            descriptions,
            keywords,
        }
    }

    /// The production policy: IT/consulting NAICS codes, their description
    /// phrases, and the keyword fallback list.
    pub fn focus_consulting() -> Self {
        let codes = [
            "541511", // Custom Computer Programming Services
            "541512", // Computer Systems Design Services
            "518210", // Data Processing, Hosting, and Related Services
            "511210", // Software Publishers
            "541519", // Other Computer Related Services
        ];
        let descriptions = [
            ("541511", "custom computer programming"),
            ("541512", "computer systems design"),
            ("518210", "data processing hosting"),
            ("511210", "software publishers"),
            ("541519", "computer related services"),
        ];
        let keywords = [
            "software",
            "IT ",
            "technology",
            "computer",
            "data",
            "systems",
            "programming",
            "application",
            "web",
            "cloud",
            "cyber",
            "network",
            "consulting",
            "digital",
            "database",
            "infrastructure",
            "development",
            "custom programming",
            "systems design",
            "data processing",
            "hosting",
        ];
        Self::new(
            codes.iter().map(|s| s.to_string()).collect(),
            descriptions
                .iter()
                .map(|(c, d)| (c.to_string(), d.to_string()))
                .collect(),
            keywords.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// Four-tier fallback: explicit code membership, code verbatim in raw
    /// text, description phrase in lowercased text, then keyword substring.
    /// Portals expose classification metadata inconsistently, so each tier
    /// covers a weaker signal than the one before it.
    pub fn evaluate(&self, text: &str, explicit_code: Option<&str>) -> Option<RelevanceMatch> {
        if let Some(code) = explicit_code {
            let code = code.trim();
            if self.codes.iter().any(|c| c == code) {
                return Some(RelevanceMatch {
                    tier: MatchTier::ExplicitCode,
                    tags: vec![code.to_string()],
                });
            }
        }

        // Codes may appear unformatted inside free text.
        let in_text: Vec<String> = self
            .codes
            .iter()
            .filter(|c| text.contains(c.as_str()))
            .cloned()
            .collect();
        if !in_text.is_empty() {
            return Some(RelevanceMatch {
                tier: MatchTier::CodeInText,
                tags: in_text,
            });
        }

        let lower = text.to_lowercase();
        let by_description: Vec<String> = self
            .descriptions
            .iter()
            .filter(|(_, phrase)| lower.contains(phrase.as_str()))
            .map(|(code, _)| code.clone())
            .collect();
        if !by_description.is_empty() {
            return Some(RelevanceMatch {
                tier: MatchTier::CodeDescription,
                tags: by_description,
            });
        }

        if self
            .keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
        {
            return Some(RelevanceMatch {
                tier: MatchTier::Keyword,
                tags: Vec::new(),
            });
        }

        None
    }

    pub fn classify(&self, text: &str, explicit_code: Option<&str>) -> bool {
        self.evaluate(text, explicit_code).is_some()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Admissible title length in chars. Defaults reject noise links (icons,
/// nav items) below the minimum and mis-scoped container blocks above the
/// maximum.
#[derive(Debug, Clone, Copy)]
pub struct TitleBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for TitleBounds {
    fn default() -> Self {
        Self { min: 10, max: 500 }
    }
}

/// Why a candidate was not admitted. Rejection is normal flow, not an
/// error; callers count or ignore these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingUrl,
    RelativeUrl,
    TitleTooShort,
    TitleTooLong,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    bounds: TitleBounds,
    context_cap: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            bounds: TitleBounds::default(),
            context_cap: 500,
        }
    }
}

impl Normalizer {
    pub fn new(bounds: TitleBounds, context_cap: usize) -> Self {
        Self {
            bounds,
            context_cap,
        }
    }

    /// Convert an accepted candidate into a canonical record. `tags` come
    /// from the classifier; `discovered_at` is the pipeline run time, never
    /// a portal-declared timestamp.
    pub fn normalize(
        &self,
        candidate: &RawCandidate,
        portal: PortalId,
        origin_url: &str,
        tags: Vec<String>,
        discovered_at: DateTime<Utc>,
    ) -> Result<Opportunity, RejectReason> {
        let url = candidate.url.trim();
        if url.is_empty() {
            return Err(RejectReason::MissingUrl);
        }
        if !url.starts_with("http") {
            return Err(RejectReason::RelativeUrl);
        }

        let title = candidate.title.trim();
        let title_len = title.chars().count();
        if title_len < self.bounds.min {
            return Err(RejectReason::TitleTooShort);
        }
        if title_len > self.bounds.max {
            return Err(RejectReason::TitleTooLong);
        }

        let id_key = candidate.native_id().unwrap_or(url);
        let contract_number = candidate.native_id().map(str::to_string);
        let vendor = candidate
            .extra
            .get("vendor")
            .map(|v| truncate_chars(v.trim(), self.context_cap))
            .filter(|v| !v.is_empty());

        Ok(Opportunity {
            id: content_id(id_key),
            title: title.to_string(),
            portal,
            portal_name: portal.display_name().to_string(),
            url: url.to_string(),
            origin_url: origin_url.to_string(),
            classification_tags: tags,
            record_type: candidate.record_type,
            contract_number,
            vendor,
            discovered_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Collapse records sharing a URL, keeping the first encountered. Iteration
/// order is the adapter-execution order the orchestrator established, so the
/// result is deterministic for a given portal list.
pub fn dedupe_by_url(list: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut seen: HashSet<String> = HashSet::with_capacity(list.len());
    list.into_iter()
        .filter(|opp| seen.insert(opp.url.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Run envelope
// ---------------------------------------------------------------------------

/// Durable record of one run, fully replacing the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    /// Distinct portal abbreviations that contributed, first-seen order.
    pub portals: Vec<String>,
    pub naics_codes: Vec<String>,
    pub opportunities: Vec<Opportunity>,
}

impl ScrapeReport {
    pub fn new(
        generated_at: DateTime<Utc>,
        opportunities: Vec<Opportunity>,
        naics_codes: Vec<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let portals = opportunities
            .iter()
            .map(|o| o.portal.abbrev().to_string())
            .filter(|abbrev| seen.insert(abbrev.clone()))
            .collect();
        Self {
            generated_at,
            total: opportunities.len(),
            portals,
            naics_codes,
            opportunities,
        }
    }
}
