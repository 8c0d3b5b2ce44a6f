//! End-to-end run against fixture pages: classify, normalize, dedupe,
//! persist.

use std::path::PathBuf;
use std::time::Duration;

use bidwatch_adapters::PortalConfig;
use bidwatch_core::{content_id, PortalId, RecordType, ScrapeReport};
use bidwatch_pipeline::{JsonFileSink, Pipeline, PipelineConfig};
use bidwatch_render::FixtureRenderer;

const VA_LISTING: &str = r#"
    <table>
      <tr>
        <td>NAICS 541511</td>
        <td><a href="https://x.gov/rfp/123">Request for Proposal: Custom Software Development Services</a></td>
      </tr>
      <tr>
        <td></td>
        <td><a href="https://x.gov/rfp/123">Request for Proposal: Custom Software Development Services</a></td>
      </tr>
    </table>
"#;

#[tokio::test]
async fn rfp_example_yields_one_classified_solicitation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("state-bids.json");

    let renderer = FixtureRenderer::new().with_page(
        "https://eva.virginia.gov/pages/eva-solicitations.htm",
        VA_LISTING,
    );
    let config = PipelineConfig {
        output_path: output.clone(),
        registry_path: PathBuf::from("unused"),
        user_agent: "test".to_string(),
        navigation_timeout: Duration::from_secs(5),
        politeness_delay: Duration::ZERO,
    };
    let pipeline = Pipeline::new(&config)
        .expect("pipeline")
        .with_renderer(Box::new(renderer))
        .with_sink(Box::new(JsonFileSink::new(output.clone())));

    let portals = vec![PortalConfig {
        portal: PortalId::Va,
        url: "https://eva.virginia.gov/pages/eva-solicitations.htm".to_string(),
        contracts_url: None,
        enabled: true,
        quick: true,
        notes: None,
    }];

    let first = pipeline.run(&portals).await.expect("run");
    assert_eq!(first.total, 1);

    let text = tokio::fs::read_to_string(&output).await.expect("read output");
    let report: ScrapeReport = serde_json::from_str(&text).expect("parse output");
    assert_eq!(report.total, 1);
    assert_eq!(report.portals, vec!["VA"]);

    let opp = &report.opportunities[0];
    assert_eq!(
        opp.title,
        "Request for Proposal: Custom Software Development Services"
    );
    assert_eq!(opp.url, "https://x.gov/rfp/123");
    assert_eq!(opp.record_type, RecordType::Solicitation);
    assert_eq!(opp.classification_tags, vec!["541511"]);
    assert_eq!(opp.id, content_id("https://x.gov/rfp/123"));
    assert_eq!(
        opp.origin_url,
        "https://eva.virginia.gov/pages/eva-solicitations.htm"
    );

    // Repeating the run is deterministic for ids and the dedup key.
    let second = pipeline.run(&portals).await.expect("second run");
    assert_eq!(second.total, 1);
    let text = tokio::fs::read_to_string(&output).await.expect("reread");
    let again: ScrapeReport = serde_json::from_str(&text).expect("reparse");
    assert_eq!(again.opportunities[0].id, opp.id);
}
