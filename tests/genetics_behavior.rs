//! Behavior-driven tests for lineage extraction and the genetics partitions.

mod support;

use std::sync::Arc;

use support::{runtime, service, ScriptedAdapter};
use terpstock_core::genetics::{
    Confidence, ConfidencePolicy, ExtractionMethod, GeneticsPartitionMerger, GeneticsRecord,
    LineageExtractor,
};
use terpstock_core::{DispensaryId, InMemoryObjectStore, RunTrigger, UtcDateTime};

const HIGH_GELATO: &str = "Gelato is a cross of Sunset Sherbet and Thin Mint Girl Scout Cookies.";
const MEDIUM_GELATO: &str = "A dessert favourite, Gelato is a hybrid of Blueberry and Lemon.";

fn record(strain: &str, description: &str, source: DispensaryId, policy: &ConfidencePolicy) -> GeneticsRecord {
    let extractor = LineageExtractor::new().expect("patterns compile");
    GeneticsRecord::from_description(&extractor, policy, strain, description, source, UtcDateTime::now())
        .expect("description names two parents")
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn when_descriptions_use_different_phrasings_each_is_recognised_with_its_confidence() {
    // Given the built-in confidence policy
    let extractor = LineageExtractor::new().expect("patterns compile");
    let policy = ConfidencePolicy::default();
    let cases = [
        (HIGH_GELATO, ExtractionMethod::CrossOf, Confidence::High),
        ("Smooth and fruity (Zkittlez x Gelato) with a long finish.", ExtractionMethod::Parenthetical, Confidence::High),
        (MEDIUM_GELATO, ExtractionMethod::HybridOf, Confidence::Medium),
        ("This strain was bred from Chemdawg and Lemon Thai.", ExtractionMethod::BredFrom, Confidence::Medium),
    ];

    for (description, method, confidence) in cases {
        // When lineage is extracted
        let lineage = extractor
            .extract(description)
            .unwrap_or_else(|| panic!("no lineage found in {description:?}"));

        // Then the method and its configured confidence match
        assert_eq!(lineage.method, method, "{description}");
        assert_eq!(policy.confidence_for(lineage.method), confidence, "{description}");
    }
}

#[test]
fn when_description_names_no_parents_nothing_is_extracted() {
    let extractor = LineageExtractor::new().expect("patterns compile");

    assert!(extractor.extract("Dense buds with a gassy nose.").is_none());
    assert!(extractor.extract("").is_none());
}

#[test]
fn when_policy_is_reconfigured_the_same_match_gets_the_new_confidence() {
    // Given a policy that trusts "hybrid of" phrasing
    let policy = ConfidencePolicy {
        hybrid_of: Confidence::High,
        ..ConfidencePolicy::default()
    };

    // When a hybrid description is extracted
    let gelato = record("Gelato", MEDIUM_GELATO, DispensaryId::Flowery, &policy);

    // Then it carries the configured confidence
    assert_eq!(gelato.confidence, Confidence::High);
    assert_eq!((gelato.parent1.as_str(), gelato.parent2.as_str()), ("Blueberry", "Lemon"));
}

// =============================================================================
// Partition merge
// =============================================================================

#[tokio::test]
async fn when_medium_record_arrives_after_high_the_high_parents_are_kept() {
    // Given a High-confidence Gelato record already stored
    let store = Arc::new(InMemoryObjectStore::new());
    let merger = GeneticsPartitionMerger::new(store);
    let policy = ConfidencePolicy::default();
    merger
        .merge(vec![record("Gelato", HIGH_GELATO, DispensaryId::Muv, &policy)])
        .await
        .expect("first merge succeeds");

    // When a Medium-confidence Gelato record is merged
    let outcome = merger
        .merge(vec![record("Gelato", MEDIUM_GELATO, DispensaryId::Cookies, &policy)])
        .await
        .expect("second merge succeeds");

    // Then the High record is untouched and nothing is rewritten
    assert_eq!(outcome.kept_existing, 1);
    assert!(outcome.partitions_written.is_empty());
    let stored = merger.lookup("Gelato").await.expect("lookup").expect("gelato stored");
    assert_eq!(stored.confidence, Confidence::High);
    assert_eq!(stored.parent1, "Sunset Sherbet");
    assert_eq!(stored.parent2, "Thin Mint Girl Scout Cookies");
    assert_eq!(stored.source, DispensaryId::Muv);
}

#[tokio::test]
async fn when_high_record_arrives_after_medium_it_upgrades_the_entry() {
    let store = Arc::new(InMemoryObjectStore::new());
    let merger = GeneticsPartitionMerger::new(store);
    let policy = ConfidencePolicy::default();
    merger
        .merge(vec![record("Gelato", MEDIUM_GELATO, DispensaryId::Cookies, &policy)])
        .await
        .expect("first merge succeeds");

    let outcome = merger
        .merge(vec![record("Gelato", HIGH_GELATO, DispensaryId::Muv, &policy)])
        .await
        .expect("second merge succeeds");

    assert_eq!(outcome.upgraded, 1);
    assert_eq!(outcome.partitions_written, vec![String::from("g")]);
    let stored = merger.lookup("GELATO").await.expect("lookup").expect("gelato stored");
    assert_eq!(stored.confidence, Confidence::High);
}

#[tokio::test]
async fn when_strains_span_letters_only_their_partitions_are_written_and_indexed() {
    // Given strains starting with different characters
    let store = Arc::new(InMemoryObjectStore::new());
    let merger = GeneticsPartitionMerger::new(store.clone());
    let policy = ConfidencePolicy::default();
    let candidates = vec![
        record("Gelato", HIGH_GELATO, DispensaryId::Muv, &policy),
        record("Runtz", "Runtz is a cross of Zkittlez and Gelato.", DispensaryId::Muv, &policy),
        record("9 Pound Hammer", "A hybrid of Gooberry and Hells OG.", DispensaryId::Trulieve, &policy),
    ];

    // When they are merged in one batch
    let outcome = merger.merge(candidates).await.expect("merge succeeds");

    // Then one partition per first character is written, plus the index
    assert_eq!(outcome.inserted, 3);
    assert_eq!(
        outcome.partitions_written,
        vec![String::from("g"), String::from("other"), String::from("r")]
    );
    let mut paths = store.paths();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            String::from("genetics/index.json"),
            String::from("genetics/partitions/g.json"),
            String::from("genetics/partitions/other.json"),
            String::from("genetics/partitions/r.json"),
        ]
    );

    let index = merger.load_index().await.expect("index readable");
    assert_eq!(index.total_strains, 3);
    assert_eq!(index.strains["9-pound-hammer"].partition, "other");
    assert_eq!(index.strains["runtz"].name, "Runtz");
}

#[tokio::test]
async fn when_strain_is_unknown_lookup_returns_none() {
    let merger = GeneticsPartitionMerger::new(Arc::new(InMemoryObjectStore::new()));

    assert!(merger.lookup("Purple Punch").await.expect("lookup").is_none());
    assert!(merger.lookup("  ").await.expect("lookup").is_none());
}

// =============================================================================
// Runs feeding genetics
// =============================================================================

#[tokio::test]
async fn when_runs_carry_descriptions_genetics_follow_confidence_across_runs() {
    // Given muv describes Gelato precisely and cookies vaguely
    let store = Arc::new(InMemoryObjectStore::new());
    let muv = Arc::new(
        ScriptedAdapter::new(DispensaryId::Muv, &["tampa"]).with_described_item("M-1", "Gelato", HIGH_GELATO),
    );
    let cookies = Arc::new(
        ScriptedAdapter::new(DispensaryId::Cookies, &["miami"])
            .with_described_item("C-1", "Gelato", MEDIUM_GELATO),
    );
    let service = service(vec![runtime(muv), runtime(cookies)], store.clone())
        .with_genetics(store, ConfidencePolicy::default())
        .expect("genetics stage builds");

    // When muv runs first and cookies runs afterwards
    let first = service
        .run_once(RunTrigger::OnDemand, Some(&[DispensaryId::Muv]))
        .await
        .expect("muv run succeeds");
    let second = service
        .run_once(RunTrigger::OnDemand, Some(&[DispensaryId::Cookies]))
        .await
        .expect("cookies run succeeds");

    // Then the first run inserted Gelato and the second kept it
    assert_eq!(first.genetics.expect("genetics ran").inserted, 1);
    assert_eq!(second.genetics.expect("genetics ran").kept_existing, 1);
    let merger = service.genetics().expect("genetics enabled");
    let stored = merger.lookup("gelato").await.expect("lookup").expect("gelato stored");
    assert_eq!(stored.confidence, Confidence::High);
    assert_eq!(stored.source, DispensaryId::Muv);
}
