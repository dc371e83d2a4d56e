//! Rank Candidates example
//!
//! Runs the relevance pipeline over a small in-memory candidate set.
//!
//! Run with: cargo run --example rank_candidates
//! Verbose:  RUST_LOG=edgequake_relevance=debug cargo run --example rank_candidates
//!
//! This example shows:
//! - Building a long-lived pipeline with the local cross-encoder
//! - Gathering candidates from several sources with de-duplication
//! - Reading the ranked results and the run report
//! - Circuit diagnostics and cache reuse across runs

use async_trait::async_trait;
use edgequake_relevance::{
    gather_candidates, Candidate, CandidateSource, DependencyError, PipelineConfig,
    RelevancePipeline, ResilientSource, TermOverlapCrossEncoder,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A provider serving a fixed list of records.
struct FixtureSource {
    name: &'static str,
    records: Vec<Candidate>,
}

#[async_trait]
impl CandidateSource for FixtureSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _query: &str) -> Result<Vec<Candidate>, DependencyError> {
        Ok(self.records.clone())
    }
}

fn openalex() -> FixtureSource {
    FixtureSource {
        name: "openalex",
        records: vec![
            Candidate::new("", "Machine learning for protein structure prediction", "openalex")
                .with_doi("10.1000/PSP.2021")
                .with_abstract("We train deep machine learning models on protein structure data.")
                .with_venue("Nature")
                .with_year(2021)
                .with_citations(950),
            Candidate::new("W2", "A survey of reinforcement learning", "openalex")
                .with_abstract("Reinforcement learning and machine learning agents in control tasks.")
                .with_venue("Journal of Machine Learning Research")
                .with_year(2019)
                .with_citations(310),
            Candidate::new("W3", "Monetary policy and inflation", "openalex")
                .with_abstract("An economic analysis of inflation targeting.")
                .with_year(2018)
                .with_citations(120),
        ],
    }
}

fn arxiv() -> FixtureSource {
    FixtureSource {
        name: "arxiv",
        records: vec![
            Candidate::new("", "Machine Learning for Protein Structure Prediction", "arxiv")
                .with_doi("10.1000/psp.2021"),
            Candidate::new("A1", "Scaling laws for machine learning", "arxiv")
                .with_abstract("Empirical scaling laws for machine learning model training.")
                .with_year(2024),
            Candidate::new("A2", "Efficient learning on small devices", "arxiv")
                .with_abstract("Compressing machine learning models for embedded hardware.")
                .with_year(2023)
                .with_citations(12),
        ],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    println!("EdgeQuake Relevance - Rank Candidates Example\n");
    println!("{}", "─".repeat(60));

    let config = PipelineConfig::load()?.with_result_limit(5);
    let pipeline =
        RelevancePipeline::from_config(&config, Arc::new(TermOverlapCrossEncoder::new()));
    let cancel = CancellationToken::new();

    let sources = vec![
        ResilientSource::new(Arc::new(openalex()), pipeline.resilience().clone()),
        ResilientSource::new(Arc::new(arxiv()), pipeline.resilience().clone()),
    ];
    let query = "machine learning";
    let gathered = gather_candidates(&sources, query, &cancel).await?;
    println!(
        "\nGathered {} candidates ({} duplicates, {} failed sources)",
        gathered.candidates.len(),
        gathered.duplicates,
        gathered.failures.len()
    );

    let output = pipeline
        .run(query, gathered.candidates.clone(), &config, &cancel)
        .await?;

    println!("\nResults for \"{}\":\n", query);
    for result in &output.results {
        println!(
            "  {}. [{:.3}] {} ({}) lexical={:.2} neural={} quality={:.1}",
            result.position,
            result.final_rank,
            result.candidate.title,
            result.candidate.source,
            result.lexical_score,
            result
                .neural_score
                .map_or_else(|| "-".to_string(), |s| format!("{:.2}", s)),
            result.quality_score
        );
    }

    println!("\nStages:");
    for stage in &output.report.stages {
        println!(
            "  {:<10} {:>3} -> {:<3} {:>7.2}ms{}{}",
            stage.stage,
            stage.input,
            stage.output,
            stage.duration_ms,
            if stage.bypassed { " bypassed" } else { "" },
            stage
                .degraded
                .as_deref()
                .map(|d| format!(" degraded: {}", d))
                .unwrap_or_default()
        );
    }

    // Second run: every neural score comes from the cache.
    let again = pipeline.run(query, gathered.candidates, &config, &cancel).await?;
    println!("\nCache hit rate on repeat run: {:.0}%", again.report.cache_hit_rate * 100.0);

    println!("\nCircuits:");
    for status in pipeline.all_circuit_status().await {
        println!(
            "  {:<20} {} (failures: {})",
            status.dependency, status.state, status.failure_count
        );
    }

    println!("\nMonitor: {}", pipeline.monitor().summary().await);
    println!("\nReport JSON:\n{}", output.report.to_json()?);
    Ok(())
}
