// LPxGP Resolver - CLI
// import → run → review → retrain, against one SQLite database

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lpxgp_resolver::db::{
    field_provenance, get_golden, golden_history, import_csv, list_artifacts, list_quarantine,
    list_runs, load_decisions, pending_review_items, record_decision, verify_count,
};
use lpxgp_resolver::pipeline::{retrain, Pipeline, RunScope};
use lpxgp_resolver::review::reviewer_disagreement;
use lpxgp_resolver::{DataSource, PipelineConfig, RuleEngine, Verdict};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lpxgp-resolver", version, about = "Entity resolution for LP/GP organization records")]
struct Cli {
    /// SQLite database
    #[arg(long, global = true, default_value = "resolver.db")]
    db: PathBuf,

    /// Pipeline config (JSON); defaults apply when missing
    #[arg(long, global = true, default_value = "resolver.json")]
    config: PathBuf,

    /// Heuristic rules (JSON); built-in rules when omitted
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import organization records from a CSV file
    Import {
        csv: PathBuf,
        /// Data source for rows that don't name one
        #[arg(long, default_value = "bulk_import")]
        source: String,
    },
    /// Run the resolution pipeline
    Run {
        /// Only pairs touching records ingested after this time (RFC 3339)
        #[arg(long)]
        since: Option<String>,
    },
    /// Work the human review queue
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Retrain the classifier on bootstrap + human labels
    Retrain {
        /// Ignore the retrain interval
        #[arg(long)]
        force: bool,
    },
    /// Inspect golden records
    Golden {
        #[command(subcommand)]
        action: GoldenAction,
    },
    /// Rows rejected at import
    Quarantine,
    /// Recent runs, reviewer disagreement and model versions
    Report,
}

#[derive(Subcommand)]
enum ReviewAction {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Decide {
        item_id: String,
        /// match | non-match
        verdict: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum GoldenAction {
    Show { golden_id: String },
    History { golden_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let conn = lpxgp_resolver::open(&cli.db)?;

    match cli.command {
        Command::Import { csv, source } => run_import(&conn, &csv, &source),
        Command::Run { since } => run_pipeline(&conn, &cli.config, cli.rules.as_deref(), since).await,
        Command::Review { action } => match action {
            ReviewAction::List { limit } => review_list(&conn, limit),
            ReviewAction::Decide {
                item_id,
                verdict,
                reviewer,
                notes,
            } => review_decide(&conn, &item_id, &verdict, &reviewer, notes.as_deref()),
        },
        Command::Retrain { force } => run_retrain(&conn, &cli.config, force),
        Command::Golden { action } => match action {
            GoldenAction::Show { golden_id } => golden_show(&conn, &golden_id),
            GoldenAction::History { golden_id } => golden_show_history(&conn, &golden_id),
        },
        Command::Quarantine => show_quarantine(&conn),
        Command::Report => show_report(&conn),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::from_file(path)?;
    config.validate().context("Invalid pipeline config")?;
    Ok(config)
}

fn load_rules(path: Option<&Path>) -> Result<RuleEngine> {
    match path {
        Some(path) => RuleEngine::from_file(path),
        None => Ok(RuleEngine::with_defaults()),
    }
}

fn run_import(conn: &Connection, csv: &Path, source: &str) -> Result<()> {
    let default_source =
        DataSource::parse(source).with_context(|| format!("Unknown data source '{}'", source))?;

    println!("📂 Importing {}...", csv.display());
    let summary = import_csv(conn, csv, default_source)?;

    println!("✓ {} rows read", summary.rows);
    println!("✓ {} records inserted", summary.inserted);
    println!("✓ {} duplicates skipped", summary.duplicates);
    if summary.quarantined > 0 {
        println!("⚠️  {} rows quarantined (see `quarantine`)", summary.quarantined);
    }
    println!("📊 {}", summary.quality.summary());
    println!("🗄️  Database holds {} current records", verify_count(conn)?);
    Ok(())
}

async fn run_pipeline(conn: &Connection, config: &Path, rules: Option<&Path>, since: Option<String>) -> Result<()> {
    let scope = match since {
        Some(raw) => {
            let since = DateTime::parse_from_rfc3339(&raw)
                .with_context(|| format!("Invalid --since timestamp '{}'", raw))?
                .with_timezone(&Utc);
            RunScope::Since(since)
        }
        None => RunScope::Full,
    };

    let pipeline = Pipeline::from_config(load_config(config)?, load_rules(rules)?)?;
    println!("🚀 Running pipeline ({})...", scope.label());
    let report = pipeline.run(conn, scope).await?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Run {} complete in {}ms", report.run_id, report.duration_ms);
    println!("   Records:          {}", report.records);
    println!(
        "   Candidate pairs:  {} ({} rejected by rules, {} already reviewed)",
        report.candidate_pairs, report.rejected_by_rules, report.already_decided
    );
    println!("   Auto-matched:     {}", report.auto_matched);
    println!("   Auto-non-matched: {}", report.auto_non_matched);
    println!(
        "   Uncertain:        {} ({:.1}% to tiebreak, {} decided, {} escalated)",
        report.uncertain,
        report.tiebreak_fraction * 100.0,
        report.tiebreak_decided,
        report.tiebreak_escalated
    );
    println!("   Sent to review:   {}", report.review_enqueued);
    println!("   Clusters:         {} ({} flagged)", report.clusters, report.flagged_clusters);
    println!(
        "   Golden records:   {} created, {} updated, {} unchanged, {} retired",
        report.golden.created, report.golden.updated, report.golden.unchanged, report.golden.retired
    );
    if let Some(mode) = &report.blocking_mode {
        println!("   Blocking:         {:?}", mode);
    }
    if let Some(version) = &report.model_version {
        let note = if report.bootstrapped { " (bootstrapped)" } else { "" };
        println!("   Model:            {}{}", version, note);
    }
    if report.processing_errors > 0 {
        println!("⚠️  {} pairs failed processing and were queued for review", report.processing_errors);
    }
    Ok(())
}

fn review_list(conn: &Connection, limit: usize) -> Result<()> {
    let items = pending_review_items(conn, limit)?;
    if items.is_empty() {
        println!("🎉 Review queue is empty");
        return Ok(());
    }

    println!("📋 {} pending review items (highest priority first)\n", items.len());
    for item in &items {
        let probability = item
            .probability
            .map(|p| format!("{:.3}", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {} ↔ {}  reason={} p={} tier={:?} cluster={}",
            item.id,
            item.left_id,
            item.right_id,
            item.reason.as_str(),
            probability,
            item.tier,
            item.cluster_size
        );
        if let Some(detail) = &item.detail {
            println!("    {}", detail);
        }
    }
    Ok(())
}

fn review_decide(conn: &Connection, item_id: &str, verdict: &str, reviewer: &str, notes: Option<&str>) -> Result<()> {
    let verdict = match verdict.trim().to_lowercase().replace('-', "_").as_str() {
        "match" => Verdict::Match,
        "non_match" | "nonmatch" => Verdict::NonMatch,
        other => bail!("Verdict must be 'match' or 'non-match', got '{}'", other),
    };

    let decision = record_decision(conn, item_id, verdict, reviewer, notes)?;
    println!(
        "✅ {} ↔ {} recorded as {} by {}",
        decision.left_id,
        decision.right_id,
        decision.verdict.as_str(),
        decision.reviewer
    );
    println!("   The next run will apply it; it is also a training label now.");
    Ok(())
}

fn run_retrain(conn: &Connection, config: &Path, force: bool) -> Result<()> {
    let config = load_config(config)?;
    match retrain(conn, &config, force)? {
        None => println!("⏳ Retrain not due (interval {} days); use --force", config.retrain.interval_days),
        Some(report) => {
            println!(
                "🧠 Candidate {}: F1 {:.4}, precision {:.4}, recall {:.4} over {} examples",
                report.candidate.version,
                report.candidate_metrics.f1,
                report.candidate_metrics.precision,
                report.candidate_metrics.recall,
                report.candidate_metrics.examples
            );
            if let Some(delta) = report.f1_delta() {
                println!("   F1 vs deployed: {:+.4}", delta);
            }
            if report.deployed() {
                println!("✅ Deployed");
            } else {
                println!("❌ Rejected, keeping {:?}", report.deployed_version);
            }
        }
    }
    Ok(())
}

fn golden_show(conn: &Connection, golden_id: &str) -> Result<()> {
    let golden = get_golden(conn, golden_id)?.with_context(|| format!("Golden record {} not found", golden_id))?;

    println!("👑 {} v{} ({} members)", golden.golden_id, golden.version, golden.members.len());
    for (field, value) in &golden.fields {
        println!(
            "   {:<12} {}  ← {} [{}] conf={:.2}",
            field,
            value.value,
            value.record_id,
            value.source.as_str(),
            value.confidence
        );
    }
    for conflict in &golden.conflicts {
        println!(
            "   ⚠️  {}: kept {} from {}, over {} from {}",
            conflict.field,
            conflict.winning_value,
            conflict.winning_record,
            conflict.losing_value,
            conflict.losing_record
        );
    }
    Ok(())
}

fn golden_show_history(conn: &Connection, golden_id: &str) -> Result<()> {
    let history = golden_history(conn, golden_id)?;
    if history.is_empty() {
        bail!("Golden record {} not found", golden_id);
    }

    println!("📜 {} versions of {}", history.len(), golden_id);
    for version in &history {
        let until = version
            .valid_until
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "current".to_string());
        println!(
            "   v{}  {} → {}  members={}",
            version.version,
            version.valid_from.to_rfc3339(),
            until,
            version.members.join(",")
        );
    }

    let provenance = field_provenance(conn, golden_id)?;
    println!("   {} provenance rows", provenance.len());
    Ok(())
}

fn show_quarantine(conn: &Connection) -> Result<()> {
    let rows = list_quarantine(conn)?;
    if rows.is_empty() {
        println!("✓ Quarantine is empty");
        return Ok(());
    }
    println!("🚫 {} quarantined rows", rows.len());
    for row in &rows {
        println!("   {}:{}  {}", row.source_file, row.line, row.reasons.join("; "));
    }
    Ok(())
}

fn show_report(conn: &Connection) -> Result<()> {
    println!("📊 Recent runs");
    for run in list_runs(conn, 10)? {
        let summary = match (&run.report, &run.error) {
            (Some(report), _) => format!(
                "pairs={} matched={} review={} tiebreak={:.1}%",
                report["candidate_pairs"],
                report["auto_matched"],
                report["review_enqueued"],
                report["tiebreak_fraction"].as_f64().unwrap_or(0.0) * 100.0
            ),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!("   {} {} [{}] {}", run.started_at.to_rfc3339(), run.scope, run.status, summary);
    }

    let disagreement = reviewer_disagreement(&load_decisions(conn)?);
    println!("\n👥 Reviewer disagreement");
    println!(
        "   {} pairs reviewed, {} re-reviewed, {} in conflict ({:.1}%)",
        disagreement.pairs_reviewed,
        disagreement.pairs_rereviewed,
        disagreement.pairs_in_conflict,
        disagreement.rate * 100.0
    );

    println!("\n🧠 Models");
    for artifact in list_artifacts(conn)? {
        let f1 = artifact
            .candidate_metrics
            .as_ref()
            .map(|m| format!("{:.4}", m.f1))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} {:?} trained {} on {} examples, F1 {}",
            artifact.version,
            artifact.status,
            artifact.trained_at.to_rfc3339(),
            artifact.training_examples,
            f1
        );
    }
    Ok(())
}
