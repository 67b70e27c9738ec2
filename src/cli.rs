//! Command-line surface of the pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{CodeAnalyzer, OpportunityKind};
use crate::config::Config;
use crate::engine::SelfModificationEngine;
use crate::generation::HttpCodeGenerator;
use crate::insights::{EvaluationInsights, KnowledgeSuggestion};
use crate::ledger::FeedbackVerdict;
use crate::observability::telemetry::{init_tracing, init_tracing_with_filter, LogFormat};
use crate::validation::CodeValidator;

#[derive(Parser)]
#[command(name = "evolvr")]
#[command(about = "Analyze a source tree, propose improvements, and apply the safe ones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Source root to work on (overrides the config file)
    #[arg(short = 'C', long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    json_logs: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Output format for report commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the source tree and list improvement opportunities
    #[command(alias = "a")]
    Analyze {
        /// Recent evaluation score (0.0-1.0)
        #[arg(long, default_value = "0.7")]
        score: f64,

        /// Confidence in the recent score (0.0-1.0)
        #[arg(long, default_value = "0.5")]
        confidence: f64,

        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Validate a modified file against its original
    Validate {
        original: PathBuf,
        modified: PathBuf,

        /// Kind of modification, e.g. performance_improvement
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Run one self-modification cycle
    #[command(alias = "c")]
    Cycle {
        /// JSON file with evaluation insights
        #[arg(long, value_name = "FILE")]
        insights: Option<PathBuf>,

        /// JSON file with a list of knowledge suggestions
        #[arg(long, value_name = "FILE")]
        suggestions: Option<PathBuf>,

        /// Recent evaluation score, overriding the insights file
        #[arg(long)]
        score: Option<f64>,

        /// Confidence, overriding the insights file
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Restore the pre-apply content of an improvement
    Rollback {
        /// Improvement ID
        id: String,
    },

    /// Show ledger statistics, learning insights and trends
    Stats {
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Record review feedback for an improvement or its branch
    Feedback {
        /// Improvement ID or branch name
        key: String,

        /// merged or rejected
        verdict: String,

        /// Rating from 1 to 5
        #[arg(short, long)]
        rating: Option<u8>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Export the ledger with its derived views as JSON
    Export {
        path: PathBuf,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs || cli.verbose {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
            if cli.verbose { "evolvr=debug" } else { "evolvr=info" }.to_string()
        });
        let format = if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };
        init_tracing_with_filter(&filter, format);
    } else {
        init_tracing();
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.pipeline.source_root = root;
    }

    match cli.command {
        Commands::Analyze {
            score,
            confidence,
            output_format,
        } => {
            let analyzer = CodeAnalyzer::new(&config);
            let insights = EvaluationInsights::new(score, confidence);
            let analysis = analyzer.analyze(&config.pipeline.source_root, &insights, &[])?;
            match output_format {
                OutputFormat::Json => print_json(&analysis)?,
                OutputFormat::Text => {
                    let m = &analysis.snapshot.metrics;
                    println!(
                        "{} modules, {} functions, average complexity {:.1}",
                        analysis.snapshot.modules.len(),
                        m.total_functions,
                        m.average_complexity
                    );
                    println!("Improvement potential: {:.2}", analysis.improvement_potential);
                    for opp in &analysis.opportunities {
                        let file = opp
                            .target_file()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!("  [{:.2}] {} ({}): {}", opp.priority, opp.kind, file, opp.description);
                    }
                    for rec in &analysis.recommendations {
                        println!("  * {}", rec);
                    }
                }
            }
        }

        Commands::Validate {
            original,
            modified,
            kind,
        } => {
            let kind = kind
                .map(|k| k.parse::<OpportunityKind>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let orig = read(&original)?;
            let new = read(&modified)?;
            let result = CodeValidator::new(&config.validation)?.validate(&orig, &new, kind);
            print_json(&result)?;
            if !result.is_valid {
                anyhow::bail!("validation failed: {}", result.errors.join("; "));
            }
        }

        Commands::Cycle {
            insights,
            suggestions,
            score,
            confidence,
        } => {
            let mut insights: EvaluationInsights = match insights {
                Some(path) => serde_json::from_str(&read(&path)?)
                    .with_context(|| format!("Invalid insights in {}", path.display()))?,
                None => EvaluationInsights::default(),
            };
            if let Some(score) = score {
                insights.recent_average_score = score;
            }
            if let Some(confidence) = confidence {
                insights.confidence_level = confidence;
            }
            let suggestions: Vec<KnowledgeSuggestion> = match suggestions {
                Some(path) => serde_json::from_str(&read(&path)?)
                    .with_context(|| format!("Invalid suggestions in {}", path.display()))?,
                None => Vec::new(),
            };

            let engine = Arc::new(open_engine(config).await?);
            let stopper = Arc::clone(&engine);
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nStopping after the current step...");
                    stopper.request_stop();
                }
            });

            let result = engine.run_cycle(&insights, &suggestions).await;
            watcher.abort();
            print_json(&result?)?;
        }

        Commands::Rollback { id } => {
            let engine = open_engine(config).await?;
            engine.rollback(&id).await?;
            println!("Rolled back {}", id);
        }

        Commands::Stats { output_format } => {
            let engine = open_engine(config).await?;
            let stats = engine.statistics().await;
            let learning = engine.learning_insights().await;
            let trends = engine.performance_trends().await;
            let thresholds = engine.trigger_recommendations().await;
            match output_format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "statistics": stats,
                    "learning_insights": learning,
                    "trigger_recommendations": thresholds,
                    "performance_trends": trends,
                }))?,
                OutputFormat::Text => {
                    println!(
                        "{} improvements, {} successful, {} failed ({:.0}% success)",
                        stats.total_improvements,
                        stats.successful_improvements,
                        stats.failed_improvements,
                        stats.success_rate * 100.0
                    );
                    for (kind, t) in &stats.by_type {
                        println!("  {}: {}/{}", kind, t.success, t.total);
                    }
                    println!("Trend: {:?}", trends.trend);
                    println!("Base threshold: {:.2}", thresholds.base_threshold);
                    for action in &thresholds.recommended_actions {
                        println!("  * {}", action);
                    }
                }
            }
        }

        Commands::Feedback {
            key,
            verdict,
            rating,
            notes,
        } => {
            let verdict: FeedbackVerdict = verdict.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
            let engine = open_engine(config).await?;
            let id = engine
                .record_feedback(&key, verdict, rating, notes.as_deref())
                .await?;
            println!("Recorded feedback for {}", id);
        }

        Commands::Export { path } => {
            let engine = open_engine(config).await?;
            engine.export(&path).await?;
            println!("Exported ledger to {}", path.display());
        }
    }

    Ok(())
}

async fn open_engine(config: Config) -> Result<SelfModificationEngine> {
    let timeout = Duration::from_secs(config.pipeline.generation_timeout_secs);
    let generator = HttpCodeGenerator::new(&config.generator, timeout)?;
    Ok(SelfModificationEngine::open(config, Arc::new(generator)).await?)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
