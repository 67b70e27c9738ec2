//! evolvr - a self-modification pipeline for Rust source trees
//!
//! The pipeline analyzes its own source, derives ranked improvement
//! opportunities, asks a code generator for rewrites, validates them,
//! and applies the safe ones behind a policy gate with backups and
//! rollback. Every outcome lands in a persistent ledger whose statistics
//! tune the thresholds of the next cycle.
//!
//! - **Analysis**: [`analysis::CodeAnalyzer`] builds a snapshot of the tree
//! - **Generation**: [`generation::ProposalGenerator`] turns opportunities into proposals
//! - **Validation**: [`validation::CodeValidator`] scores proposals in five stages (syntax, safety, structure, performance, functional)
//! - **Application**: [`manager::ModificationManager`] gates, applies and rolls back
//! - **Learning**: [`ledger::ImprovementLedger`] records outcomes and feedback
//!
//! # Quick Start
//!
//! ```ignore
//! use evolvr::{config::Config, engine::SelfModificationEngine};
//! use evolvr::generation::HttpCodeGenerator;
//!
//! let config = Config::load(None)?;
//! let generator = HttpCodeGenerator::new(&config.generator, std::time::Duration::from_secs(60))?;
//! let engine = SelfModificationEngine::open(config, std::sync::Arc::new(generator)).await?;
//! let report = engine.run_cycle(&Default::default(), &[]).await?;
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod generation;
pub mod insights;
pub mod ledger;
pub mod manager;
pub mod observability;
pub mod testing;
pub mod validation;
