//! Observability
//!
//! Tracing subscriber setup, spans and log hygiene for the pipeline.

pub mod telemetry;
