//! Observability for Skylark: the tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
