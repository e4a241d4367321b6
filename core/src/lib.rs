#![deny(missing_docs)]
//! portal_core: shared building blocks (config, logging, counters, faults, jobs).

/// Configuration helpers (AppId, dirs, load_or_init, etc.)
pub mod cfg;
/// Tracing/log initialization helpers.
pub mod logx;
/// Process-wide named counters used for status reporting.
pub mod counters;
/// Fault taxonomy shared by jobs, handlers and the bus bridge.
pub mod fault;
/// Periodic job descriptors and the job table.
pub mod job;
/// Parsers for control payloads delivered over the bus.
pub mod directive;
/// Weather payload summary and clock/calendar text.
pub mod weather;
