//! Feedback-directed stateful test generation for REST APIs.
//!
//! The engine grows a corpus of request sequences. Each iteration picks a
//! sequence, appends an endpoint whose identifier dependencies are satisfied
//! by values harvested from earlier responses, mutates it pairwise, sends it
//! and keeps the extended sequence only if the response was interesting.
//!
//! # Architecture
//!
//! - [`id_table`]: identifier extraction and the dynamic identifier table
//! - [`resolver`]: all-or-nothing placeholder substitution
//! - [`selection`]: seed endpoints and compatibility ranking
//! - [`synth`]: deterministic draft requests from schemas
//! - [`mutation`]: pairwise covering-array mutation
//! - [`feedback`]: TCL, response diversity and surface coverage
//! - [`oracle`]: bug findings from responses
//! - [`corpus`]: test case arena, weighted scheduler and interestingness gate
//! - [`engine`]: the concurrent extension loop
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use restfuzz_core::{FuzzConfig, FuzzEngine};
//! use restfuzz_transport::HttpTransport;
//! use restfuzz_types::EndpointCatalog;
//!
//! let catalog = Arc::new(EndpointCatalog::from_path("catalog.json".as_ref())?);
//! let transport = Arc::new(HttpTransport::new("http://localhost:8080"));
//! let report = FuzzEngine::new(catalog, transport, FuzzConfig::default()).run().await?;
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod corpus;
pub mod engine;
pub mod errors;
pub mod feedback;
pub mod id_table;
pub mod metrics;
pub mod mutation;
pub mod oracle;
pub mod report;
pub mod resolver;
pub mod selection;
pub mod synth;

pub use config::FuzzConfig;
pub use corpus::{Corpus, InterestingnessGate, Step, TestCase, TestCaseId};
pub use engine::{FuzzEngine, IterationObserver, IterationOutcome, IterationRecord, TerminalState};
pub use errors::{FuzzError, UnresolvedDependency};
pub use feedback::{calculate_response_diversity, calculate_tcl, CoverageReport, SignatureHistory};
pub use id_table::{
    extract_ids, DynamicIdTable, IdentifierPredicate, KeyMatch, SuffixPredicate, ValuePolicy,
};
pub use metrics::{FuzzMetrics, MetricsSnapshot};
pub use mutation::{check_request, Mutation, MutationEngine};
pub use oracle::{FindingKind, FindingLog, FindingRecord};
pub use report::{FuzzReport, LatencyProfile, OutcomeSummary, StopReason};
pub use resolver::Resolver;
pub use selection::EndpointSelector;
pub use synth::RequestSynthesizer;
