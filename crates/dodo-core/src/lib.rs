//! Load-generation engine for dodo
//!
//! The core drives N concurrent workers ("dodos") issuing templated
//! HTTP(S) requests against a target URL, optionally through a pool of
//! screened proxies, and aggregates per-response timing into a latency
//! summary.
//!
//! Flow: a validated [`plan::RequestPlan`] is compiled once into a
//! [`plan::CompiledPlan`]; [`client::ClientPool::build`] screens proxies
//! and constructs one keep-alive client per egress path;
//! [`engine::LoadEngine::run`] partitions the budget across workers and
//! collects [`engine::Outcome`]s; [`stats::summarize`] turns them into
//! the per-label latency table.

pub mod client;
pub mod engine;
pub mod error;
pub mod functions;
pub mod plan;
pub mod progress;
pub mod request;
pub mod stats;
pub mod template;

pub use client::{ClientEntry, ClientPool};
pub use engine::{LoadEngine, Outcome};
pub use error::{DodoError, Result};
pub use functions::builtin_registry;
pub use plan::{CompiledPlan, KeyValueSpec, RequestPlan};
pub use progress::{AcceptDefault, Confirm, NoopProgress, ProgressListener};
pub use request::{MaterializedRequest, RequestFactory};
pub use stats::{summarize, LabelSummary, Summary, TABLE_HEADER};
pub use template::{FunctionRegistry, RenderContext, Template, TemplateError};
