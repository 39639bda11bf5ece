//! # Mailflow
//!
//! Mailflow is a mail-routed graph execution engine for agent workflows.
//! Cooperating executor actors traverse a directed workflow graph by
//! exchanging addressed mail. They evaluate edge conditions, fork parallel
//! branches on fan-out, merge tool and directive nodes into action nodes,
//! and detect termination by counting ended branches.
//!
//! ## Core Pieces
//!
//! - **Graph**: nodes, edges with optional conditions, bundle edges for tools and directives
//! - **Mail routing**: per-actor mailboxes and a two-phase `MailManager`
//! - **Executors**: a `GraphExecutor` that owns the graph and a `BranchForkingExecutor` that runs the branches
//! - **Agent**: both executors and their mail manager under one driving loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mailflow::{AgentBuilder, GraphModel};
//!
//! let model = GraphModel::from_json(json_str)?;
//! let agent = AgentBuilder::new().processor(my_processor).build_from_model(&model)?;
//! let responses = agent.execute(serde_json::json!({"topic": "rust"})).await?;
//! ```

mod agent;
mod builder;
mod common;
mod config;
mod error;
mod executor;
mod graph;
mod mail;
mod model;
mod runtime;
mod utils;

use std::sync::{Arc, RwLock};

pub use agent::{Agent, OutputParser, run_nested};
pub use builder::AgentBuilder;
pub use common::{Queue, Shutdown, Vars};
pub use config::Config;
pub use error::MailflowError;
pub use executor::{BranchExecutor, BranchForkingExecutor, Executor, GraphExecutor};
pub use graph::*;
pub use mail::*;
pub use model::*;
pub use runtime::*;

/// Result type alias for Mailflow operations.
pub type Result<T> = std::result::Result<T, MailflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
