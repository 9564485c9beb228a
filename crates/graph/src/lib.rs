//! Typed resource graph for declarative infrastructure.
//!
//! Resources are declared through a [`GraphBuilder`]. Every declaration returns
//! a typed [`Handle`], and the only way to consume another resource's output is
//! through that handle, so dependency edges are explicit and the graph is
//! acyclic by construction.
//!
//! The crate covers:
//!
//! - **Declaration** - [`GraphBuilder`], [`Kind`], [`Handle`], [`Value`]
//! - **Ordering** - [`CreateOrder`] (Kahn levels, reverse for destroy)
//! - **Synthesis** - [`Document`], the desired-state document handed to an engine
//! - **Convergence** - [`Plan`], [`StackState`], [`Engine`] driving a [`Provider`]
//!
//! # Example
//!
//! ```rust,ignore
//! let mut builder = GraphBuilder::new("dev");
//! let vpc = builder.declare("vpc", &Vpc { cidr_block: "10.0.0.0/16".into(), .. }, Options::new())?;
//! let subnet = builder.declare("public-a", &Subnet { vpc_id: vpc.id(), .. }, Options::new())?;
//! let graph = builder.build()?;
//!
//! let engine = Engine::new(Arc::new(MemoryProvider::new()));
//! let mut state = StackState::new("dev", "/tmp/dev-state");
//! engine.apply(&graph, &mut state).await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod document;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod order;
pub mod plan;
pub mod provider;
pub mod state;
pub mod value;

pub use document::Document;
pub use engine::{ApplyReport, Engine};
pub use error::{ApplyError, GraphError};
pub use graph::{
    Graph, GraphBuilder, Handle, Kind, Node, NodeRole, Options, ReadinessGate, ReadinessSignal,
    ResourceId,
};
pub use memory::MemoryProvider;
pub use order::CreateOrder;
pub use plan::{Action, Plan, PlanSummary, Step};
pub use provider::{Outputs, Probe, Provider, ProviderError, ResourceRequest};
pub use state::{ResourceRecord, ResourceStatus, StackState, StateLock};
pub use value::{OutputRef, Value};
