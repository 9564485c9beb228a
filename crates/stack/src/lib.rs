//! The ultra-tic platform stack.
//!
//! Turns a [`StackConfig`] into a [`tic_graph::Graph`] of AWS and Kubernetes
//! resources. Layers are declared leaves first:
//!
//! - [`network`] - VPC, subnets, gateways, routing
//! - [`identity`] - one role per principal, web identity for workloads
//! - [`compute`] - EKS cluster, node group, database host
//! - [`registry`] - ECR repository and the application image
//! - [`secrets`] - database password, internal DNS, stored secret
//! - [`workload`] - secrets operator and the application objects
//! - [`storage`] - backup bucket and configuration audit
//!
//! [`synthesize`] wires them together; [`lint`](lint::lint) flags
//! mistakes the graph itself accepts; [`rehearsal_provider`] applies the
//! result without touching a cloud account.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
pub mod kinds;

pub mod bootstrap;
pub mod compute;
pub mod config;
pub mod error;
pub mod identity;
pub mod lint;
pub mod network;
pub mod registry;
pub mod rehearsal;
pub mod secrets;
pub mod storage;
pub mod synth;
pub mod tagging;
pub mod workload;

pub use config::{ConfigError, StackConfig};
pub use error::StackError;
pub use lint::{lint, Finding, Severity};
pub use rehearsal::rehearsal_provider;
pub use synth::synthesize;
pub use tagging::AutoTags;
