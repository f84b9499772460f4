//! Capstan Core
//!
//! Core types and abstractions for the Capstan execution-tracking engine.
//!
//! This crate contains:
//! - Domain types: the execution graph model (Execution, Stage, Task, Trigger, artifacts)
//! - Graph utilities: topological ordering and traversal over a stage DAG

pub mod domain;
pub mod graph;
