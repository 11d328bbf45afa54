//! Core module: aggregation domain and feed runtime.
//!
//! This module contains:
//! - `aggregator`: session reducer folding feed events into the view model
//! - `backoff`: reconnect delay policy
//! - `watcher`: WebSocket feed client driving the aggregator

pub mod aggregator;
pub mod backoff;
pub mod watcher;
