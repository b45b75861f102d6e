//! Replicated blackboard with causal ordering.
//!
//! A set of peer nodes each hold an ordered log of text entries and keep it
//! eventually consistent despite message loss and node churn. There is no
//! consensus on the write path: every node accepts writes locally, stamps
//! them with a vector clock and fans them out to all peers. Concurrent edits
//! are reconciled by a deterministic total order over vector clocks, so every
//! replica that has seen the same messages shows the same board.
//!
//! # Architecture
//!
//! Each node runs on Tokio with one task per inbound request plus one
//! long-lived retry task:
//!
//! - **Request handlers**: apply client and peer writes under short, sync
//!   critical sections (store lock, clock lock)
//! - **Retry loop**: periodically re-delivers writes that failed to reach a
//!   peer, giving at-least-once delivery
//! - **Election rounds**: a ring election picks a coordinator; it runs on
//!   startup and whenever the current leader cannot be contacted
//!
//! # Modules
//!
//! - [`clock`]: Vector clocks and the conflict-resolution total order
//! - [`store`]: Blackboard entries, tombstones and deferred operations
//! - [`message`]: Peer-to-peer wire messages
//! - [`outbound`]: Retry queue for undelivered writes
//! - [`election`]: Ring-based leader election
//! - [`node`]: A replica composing all of the above
//! - [`transport`]: HTTP and in-process message delivery
//! - [`server`]: Axum routes for clients and peers
//! - [`runtime`]: Spawning nodes, background tasks, shutdown
//! - [`config`], [`cli`]: Startup configuration
//! - [`topology`]: Static peer set and ring order

pub mod cli;
pub mod clock;
pub mod config;
pub mod election;
pub mod error;
pub mod message;
pub mod node;
pub mod outbound;
pub mod runtime;
pub mod server;
pub mod store;
pub mod topology;
pub mod transport;
