//! smbshare-e2e - end-to-end verification for operator-managed SMB shares
//!
//! Each scenario applies a set of fixtures (secrets, security configs, a share
//! declaration), waits for the operator to bring up the share workload, checks
//! that clients can use the share through every supported endpoint, checks the
//! operator's event trail, and removes what it created.
//!
//! # Architecture
//!
//! All cluster and protocol access sits behind three traits so the scenario
//! logic runs the same against a live cluster or in-memory fakes:
//! - [`cluster::ClusterQuery`] reads pods, services and events
//! - [`fixture::FixtureClient`] creates and removes fixture objects
//! - [`access::ShareClient`] speaks the share protocol
//!
//! # Modules
//!
//! - [`config`] - Harness configuration and defaults
//! - [`fixture`] - Fixture parsing, idempotent apply and tracked teardown
//! - [`poll`] - Bounded polling for workload existence and readiness
//! - [`endpoint`] - Endpoint kinds and naming conventions
//! - [`access`] - Share round trips per endpoint and credential
//! - [`events`] - Event trail verification
//! - [`scenario`] - Scenario phases, verification steps and the runner
//! - [`topology`] - Extra steps for domain-member and external shares
//! - [`registry`] - The named scenario matrix
//! - [`report`] - Per-check results and summaries
//! - [`cli`] - Command line entry point

#![deny(missing_docs)]

pub mod access;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod fixture;
pub mod poll;
pub mod registry;
pub mod report;
pub mod retry;
pub mod scenario;
pub mod topology;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
