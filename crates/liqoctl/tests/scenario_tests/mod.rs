//! Scenario tests for liqoctl
//!
//! Tests are organized by the story they tell:
//!
//! - `authenticate`: the nonce handshake between consumer and provider, its
//!   idempotency, and the guards that run before any write
//!
//! - `network`: connecting the two clusters and what happens when the
//!   network controllers never answer
//!
//! - `teardown`: unpeering, unauthenticating and forced unpeering, including
//!   the bidirectional guards

mod authenticate;
mod helpers;
mod network;
mod teardown;
