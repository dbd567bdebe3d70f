//! `zi_core`: the solver and implementation store at the heart of a
//! Zero Install-style decentralized package manager.
//!
//! This crate stops at the trust boundary described in [`interfaces`]:
//! feed retrieval, signature verification, and user interaction are
//! caller concerns. What lives here is pure logic and filesystem state:
//! version/architecture matching, candidate enumeration, the
//! backtracking solver, the canonical selections document, and the
//! content-addressed implementation store.

pub mod arch;
pub mod candidates;
pub mod config;
pub mod digest;
pub mod error;
pub mod feed;
pub mod interfaces;
pub mod manifest;
pub mod requirements;
pub mod selections;
pub mod solver;
pub mod store;
pub mod version;

pub use error::{Error, Result};
