//! Purpose: Library crate behind the `pagesync` server and its tests.
//! Exports: `core` (codec, planner, decisions, versioned table, errors) and `api`.
//! Role: Stateless list protocol over a system-versioned table; transport lives in the binary.
//! Invariants: Core modules are pure or take their clock and store explicitly.
//! Invariants: No server-side cursor state; every continuation travels in a token.
pub mod api;
pub mod core;
