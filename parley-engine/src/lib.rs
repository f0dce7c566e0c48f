//! Parley Engine - A pattern-rule conversational engine.
//!
//! Implements the core `Engine` trait with an ordered list of regex rules.
//! The first matching rule wins; its template may reference capture groups
//! and remembered per-user predicates. Session state (predicates and an
//! exchange counter) serializes to JSON so the core can persist it.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod rules;

pub use rules::{Rule, RuleEngine};
