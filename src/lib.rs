//! myqmon - MySQL status sampling library.
//!
//! This library provides the acquisition pipeline shared by the `myqmon`
//! binary and any display layer built on top of it:
//! - interchangeable sources (capture replay, spawned `mysql` client,
//!   direct polled queries)
//! - a dual-format parser for framed status/variables output
//! - a merger that aligns the fast status feed with the slow variables
//!   feed and emits current-vs-previous [`state::State`] records

pub mod parser;
pub mod sample;
pub mod source;
pub mod state;
