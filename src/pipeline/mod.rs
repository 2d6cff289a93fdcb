//! Pipeline stages for document conflict analysis.
//!
//! Each submodule implements exactly one transformation step. Every stage is
//! a pure function of its input except the completion call, the only stage
//! with network I/O.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ prompt ──▶ completion ──▶ parse ──▶ assemble ──▶ export
//! (bytes)     (text)     (LLM call)     (blocks)  (report)     (json/md/txt)
//! ```
//!
//! 1. [`extract`]    PDF / DOCX / text bytes to plain text, via [`normalise`]
//! 2. [`prompt`]     one framed prompt for N documents and a mode
//! 3. [`completion`] timeout + retry around a [`completion::CompletionService`];
//!    [`gemini`] and [`provider`] supply the implementations
//! 4. [`parse`]      tolerant block parser for the model's reply
//! 5. [`assemble`]   dedup, ordering and cap
//! 6. [`export`]     render the report

pub mod assemble;
pub mod completion;
pub mod export;
pub mod extract;
pub mod gemini;
pub mod normalise;
pub mod parse;
pub mod prompt;
pub mod provider;
