//! `stencil_core` is a streaming, token-driven text transformation engine. It
//! scans a byte stream for registered tokens and hands every match to the
//! operation that registered it, copying everything else through unchanged.
//! Input is read through a bounded window and output is written
//! incrementally, so files never need to fit in memory.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Source bytes
//!   -> ProcessorState (window, byte-order mark detection, flags, variables)
//!   -> TokenTrie evaluator (every operation's tokens merged into one trie)
//!   -> Operation::handle_match (rewrite, skip, branch or pass through)
//!   -> Output sink (bounded tail kept for backward whitespace trimming)
//! ```
//!
//! ## Operations
//!
//! - [`Conditional`] evaluates nested `if` / `elseif` / `else` / `endif`
//!   blocks without recursion, optionally toggling other operations.
//! - [`Region`] keeps or drops delimited regions.
//! - [`BalancedNesting`] repairs pseudo closing markers inside nested blocks.
//! - [`Include`] inlines external content, re-encoding it as needed.
//! - [`Replacement`] substitutes literals.
//! - [`SetFlag`] switches flags mid-stream.
//! - [`PhasedOperation`] rewrites tokens that occur in a strict order.
//! - [`PositionTracker`] records output offsets in the variable collection.
//! - [`ExpandVariables`] writes variable values.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use stencil_core::BooleanExpressionEvaluator;
//! use stencil_core::Conditional;
//! use stencil_core::ConditionalTokens;
//! use stencil_core::EngineConfig;
//! use stencil_core::Processor;
//!
//! let tokens = ConditionalTokens::new()
//! 	.with_if("{if:")
//! 	.with_else("{else}")
//! 	.with_end_if("{endif}");
//! let evaluator = BooleanExpressionEvaluator::new(["}"]).consuming_terminator();
//! let processor = Processor::new(EngineConfig::new().with_variable("ready", true))
//! 	.with_operation(Arc::new(Conditional::new(tokens, evaluator)));
//!
//! let output = processor.process_bytes(b"{if:ready}go{else}wait{endif}").unwrap();
//! assert_eq!(output, b"go");
//! ```

pub use config::*;
pub use encoding::*;
pub use error::*;
pub use evaluator::*;
pub use operations::*;
pub use processor::*;
pub use state::*;
pub use token::*;
pub use trie::*;
pub use variables::*;

pub mod config;
mod encoding;
#[allow(unused_assignments)]
mod error;
mod evaluator;
pub mod operations;
mod processor;
mod state;
mod token;
mod trie;
mod variables;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
