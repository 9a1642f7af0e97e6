//! Pluggable transforms driven by token matches.
//!
//! A provider is the shareable, immutable description of an operation. At
//! the start of every run the processor asks each provider for a fresh
//! [`Operation`] bound to that run's encoding and flag table, then calls
//! [`Operation::handle_match`] whenever one of its tokens is found.

pub use balanced_nesting::*;
pub use conditional::*;
pub use expand_variables::*;
pub use include::*;
pub use phased::*;
pub use position_tracker::*;
pub use region::*;
pub use replacement::*;
pub use set_flag::*;

mod balanced_nesting;
mod conditional;
mod expand_variables;
mod include;
mod phased;
mod position_tracker;
mod region;
mod replacement;
mod set_flag;

use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;

/// A transform bound to a single run.
pub trait Operation {
	/// The flag that gates this operation. `None` means always active.
	fn id(&self) -> Option<&str>;

	/// Tokens to register, indexed by the local id passed to
	/// [`Operation::handle_match`].
	fn tokens(&self) -> &[Token];

	/// React to `token` having matched. The cursor sits right after the token.
	/// Returns how many further bytes the processor should skip; operations
	/// that reposition the cursor themselves return `0`.
	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize>;
}

/// Shareable factory for an [`Operation`].
pub trait OperationProvider: Send + Sync {
	fn id(&self) -> Option<&str>;

	/// Realize the operation for one run. `Ok(None)` means the operation would
	/// have no effect and is skipped. Configuration errors surface here, before
	/// any input is processed.
	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>>;
}

/// Apply a provider's initial flag value unless the caller already set it.
pub(crate) fn apply_initial_state(state: &mut ProcessorState<'_>, id: Option<&str>, initial: Option<bool>) {
	if let (Some(id), Some(initial)) = (id, initial) {
		if !id.is_empty() {
			state.flags_mut().set_if_absent(id, initial);
		}
	}
}

pub(crate) fn is_enabled(state: &ProcessorState<'_>, id: Option<&str>) -> bool {
	state.flags().is_enabled(id)
}

/// Re-emit the literal part of a matched token.
pub(crate) fn emit_literal(state: &mut ProcessorState<'_>, token: &Token) -> StencilResult<usize> {
	state.write(token.literal())?;
	Ok(0)
}
