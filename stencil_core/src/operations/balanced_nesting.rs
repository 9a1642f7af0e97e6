use serde::Deserialize;
use tracing::warn;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilError;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

const OPERATION: &str = "balanced_nesting";
const START: usize = 0;
const REAL_END: usize = 1;
const PSEUDO_END: usize = 2;

/// Repairs nested block markers whose inner closes were written as a
/// "pseudo" close (for example `-- >` inside an HTML comment). A pseudo close
/// that brings the depth back to zero is rewritten to the real close.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BalancedNesting {
	pub start: TokenConfig,
	pub real_end: TokenConfig,
	pub pseudo_end: TokenConfig,
	/// Flag that, once set, forces the depth back to zero at the next match
	/// and is then cleared.
	#[serde(default)]
	pub reset_flag: Option<String>,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl BalancedNesting {
	pub fn new(
		start: impl Into<TokenConfig>,
		real_end: impl Into<TokenConfig>,
		pseudo_end: impl Into<TokenConfig>,
	) -> Self {
		Self {
			start: start.into(),
			real_end: real_end.into(),
			pseudo_end: pseudo_end.into(),
			reset_flag: None,
			id: None,
			initial_state: None,
		}
	}

	#[must_use]
	pub fn with_reset_flag(mut self, flag: impl Into<String>) -> Self {
		self.reset_flag = Some(flag.into());
		self
	}

	#[must_use]
	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	#[must_use]
	pub fn with_initial_state(mut self, initial_state: bool) -> Self {
		self.initial_state = Some(initial_state);
		self
	}
}

impl OperationProvider for BalancedNesting {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		if self.start == self.real_end || self.start == self.pseudo_end || self.real_end == self.pseudo_end {
			return Err(StencilError::invalid_operation(
				OPERATION,
				"start, real end and pseudo end must be distinct tokens",
			));
		}

		let encoding = state.encoding();
		let tokens = vec![
			self.start.to_token(encoding)?,
			self.real_end.to_token(encoding)?,
			self.pseudo_end.to_token(encoding)?,
		];

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(BalancedNestingOperation {
			id: self.id.clone(),
			reset_flag: self.reset_flag.clone(),
			tokens,
			depth: 0,
		})))
	}
}

struct BalancedNestingOperation {
	id: Option<String>,
	reset_flag: Option<String>,
	tokens: Vec<Token>,
	depth: usize,
}

impl Operation for BalancedNestingOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		if let Some(flag) = self.reset_flag.as_deref() {
			if state.flags().get_or(flag, false) {
				self.depth = 0;
				state.flags_mut().set(flag, false);
			}
		}

		if !is_enabled(state, self.id.as_deref()) {
			return emit_literal(state, &self.tokens[token]);
		}

		match token {
			START => {
				self.depth += 1;
				emit_literal(state, &self.tokens[START])
			}
			REAL_END => {
				if self.depth == 0 {
					warn!("closing marker without a matching start");
				}
				self.depth = self.depth.saturating_sub(1);
				emit_literal(state, &self.tokens[REAL_END])
			}
			PSEUDO_END if self.depth == 1 => {
				self.depth = 0;
				emit_literal(state, &self.tokens[REAL_END])
			}
			_ => {
				self.depth = self.depth.saturating_sub(1);
				emit_literal(state, &self.tokens[PSEUDO_END])
			}
		}
	}
}
