use serde::Deserialize;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

/// Stores the output offset at which `token` is written in `variable`. The
/// token itself is left in the output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PositionTracker {
	pub token: TokenConfig,
	pub variable: String,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl PositionTracker {
	pub fn new(token: impl Into<TokenConfig>, variable: impl Into<String>) -> Self {
		Self {
			token: token.into(),
			variable: variable.into(),
			id: None,
			initial_state: None,
		}
	}

	#[must_use]
	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}
}

impl OperationProvider for PositionTracker {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		let token = self.token.to_token(state.encoding())?;
		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(PositionTrackerOperation {
			id: self.id.clone(),
			variable: self.variable.clone(),
			tokens: vec![token],
		})))
	}
}

struct PositionTrackerOperation {
	id: Option<String>,
	variable: String,
	tokens: Vec<Token>,
}

impl Operation for PositionTrackerOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		if is_enabled(state, self.id.as_deref()) {
			let offset = state.output_position();
			state.variables_mut().set(self.variable.as_str(), offset);
		}

		emit_literal(state, &self.tokens[token])
	}
}
