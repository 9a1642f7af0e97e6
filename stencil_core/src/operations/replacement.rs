use serde::Deserialize;
use tracing::debug;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

/// Replace every occurrence of a literal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Replacement {
	#[serde(rename = "match")]
	pub pattern: TokenConfig,
	pub replace: String,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl Replacement {
	pub fn new(pattern: impl Into<TokenConfig>, replace: impl Into<String>) -> Self {
		Self {
			pattern: pattern.into(),
			replace: replace.into(),
			id: None,
			initial_state: None,
		}
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

impl OperationProvider for Replacement {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		let token = self.pattern.to_token(state.encoding())?;
		let replacement = state.encoding().encode(&self.replace);

		if replacement == token.literal() {
			debug!(pattern = %self.pattern.value, "replacement is identical to its match, skipping");
			return Ok(None);
		}

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(ReplacementOperation {
			id: self.id.clone(),
			tokens: vec![token],
			replacement,
		})))
	}
}

struct ReplacementOperation {
	id: Option<String>,
	tokens: Vec<Token>,
	replacement: Vec<u8>,
}

impl Operation for ReplacementOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		if !is_enabled(state, self.id.as_deref()) {
			return emit_literal(state, &self.tokens[token]);
		}

		state.write(&self.replacement)?;
		Ok(0)
	}
}
