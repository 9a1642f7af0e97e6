use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilResult;
use crate::config::format_variable;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

/// Replaces variable references with their values.
///
/// One token is registered per variable known when the run starts plus every
/// name in `names`. Each token is the variable key run through the variable
/// format (`{name}` by default, so the bare key).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExpandVariables {
	/// Names to expand even if they are unset when the run starts. Unset
	/// variables render as `null`.
	#[serde(default)]
	pub names: Vec<String>,
	/// Overrides the run's variable format for this operation.
	#[serde(default)]
	pub format: Option<String>,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl ExpandVariables {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.names.push(name.into());
		self
	}

	#[must_use]
	pub fn with_format(mut self, format: impl Into<String>) -> Self {
		self.format = Some(format.into());
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

impl OperationProvider for ExpandVariables {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		let keys: BTreeSet<String> = state
			.variables()
			.keys()
			.cloned()
			.chain(self.names.iter().cloned())
			.collect();

		if keys.is_empty() {
			debug!("no variables to expand");
			return Ok(None);
		}

		let format = self
			.format
			.clone()
			.unwrap_or_else(|| state.config().variable_format.clone());
		let mut tokens = Vec::with_capacity(keys.len());
		let mut names = Vec::with_capacity(keys.len());

		for key in keys {
			let reference = format_variable(&format, &key);
			tokens.push(TokenConfig::literal(reference).to_token(state.encoding())?);
			names.push(key);
		}

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(ExpandVariablesOperation {
			id: self.id.clone(),
			tokens,
			names,
		})))
	}
}

struct ExpandVariablesOperation {
	id: Option<String>,
	tokens: Vec<Token>,
	names: Vec<String>,
}

impl Operation for ExpandVariablesOperation {
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

		let value = state.variables().render(&self.names[token]);
		let bytes = state.encoding().encode(&value);
		state.write(&bytes)?;

		Ok(0)
	}
}
