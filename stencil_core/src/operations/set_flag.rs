use serde::Deserialize;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use crate::StencilError;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

const OPERATION: &str = "set_flag";

/// Markers that switch a named flag on or off mid-stream.
///
/// `on` and `off` markers stay in the output. The `_no_emit` variants are
/// always removed, together with surrounding whitespace according to
/// `whole_line` and `trim_whitespace`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SetFlag {
	pub name: String,
	#[serde(default)]
	pub on: Option<TokenConfig>,
	#[serde(default)]
	pub off: Option<TokenConfig>,
	#[serde(default)]
	pub on_no_emit: Option<TokenConfig>,
	#[serde(default)]
	pub off_no_emit: Option<TokenConfig>,
	/// Value of the flag before any marker is seen, unless the caller set it.
	#[serde(default)]
	pub default: Option<bool>,
	#[serde(default)]
	pub whole_line: bool,
	#[serde(default)]
	pub trim_whitespace: bool,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl SetFlag {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_on(mut self, token: impl Into<TokenConfig>) -> Self {
		self.on = Some(token.into());
		self
	}

	#[must_use]
	pub fn with_off(mut self, token: impl Into<TokenConfig>) -> Self {
		self.off = Some(token.into());
		self
	}

	#[must_use]
	pub fn with_on_no_emit(mut self, token: impl Into<TokenConfig>) -> Self {
		self.on_no_emit = Some(token.into());
		self
	}

	#[must_use]
	pub fn with_off_no_emit(mut self, token: impl Into<TokenConfig>) -> Self {
		self.off_no_emit = Some(token.into());
		self
	}

	#[must_use]
	pub fn with_default(mut self, value: bool) -> Self {
		self.default = Some(value);
		self
	}

	#[must_use]
	pub fn with_whole_line(mut self, whole_line: bool) -> Self {
		self.whole_line = whole_line;
		self
	}

	#[must_use]
	pub fn with_trim_whitespace(mut self, trim_whitespace: bool) -> Self {
		self.trim_whitespace = trim_whitespace;
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

impl OperationProvider for SetFlag {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		if self.name.is_empty() {
			return Err(StencilError::invalid_operation(OPERATION, "the flag name is empty"));
		}

		let encoding = state.encoding();
		let mut tokens = Vec::new();
		let mut markers = Vec::new();
		let configured = [
			(&self.on, Marker { turn_on: true, emit: true }),
			(&self.off, Marker { turn_on: false, emit: true }),
			(&self.on_no_emit, Marker { turn_on: true, emit: false }),
			(&self.off_no_emit, Marker { turn_on: false, emit: false }),
		];

		for (config, marker) in configured {
			if let Some(config) = config {
				tokens.push(config.to_token(encoding)?);
				markers.push(marker);
			}
		}

		if tokens.is_empty() {
			return Err(StencilError::invalid_operation(
				OPERATION,
				format!("flag `{}` has no markers", self.name),
			));
		}

		if let Some(default) = self.default {
			state.flags_mut().set_if_absent(self.name.as_str(), default);
		}
		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(SetFlagOperation {
			id: self.id.clone(),
			name: self.name.clone(),
			tokens,
			markers,
			whole_line: self.whole_line,
			trim_whitespace: self.trim_whitespace,
		})))
	}
}

#[derive(Debug, Clone, Copy)]
struct Marker {
	turn_on: bool,
	emit: bool,
}

struct SetFlagOperation {
	id: Option<String>,
	name: String,
	tokens: Vec<Token>,
	markers: Vec<Marker>,
	whole_line: bool,
	trim_whitespace: bool,
}

impl Operation for SetFlagOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		let marker = self.markers[token];
		let enabled = state.flags().is_enabled(self.id.as_deref());

		if marker.emit {
			state.write(self.tokens[token].literal())?;
		} else {
			state.whitespace_handler(self.whole_line, self.trim_whitespace)?;
		}

		// A suppressed operation can still switch its own gate back on.
		let reenables_self = self.id.as_deref() == Some(self.name.as_str()) && marker.turn_on;
		if enabled || reenables_self {
			state.flags_mut().set(self.name.as_str(), marker.turn_on);
		}

		Ok(0)
	}
}
