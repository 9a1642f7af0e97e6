use serde::Deserialize;
use tracing::warn;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

const START: usize = 0;
const END: usize = 1;

/// Keeps or drops everything between a start and an end marker. The markers
/// themselves never reach the output.
///
/// When `start` and `end` are the same token the region toggles: the first
/// occurrence opens it and the next one closes it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Region {
	pub start: TokenConfig,
	pub end: TokenConfig,
	#[serde(default = "default_include")]
	pub include: bool,
	#[serde(default)]
	pub whole_line: bool,
	#[serde(default)]
	pub trim_whitespace: bool,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

fn default_include() -> bool {
	true
}

impl Region {
	pub fn new(start: impl Into<TokenConfig>, end: impl Into<TokenConfig>) -> Self {
		Self {
			start: start.into(),
			end: end.into(),
			include: true,
			whole_line: false,
			trim_whitespace: false,
			id: None,
			initial_state: None,
		}
	}

	#[must_use]
	pub fn with_include(mut self, include: bool) -> Self {
		self.include = include;
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

impl OperationProvider for Region {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		let start = self.start.to_token(state.encoding())?;
		let toggle = self.start == self.end;
		let mut tokens = vec![start];
		if !toggle {
			tokens.push(self.end.to_token(state.encoding())?);
		}

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(RegionOperation {
			id: self.id.clone(),
			tokens,
			toggle,
			include: self.include,
			whole_line: self.whole_line,
			trim_whitespace: self.trim_whitespace,
			waiting_for_end: false,
		})))
	}
}

struct RegionOperation {
	id: Option<String>,
	tokens: Vec<Token>,
	toggle: bool,
	include: bool,
	whole_line: bool,
	trim_whitespace: bool,
	waiting_for_end: bool,
}

impl RegionOperation {
	fn end_literal(&self) -> &[u8] {
		self.tokens[self.tokens.len() - 1].literal()
	}

	/// Whitespace around a start marker. The end marker may sit on the same
	/// line, so input is never skipped past the next line ending here.
	fn after_start(&self, state: &mut ProcessorState<'_>) -> StencilResult<()> {
		if self.whole_line {
			let encoding_config = state.encoding_config();
			state.seek_back_until(&encoding_config.line_endings, false);
			state.trim_whitespace(true, false)?;
		} else if self.trim_whitespace {
			state.trim_whitespace(true, true)?;
		}

		Ok(())
	}

	/// Whitespace after an end marker. Output before it is left alone.
	fn after_end(&self, state: &mut ProcessorState<'_>) -> StencilResult<()> {
		if self.whole_line {
			let encoding_config = state.encoding_config();
			state.seek_forward_through(&encoding_config.line_endings)?;
		} else if self.trim_whitespace {
			state.trim_whitespace(true, false)?;
		}

		Ok(())
	}
}

impl Operation for RegionOperation {
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

		let token = match (self.toggle, self.waiting_for_end) {
			(true, true) => END,
			(true, false) => START,
			_ => token,
		};

		if token == END {
			if !self.waiting_for_end {
				warn!(
					end = %String::from_utf8_lossy(self.end_literal()),
					"region end without a start, emitting it unchanged"
				);
				let literal = self.end_literal().to_vec();
				state.write(&literal)?;
				return Ok(0);
			}

			self.waiting_for_end = false;
			self.after_end(state)?;
			return Ok(0);
		}

		self.after_start(state)?;

		if self.include {
			self.waiting_for_end = true;
			return Ok(0);
		}

		let end = self.end_literal().to_vec();
		if !state.seek_forward_past(&end)? {
			warn!(
				end = %String::from_utf8_lossy(&end),
				"excluded region is missing its end marker, dropping the rest of the input"
			);
			return Ok(0);
		}

		self.after_end(state)?;
		Ok(0)
	}
}
