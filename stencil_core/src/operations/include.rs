use std::fs::File;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::Encoding;
use crate::StencilError;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;
use crate::trie::TokenTrie;

/// Initial capacity for included content; doubled whenever it fills up.
const INCLUDE_CHUNK_SIZE: usize = 4 * 1024;

/// Opens the content named between include markers.
pub trait IncludeSource: Send + Sync {
	fn open(&self, location: &str) -> std::io::Result<Box<dyn Read>>;
}

impl<F> IncludeSource for F
where
	F: Fn(&str) -> std::io::Result<Box<dyn Read>> + Send + Sync,
{
	fn open(&self, location: &str) -> std::io::Result<Box<dyn Read>> {
		self(location)
	}
}

/// Resolves include locations as paths relative to a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIncludeSource {
	root: PathBuf,
}

impl FileIncludeSource {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}
}

impl IncludeSource for FileIncludeSource {
	fn open(&self, location: &str) -> std::io::Result<Box<dyn Read>> {
		let file = File::open(self.root.join(location))?;
		Ok(Box::new(file))
	}
}

/// Inline external content named between a start and an end marker, for
/// example `#include(header.txt)`.
///
/// The content's byte-order mark decides its encoding, falling back to the
/// encoding of the stream being processed, and it is re-encoded to match
/// that stream.
#[derive(Clone)]
pub struct Include {
	start: TokenConfig,
	end: TokenConfig,
	source: Arc<dyn IncludeSource>,
	id: Option<String>,
	initial_state: Option<bool>,
}

impl std::fmt::Debug for Include {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Include")
			.field("start", &self.start)
			.field("end", &self.end)
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}

impl Include {
	pub fn new(
		start: impl Into<TokenConfig>,
		end: impl Into<TokenConfig>,
		source: impl IncludeSource + 'static,
	) -> Self {
		Self {
			start: start.into(),
			end: end.into(),
			source: Arc::new(source),
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

impl OperationProvider for Include {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		let start = self.start.to_token(state.encoding())?;
		let end = TokenTrie::from_tokens([self.end.to_token(state.encoding())?]);

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(IncludeOperation {
			id: self.id.clone(),
			tokens: vec![start],
			end,
			source: Arc::clone(&self.source),
		})))
	}
}

/// `[[operations]]` form of [`Include`], reading files relative to the
/// configuration directory (or `root` beneath it).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncludeConfig {
	pub start: TokenConfig,
	pub end: TokenConfig,
	#[serde(default)]
	pub root: Option<PathBuf>,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl IncludeConfig {
	pub fn to_include(&self, root: &Path) -> Include {
		let root = match &self.root {
			Some(relative) => root.join(relative),
			None => root.to_path_buf(),
		};

		let mut include = Include::new(self.start.clone(), self.end.clone(), FileIncludeSource::new(root));
		include.id = self.id.clone();
		include.initial_state = self.initial_state;
		include
	}
}

struct IncludeOperation {
	id: Option<String>,
	tokens: Vec<Token>,
	end: TokenTrie,
	source: Arc<dyn IncludeSource>,
}

impl Operation for IncludeOperation {
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

		let (bytes, found) = state.read_until(&self.end, true)?;
		if found.is_none() {
			warn!("include is missing its end marker, emitting it unchanged");
			emit_literal(state, &self.tokens[token])?;
			state.write(&bytes)?;
			return Ok(0);
		}

		let target_encoding = state.encoding();
		let location = target_encoding.decode(&bytes)?;
		let location = location.trim();
		let content = read_include(self.source.as_ref(), location)?;

		let (encoding, preamble) = Encoding::detect(&content).unwrap_or((target_encoding, 0));
		debug!(location, %encoding, bytes = content.len(), "including content");

		if encoding == target_encoding {
			state.write(&content[preamble..])?;
		} else {
			let text = encoding.decode(&content[preamble..])?;
			state.write(&target_encoding.encode(&text))?;
		}

		Ok(0)
	}
}

fn read_include(source: &dyn IncludeSource, location: &str) -> StencilResult<Vec<u8>> {
	let include_error = |error| {
		StencilError::IncludeSource {
			location: location.to_string(),
			source: error,
		}
	};

	let mut reader = source.open(location).map_err(include_error)?;
	let mut content = vec![0; INCLUDE_CHUNK_SIZE];
	let mut length = 0;

	loop {
		if length == content.len() {
			content.resize(content.len() * 2, 0);
		}

		match reader.read(&mut content[length..]) {
			Ok(0) => break,
			Ok(read) => length += read,
			Err(e) if e.kind() == ErrorKind::Interrupted => {}
			Err(e) => return Err(include_error(e)),
		}
	}

	content.truncate(length);
	Ok(content)
}
