use std::io::Read;
use std::io::Write;
use std::sync::Arc;

use tracing::debug;
use tracing::trace;

use crate::Encoding;
use crate::StencilResult;
use crate::config::EngineConfig;
use crate::config::FlagTable;
use crate::operations::Operation;
use crate::operations::OperationProvider;
use crate::state::DEFAULT_BUFFER_SIZE;
use crate::state::ProcessorState;
use crate::trie::TokenTrie;
use crate::trie::TrieMatch;
use crate::variables::VariableCollection;

/// What a finished run leaves behind besides its output bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
	pub encoding: Encoding,
	pub variables: VariableCollection,
	pub flags: FlagTable,
	/// Output length including any byte-order mark.
	pub bytes_written: u64,
}

/// A reusable set of operations plus the configuration every run starts
/// from. A processor is immutable once built and can drive any number of
/// runs, concurrently if needed.
#[derive(Clone, Default)]
pub struct Processor {
	config: EngineConfig,
	operations: Vec<Arc<dyn OperationProvider>>,
}

impl std::fmt::Debug for Processor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Processor")
			.field("config", &self.config)
			.field(
				"operations",
				&self
					.operations
					.iter()
					.map(|provider| provider.id())
					.collect::<Vec<_>>(),
			)
			.finish()
	}
}

/// Maps a merged trie id back to its operation and that operation's local
/// token id.
#[derive(Debug, Clone, Copy)]
struct Owner {
	operation: usize,
	token: usize,
}

impl Processor {
	pub fn new(config: EngineConfig) -> Self {
		Self {
			config,
			operations: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_operation(mut self, provider: Arc<dyn OperationProvider>) -> Self {
		self.operations.push(provider);
		self
	}

	#[must_use]
	pub fn with_operations(mut self, providers: impl IntoIterator<Item = Arc<dyn OperationProvider>>) -> Self {
		self.operations.extend(providers);
		self
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn operations(&self) -> &[Arc<dyn OperationProvider>] {
		&self.operations
	}

	/// Transform `source` into `target`.
	pub fn run<'a>(&self, source: impl Read + 'a, target: impl Write + 'a) -> StencilResult<ProcessOutcome> {
		self.run_with_buffer_size(source, target, DEFAULT_BUFFER_SIZE)
	}

	/// Transform an in-memory input.
	pub fn process_bytes(&self, input: &[u8]) -> StencilResult<Vec<u8>> {
		let mut output = Vec::new();
		self.run(input, &mut output)?;

		Ok(output)
	}

	pub fn run_with_buffer_size<'a>(
		&self,
		source: impl Read + 'a,
		target: impl Write + 'a,
		buffer_size: usize,
	) -> StencilResult<ProcessOutcome> {
		let mut state = ProcessorState::new(source, target, self.config.clone(), buffer_size)?;
		let mut operations: Vec<Box<dyn Operation>> = Vec::with_capacity(self.operations.len());

		for provider in &self.operations {
			match provider.get_operation(&mut state)? {
				Some(operation) => operations.push(operation),
				None => debug!(id = ?provider.id(), "provider produced no operation"),
			}
		}

		let mut trie = TokenTrie::new();
		let mut owners = Vec::new();
		for (operation, realized) in operations.iter().enumerate() {
			for (token, value) in realized.tokens().iter().enumerate() {
				trie.add_token(value.clone());
				owners.push(Owner { operation, token });
			}
		}

		debug!(
			encoding = %state.encoding(),
			operations = operations.len(),
			tokens = trie.len(),
			"starting run"
		);

		drive(&mut state, &trie, &owners, &mut operations)?;

		let (config, encoding, bytes_written) = state.finish()?;
		Ok(ProcessOutcome {
			encoding,
			variables: config.variables,
			flags: config.flags,
			bytes_written,
		})
	}
}

/// The scan loop: feed bytes to the merged evaluator, copy unmatched bytes
/// through and hand matches to their owners.
fn drive(
	state: &mut ProcessorState<'_>,
	trie: &TokenTrie,
	owners: &[Owner],
	operations: &mut [Box<dyn Operation>],
) -> StencilResult<()> {
	let mut evaluator = trie.evaluator();
	// Absolute offset of the first input byte not yet written or consumed.
	let mut emitted = state.absolute_position();

	loop {
		if state.position() >= state.length() {
			let keep = evaluator
				.oldest_required_sequence()
				.unwrap_or_else(|| state.absolute_position());
			state.flush_range(emitted, keep)?;
			emitted = emitted.max(keep);

			let keep_from = emitted.saturating_sub(state.sequence_number()) as usize;
			if state.advance_buffer(keep_from)? {
				continue;
			}

			match evaluator.try_finalize() {
				Some(found) => {
					emitted = dispatch(state, trie, owners, operations, emitted, found)?;
					evaluator.reset();
					continue;
				}
				None => {
					state.flush_range(emitted, state.absolute_position())?;
					return Ok(());
				}
			}
		}

		let sequence = state.absolute_position();
		let byte = state.buffer()[state.position()];
		state.set_position(state.position() + 1);

		if let Some(found) = evaluator.accept(byte, sequence) {
			emitted = dispatch(state, trie, owners, operations, emitted, found)?;
			evaluator.reset();
		}
	}
}

/// Hand one match to its operation and return the new `emitted` offset.
fn dispatch(
	state: &mut ProcessorState<'_>,
	trie: &TokenTrie,
	owners: &[Owner],
	operations: &mut [Box<dyn Operation>],
	emitted: u64,
	found: TrieMatch,
) -> StencilResult<u64> {
	let (Some(token), Some(owner)) = (trie.token(found.token), owners.get(found.token)) else {
		return Ok(emitted);
	};

	let literal_start = found.start + token.start() as u64;
	state.flush_range(emitted, literal_start)?;
	state.set_absolute_position(found.start + token.end() as u64);

	trace!(
		operation = owner.operation,
		token = owner.token,
		offset = literal_start,
		"token matched"
	);

	let extra = operations[owner.operation].handle_match(state, owner.token)?;
	state.advance_cursor(extra)?;

	Ok(state.absolute_position())
}
