use std::io::Read;
use std::sync::Arc;

use crate::*;

/// Hands out at most `chunk` bytes per read so that every refill path of the
/// processor is exercised.
pub struct ChunkedReader<'a> {
	data: &'a [u8],
	chunk: usize,
}

impl<'a> ChunkedReader<'a> {
	pub fn new(data: &'a [u8], chunk: usize) -> Self {
		Self { data, chunk }
	}
}

impl Read for ChunkedReader<'_> {
	fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
		let count = self.chunk.min(buffer.len()).min(self.data.len());
		buffer[..count].copy_from_slice(&self.data[..count]);
		self.data = &self.data[count..];
		Ok(count)
	}
}

pub fn to_text(bytes: Vec<u8>) -> StencilResult<String> {
	String::from_utf8(bytes).map_err(|_| {
		StencilError::Decode {
			encoding: Encoding::Utf8.name().to_string(),
		}
	})
}

pub fn process(processor: &Processor, input: &str) -> StencilResult<String> {
	to_text(processor.process_bytes(input.as_bytes())?)
}

pub fn process_chunked(
	processor: &Processor,
	input: &str,
	chunk: usize,
	buffer_size: usize,
) -> StencilResult<String> {
	let mut output = Vec::new();
	processor.run_with_buffer_size(ChunkedReader::new(input.as_bytes(), chunk), &mut output, buffer_size)?;
	to_text(output)
}

pub fn processor_with(provider: impl OperationProvider + 'static) -> Processor {
	Processor::new(EngineConfig::new()).with_operation(Arc::new(provider))
}

pub fn brace_tokens() -> ConditionalTokens {
	ConditionalTokens::new()
		.with_if("{if:")
		.with_else_if("{elseif:")
		.with_else("{else}")
		.with_end_if("{endif}")
}

pub fn brace_evaluator() -> BooleanExpressionEvaluator {
	BooleanExpressionEvaluator::new(["}"]).consuming_terminator()
}

pub fn brace_conditional() -> Conditional {
	Conditional::new(brace_tokens(), brace_evaluator())
}

pub fn line_conditional() -> Conditional {
	let tokens = ConditionalTokens::new()
		.with_if("#if ")
		.with_else_if("#elseif ")
		.with_else("#else")
		.with_end_if("#endif");

	Conditional::new(tokens, BooleanExpressionEvaluator::line()).with_whole_line(true)
}

pub fn sample_variables() -> VariableCollection {
	VariableCollection::new()
		.with("name", "demo")
		.with("count", 3)
		.with("enabled", true)
		.with("empty", "")
		.with("disabled", "false")
}

/// A template mixing most operations, used to compare runs with different
/// refill patterns.
pub fn mixed_processor() -> Processor {
	let config = EngineConfig::new()
		.with_variable("name", "demo")
		.with_variable_format("${{name}}");

	Processor::new(config)
		.with_operation(Arc::new(brace_conditional().with_trim_whitespace(true)))
		.with_operation(Arc::new(Replacement::new("PLACEHOLDER", "value")))
		.with_operation(Arc::new(Region::new("<<", ">>").with_include(false)))
		.with_operation(Arc::new(BalancedNesting::new("<!--", "-->", "-- >")))
		.with_operation(Arc::new(ExpandVariables::new().with_name("missing")))
		.with_operation(Arc::new(PositionTracker::new("@@", "mark")))
}

pub const MIXED_INPUT: &str = "start PLACEHOLDER ${name}\n{if:name == \"demo\"} yes {if:false}no{else}nested{endif} \
                               {elseif:true}skipped{else}never{endif}\n<<dropped PLACEHOLDER>>kept <!-- a <!-- b -- > c -- \
                               >\n${missing} @@ PLACEHOLDEX PLACEHOLDER\n";
