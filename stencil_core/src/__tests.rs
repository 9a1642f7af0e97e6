use std::io::Cursor;
use std::io::Read;
use std::sync::Arc;

use rstest::rstest;
use serde_json::json;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;

fn token(value: &str) -> Token {
	TokenConfig::literal(value)
		.to_token(Encoding::Utf8)
		.unwrap_or_else(|e| panic!("invalid token `{value}`: {e}"))
}

fn feed(evaluator: &mut TrieEvaluator<'_>, input: &[u8]) -> Vec<TrieMatch> {
	input
		.iter()
		.enumerate()
		.filter_map(|(index, byte)| evaluator.accept(*byte, index as u64))
		.collect()
}

fn echo_include() -> Include {
	Include::new(
		"#include(",
		")",
		|location: &str| -> std::io::Result<Box<dyn Read>> {
			Ok(Box::new(Cursor::new(format!("<{location}>").into_bytes())))
		},
	)
}

#[test]
fn trie_prefers_leftmost_then_longest() {
	let trie = TokenTrie::from_tokens([token("ab"), token("abcd"), token("bc")]);
	let mut evaluator = trie.evaluator();

	let matches = feed(&mut evaluator, b"abcd");
	assert_eq!(
		matches,
		vec![TrieMatch {
			token: 1,
			start: 0,
			end: 4
		}]
	);
}

#[test]
fn trie_confirms_shorter_match_once_longer_one_fails() {
	let trie = TokenTrie::from_tokens([token("ab"), token("abcd")]);
	let mut evaluator = trie.evaluator();

	let matches = feed(&mut evaluator, b"abcx");
	assert_eq!(
		matches,
		vec![TrieMatch {
			token: 0,
			start: 0,
			end: 2
		}]
	);
}

#[test]
fn trie_finalizes_pending_match_at_end_of_input() {
	let trie = TokenTrie::from_tokens([token("ab"), token("abcd")]);
	let mut evaluator = trie.evaluator();

	assert!(feed(&mut evaluator, b"abc").is_empty());
	assert_eq!(evaluator.oldest_required_sequence(), Some(0));
	assert_eq!(evaluator.bytes_to_keep_in_buffer(3), 3);
	assert_eq!(
		evaluator.try_finalize(),
		Some(TrieMatch {
			token: 0,
			start: 0,
			end: 2
		})
	);
	assert_eq!(evaluator.try_finalize(), None);
	assert_eq!(evaluator.bytes_to_keep_in_buffer(3), 0);
}

#[test]
fn trie_tracks_lengths_and_duplicates() {
	let mut trie = TokenTrie::new();
	assert!(trie.is_empty());
	assert_eq!(trie.add_token(token("\r\n")), 0);
	assert_eq!(trie.add_token(token("\n")), 1);
	assert_eq!(trie.add_token(token("\n")), 2);

	assert_eq!(trie.len(), 3);
	assert_eq!(trie.min_length(), 1);
	assert_eq!(trie.max_length(), 2);
	assert_eq!(trie.match_at(b"a\r\nb", 1), Some(0));
	assert_eq!(trie.match_at(b"a\nb", 1), Some(1));
	assert_eq!(trie.match_at(b"a\nb", 0), None);
	assert_eq!(trie.match_suffix(b"line\r\n"), Some(0));
	assert_eq!(trie.match_suffix(b"line"), None);
}

#[test]
fn trie_get_operation_advances_position() {
	let trie = TokenTrie::from_tokens([token("  "), token(" ")]);
	let mut position = 1;

	assert_eq!(trie.get_operation(b"x   y", &mut position), Some(0));
	assert_eq!(position, 3);
	assert_eq!(trie.get_operation(b"x   y", &mut position), Some(1));
	assert_eq!(position, 4);
	assert_eq!(trie.get_operation(b"x   y", &mut position), None);
	assert_eq!(position, 4);
}

#[test]
fn token_requires_a_literal() {
	assert!(matches!(Token::new(Vec::new()), Err(StencilError::InvalidToken(_))));
	assert!(matches!(
		TokenConfig::literal("").with_before("x").to_token(Encoding::Utf8),
		Err(StencilError::InvalidToken(_))
	));
}

#[test]
fn token_context_is_matched_but_not_replaced() -> StencilResult<()> {
	let pattern = TokenConfig::literal("x").with_before("(").with_after(")");
	let processor = processor_with(Replacement::new(pattern, "y"));

	assert_eq!(process(&processor, "x (x) (x")?, "x (y) (x");
	Ok(())
}

#[rstest]
#[case::utf8(&[0xEF, 0xBB, 0xBF, b'a'], Some((Encoding::Utf8, 3)))]
#[case::utf16le(&[0xFF, 0xFE, b'a', 0], Some((Encoding::Utf16Le, 2)))]
#[case::utf16be(&[0xFE, 0xFF, 0, b'a'], Some((Encoding::Utf16Be, 2)))]
#[case::utf32le(&[0xFF, 0xFE, 0, 0], Some((Encoding::Utf32Le, 4)))]
#[case::utf32be(&[0, 0, 0xFE, 0xFF], Some((Encoding::Utf32Be, 4)))]
#[case::none(b"abc", None)]
fn detect_byte_order_mark(#[case] bytes: &[u8], #[case] expected: Option<(Encoding, usize)>) {
	assert_eq!(Encoding::detect(bytes), expected);
}

#[rstest]
#[case::canonical("utf-8", Encoding::Utf8)]
#[case::compact("UTF8", Encoding::Utf8)]
#[case::unicode("unicode", Encoding::Utf16Le)]
#[case::underscore("utf_16be", Encoding::Utf16Be)]
#[case::utf32("utf-32", Encoding::Utf32Le)]
fn parse_encoding_names(#[case] name: &str, #[case] expected: Encoding) -> StencilResult<()> {
	assert_eq!(name.parse::<Encoding>()?, expected);
	Ok(())
}

#[test]
fn unknown_encoding_is_rejected() {
	assert!(matches!(
		"latin-1".parse::<Encoding>(),
		Err(StencilError::UnsupportedEncoding(_))
	));
}

#[test]
fn utf16_input_is_processed_in_its_own_encoding() -> StencilResult<()> {
	let processor = processor_with(Replacement::new("x", "yz"));
	let mut input = Encoding::Utf16Le.preamble().to_vec();
	input.extend(Encoding::Utf16Le.encode("axb"));

	let mut output = Vec::new();
	let outcome = processor.run(input.as_slice(), &mut output)?;

	let mut expected = Encoding::Utf16Le.preamble().to_vec();
	expected.extend(Encoding::Utf16Le.encode("ayzb"));
	assert_eq!(output, expected);
	assert_eq!(outcome.encoding, Encoding::Utf16Le);
	assert_eq!(outcome.bytes_written, expected.len() as u64);

	Ok(())
}

#[test]
fn configured_encoding_applies_without_byte_order_mark() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new().with_encoding(Encoding::Utf16Be))
		.with_operation(Arc::new(Replacement::new("x", "y")));

	let output = processor.process_bytes(&Encoding::Utf16Be.encode("xax"))?;
	assert_eq!(output, Encoding::Utf16Be.encode("yay"));

	Ok(())
}

#[rstest]
#[case::empty("")]
#[case::plain("nothing to see here")]
#[case::near_misses("{i {if {else {endi PLACEHOLDE <!- -- <")]
#[case::multiline("line one\r\nline two\n\tindented\r")]
fn pass_through_is_identity(#[case] input: &str) -> StencilResult<()> {
	assert_eq!(process(&mixed_processor(), input)?, input);
	Ok(())
}

#[test]
fn pass_through_large_input_with_partial_matches() -> StencilResult<()> {
	let input = "PLACEHOLDE{i<<x<!-".repeat(2_000);
	let processor = processor_with(Replacement::new("PLACEHOLDER", "value"));

	assert_eq!(process_chunked(&processor, &input, 7, 16)?, input);
	assert_eq!(process(&processor, &input)?, input);
	Ok(())
}

#[test]
fn output_does_not_depend_on_refill_size() -> StencilResult<()> {
	let processor = mixed_processor();
	let expected = process(&processor, MIXED_INPUT)?;

	assert_eq!(
		expected,
		"start value demo\nyesnestedkept <!-- a <!-- b -- > c -->\nnull @@ PLACEHOLDEX value\n"
	);

	for chunk in 1..=9 {
		for buffer_size in [1, 2, 5, 16, DEFAULT_BUFFER_SIZE] {
			assert_eq!(
				process_chunked(&processor, MIXED_INPUT, chunk, buffer_size)?,
				expected,
				"chunk {chunk}, buffer {buffer_size}"
			);
		}
	}

	Ok(())
}

#[test]
fn processor_is_shareable_across_threads() -> StencilResult<()> {
	let processor = mixed_processor();
	let expected = process(&processor, MIXED_INPUT)?;

	let shared = &processor;
	let outputs = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..4)
			.map(|_| scope.spawn(move || process(shared, MIXED_INPUT)))
			.collect();
		handles
			.into_iter()
			.map(|handle| handle.join().unwrap_or_else(|_| panic!("worker panicked")))
			.collect::<StencilResult<Vec<_>>>()
	})?;

	for output in outputs {
		assert_eq!(output, expected);
	}

	Ok(())
}

#[rstest]
#[case::if_true("{if:true}A{else}B{endif}", "A")]
#[case::if_false("{if:false}A{else}B{endif}", "B")]
#[case::elseif("{if:false}A{elseif:true}B{else}C{endif}", "B")]
#[case::all_false("{if:false}A{elseif:false}B{endif}", "")]
#[case::first_taken_skips_rest("{if:true}A{elseif:true}B{else}C{endif}", "A")]
#[case::nested("{if:true}{if:false}X{else}Y{endif}Z{endif}", "YZ")]
#[case::nested_in_skipped("{if:false}{if:true}X{endif}Y{else}Z{endif}", "Z")]
#[case::nested_elseif_in_skipped("{if:false}{if:false}X{elseif:true}Y{endif}{elseif:true}Z{endif}", "Z")]
#[case::surrounding("a{if:true}b{endif}c", "abc")]
#[case::sequential("{if:false}a{endif}{if:true}b{endif}", "b")]
#[case::deep("{if:true}{if:true}{if:true}{if:false}x{else}y{endif}{endif}{endif}{endif}", "y")]
fn conditional_branches(#[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	assert_eq!(process(&processor_with(brace_conditional()), input)?, expected);
	Ok(())
}

#[rstest]
#[case::string("{if:name == \"demo\"}yes{else}no{endif}", "yes")]
#[case::number("{if:count == 3}yes{else}no{endif}", "yes")]
#[case::negated("{if:!enabled}yes{else}no{endif}", "no")]
#[case::missing("{if:missing}yes{else}no{endif}", "no")]
#[case::combined("{if:(empty || enabled) && name != 'other'}yes{else}no{endif}", "yes")]
fn conditional_reads_variables(#[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new().with_variables(sample_variables()))
		.with_operation(Arc::new(brace_conditional()));

	assert_eq!(process(&processor, input)?, expected);
	Ok(())
}

fn has_on_variable(state: &mut ProcessorState<'_>) -> StencilResult<bool> {
	Ok(state.variables().contains_key("on"))
}

#[test]
fn conditional_accepts_function_evaluators() -> StencilResult<()> {
	let tokens = ConditionalTokens::new()
		.with_if("<if>")
		.with_else("<else>")
		.with_end_if("<end>");
	let conditional = Arc::new(Conditional::new(tokens, has_on_variable));

	let off = Processor::new(EngineConfig::new()).with_operation(conditional.clone());
	let on = Processor::new(EngineConfig::new().with_variable("on", true)).with_operation(conditional);

	assert_eq!(process(&off, "<if>A<else>B<end>")?, "B");
	assert_eq!(process(&on, "<if>A<else>B<end>")?, "A");
	Ok(())
}

#[test]
fn conditional_accepts_several_spellings_per_kind() -> StencilResult<()> {
	let tokens = brace_tokens().with_if("//#if(").with_end_if("//#endif");
	let evaluator = BooleanExpressionEvaluator::new(["}", ")"]).consuming_terminator();
	let processor = processor_with(Conditional::new(tokens, evaluator));

	assert_eq!(process(&processor, "//#if(false)a{else}b//#endif")?, "b");
	Ok(())
}

#[rstest]
#[case::taken(
	"a\n  #if true\nb\n  #else\nc\n#endif\nd\n",
	"a\nb\nd\n"
)]
#[case::not_taken(
	"a\n#if false\nb\n#else\nc\n#endif\nd\n",
	"a\nc\nd\n"
)]
#[case::elseif(
	"#if false\nb\n#elseif true\nc\n#endif\n",
	"c\n"
)]
#[case::crlf(
	"a\r\n#if true\r\nb\r\n#endif\r\nc",
	"a\r\nb\r\nc"
)]
fn conditional_whole_line(#[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	assert_eq!(process(&processor_with(line_conditional()), input)?, expected);
	Ok(())
}

#[test]
fn whole_line_conditionals_survive_small_refills() -> StencilResult<()> {
	let processor = processor_with(line_conditional());
	let input = "top\n#if true\n  outer\n  #if false\n  skipped\n  #else\n  inner\n  #endif\n#elseif \
	             true\nnever\n#if true\nx\n#endif\n#endif\ntail\n";
	let expected = "top\n  outer\n  inner\ntail\n";

	assert_eq!(process(&processor, input)?, expected);

	for chunk in 1..=7 {
		for buffer_size in [1, 3, 8, DEFAULT_BUFFER_SIZE] {
			assert_eq!(
				process_chunked(&processor, input, chunk, buffer_size)?,
				expected,
				"chunk {chunk}, buffer {buffer_size}"
			);
		}
	}

	Ok(())
}

#[test]
fn conditional_trims_whitespace() -> StencilResult<()> {
	let processor = processor_with(brace_conditional().with_trim_whitespace(true));

	assert_eq!(process(&processor, "x {if:true} y {endif} z")?, "xyz");
	assert_eq!(process(&processor, "x\t{if:false} y {else}\n z {endif}\n")?, "x z");
	Ok(())
}

#[test]
fn actionable_branch_toggles_other_operations() -> StencilResult<()> {
	let tokens = brace_tokens()
		.with_actionable_if("{aif:")
		.with_actionable_operation("strip");
	let processor = Processor::new(EngineConfig::new())
		.with_operation(Arc::new(Conditional::new(tokens, brace_evaluator())))
		.with_operation(Arc::new(
			Replacement::new("//", "").with_id("strip").with_initial_state(false),
		));

	let mut output = Vec::new();
	let outcome = processor.run(&b"//a{aif:true}//b{if:true}//c{endif}//d{endif}//e"[..], &mut output)?;

	assert_eq!(to_text(output)?, "//abcd//e");
	assert_eq!(outcome.flags.get("strip"), Some(&false));
	Ok(())
}

#[test]
#[traced_test]
fn unbalanced_endif_is_emitted_and_logged() -> StencilResult<()> {
	let processor = processor_with(brace_conditional());

	assert_eq!(process(&processor, "a{endif}b{else}c")?, "a{endif}b{else}c");
	assert!(logs_contain("without an open `if`"));
	Ok(())
}

#[test]
#[traced_test]
fn missing_endif_closes_at_end_of_input() -> StencilResult<()> {
	let processor = processor_with(brace_conditional());

	assert_eq!(process(&processor, "a{if:false}b{if:true}c")?, "a");
	assert!(logs_contain("missing its `endif`"));
	assert_eq!(process(&processor, "a{if:true}b{else}c")?, "ab");
	Ok(())
}

#[test]
#[traced_test]
fn faulted_condition_is_false() -> StencilResult<()> {
	let processor = processor_with(brace_conditional());

	assert_eq!(process(&processor, "{if:(}A{else}B{endif}")?, "B");
	assert!(logs_contain("condition failed to evaluate"));
	Ok(())
}

#[test]
fn conditional_configuration_errors() {
	let missing_end = processor_with(Conditional::new(
		ConditionalTokens::new().with_if("{if:"),
		brace_evaluator(),
	));
	assert!(matches!(
		missing_end.process_bytes(b"x"),
		Err(StencilError::InvalidOperation { .. })
	));

	let ambiguous = processor_with(Conditional::new(brace_tokens().with_else("{endif}"), brace_evaluator()));
	assert!(matches!(
		ambiguous.process_bytes(b"x"),
		Err(StencilError::InvalidOperation { .. })
	));
}

#[rstest]
#[case::literal_true("true", true)]
#[case::literal_false("false", false)]
#[case::not("!false", true)]
#[case::double_not("!!enabled", true)]
#[case::equal_string("name == \"demo\"", true)]
#[case::single_quotes("name == 'demo'", true)]
#[case::not_equal("name != \"demo\"", false)]
#[case::equal_number("count == 3.0", true)]
#[case::number_string("count == \"3\"", true)]
#[case::bool_string("enabled == \"TRUE\"", true)]
#[case::empty_string("empty", false)]
#[case::false_string("disabled", false)]
#[case::missing("missing", false)]
#[case::missing_is_null("missing == null", true)]
#[case::precedence("false && false || true", true)]
#[case::grouping("false && (false || true)", false)]
#[case::escaped("name != \"de\\\"mo\"", true)]
fn evaluate_expressions(#[case] text: &str, #[case] expected: bool) -> Result<(), ExpressionError> {
	assert_eq!(evaluate_expression(text, &sample_variables())?, expected);
	Ok(())
}

#[rstest]
#[case::empty("  ", ExpressionError::Empty)]
#[case::dangling("enabled &&", ExpressionError::UnexpectedEnd)]
#[case::unclosed("(enabled", ExpressionError::UnexpectedEnd)]
#[case::trailing("enabled name", ExpressionError::UnexpectedToken("name".to_string()))]
#[case::unknown("#", ExpressionError::UnexpectedToken("#".to_string()))]
fn reject_malformed_expressions(#[case] text: &str, #[case] expected: ExpressionError) {
	assert_eq!(evaluate_expression(text, &sample_variables()), Err(expected));
}

#[rstest]
#[case::excluded(Region::new("<<", ">>").with_include(false), "a<<hidden>>b", "ab")]
#[case::included(Region::new("<<", ">>"), "a<<shown>>b", "ashownb")]
#[case::toggle_excluded(Region::new("%%", "%%").with_include(false), "a%%x%%b%%y%%c", "abc")]
#[case::toggle_included(Region::new("%%", "%%"), "a%%x%%b", "axb")]
#[case::whole_line(
	Region::new("<<", ">>").with_include(false).with_whole_line(true),
	"a\n  <<\nhidden\n>>\nb\n",
	"a\nb\n"
)]
#[case::whole_line_same_line(
	Region::new("<<", ">>").with_include(false).with_whole_line(true),
	"a\n<<hidden>>\nb\nc\n",
	"a\nb\nc\n"
)]
#[case::whole_line_included(
	Region::new("<<", ">>").with_whole_line(true),
	"a\n  <<\nshown\n>>\nb\n",
	"a\nshown\nb\n"
)]
#[case::trimmed(
	Region::new("<<", ">>").with_trim_whitespace(true),
	"a <<  b>> c",
	"abc"
)]
fn region_markers(#[case] region: Region, #[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	assert_eq!(process(&processor_with(region), input)?, expected);
	Ok(())
}

#[test]
#[traced_test]
fn region_end_without_start_is_kept() -> StencilResult<()> {
	let processor = processor_with(Region::new("<<", ">>"));

	assert_eq!(process(&processor, "a>>b")?, "a>>b");
	assert!(logs_contain("region end without a start"));
	Ok(())
}

#[test]
#[traced_test]
fn unterminated_excluded_region_drops_the_rest() -> StencilResult<()> {
	let processor = processor_with(Region::new("<<", ">>").with_include(false));

	assert_eq!(process_chunked(&processor, "keep<<drop > drop", 2, 4)?, "keep");
	assert!(logs_contain("missing its end marker"));
	Ok(())
}

#[rstest]
#[case::pseudo_closes_at_depth_one("<!-- x -- >", "<!-- x -->")]
#[case::nested_pseudo_kept("<!-- a <!-- b -- > c -->", "<!-- a <!-- b -- > c -->")]
#[case::nested_pseudo_then_pseudo("<!-- a <!-- b -- > c -- >", "<!-- a <!-- b -- > c -->")]
#[case::pseudo_outside("x -- >", "x -- >")]
fn balanced_nesting(#[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	let processor = processor_with(BalancedNesting::new("<!--", "-->", "-- >"));

	assert_eq!(process(&processor, input)?, expected);
	Ok(())
}

#[test]
#[traced_test]
fn balanced_nesting_underflow_is_logged() -> StencilResult<()> {
	let processor = processor_with(BalancedNesting::new("<!--", "-->", "-- >"));

	assert_eq!(process(&processor, "x --> <!-- y -- >")?, "x --> <!-- y -->");
	assert!(logs_contain("closing marker without a matching start"));
	Ok(())
}

#[test]
fn balanced_nesting_reset_flag() -> StencilResult<()> {
	let nesting = BalancedNesting::new("<!--", "-->", "-- >").with_reset_flag("reset");
	let processor = Processor::new(EngineConfig::new().with_flag("reset", true)).with_operation(Arc::new(nesting));

	let mut output = Vec::new();
	let outcome = processor.run(&b"<!-- -- >"[..], &mut output)?;

	assert_eq!(to_text(output)?, "<!-- -->");
	assert_eq!(outcome.flags.get("reset"), Some(&false));
	Ok(())
}

#[test]
fn balanced_nesting_rejects_identical_tokens() {
	let processor = processor_with(BalancedNesting::new("--", "--", "- -"));

	assert!(matches!(
		processor.process_bytes(b""),
		Err(StencilError::InvalidOperation { .. })
	));
}

#[test]
fn include_reads_files_relative_to_root() -> StencilResult<()> {
	let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create tempdir: {e}"));
	std::fs::write(dir.path().join("part.txt"), "inner")?;
	let mut utf16 = Encoding::Utf16Le.preamble().to_vec();
	utf16.extend(Encoding::Utf16Le.encode("héllo"));
	std::fs::write(dir.path().join("wide.txt"), utf16)?;

	let processor = processor_with(Include::new("#include(", ")", FileIncludeSource::new(dir.path())));

	assert_eq!(process(&processor, "a#include(part.txt)b")?, "ainnerb");
	assert_eq!(process(&processor, "[#include( wide.txt )]")?, "[héllo]");
	assert_eq!(process_chunked(&processor, "#include(part.txt)#include(part.txt)", 1, 1)?, "innerinner");
	Ok(())
}

#[test]
fn include_missing_source_is_an_error() {
	let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create tempdir: {e}"));
	let processor = processor_with(Include::new("#include(", ")", FileIncludeSource::new(dir.path())));

	let result = processor.process_bytes(b"#include(missing.txt)");
	assert!(matches!(
		result,
		Err(StencilError::IncludeSource { ref location, .. }) if location == "missing.txt"
	));
}

#[test]
fn include_uses_custom_sources() -> StencilResult<()> {
	assert_eq!(process(&processor_with(echo_include()), "x#include(name)y")?, "x<name>y");
	Ok(())
}

#[test]
fn include_grows_its_buffer_for_large_content() -> StencilResult<()> {
	let content = "0123456789".repeat(2_000);
	let expected = content.clone();
	let source = move |_: &str| -> std::io::Result<Box<dyn Read>> {
		Ok(Box::new(Cursor::new(content.clone().into_bytes())))
	};

	let output = process(&processor_with(Include::new("[[", "]]", source)), "[[big]]")?;
	assert_eq!(output.len(), expected.len());
	assert_eq!(output, expected);
	Ok(())
}

#[test]
fn replacement_identical_to_match_is_inert() -> StencilResult<()> {
	let mut state = ProcessorState::new(&b""[..], std::io::sink(), EngineConfig::new(), DEFAULT_BUFFER_SIZE)?;

	assert!(Replacement::new("same", "same").get_operation(&mut state)?.is_none());
	assert!(Replacement::new("same", "other").get_operation(&mut state)?.is_some());
	Ok(())
}

#[test]
fn replacement_substitutes_every_occurrence() -> StencilResult<()> {
	let processor = processor_with(Replacement::new("cat", "dog"));

	assert_eq!(process(&processor, "cat concat cats")?, "dog condog dogs");
	Ok(())
}

#[test]
fn set_flag_switches_operations() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new())
		.with_operation(Arc::new(
			SetFlag::new("loud")
				.with_on("<on>")
				.with_on_no_emit("[[on]]")
				.with_off_no_emit("[[off]]")
				.with_default(false),
		))
		.with_operation(Arc::new(Replacement::new("x", "X").with_id("loud")));

	let mut output = Vec::new();
	let outcome = processor.run(&b"x[[on]]x[[off]]x<on>x"[..], &mut output)?;

	assert_eq!(to_text(output)?, "xXx<on>X");
	assert_eq!(outcome.flags.get("loud"), Some(&true));
	Ok(())
}

#[test]
fn set_flag_caller_value_beats_default() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new().with_flag("loud", true))
		.with_operation(Arc::new(SetFlag::new("loud").with_off("<off>").with_default(false)))
		.with_operation(Arc::new(Replacement::new("x", "X").with_id("loud")));

	assert_eq!(process(&processor, "x<off>x")?, "X<off>x");
	Ok(())
}

#[test]
fn set_flag_no_emit_markers_are_removed_even_when_suppressed() -> StencilResult<()> {
	let set_flag = SetFlag::new("other")
		.with_on_no_emit("[[on]]")
		.with_whole_line(true)
		.with_id("flags");
	let processor = Processor::new(EngineConfig::new().with_flag("flags", false)).with_operation(Arc::new(set_flag));

	let mut output = Vec::new();
	let outcome = processor.run(&b"a\n  [[on]]\nb"[..], &mut output)?;

	assert_eq!(to_text(output)?, "a\nb");
	assert_eq!(outcome.flags.get("other"), None);
	Ok(())
}

#[test]
fn set_flag_requires_markers() {
	assert!(matches!(
		processor_with(SetFlag::new("x")).process_bytes(b""),
		Err(StencilError::InvalidOperation { .. })
	));
}

#[rstest]
#[case::in_order("ab", "aB")]
#[case::interrupted_by_text("a b", "a B")]
#[case::out_of_order("ba", "ba")]
#[case::restarted("aab", "aaB")]
#[case::completed_sequence_resets("abb", "aBb")]
#[case::reset_token("axb", "axb")]
#[case::deeper("abc", "aBC")]
fn phased_operation(#[case] input: &str, #[case] expected: &str) -> StencilResult<()> {
	let phases = Phase::new("a").with_reset("x").with_next(
		Phase::new("b")
			.with_replacement("B")
			.with_next(Phase::new("c").with_replacement("C")),
	);
	let processor = processor_with(PhasedOperation::new([phases]));

	assert_eq!(process(&processor, input)?, expected);
	Ok(())
}

#[test]
fn position_tracker_records_output_offsets() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new())
		.with_operation(Arc::new(Replacement::new("long", "l")))
		.with_operation(Arc::new(PositionTracker::new("@", "at")));

	let mut output = Vec::new();
	let outcome = processor.run(&b"long long @ tail"[..], &mut output)?;

	assert_eq!(to_text(output)?, "l l @ tail");
	assert_eq!(outcome.variables.get("at"), Some(&json!(4)));
	Ok(())
}

#[test]
fn expand_variables_renders_values() -> StencilResult<()> {
	let config = EngineConfig::new()
		.with_variables(sample_variables())
		.with_variable_format("${{name}}");
	let processor = Processor::new(config).with_operation(Arc::new(ExpandVariables::new().with_name("missing")));

	assert_eq!(
		process(&processor, "${name}-${count}-${enabled}-${missing}-${other}")?,
		"demo-3-true-null-${other}"
	);
	Ok(())
}

#[test]
fn expand_variables_format_override() -> StencilResult<()> {
	let config = EngineConfig::new().with_variable("project", "demo");
	let processor = Processor::new(config).with_operation(Arc::new(ExpandVariables::new().with_format("%{name}%")));

	assert_eq!(process(&processor, "project %project%")?, "project demo");
	Ok(())
}

#[test]
fn expand_variables_without_variables_is_inert() -> StencilResult<()> {
	let mut state = ProcessorState::new(&b""[..], std::io::sink(), EngineConfig::new(), DEFAULT_BUFFER_SIZE)?;

	assert!(ExpandVariables::new().get_operation(&mut state)?.is_none());
	Ok(())
}

#[rstest]
#[case::conditional(Arc::new(brace_conditional().with_id("op")), "{if:false}A{else}B{endif}")]
#[case::region(Arc::new(Region::new("<<", ">>").with_include(false).with_id("op")), "a<<b>>c")]
#[case::balanced_nesting(Arc::new(BalancedNesting::new("<!--", "-->", "-- >").with_id("op")), "<!-- x -- >")]
#[case::include(Arc::new(echo_include().with_id("op")), "#include(x)")]
#[case::replacement(Arc::new(Replacement::new("x", "y").with_id("op")), "axb")]
#[case::set_flag(Arc::new(SetFlag::new("f").with_on("<on>").with_id("op")), "a<on>b")]
#[case::phased(Arc::new(PhasedOperation::new([Phase::new("a").with_replacement("A")]).with_id("op")), "bab")]
#[case::position_tracker(Arc::new(PositionTracker::new("@", "at").with_id("op")), "a@b")]
#[case::expand_variables(Arc::new(ExpandVariables::new().with_name("name").with_id("op")), "name")]
fn disabled_operations_emit_tokens_unchanged(
	#[case] provider: Arc<dyn OperationProvider>,
	#[case] input: &str,
) -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new().with_flag("op", false)).with_operation(provider);

	assert_eq!(process(&processor, input)?, input);
	Ok(())
}

#[test]
fn initial_state_disables_until_enabled() -> StencilResult<()> {
	let replacement = Replacement::new("x", "y").with_id("op").with_initial_state(false);

	let default = processor_with(replacement.clone());
	assert_eq!(process(&default, "x")?, "x");

	let enabled = Processor::new(EngineConfig::new().with_flag("op", true)).with_operation(Arc::new(replacement));
	assert_eq!(process(&enabled, "x")?, "y");
	Ok(())
}

#[test]
fn earlier_operation_wins_identical_tokens() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new())
		.with_operation(Arc::new(Replacement::new("x", "first")))
		.with_operation(Arc::new(Replacement::new("x", "second")));

	assert_eq!(process(&processor, "x")?, "first");
	Ok(())
}

#[test]
fn flag_table_defaults() {
	let mut flags = FlagTable::new();
	assert!(flags.is_enabled(None));
	assert!(flags.is_enabled(Some("")));
	assert!(flags.is_enabled(Some("unset")));

	flags.set("off", false);
	flags.set_if_absent("off", true);
	flags.set_if_absent("on", true);
	assert!(!flags.is_enabled(Some("off")));
	assert!(flags.get_or("on", false));
	assert!(!flags.get_or("unset", false));
}

#[test]
fn variable_rendering() {
	let variables = sample_variables().with("nothing", serde_json::Value::Null);

	assert_eq!(variables.render("name"), "demo");
	assert_eq!(variables.render("count"), "3");
	assert_eq!(variables.render("enabled"), "true");
	assert_eq!(variables.render("nothing"), "null");
	assert_eq!(variables.render("unset"), "null");
}

const CONFIG: &str = r##"
encoding = "utf-8"

[variables]
project = "demo"
version = 2

[flags]
shout = false

[[operations]]
type = "conditional"
if = ["{if:", "#if("]
else = "{else}"
end_if = { value = "{endif}" }
expression = { terminators = ["}", ")"], consume_terminator = true }

[[operations]]
type = "replacement"
match = "PROJECT"
replace = "demo"

[[operations]]
type = "replacement"
match = "!"
replace = "!!!"
id = "shout"

[[operations]]
type = "expand_variables"
format = "${{name}}"
"##;

#[test]
fn config_drives_a_processor() -> StencilResult<()> {
	let config = StencilConfig::from_toml_str(CONFIG)?;
	assert_eq!(config.operations.len(), 4);
	assert_eq!(config.variables.get("version"), Some(&json!(2)));

	let processor = config.processor(std::path::Path::new("."));
	let output = process(
		&processor,
		"{if:project == \"demo\"}PROJECT v${version}!{else}unknown{endif}#if(version == 1)old{endif}",
	)?;

	insta::assert_snapshot!(output, @"demo v2!");
	Ok(())
}

#[test]
fn config_include_resolves_relative_to_root() -> StencilResult<()> {
	let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create tempdir: {e}"));
	std::fs::create_dir(dir.path().join("parts"))?;
	std::fs::write(dir.path().join("parts/header.txt"), "HEADER")?;

	let config = StencilConfig::from_toml_str(
		r#"
[[operations]]
type = "include"
start = "@include "
end = { value = ";" }
root = "parts"
"#,
	)?;
	let processor = config.processor(dir.path());

	assert_eq!(process(&processor, "@include header.txt;\nbody")?, "HEADER\nbody");
	Ok(())
}

#[test]
fn config_discovery_order() -> StencilResult<()> {
	let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create tempdir: {e}"));
	assert!(StencilConfig::load(dir.path())?.is_none());

	std::fs::create_dir(dir.path().join(".config"))?;
	std::fs::write(dir.path().join(".config/stencil.toml"), "variable_format = \"low\"")?;
	std::fs::write(dir.path().join(".stencil.toml"), "variable_format = \"mid\"")?;
	assert_eq!(
		StencilConfig::resolve_path(dir.path()),
		Some(dir.path().join(".stencil.toml"))
	);

	std::fs::write(dir.path().join("stencil.toml"), "variable_format = \"high\"")?;
	let config = StencilConfig::load(dir.path())?.unwrap_or_default();
	assert_eq!(config.variable_format, "high");
	assert_eq!(config.whitespaces, vec![" ".to_string(), "\t".to_string()]);
	Ok(())
}

#[rstest]
#[case::unknown_type("[[operations]]\ntype = \"teleport\"\n")]
#[case::missing_field("[[operations]]\ntype = \"replacement\"\nmatch = \"x\"\n")]
#[case::bad_encoding("encoding = \"latin-1\"\n")]
fn config_parse_errors(#[case] content: &str) {
	assert!(matches!(
		StencilConfig::from_toml_str(content),
		Err(StencilError::ConfigParse(_))
	));
}

#[test]
fn outcome_reports_final_state() -> StencilResult<()> {
	let processor = Processor::new(EngineConfig::new().with_variable("kept", "yes"))
		.with_operation(Arc::new(SetFlag::new("seen").with_on("!")))
		.with_operation(Arc::new(PositionTracker::new("#", "hash")));

	let mut output = Vec::new();
	let outcome = processor.run(&b"ab!c#"[..], &mut output)?;

	assert_eq!(outcome.encoding, Encoding::Utf8);
	assert_eq!(outcome.bytes_written, 5);
	assert_eq!(outcome.flags.get("seen"), Some(&true));
	assert_eq!(outcome.variables.get("kept"), Some(&json!("yes")));
	assert_eq!(outcome.variables.get("hash"), Some(&json!(4)));
	Ok(())
}
