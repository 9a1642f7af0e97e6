use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Deref;
use derive_more::DerefMut;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::Encoding;
use crate::StencilError;
use crate::StencilResult;
use crate::operations::BalancedNesting;
use crate::operations::ConditionalConfig;
use crate::operations::ExpandVariables;
use crate::operations::IncludeConfig;
use crate::operations::OperationProvider;
use crate::operations::PhasedOperation;
use crate::operations::PositionTracker;
use crate::operations::Region;
use crate::operations::Replacement;
use crate::operations::SetFlag;
use crate::processor::Processor;
use crate::variables::VariableCollection;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["stencil.toml", ".stencil.toml", ".config/stencil.toml"];

pub const DEFAULT_WHITESPACES: [&str; 2] = [" ", "\t"];
pub const DEFAULT_LINE_ENDINGS: [&str; 3] = ["\r\n", "\n", "\r"];
pub const DEFAULT_VARIABLE_FORMAT: &str = "{name}";

/// Named booleans that switch operations on and off during a run.
///
/// Reads never fail: a flag nobody has set takes the default supplied by the
/// reader, and an operation without an id is always enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, DerefMut, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FlagTable(BTreeMap<String, bool>);

impl FlagTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_enabled(&self, id: Option<&str>) -> bool {
		match id {
			None | Some("") => true,
			Some(id) => self.get_or(id, true),
		}
	}

	pub fn get_or(&self, name: &str, default: bool) -> bool {
		self.0.get(name).copied().unwrap_or(default)
	}

	pub fn set(&mut self, name: impl Into<String>, value: bool) {
		self.0.insert(name.into(), value);
	}

	/// Set `name` only when no value exists yet, so caller supplied flags beat
	/// operation defaults.
	pub fn set_if_absent(&mut self, name: impl Into<String>, value: bool) {
		self.0.entry(name.into()).or_insert(value);
	}
}

impl<K: Into<String>> FromIterator<(K, bool)> for FlagTable {
	fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
		Self(
			iter.into_iter()
				.map(|(key, value)| (key.into(), value))
				.collect(),
		)
	}
}

/// Everything a run needs besides its operations.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
	/// Encoding assumed when the source carries no byte-order mark.
	pub encoding: Encoding,
	pub whitespaces: Vec<String>,
	pub line_endings: Vec<String>,
	/// Pattern turning a variable key into its token. `{name}` is replaced by
	/// the key.
	pub variable_format: String,
	pub variables: VariableCollection,
	pub flags: FlagTable,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			encoding: Encoding::default(),
			whitespaces: default_whitespaces(),
			line_endings: default_line_endings(),
			variable_format: default_variable_format(),
			variables: VariableCollection::default(),
			flags: FlagTable::default(),
		}
	}
}

impl EngineConfig {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_encoding(mut self, encoding: Encoding) -> Self {
		self.encoding = encoding;
		self
	}

	#[must_use]
	pub fn with_variables(mut self, variables: VariableCollection) -> Self {
		self.variables = variables;
		self
	}

	#[must_use]
	pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.variables.set(key, value);
		self
	}

	#[must_use]
	pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
		self.flags.set(name, value);
		self
	}

	#[must_use]
	pub fn with_variable_format(mut self, format: impl Into<String>) -> Self {
		self.variable_format = format.into();
		self
	}

	#[must_use]
	pub fn with_whitespaces<S: Into<String>>(mut self, whitespaces: impl IntoIterator<Item = S>) -> Self {
		self.whitespaces = whitespaces.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn with_line_endings<S: Into<String>>(mut self, line_endings: impl IntoIterator<Item = S>) -> Self {
		self.line_endings = line_endings.into_iter().map(Into::into).collect();
		self
	}

	pub fn format_variable(&self, key: &str) -> String {
		format_variable(&self.variable_format, key)
	}
}

pub(crate) fn format_variable(format: &str, key: &str) -> String {
	format.replace("{name}", key)
}

fn default_whitespaces() -> Vec<String> {
	DEFAULT_WHITESPACES.iter().map(ToString::to_string).collect()
}

fn default_line_endings() -> Vec<String> {
	DEFAULT_LINE_ENDINGS.iter().map(ToString::to_string).collect()
}

fn default_variable_format() -> String {
	DEFAULT_VARIABLE_FORMAT.to_string()
}

/// Configuration loaded from a `stencil.toml` file.
///
/// ```toml
/// encoding = "utf-8"
/// variable_format = "${name}"
///
/// [variables]
/// project = "demo"
///
/// [flags]
/// comments = true
///
/// [[operations]]
/// type = "replacement"
/// match = "PLACEHOLDER"
/// replace = "demo"
///
/// [[operations]]
/// type = "conditional"
/// if = "//#if"
/// else = "//#else"
/// else_if = "//#elseif"
/// end_if = "//#endif"
/// whole_line = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StencilConfig {
	#[serde(default)]
	pub encoding: Encoding,
	#[serde(default = "default_whitespaces")]
	pub whitespaces: Vec<String>,
	#[serde(default = "default_line_endings")]
	pub line_endings: Vec<String>,
	#[serde(default = "default_variable_format")]
	pub variable_format: String,
	#[serde(default)]
	pub variables: VariableCollection,
	#[serde(default)]
	pub flags: FlagTable,
	/// Operations in registration order. Earlier operations win when two
	/// register the same token.
	#[serde(default)]
	pub operations: Vec<OperationConfig>,
}

impl Default for StencilConfig {
	fn default() -> Self {
		Self {
			encoding: Encoding::default(),
			whitespaces: default_whitespaces(),
			line_endings: default_line_endings(),
			variable_format: default_variable_format(),
			variables: VariableCollection::default(),
			flags: FlagTable::default(),
			operations: Vec::new(),
		}
	}
}

impl StencilConfig {
	/// Find the config file path using the supported discovery order.
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no candidate exists.
	pub fn load(root: &Path) -> StencilResult<Option<Self>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		Self::from_file(&config_path).map(Some)
	}

	pub fn from_file(path: &Path) -> StencilResult<Self> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml_str(&content)
	}

	pub fn from_toml_str(content: &str) -> StencilResult<Self> {
		toml::from_str(content).map_err(|e| StencilError::ConfigParse(e.to_string()))
	}

	pub fn engine_config(&self) -> EngineConfig {
		EngineConfig {
			encoding: self.encoding,
			whitespaces: self.whitespaces.clone(),
			line_endings: self.line_endings.clone(),
			variable_format: self.variable_format.clone(),
			variables: self.variables.clone(),
			flags: self.flags.clone(),
		}
	}

	/// Build a processor for every configured operation. Relative include
	/// paths resolve against `root`.
	pub fn processor(&self, root: &Path) -> Processor {
		self.operations.iter().fold(
			Processor::new(self.engine_config()),
			|processor, operation| processor.with_operation(operation.provider(root)),
		)
	}
}

/// One `[[operations]]` entry, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum OperationConfig {
	Replacement(Replacement),
	Region(Region),
	BalancedNesting(BalancedNesting),
	Include(IncludeConfig),
	SetFlag(SetFlag),
	Phased(PhasedOperation),
	PositionTracker(PositionTracker),
	ExpandVariables(ExpandVariables),
	Conditional(ConditionalConfig),
}

impl OperationConfig {
	pub fn provider(&self, root: &Path) -> Arc<dyn OperationProvider> {
		match self {
			Self::Replacement(replacement) => Arc::new(replacement.clone()),
			Self::Region(region) => Arc::new(region.clone()),
			Self::BalancedNesting(nesting) => Arc::new(nesting.clone()),
			Self::Include(include) => Arc::new(include.to_include(root)),
			Self::SetFlag(set_flag) => Arc::new(set_flag.clone()),
			Self::Phased(phased) => Arc::new(phased.clone()),
			Self::PositionTracker(tracker) => Arc::new(tracker.clone()),
			Self::ExpandVariables(expand) => Arc::new(expand.clone()),
			Self::Conditional(conditional) => Arc::new(conditional.to_conditional()),
		}
	}
}
