use std::collections::BTreeMap;

use derive_more::Deref;
use derive_more::DerefMut;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Named values available to a run. Values are written by callers before
/// the run and by operations such as position tracking during it.
#[derive(Debug, Clone, Default, PartialEq, Deref, DerefMut, Deserialize, Serialize)]
#[serde(transparent)]
pub struct VariableCollection(BTreeMap<String, Value>);

impl VariableCollection {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(key.into(), value.into());
	}

	/// The text a variable expands to. Missing and `null` values render as
	/// `null`, strings render without quotes.
	pub fn render(&self, key: &str) -> String {
		format_value(self.0.get(key))
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for VariableCollection {
	fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
		Self(
			iter.into_iter()
				.map(|(key, value)| (key.into(), value.into()))
				.collect(),
		)
	}
}

pub fn format_value(value: Option<&Value>) -> String {
	match value {
		None | Some(Value::Null) => "null".to_string(),
		Some(Value::String(text)) => text.clone(),
		Some(other) => other.to_string(),
	}
}
