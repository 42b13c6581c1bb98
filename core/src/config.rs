//! Chain configuration as consumed by the relayer.

use color_eyre::{eyre::WrapErr, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;
use tracing::{Level, Subscriber};

use crate::{
	network::pool::Endpoint,
	txm::configuration::{TxmConfig, TxmConfigError},
	types::{duration_seconds_format, tracing_level_format},
	utils::{default_subscriber, json_subscriber},
};

pub const MAINNET_CHAIN_ID: i32 = -239;
pub const TESTNET_CHAIN_ID: i32 = -3;
pub const LOCALNET_CHAIN_ID: i32 = -217;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("Chain is disabled")]
	Disabled,
	#[error("chain-id is required")]
	MissingChainId,
	#[error("chain-id {0:?} is not a signed 32-bit integer")]
	InvalidChainId(String),
	#[error("nodes must not be empty")]
	NoNodes,
	#[error("nodes[{0}].name is required")]
	MissingNodeName(usize),
	#[error("nodes[{0}].name must not be empty")]
	EmptyNodeName(usize),
	#[error("nodes[{0}].url is required")]
	MissingNodeUrl(usize),
	#[error("nodes[{0}].url must not be empty")]
	EmptyNodeUrl(usize),
	#[error("transaction-manager: {0}")]
	TransactionManager(#[from] TxmConfigError),
	#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
	Multiple(Vec<ConfigError>),
	#[error("Invalid TOML: {0}")]
	Toml(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LogConfig {
	/// Log level, one of `TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR` (default: `INFO`).
	#[serde(with = "tracing_level_format")]
	pub log_level: Level,
	/// If set to true, logs are displayed in JSON format (default: false).
	pub log_format_json: bool,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			log_level: Level::INFO,
			log_format_json: false,
		}
	}
}

impl LogConfig {
	pub fn subscriber(&self) -> Box<dyn Subscriber + Send + Sync> {
		if self.log_format_json {
			Box::new(json_subscriber(self.log_level))
		} else {
			Box::new(default_subscriber(self.log_level))
		}
	}
}

/// Node entry. Both fields are required, they are optional here so missing
/// ones are reported per field instead of as a decoding error.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

/// Representation of a chain configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct TomlConfig {
	/// Chains are enabled unless set to false.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub enabled: Option<bool>,
	/// Global id of the chain, as a decimal string (e.g. "-239").
	pub chain_id: String,
	/// Network name, derived from the chain id when not set.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network_name: Option<String>,
	/// Defaults to `ton-{network-name}`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network_name_full: Option<String>,
	/// Seconds a verified node client is reused before it is checked again (default: 600).
	#[serde(with = "duration_seconds_format")]
	pub client_ttl: Duration,
	pub transaction_manager: TxmConfig,
	pub nodes: Vec<NodeConfig>,
	pub log: LogConfig,
}

impl Default for TomlConfig {
	fn default() -> Self {
		Self {
			enabled: None,
			chain_id: String::new(),
			network_name: None,
			network_name_full: None,
			client_ttl: Duration::from_secs(600),
			transaction_manager: TxmConfig::default(),
			nodes: vec![],
			log: LogConfig::default(),
		}
	}
}

impl TomlConfig {
	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		let config: TomlConfig =
			toml::from_str(raw).map_err(|error| ConfigError::Toml(error.to_string()))?;
		config.check()?;
		Ok(config)
	}

	pub fn to_toml_string(&self) -> Result<String, ConfigError> {
		toml::to_string(self).map_err(|error| ConfigError::Toml(error.to_string()))
	}

	fn check(&self) -> Result<(), ConfigError> {
		if !self.is_enabled() {
			return Err(ConfigError::Disabled);
		}
		self.validate()
	}

	/// Reports every invalid field at once.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let mut errors = vec![];

		if self.chain_id.trim().is_empty() {
			errors.push(ConfigError::MissingChainId);
		} else if let Err(error) = self.chain_id_i32() {
			errors.push(error);
		}

		if self.nodes.is_empty() {
			errors.push(ConfigError::NoNodes);
		}
		for (index, node) in self.nodes.iter().enumerate() {
			match node.name.as_deref() {
				None => errors.push(ConfigError::MissingNodeName(index)),
				Some(name) if name.trim().is_empty() => errors.push(ConfigError::EmptyNodeName(index)),
				Some(_) => {},
			}
			match node.url.as_deref() {
				None => errors.push(ConfigError::MissingNodeUrl(index)),
				Some(url) if url.trim().is_empty() => errors.push(ConfigError::EmptyNodeUrl(index)),
				Some(_) => {},
			}
		}

		if let Err(error) = self.transaction_manager.validate() {
			errors.push(error.into());
		}

		match errors.len() {
			0 => Ok(()),
			1 => Err(errors.remove(0)),
			_ => Err(ConfigError::Multiple(errors)),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled.unwrap_or(true)
	}

	pub fn chain_id_i32(&self) -> Result<i32, ConfigError> {
		self.chain_id
			.trim()
			.parse()
			.map_err(|_| ConfigError::InvalidChainId(self.chain_id.clone()))
	}

	pub fn network_name(&self) -> String {
		if let Some(name) = &self.network_name {
			return name.clone();
		}
		match self.chain_id_i32() {
			Ok(MAINNET_CHAIN_ID) => "mainnet",
			Ok(TESTNET_CHAIN_ID) => "testnet",
			Ok(LOCALNET_CHAIN_ID) => "localnet",
			_ => "unknown",
		}
		.to_string()
	}

	pub fn network_name_full(&self) -> String {
		self.network_name_full
			.clone()
			.unwrap_or_else(|| format!("ton-{}", self.network_name()))
	}

	pub fn endpoints(&self) -> Vec<Endpoint> {
		self.nodes
			.iter()
			.map(|node| Endpoint {
				name: node.name.clone().unwrap_or_default(),
				url: node.url.clone().unwrap_or_default(),
			})
			.collect()
	}
}

/// Loads and validates the chain configuration stored at `path`.
pub fn load_path(path: impl AsRef<Path>) -> Result<TomlConfig> {
	let path = path.as_ref();
	let config: TomlConfig = confy::load_path(path)
		.wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))?;
	config
		.check()
		.wrap_err_with(|| format!("Invalid configuration in {}", path.display()))?;
	Ok(config)
}
