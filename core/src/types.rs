//! Shared blockchain vocabulary: addresses, block ids, coin amounts and opaque cells.

use base64::{
	engine::general_purpose::{STANDARD, URL_SAFE},
	Engine as _,
};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

/// Workchain id of the masterchain.
pub const MASTERCHAIN: i32 = -1;

/// Workchain id of the basechain.
pub const BASECHAIN: i32 = 0;

/// Magic prefix of a serialized bag of cells.
pub const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

const NANO_DECIMALS: usize = 9;
const FRIENDLY_ADDRESS_LEN: usize = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
	#[error("Invalid workchain: {0}")]
	InvalidWorkchain(String),
	#[error("Invalid account hash: {0}")]
	InvalidHash(String),
	#[error("Invalid base64 address: {0}")]
	InvalidBase64(String),
	#[error("Invalid address length: {0}")]
	InvalidLength(usize),
	#[error("Address checksum mismatch")]
	ChecksumMismatch,
}

/// Account address: workchain id and the 256-bit account hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
	pub workchain: i32,
	pub hash: [u8; 32],
}

impl Address {
	pub fn new(workchain: i32, hash: [u8; 32]) -> Self {
		Self { workchain, hash }
	}

	/// Parses user-friendly (base64 or base64url, 48 characters) address form.
	fn from_friendly(value: &str) -> Result<Self, AddressError> {
		let bytes = if value.contains(['-', '_']) {
			URL_SAFE.decode(value)
		} else {
			STANDARD.decode(value)
		}
		.map_err(|error| AddressError::InvalidBase64(error.to_string()))?;

		if bytes.len() != FRIENDLY_ADDRESS_LEN {
			return Err(AddressError::InvalidLength(bytes.len()));
		}

		let checksum = u16::from_be_bytes([bytes[34], bytes[35]]);
		if crc16(&bytes[..34]) != checksum {
			return Err(AddressError::ChecksumMismatch);
		}

		let mut hash = [0u8; 32];
		hash.copy_from_slice(&bytes[2..34]);
		Ok(Self::new(bytes[1] as i8 as i32, hash))
	}

	/// Renders user-friendly base64url form, bounceable unless stated otherwise.
	pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
		let mut flags = if bounceable { 0x11 } else { 0x51 };
		if testnet {
			flags |= 0x80;
		}
		let mut bytes = Vec::with_capacity(FRIENDLY_ADDRESS_LEN);
		bytes.push(flags);
		bytes.push(self.workchain as i8 as u8);
		bytes.extend_from_slice(&self.hash);
		bytes.extend_from_slice(&crc16(&bytes).to_be_bytes());
		URL_SAFE.encode(bytes)
	}
}

impl FromStr for Address {
	type Err = AddressError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let Some((workchain, hash)) = value.split_once(':') else {
			return Self::from_friendly(value);
		};

		let workchain = workchain
			.parse::<i32>()
			.map_err(|_| AddressError::InvalidWorkchain(workchain.to_string()))?;
		let hash = hex::decode(hash)
			.ok()
			.and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
			.ok_or_else(|| AddressError::InvalidHash(hash.to_string()))?;

		Ok(Self::new(workchain, hash))
	}
}

impl TryFrom<String> for Address {
	type Error = AddressError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<Address> for String {
	fn from(value: Address) -> Self {
		value.to_string()
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.workchain, hex::encode(self.hash))
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// CRC16-XMODEM as used by the user-friendly address checksum.
fn crc16(data: &[u8]) -> u16 {
	data.iter().fold(0u16, |crc, byte| {
		(0..8).fold(crc ^ ((*byte as u16) << 8), |crc, _| {
			if crc & 0x8000 != 0 {
				(crc << 1) ^ 0x1021
			} else {
				crc << 1
			}
		})
	})
}

/// Block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("({workchain},{shard:x},{seqno})")]
pub struct BlockId {
	pub workchain: i32,
	pub shard: i64,
	pub seqno: u32,
}

impl BlockId {
	pub fn masterchain(seqno: u32) -> Self {
		Self {
			workchain: MASTERCHAIN,
			shard: i64::MIN,
			seqno,
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoinsError {
	#[error("Invalid coins amount \"{0}\"")]
	Invalid(String),
	#[error("Coins amount \"{0}\" has more than 9 decimal places")]
	TooPrecise(String),
}

/// Non-negative amount in nano units.
#[derive(
	Debug,
	Default,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Display,
	From,
	Serialize,
	Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Coins(pub u128);

impl Coins {
	pub const ZERO: Coins = Coins(0);

	pub fn nano(&self) -> u128 {
		self.0
	}

	pub fn checked_add(self, other: Coins) -> Option<Coins> {
		self.0.checked_add(other.0).map(Coins)
	}

	pub fn checked_sub(self, other: Coins) -> Option<Coins> {
		self.0.checked_sub(other.0).map(Coins)
	}

	pub fn saturating_sub(self, other: Coins) -> Coins {
		Coins(self.0.saturating_sub(other.0))
	}

	/// Signed view of the amount, for differences that may go below zero.
	pub fn signed(&self) -> i128 {
		self.0 as i128
	}
}

impl std::ops::Add for Coins {
	type Output = Coins;

	/// Saturates at `u128::MAX`, use [`Coins::checked_add`] to detect overflow.
	fn add(self, other: Coins) -> Coins {
		Coins(self.0.saturating_add(other.0))
	}
}

impl std::iter::Sum for Coins {
	fn sum<I: Iterator<Item = Coins>>(iter: I) -> Self {
		iter.fold(Coins::ZERO, |total, coins| total + coins)
	}
}

impl FromStr for Coins {
	type Err = CoinsError;

	/// Parses a decimal amount of whole coins, e.g. `"1.5"` is `1_500_000_000` nano.
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let invalid = || CoinsError::Invalid(value.to_string());
		let (whole, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));

		if whole.is_empty() && fraction.is_empty() {
			return Err(invalid());
		}
		if fraction.len() > NANO_DECIMALS {
			return Err(CoinsError::TooPrecise(value.to_string()));
		}
		let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
		if !digits(whole) || !digits(fraction) {
			return Err(invalid());
		}

		let whole = if whole.is_empty() {
			0
		} else {
			whole.parse::<u128>().map_err(|_| invalid())?
		};
		let fraction = format!("{fraction:0<width$}", width = NANO_DECIMALS)
			.parse::<u128>()
			.map_err(|_| invalid())?;

		whole
			.checked_mul(10u128.pow(NANO_DECIMALS as u32))
			.and_then(|nano| nano.checked_add(fraction))
			.map(Coins)
			.ok_or_else(invalid)
	}
}

impl TryFrom<String> for Coins {
	type Error = CoinsError;

	/// Serialized form is the amount in nano units.
	fn try_from(value: String) -> Result<Self, Self::Error> {
		value
			.parse::<u128>()
			.map(Coins)
			.map_err(|_| CoinsError::Invalid(value))
	}
}

impl From<Coins> for String {
	fn from(value: Coins) -> Self {
		value.0.to_string()
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Malformed bag of cells: {0}")]
pub struct CellError(pub String);

/// Opaque serialized cell payload (message body, state init, code).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Cell(Vec<u8>);

impl Cell {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	/// Accepts a serialized bag of cells. Empty input means there is no cell.
	pub fn from_boc(bytes: &[u8]) -> Result<Option<Cell>, CellError> {
		if bytes.is_empty() {
			return Ok(None);
		}
		if !bytes.starts_with(&BOC_MAGIC) {
			return Err(CellError(format!(
				"missing magic prefix, got {}",
				hex::encode(&bytes[..bytes.len().min(BOC_MAGIC.len())])
			)));
		}
		Ok(Some(Cell(bytes.to_vec())))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for Cell {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Cell({})", hex::encode(&self.0))
	}
}

pub mod tracing_level_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::str::FromStr;
	use tracing::Level;

	pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&level.to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Level::from_str(&value).map_err(serde::de::Error::custom)
	}
}

pub mod duration_seconds_format {
	use super::Duration;
	use serde::{self, Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = u64::deserialize(deserializer)?;
		Ok(Duration::from_secs(value))
	}
}

pub mod duration_millis_format {
	use super::Duration;
	use serde::{self, Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(value))
	}
}
