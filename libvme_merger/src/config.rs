use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_BUFFER_CAPACITY, DEFAULT_CHANNEL_COUNT, DEFAULT_MAX_SCALER_COUNT};
use super::error::ConfigError;

/// Byte order of the words on the wire. Fixed by the writer; must match on both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordByteOrder {
    #[default]
    Little,
    Big,
}

/// How much noise the unpacker tolerates between blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingPolicy {
    /// Any unrecognized or stray word while idle is treated as padding
    #[default]
    Lenient,
    /// Only the padding sentinel is padding; anything else while idle is a ProtocolError
    Strict,
}

/// What the processing driver does when the unpacker reports a ProtocolError
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorPolicy {
    /// Stop processing the stream and report the error
    Abort,
    /// Log the error and keep decoding; the unpacker resynchronizes on the next control word
    #[default]
    Resync,
}

/// Construction parameters of a single Unpacker.
///
/// Every Unpacker owns its own copy, so independent streams can be unpacked side by side with
/// different layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackerConfig {
    pub channel_count: usize,
    pub buffer_capacity: usize,
    pub byte_order: WordByteOrder,
    pub padding_policy: PaddingPolicy,
    pub max_scaler_count: usize,
}

impl Default for UnpackerConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            byte_order: WordByteOrder::default(),
            padding_policy: PaddingPolicy::default(),
            max_scaler_count: DEFAULT_MAX_SCALER_COUNT,
        }
    }
}

impl UnpackerConfig {
    pub fn new(channel_count: usize, buffer_capacity: usize) -> Self {
        Self {
            channel_count,
            buffer_capacity,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::InvalidChannelCount(self.channel_count));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidBufferCapacity(self.buffer_capacity));
        }
        Ok(())
    }
}

/// Structure representing the application configuration. Contains the input streams and how
/// to unpack them. Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input_paths: Vec<PathBuf>,
    pub unpacker: UnpackerConfig,
    pub on_protocol_error: ProtocolErrorPolicy,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. There are no inputs; the unpacker uses its defaults
    fn default() -> Self {
        Self {
            input_paths: vec![],
            unpacker: UnpackerConfig::default(),
            on_protocol_error: ProtocolErrorPolicy::default(),
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file, replacing whatever is there
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        let mut file = File::create(config_path)?;
        file.write_all(yaml_str.as_bytes())?;
        Ok(())
    }

    /// Check if a specific input exists
    pub fn does_input_exist(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.unpacker.validate()
    }
}
