use std::path::PathBuf;
use thiserror::Error;

use super::module_block::ChannelValue;
use super::worker_status::WorkerStatus;
use super::word::WordTag;

#[derive(Debug, Error)]
pub enum WordSourceError {
    #[error("WordSource failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unexpected {tag} word {word:#010x} inside the block of module slot {slot}; last parameter parsed: {last_parameter:?}")]
    UnexpectedWord {
        word: u32,
        tag: WordTag,
        slot: u8,
        last_parameter: Option<ChannelValue>,
    },
    #[error("Parameter word {word:#010x} from module slot {slot} maps outside of the {channel_count} channel event record; last parameter parsed: {last_parameter:?}")]
    ChannelOutOfRange {
        word: u32,
        slot: u8,
        channel_count: usize,
        last_parameter: Option<ChannelValue>,
    },
    #[error("Scaler block declared {0} values; at most {1} are allowed")]
    ScalerCountTooLarge(u32, usize),
    #[error("Found stray {1} word {0:#010x} outside of a module block")]
    StrayWord(u32, WordTag),
}

#[derive(Debug, Error)]
pub enum ModuleBlockError {
    #[error("Module block violated the block grammar: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Module block could not be read: {0}")]
    Source(#[from] WordSourceError),
    #[error("Source ended in the middle of a module block")]
    EndOfSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("ReassemblyBuffer index and slot {position} disagree about event {event_number}")]
    IndexCorrupted { event_number: u32, position: usize },
    #[error("ReassemblyBuffer live count {live} does not match {queued} slots in admission order")]
    LiveCountMismatch { live: usize, queued: usize },
    #[error("ReassemblyBuffer has {live} live slots, exceeding capacity {capacity}")]
    CapacityExceeded { live: usize, capacity: usize },
    #[error("ReassemblyBuffer was given a record of {given} channels; expected {expected}")]
    RecordSizeMismatch { given: usize, expected: usize },
}

#[derive(Debug, Error)]
pub enum UnpackerError {
    #[error("Unpacker hit a protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Unpacker failed due to WordSource error: {0}")]
    Source(#[from] WordSourceError),
    #[error("Unpacker capacity invariant violated: {0}")]
    CapacityInvariant(#[from] ReassemblyError),
    #[error("Unpacker was given an output buffer of {given} channels; expected {expected}")]
    OutputSizeMismatch { given: usize, expected: usize },
    #[error("Unpacker failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

impl UnpackerError {
    /// Fatal errors end the unpacker; it only returns EndOfSource afterwards.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Source(_) | Self::CapacityInvariant(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid channel count {0}; must be at least 1")]
    InvalidChannelCount(usize),
    #[error("Config has an invalid buffer capacity {0}; must be at least 1")]
    InvalidBufferCapacity(usize),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor could not open input {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Processor failed due to Unpacker error: {0}")]
    UnpackerError(#[from] UnpackerError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
