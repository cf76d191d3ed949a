use std::fmt::Display;

use super::constants::*;

/// The kind of a single 32-bit word in the acquisition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordTag {
    Header,
    Parameter,
    EndBlock,
    ScalerStart,
    BufferBoundary,
    BufferPadding,
    RunStop,
    RunEnd,
    Unknown,
}

impl WordTag {
    /// Control words start something (a block, a drain, a scaler readout) when seen while idle.
    /// Everything else is either block content or noise.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Header | Self::ScalerStart | Self::BufferBoundary | Self::RunStop | Self::RunEnd
        )
    }
}

impl Display for WordTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Header => "Header",
            Self::Parameter => "Parameter",
            Self::EndBlock => "EndBlock",
            Self::ScalerStart => "ScalerStart",
            Self::BufferBoundary => "BufferBoundary",
            Self::BufferPadding => "BufferPadding",
            Self::RunStop => "RunStop",
            Self::RunEnd => "RunEnd",
            Self::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// Classify a word.
///
/// The sentinels are exact full-word matches and take precedence over the type field.
pub fn classify(word: u32) -> WordTag {
    match word {
        SCALER_START => WordTag::ScalerStart,
        BUFFER_BOUNDARY => WordTag::BufferBoundary,
        BUFFER_PADDING => WordTag::BufferPadding,
        RUN_STOP => WordTag::RunStop,
        RUN_END => WordTag::RunEnd,
        _ => match type_field(word) {
            TYPE_HEADER => WordTag::Header,
            TYPE_PARAMETER => WordTag::Parameter,
            TYPE_END_BLOCK => WordTag::EndBlock,
            _ => WordTag::Unknown,
        },
    }
}

pub fn type_field(word: u32) -> u32 {
    (word >> TYPE_SHIFT) & TYPE_MASK
}

/// Module slot of a Header word
pub fn header_slot(word: u32) -> u8 {
    ((word >> SLOT_SHIFT) & SLOT_MASK) as u8
}

/// Event number of an EndBlock word
pub fn end_block_event_number(word: u32) -> u32 {
    word & EVENT_NUMBER_MASK
}

/// A channel and its 12-bit sample as stored in a Parameter word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub channel: u8,
    pub value: u16,
}

impl From<u32> for Parameter {
    fn from(word: u32) -> Self {
        Self {
            channel: ((word >> CHANNEL_SHIFT) & CHANNEL_MASK) as u8,
            value: (word & VALUE_MASK) as u16,
        }
    }
}

/// Flatten a (slot, channel) pair into an index of the event record.
///
/// Slots below FIRST_DATA_SLOT never carry data and have no index.
pub fn channel_index(slot: u8, channel: u8) -> Option<usize> {
    if slot < FIRST_DATA_SLOT {
        return None;
    }
    Some(CHANNELS_PER_SLOT * (slot - FIRST_DATA_SLOT) as usize + channel as usize)
}

/// Build a Header word for a module slot
pub fn make_header(slot: u8) -> u32 {
    (TYPE_HEADER << TYPE_SHIFT) | (((slot as u32) & SLOT_MASK) << SLOT_SHIFT)
}

/// Build a Parameter word
pub fn make_parameter(channel: u8, value: u16) -> u32 {
    (TYPE_PARAMETER << TYPE_SHIFT)
        | (((channel as u32) & CHANNEL_MASK) << CHANNEL_SHIFT)
        | ((value as u32) & VALUE_MASK)
}

/// Build an EndBlock word
pub fn make_end_block(event_number: u32) -> u32 {
    (TYPE_END_BLOCK << TYPE_SHIFT) | (event_number & EVENT_NUMBER_MASK)
}
