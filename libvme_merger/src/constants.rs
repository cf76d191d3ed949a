// Word layout
pub const WORD_SIZE: usize = 4; // bytes
pub const TYPE_SHIFT: u32 = 24;
pub const TYPE_MASK: u32 = 0x7;
pub const TYPE_PARAMETER: u32 = 0b000;
pub const TYPE_HEADER: u32 = 0b010;
pub const TYPE_END_BLOCK: u32 = 0b100;

// Header word
pub const SLOT_SHIFT: u32 = 27;
pub const SLOT_MASK: u32 = 0x1F;

// Parameter word
pub const CHANNEL_SHIFT: u32 = 16;
pub const CHANNEL_MASK: u32 = 0x3F;
pub const VALUE_MASK: u32 = 0xFFF;

// EndBlock word
pub const EVENT_NUMBER_MASK: u32 = 0xFF_FFFF;

// Full-word sentinels. All of them carry type field 0b111 so they never alias a block word.
pub const SCALER_START: u32 = 0xFFFF_FFFA;
pub const BUFFER_BOUNDARY: u32 = 0xFFFF_FFFB;
pub const RUN_STOP: u32 = 0xFFFF_FFFC;
pub const RUN_END: u32 = 0xFFFF_FFFD;
pub const BUFFER_PADDING: u32 = 0xFFFF_FFFF;

// Channel indexing: index = CHANNELS_PER_SLOT * (slot - FIRST_DATA_SLOT) + channel
pub const CHANNELS_PER_SLOT: usize = 32;
pub const FIRST_DATA_SLOT: u8 = 2;

// Defaults for the unpacker configuration
pub const DEFAULT_CHANNEL_COUNT: usize = 1024; // slot 31, channel 63 -> 991
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;
pub const DEFAULT_MAX_SCALER_COUNT: usize = 4096;
