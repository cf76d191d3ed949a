//! # vme_merger
//!
//! vme_merger is an event builder for VME digitizer crates, written in Rust. It takes the raw
//! word stream produced by a set of peak-sensing ADC/QDC modules sharing one readout pipe and
//! merges the per-module contributions back into one record per trigger.
//!
//! Each module flushes its own block for an event whenever its buffer fills, so the blocks
//! belonging to one trigger are scattered through the stream and interleaved with blocks of
//! other triggers. vme_merger collects them in a small lookaside buffer keyed by event number,
//! emitting events oldest-first whenever the buffer overflows, and draining it completely at
//! every buffer boundary and at the end of a run. Scaler readouts travel in the same stream
//! and are passed through untouched.
//!
//! ## Building & Install
//!
//! To build and install the CLI use `cargo install --path ./vme_merger_cli` from the top
//! level vme_merger repository. The library can be used directly by depending on
//! `libvme_merger`; see `unpacker::Unpacker` for the entry point.
//!
//! ## Data Format
//!
//! The stream is a sequence of 32-bit words in a fixed byte order (little endian unless
//! configured otherwise). Bits 24-26 of a word give its type:
//!
//! ```text
//! 010  Header     bits 27-31: module slot
//! 000  Parameter  bits 16-21: channel, bits 0-11: value
//! 100  EndBlock   bits 0-23: event number
//! ```
//!
//! A module block is a Header, any number of Parameters, and an EndBlock. The channel of a
//! Parameter is flattened into the event record as `32 * (slot - 2) + channel`; slots 0 and 1
//! never carry data. A handful of reserved full words are recognized before the type field is
//! looked at:
//!
//! ```text
//! 0xFFFFFFFA  ScalerStart     followed by a count N and N scaler values
//! 0xFFFFFFFB  BufferBoundary  drain the buffer
//! 0xFFFFFFFC  RunStop         drain the buffer, the run is over
//! 0xFFFFFFFD  RunEnd          drain the buffer, the run is over
//! 0xFFFFFFFF  BufferPadding   filler between blocks
//! ```
//!
//! ## Configuration
//!
//! The CLI reads a YAML configuration file. A template can be generated with
//! `vme_merger_cli -p config.yml new`. The format is as follows:
//!
//! ```yml
//! input_paths:
//! - /data/run_0001.dat
//! unpacker:
//!   channel_count: 1024
//!   buffer_capacity: 8
//!   byte_order: Little
//!   padding_policy: Lenient
//!   max_scaler_count: 4096
//! on_protocol_error: Resync
//! n_threads: 1
//! ```
//!
//! - `channel_count`: size of an event record. Must cover the highest slot in the crate.
//! - `buffer_capacity`: how many events can be under construction at once.
//! - `padding_policy`: `Lenient` treats any unrecognized word between blocks as padding;
//! `Strict` only accepts the padding word and reports anything else as an error.
//! - `on_protocol_error`: `Resync` logs a broken block and carries on with the next one;
//! `Abort` stops processing that input.
//! - `n_threads`: inputs are divided amongst this many workers, each with its own unpacker.
//!
//! ## Output
//!
//! vme_merger does not store events; callers consume each record as it is emitted. The CLI
//! prints a summary for each input and writes a log file, `vme_merger.log`, which records
//! run terminations, broken blocks and anything else worth knowing about the stream.
pub mod config;
pub mod constants;
pub mod error;
pub mod module_block;
pub mod process;
pub mod reassembly;
pub mod scaler;
pub mod unpacker;
pub mod word;
pub mod word_source;
pub mod worker_status;
