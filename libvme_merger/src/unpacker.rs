use std::fmt::Display;

use super::config::{PaddingPolicy, UnpackerConfig};
use super::error::{ModuleBlockError, ProtocolError, UnpackerError};
use super::module_block::ModuleBlockDecoder;
use super::reassembly::{MergeOutcome, ReassemblyBuffer};
use super::scaler::{DiscardScalers, ScalerSink, ScalerSnapshot};
use super::word::{classify, WordTag};
use super::word_source::{PeekableSource, WordSource};

/// The externally visible state of the reassembly buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Filling,
    /// Filling, but the next new event number will evict the oldest event
    Full,
    DrainOnBoundary,
    DrainOnRunEnd,
    SkippingPadding,
}

/// The two ways a run can be terminated. They drain identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunTermination {
    Stop,
    End,
}

impl Display for RunTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "run stop"),
            Self::End => write!(f, "run end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Filling,
    SkippingPadding,
    DrainOnBoundary,
    DrainOnRunEnd(RunTermination),
}

/// Result of a single `Unpacker::decode_next` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A complete (or forcibly completed) event was written to the output record
    Event { event_number: u32 },
    /// A scaler snapshot was read and handed to the scaler sink
    ScalerEmitted(ScalerSnapshot),
    /// Padding or noise between blocks was skipped
    Ignored,
    /// All events buffered before a buffer boundary have been emitted
    BufferBoundaryReached,
    /// All events of the run have been emitted
    RunEnded,
    /// The source is exhausted. Terminal.
    EndOfSource,
}

/// Running counters of an Unpacker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackerStats {
    pub words_read: u64,
    pub blocks_decoded: u64,
    pub events_admitted: u64,
    pub events_emitted: u64,
    pub events_evicted: u64,
    pub events_drained: u64,
    pub scaler_snapshots: u64,
    pub boundaries: u64,
    pub run_terminations: u64,
    pub ignored_words: u64,
    pub protocol_errors: u64,
}

/// Unpacker reconstructs events from a stream of module blocks.
///
/// The caller pulls results with `decode_next`, handing in a record of `channel_count`
/// channels which is overwritten whenever an event is returned. Each call consumes as many
/// words as it needs to produce one result. Blocks for the same event number are merged in a
/// ReassemblyBuffer; when the buffer is full the oldest event is evicted, and buffer
/// boundaries and run terminations drain it completely. Scaler blocks are passed straight to
/// the ScalerSink without touching the buffer.
///
/// An Unpacker is single threaded and owns all of its state. Independent streams get
/// independent Unpackers.
#[derive(Debug)]
pub struct Unpacker<S: WordSource, K: ScalerSink = DiscardScalers> {
    config: UnpackerConfig,
    source: PeekableSource<S>,
    decoder: ModuleBlockDecoder,
    buffer: ReassemblyBuffer,
    scaler_sink: K,
    state: EngineState,
    stats: UnpackerStats,
    is_ended: bool,
}

impl<S: WordSource> Unpacker<S, DiscardScalers> {
    /// Create an Unpacker which discards scaler snapshots after reporting them
    pub fn new(config: UnpackerConfig, source: S) -> Result<Self, UnpackerError> {
        Self::with_scaler_sink(config, source, DiscardScalers)
    }
}

impl<S: WordSource, K: ScalerSink> Unpacker<S, K> {
    /// Create an Unpacker which forwards scaler snapshots to `scaler_sink`
    pub fn with_scaler_sink(
        config: UnpackerConfig,
        source: S,
        scaler_sink: K,
    ) -> Result<Self, UnpackerError> {
        config.validate()?;
        Ok(Self {
            decoder: ModuleBlockDecoder::new(config.channel_count),
            buffer: ReassemblyBuffer::new(config.buffer_capacity, config.channel_count),
            source: PeekableSource::new(source),
            scaler_sink,
            state: EngineState::Filling,
            stats: UnpackerStats::default(),
            is_ended: false,
            config,
        })
    }

    /// A zeroed record of the right size for `decode_next`
    pub fn new_record(&self) -> Vec<u16> {
        vec![0; self.config.channel_count]
    }

    pub fn state(&self) -> BufferState {
        match self.state {
            EngineState::Filling if self.buffer.is_full() => BufferState::Full,
            EngineState::Filling => BufferState::Filling,
            EngineState::SkippingPadding => BufferState::SkippingPadding,
            EngineState::DrainOnBoundary => BufferState::DrainOnBoundary,
            EngineState::DrainOnRunEnd(_) => BufferState::DrainOnRunEnd,
        }
    }

    pub fn stats(&self) -> UnpackerStats {
        UnpackerStats {
            words_read: self.source.words_read(),
            ..self.stats
        }
    }

    /// Event numbers currently buffered, oldest admission first
    pub fn buffered_events(&self) -> Vec<u32> {
        self.buffer.event_numbers().collect()
    }

    /// True once the source is exhausted or a fatal error occurred
    pub fn is_ended(&self) -> bool {
        self.is_ended
    }

    pub fn scaler_sink(&self) -> &K {
        &self.scaler_sink
    }

    /// Consume the unpacker, returning the source and scaler sink
    pub fn into_parts(self) -> (S, K) {
        (self.source.into_inner(), self.scaler_sink)
    }

    /// Decode until there is something to report.
    ///
    /// On `DecodeStatus::Event` every channel of `out` is overwritten; channels no module wrote
    /// are zero. ProtocolErrors and a wrongly sized `out` only fail this call. Source errors
    /// and broken buffer invariants are fatal: the unpacker returns `EndOfSource` from then on.
    pub fn decode_next(&mut self, out: &mut [u16]) -> Result<DecodeStatus, UnpackerError> {
        self.check_record(out)?;
        if self.is_ended {
            return Ok(DecodeStatus::EndOfSource);
        }

        match self.step(out) {
            Ok(status) => Ok(status),
            Err(e) => {
                if e.is_fatal() {
                    spdlog::error!("Unpacker stopped after a fatal error: {e}");
                    self.is_ended = true;
                } else if let UnpackerError::Protocol(pe) = &e {
                    self.stats.protocol_errors += 1;
                    spdlog::warn!("{pe}");
                }
                Err(e)
            }
        }
    }

    /// Take the oldest buffered event regardless of state.
    ///
    /// Meant for after `EndOfSource`, when a stream was cut off without a run end and events
    /// are still held. Returns None once the buffer is empty.
    pub fn flush_oldest(&mut self, out: &mut [u16]) -> Result<Option<u32>, UnpackerError> {
        self.check_record(out)?;
        let flushed = self.buffer.pop_oldest(out)?;
        if flushed.is_some() {
            self.stats.events_drained += 1;
            self.stats.events_emitted += 1;
        }
        Ok(flushed)
    }

    fn check_record(&self, out: &[u16]) -> Result<(), UnpackerError> {
        if out.len() != self.config.channel_count {
            return Err(UnpackerError::OutputSizeMismatch {
                given: out.len(),
                expected: self.config.channel_count,
            });
        }
        Ok(())
    }

    fn step(&mut self, out: &mut [u16]) -> Result<DecodeStatus, UnpackerError> {
        loop {
            match self.state {
                EngineState::DrainOnBoundary => {
                    return self.drain_one(out, DecodeStatus::BufferBoundaryReached)
                }
                EngineState::DrainOnRunEnd(_) => return self.drain_one(out, DecodeStatus::RunEnded),
                EngineState::Filling | EngineState::SkippingPadding => (),
            }

            let word = match self.source.next_word()? {
                Some(w) => w,
                None => return Ok(self.end_of_source()),
            };

            let tag = classify(word);
            match tag {
                WordTag::Header => {
                    self.state = EngineState::Filling;
                    if let Some(status) = self.unpack_block(word, out)? {
                        return Ok(status);
                    }
                }
                WordTag::ScalerStart => {
                    self.state = EngineState::Filling;
                    return self.read_scalers();
                }
                WordTag::BufferBoundary => {
                    spdlog::debug!(
                        "Buffer boundary -- draining {} buffered events",
                        self.buffer.len()
                    );
                    self.stats.boundaries += 1;
                    self.state = EngineState::DrainOnBoundary;
                }
                WordTag::RunStop => self.begin_run_drain(RunTermination::Stop),
                WordTag::RunEnd => self.begin_run_drain(RunTermination::End),
                WordTag::BufferPadding => {
                    if let Some(status) = self.skip_word() {
                        return Ok(status);
                    }
                }
                // Leftovers of a broken block are discarded while resynchronizing
                WordTag::Parameter | WordTag::EndBlock
                    if self.state == EngineState::SkippingPadding =>
                {
                    self.stats.ignored_words += 1;
                }
                WordTag::Parameter | WordTag::EndBlock | WordTag::Unknown => {
                    if self.config.padding_policy == PaddingPolicy::Strict {
                        return Err(ProtocolError::StrayWord(word, tag).into());
                    }
                    if let Some(status) = self.skip_word() {
                        return Ok(status);
                    }
                }
            }
        }
    }

    /// Count a skipped word. Only the first word of a stretch of padding is reported.
    fn skip_word(&mut self) -> Option<DecodeStatus> {
        self.stats.ignored_words += 1;
        if self.state == EngineState::SkippingPadding {
            None
        } else {
            self.state = EngineState::SkippingPadding;
            Some(DecodeStatus::Ignored)
        }
    }

    /// Decode the block opened by `header` and merge it. Returns a status only if the merge
    /// evicted an event (or the source ended mid-block).
    fn unpack_block(
        &mut self,
        header: u32,
        out: &mut [u16],
    ) -> Result<Option<DecodeStatus>, UnpackerError> {
        let event_number = match self.decoder.decode(header, &mut self.source) {
            Ok(n) => n,
            Err(ModuleBlockError::EndOfSource) => {
                spdlog::warn!("Source ended in the middle of a module block");
                return Ok(Some(self.end_of_source()));
            }
            Err(ModuleBlockError::Source(e)) => return Err(e.into()),
            Err(ModuleBlockError::Protocol(e)) => {
                // Hand back a control word so the run end/boundary/next block it starts is not lost
                if let ProtocolError::UnexpectedWord { word, tag, .. } = &e {
                    if tag.is_control() {
                        self.source.push_back(*word);
                    }
                }
                self.state = EngineState::SkippingPadding;
                return Err(e.into());
            }
        };
        self.stats.blocks_decoded += 1;

        match self
            .buffer
            .merge(event_number, self.decoder.parameters(), out)?
        {
            MergeOutcome::Merged => Ok(None),
            MergeOutcome::Admitted => {
                self.stats.events_admitted += 1;
                Ok(None)
            }
            MergeOutcome::Evicted(evicted) => {
                self.stats.events_admitted += 1;
                self.stats.events_evicted += 1;
                self.stats.events_emitted += 1;
                spdlog::debug!("Buffer full -- event {evicted} evicted to admit event {event_number}");
                Ok(Some(DecodeStatus::Event {
                    event_number: evicted,
                }))
            }
        }
    }

    fn read_scalers(&mut self) -> Result<DecodeStatus, UnpackerError> {
        let count = match self.source.next_word()? {
            Some(c) => c,
            None => return Ok(self.end_of_source()),
        };
        if count as usize > self.config.max_scaler_count {
            self.state = EngineState::SkippingPadding;
            return Err(
                ProtocolError::ScalerCountTooLarge(count, self.config.max_scaler_count).into(),
            );
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.source.next_word()? {
                Some(v) => values.push(v),
                None => {
                    spdlog::warn!("Source ended in the middle of a scaler block");
                    return Ok(self.end_of_source());
                }
            }
        }
        self.scaler_sink.accept(&values);
        self.stats.scaler_snapshots += 1;
        Ok(DecodeStatus::ScalerEmitted(ScalerSnapshot::new(values)))
    }

    fn begin_run_drain(&mut self, kind: RunTermination) {
        spdlog::info!(
            "Detected {kind} -- draining {} buffered events",
            self.buffer.len()
        );
        self.state = EngineState::DrainOnRunEnd(kind);
    }

    /// Emit the oldest buffered event, or `done` once the buffer is empty
    fn drain_one(
        &mut self,
        out: &mut [u16],
        done: DecodeStatus,
    ) -> Result<DecodeStatus, UnpackerError> {
        if let Some(event_number) = self.buffer.pop_oldest(out)? {
            self.stats.events_drained += 1;
            self.stats.events_emitted += 1;
            return Ok(DecodeStatus::Event { event_number });
        }

        if let EngineState::DrainOnRunEnd(kind) = self.state {
            self.stats.run_terminations += 1;
            spdlog::info!(
                "Finished draining after {kind}; {} events emitted so far",
                self.stats.events_emitted
            );
        }
        self.state = EngineState::Filling;
        Ok(done)
    }

    fn end_of_source(&mut self) -> DecodeStatus {
        self.is_ended = true;
        if !self.buffer.is_empty() {
            spdlog::warn!(
                "Source ended with {} events still buffered",
                self.buffer.len()
            );
        }
        spdlog::debug!(
            "Unpacker reached end of source after {} words",
            self.source.words_read()
        );
        DecodeStatus::EndOfSource
    }
}
