use super::error::{ModuleBlockError, ProtocolError};
use super::word::{channel_index, classify, end_block_event_number, header_slot, Parameter, WordTag};
use super::word_source::WordSource;

/// One flattened channel of an event record and the value a module reported for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValue {
    pub index: usize,
    pub value: u16,
}

/// ModuleBlockDecoder turns one module's contribution (Header, Parameters, EndBlock) into
/// an event number and a list of ChannelValues.
///
/// The parameter list is kept between blocks so that steady state decoding does not allocate.
#[derive(Debug)]
pub struct ModuleBlockDecoder {
    channel_count: usize,
    parameters: Vec<ChannelValue>,
}

impl ModuleBlockDecoder {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            parameters: Vec::new(),
        }
    }

    /// Decode the block opened by `header`, pulling the rest of it from `source`.
    ///
    /// Returns the event number from the EndBlock. The decoded parameters are available from
    /// `parameters()` until the next call. On error the partial block is discarded.
    pub fn decode<S: WordSource>(
        &mut self,
        header: u32,
        source: &mut S,
    ) -> Result<u32, ModuleBlockError> {
        self.parameters.clear();
        let slot = header_slot(header);
        loop {
            let word = match source.next_word()? {
                Some(w) => w,
                None => {
                    self.parameters.clear();
                    return Err(ModuleBlockError::EndOfSource);
                }
            };
            match classify(word) {
                WordTag::Parameter => {
                    let param = Parameter::from(word);
                    match channel_index(slot, param.channel) {
                        Some(index) if index < self.channel_count => {
                            self.parameters.push(ChannelValue {
                                index,
                                value: param.value,
                            })
                        }
                        _ => {
                            let last_parameter = self.parameters.last().copied();
                            self.parameters.clear();
                            return Err(ModuleBlockError::Protocol(
                                ProtocolError::ChannelOutOfRange {
                                    word,
                                    slot,
                                    channel_count: self.channel_count,
                                    last_parameter,
                                },
                            ));
                        }
                    }
                }
                WordTag::EndBlock => return Ok(end_block_event_number(word)),
                tag => {
                    let last_parameter = self.parameters.last().copied();
                    self.parameters.clear();
                    return Err(ModuleBlockError::Protocol(ProtocolError::UnexpectedWord {
                        word,
                        tag,
                        slot,
                        last_parameter,
                    }));
                }
            }
        }
    }

    pub fn parameters(&self) -> &[ChannelValue] {
        &self.parameters
    }
}
