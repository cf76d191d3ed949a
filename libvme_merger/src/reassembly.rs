use fxhash::FxHashMap;
use std::collections::VecDeque;

use super::error::ReassemblyError;
use super::module_block::ChannelValue;

/// An event under construction. Slots live in a fixed arena and are recycled.
#[derive(Debug, Clone)]
struct EventSlot {
    event_number: u32,
    channels: Vec<u16>,
    admission_seq: u64,
    is_live: bool,
}

impl EventSlot {
    fn new(channel_count: usize) -> Self {
        Self {
            event_number: 0,
            channels: vec![0; channel_count],
            admission_seq: 0,
            is_live: false,
        }
    }

    fn write(&mut self, values: &[ChannelValue]) {
        for cv in values {
            match self.channels.get_mut(cv.index) {
                Some(channel) => *channel = cv.value,
                None => spdlog::warn!(
                    "Dropped value for channel index {} of event {}; record has {} channels",
                    cv.index,
                    self.event_number,
                    self.channels.len()
                ),
            }
        }
    }
}

/// What a merge did to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The values joined an event that was already buffered
    Merged,
    /// A new event was admitted into a free slot
    Admitted,
    /// The buffer was full: the oldest event (given) was evicted into the output record and
    /// the new event took its place
    Evicted(u32),
}

/// ReassemblyBuffer is the lookaside table where the contributions of all modules to an event
/// are collected.
///
/// It holds at most `capacity` events. The index maps event numbers to positions in a fixed
/// arena of slots, and the admission queue remembers the order in which events were first
/// seen. Events always leave in that order (oldest admission first), whether evicted to make
/// room or drained at a boundary; the numeric value of the event number plays no role.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    slots: Vec<EventSlot>,
    free_slots: Vec<usize>,
    index: FxHashMap<u32, usize>,
    admission_order: VecDeque<usize>,
    live_count: usize,
    next_admission_seq: u64,
    channel_count: usize,
}

impl ReassemblyBuffer {
    /// Create a buffer for `capacity` events of `channel_count` channels each
    pub fn new(capacity: usize, channel_count: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| EventSlot::new(channel_count)).collect(),
            free_slots: (0..capacity).rev().collect(),
            index: FxHashMap::default(),
            admission_order: VecDeque::with_capacity(capacity),
            live_count: 0,
            next_admission_seq: 0,
            channel_count,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.live_count == self.capacity()
    }

    pub fn contains(&self, event_number: u32) -> bool {
        self.index.contains_key(&event_number)
    }

    /// Event numbers currently held, oldest admission first
    pub fn event_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.admission_order
            .iter()
            .map(|position| self.slots[*position].event_number)
    }

    /// Merge one module's values into the event they belong to.
    ///
    /// If the event is new and the buffer is full, the oldest event is evicted into `out`
    /// before the new event is admitted; that is the only case in which `out` is written.
    /// `out` must be exactly `channel_count` long.
    pub fn merge(
        &mut self,
        event_number: u32,
        values: &[ChannelValue],
        out: &mut [u16],
    ) -> Result<MergeOutcome, ReassemblyError> {
        self.check_record(out)?;
        if let Some(&position) = self.index.get(&event_number) {
            let slot = &mut self.slots[position];
            if !slot.is_live || slot.event_number != event_number {
                return Err(ReassemblyError::IndexCorrupted {
                    event_number,
                    position,
                });
            }
            slot.write(values);
            return Ok(MergeOutcome::Merged);
        }

        let outcome = if self.is_full() {
            match self.pop_oldest(out)? {
                Some(evicted) => MergeOutcome::Evicted(evicted),
                None => {
                    return Err(ReassemblyError::LiveCountMismatch {
                        live: self.live_count,
                        queued: self.admission_order.len(),
                    })
                }
            }
        } else {
            MergeOutcome::Admitted
        };

        let position = self.admit(event_number)?;
        self.slots[position].write(values);
        Ok(outcome)
    }

    /// Remove the oldest event and write its channels into `out`.
    ///
    /// Returns the event number, or None if the buffer is empty.
    pub fn pop_oldest(&mut self, out: &mut [u16]) -> Result<Option<u32>, ReassemblyError> {
        self.check_record(out)?;
        let position = match self.admission_order.pop_front() {
            Some(p) => p,
            None if self.live_count == 0 => return Ok(None),
            None => {
                return Err(ReassemblyError::LiveCountMismatch {
                    live: self.live_count,
                    queued: 0,
                })
            }
        };

        let slot = &mut self.slots[position];
        let event_number = slot.event_number;
        if !slot.is_live || self.index.remove(&event_number) != Some(position) {
            return Err(ReassemblyError::IndexCorrupted {
                event_number,
                position,
            });
        }
        if self.live_count == 0 {
            return Err(ReassemblyError::LiveCountMismatch {
                live: 0,
                queued: self.admission_order.len() + 1,
            });
        }

        out.copy_from_slice(&slot.channels);
        slot.is_live = false;
        self.free_slots.push(position);
        self.live_count -= 1;
        spdlog::trace!(
            "Released event {} (admission {}) from slot {}",
            event_number,
            slot.admission_seq,
            position
        );
        Ok(Some(event_number))
    }

    fn check_record(&self, out: &[u16]) -> Result<(), ReassemblyError> {
        if out.len() != self.channel_count {
            return Err(ReassemblyError::RecordSizeMismatch {
                given: out.len(),
                expected: self.channel_count,
            });
        }
        Ok(())
    }

    /// Claim a free slot for a new event
    fn admit(&mut self, event_number: u32) -> Result<usize, ReassemblyError> {
        let position = match self.free_slots.pop() {
            Some(p) => p,
            None => {
                return Err(ReassemblyError::CapacityExceeded {
                    live: self.live_count + 1,
                    capacity: self.capacity(),
                })
            }
        };

        let slot = &mut self.slots[position];
        slot.channels.fill(0);
        slot.event_number = event_number;
        slot.admission_seq = self.next_admission_seq;
        slot.is_live = true;
        self.next_admission_seq += 1;

        self.index.insert(event_number, position);
        self.admission_order.push_back(position);
        self.live_count += 1;

        if self.live_count > self.capacity() {
            return Err(ReassemblyError::CapacityExceeded {
                live: self.live_count,
                capacity: self.capacity(),
            });
        }
        if self.live_count != self.admission_order.len() {
            return Err(ReassemblyError::LiveCountMismatch {
                live: self.live_count,
                queued: self.admission_order.len(),
            });
        }
        Ok(position)
    }
}

#[cfg(test)]
impl ReassemblyBuffer {
    /// Forget the admission order while leaving the index and live count alone
    pub(crate) fn lose_admission_order(&mut self) {
        self.admission_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N_CHANNELS: usize = 256;

    fn cv(index: usize, value: u16) -> ChannelValue {
        ChannelValue { index, value }
    }

    #[test]
    fn test_admit_and_merge() {
        let mut buffer = ReassemblyBuffer::new(4, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        assert_eq!(
            buffer.merge(2002, &[cv(99, 42)], &mut out).unwrap(),
            MergeOutcome::Admitted
        );
        assert_eq!(
            buffer.merge(2002, &[cv(129, 7)], &mut out).unwrap(),
            MergeOutcome::Merged
        );
        assert_eq!(buffer.len(), 1);
        assert!(buffer.contains(2002));

        assert_eq!(buffer.pop_oldest(&mut out).unwrap(), Some(2002));
        assert_eq!(out[99], 42);
        assert_eq!(out[129], 7);
        assert_eq!(out.iter().filter(|v| **v != 0).count(), 2);
        assert!(buffer.is_empty());
        assert!(!buffer.contains(2002));
        assert_eq!(buffer.pop_oldest(&mut out).unwrap(), None);
    }

    #[test]
    fn test_later_write_wins() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[cv(5, 10)], &mut out).unwrap();
        buffer.merge(1, &[cv(5, 11)], &mut out).unwrap();
        buffer.pop_oldest(&mut out).unwrap();
        assert_eq!(out[5], 11);
    }

    #[test]
    fn test_eviction_follows_admission_not_event_number() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(50, &[cv(0, 1)], &mut out).unwrap();
        buffer.merge(10, &[cv(0, 2)], &mut out).unwrap();
        assert!(buffer.is_full());

        assert_eq!(
            buffer.merge(30, &[cv(0, 3)], &mut out).unwrap(),
            MergeOutcome::Evicted(50)
        );
        assert_eq!(out[0], 1);
        assert_eq!(
            buffer.merge(5, &[cv(0, 4)], &mut out).unwrap(),
            MergeOutcome::Evicted(10)
        );
        assert_eq!(out[0], 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.event_numbers().collect::<Vec<_>>(), vec![30, 5]);
    }

    #[test]
    fn test_merge_into_held_event_when_full_does_not_evict() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[cv(0, 1)], &mut out).unwrap();
        buffer.merge(2, &[cv(0, 2)], &mut out).unwrap();
        assert_eq!(
            buffer.merge(1, &[cv(1, 9)], &mut out).unwrap(),
            MergeOutcome::Merged
        );
        assert_eq!(buffer.event_numbers().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_recycled_slot_starts_zeroed() {
        let mut buffer = ReassemblyBuffer::new(1, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[cv(7, 100), cv(8, 200)], &mut out).unwrap();
        assert_eq!(
            buffer.merge(2, &[cv(9, 300)], &mut out).unwrap(),
            MergeOutcome::Evicted(1)
        );
        assert_eq!(buffer.pop_oldest(&mut out).unwrap(), Some(2));
        assert_eq!(out[7], 0);
        assert_eq!(out[8], 0);
        assert_eq!(out[9], 300);
    }

    #[test]
    fn test_live_count_never_exceeds_capacity() {
        let capacity = 3;
        let mut buffer = ReassemblyBuffer::new(capacity, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        let mut evicted = Vec::new();
        for event in 0..20u32 {
            if let MergeOutcome::Evicted(n) = buffer.merge(event * 7 % 11, &[], &mut out).unwrap()
            {
                evicted.push(n);
            }
            assert!(buffer.len() <= capacity);
        }
        while let Some(n) = buffer.pop_oldest(&mut out).unwrap() {
            evicted.push(n);
        }
        assert!(buffer.is_empty());
        assert!(!evicted.is_empty());
    }

    #[test]
    fn test_out_of_range_value_is_dropped() {
        let mut buffer = ReassemblyBuffer::new(1, 4);
        let mut out = vec![0u16; 4];
        buffer.merge(1, &[cv(2, 5), cv(4, 6)], &mut out).unwrap();
        buffer.pop_oldest(&mut out).unwrap();
        assert_eq!(out, vec![0, 0, 5, 0]);
    }

    #[test]
    fn test_wrong_record_size_is_rejected() {
        let mut buffer = ReassemblyBuffer::new(1, 4);
        let mut short = vec![0u16; 3];
        assert_eq!(
            buffer.merge(1, &[cv(0, 1)], &mut short),
            Err(ReassemblyError::RecordSizeMismatch {
                given: 3,
                expected: 4
            })
        );
        assert!(buffer.is_empty());

        let mut out = vec![0u16; 4];
        buffer.merge(1, &[cv(0, 1)], &mut out).unwrap();
        assert!(matches!(
            buffer.pop_oldest(&mut short),
            Err(ReassemblyError::RecordSizeMismatch { .. })
        ));
        assert_eq!(buffer.pop_oldest(&mut out).unwrap(), Some(1));
    }

    #[test]
    fn test_index_pointing_at_wrong_slot_is_detected() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[], &mut out).unwrap();
        buffer.merge(2, &[], &mut out).unwrap();
        // Event 1 now claims the slot holding event 2
        let position = buffer.index[&2];
        buffer.index.insert(1, position);

        assert_eq!(
            buffer.merge(1, &[cv(0, 1)], &mut out),
            Err(ReassemblyError::IndexCorrupted {
                event_number: 1,
                position
            })
        );
        assert!(matches!(
            buffer.pop_oldest(&mut out),
            Err(ReassemblyError::IndexCorrupted { event_number: 1, .. })
        ));
    }

    #[test]
    fn test_lost_admission_entry_is_detected() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[], &mut out).unwrap();
        buffer.admission_order.clear();

        assert_eq!(
            buffer.pop_oldest(&mut out),
            Err(ReassemblyError::LiveCountMismatch { live: 1, queued: 0 })
        );
        assert_eq!(
            buffer.merge(2, &[], &mut out),
            Err(ReassemblyError::LiveCountMismatch { live: 2, queued: 1 })
        );
    }

    #[test]
    fn test_full_buffer_without_free_slot_is_detected() {
        let mut buffer = ReassemblyBuffer::new(2, N_CHANNELS);
        let mut out = vec![0u16; N_CHANNELS];
        buffer.merge(1, &[], &mut out).unwrap();
        buffer.free_slots.clear();

        assert_eq!(
            buffer.merge(2, &[], &mut out),
            Err(ReassemblyError::CapacityExceeded {
                live: 2,
                capacity: 2
            })
        );
    }
}
