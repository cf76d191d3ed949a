use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use super::config::{Config, ProtocolErrorPolicy, UnpackerConfig};
use super::constants::WORD_SIZE;
use super::error::{ProcessorError, UnpackerError};
use super::scaler::ScalerTotals;
use super::unpacker::{DecodeStatus, Unpacker, UnpackerStats};
use super::word_source::{WordReader, WordSource};
use super::worker_status::WorkerStatus;

/// What came out of one stream
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub input_path: PathBuf,
    pub size_bytes: u64,
    pub stats: UnpackerStats,
    /// Number of events in which each channel had a non-zero value
    pub channel_hits: Vec<u64>,
    pub scaler_totals: ScalerTotals,
    /// Events still buffered when the stream ended without a run end
    pub flushed_events: u64,
}

impl StreamSummary {
    fn new(channel_count: usize) -> Self {
        Self {
            channel_hits: vec![0; channel_count],
            ..Default::default()
        }
    }

    fn tally_event(&mut self, record: &[u16]) {
        for (hits, value) in self.channel_hits.iter_mut().zip(record) {
            if *value != 0 {
                *hits += 1;
            }
        }
    }

    /// Number of channels that fired at least once
    pub fn active_channels(&self) -> usize {
        self.channel_hits.iter().filter(|hits| **hits > 0).count()
    }
}

/// Unpack an entire stream, tallying every event.
///
/// `progress` is handed the number of words read after each decode call. ProtocolErrors are
/// handled according to `policy`; the unpacker has already logged them. Events still buffered
/// when the source ends are flushed and counted.
pub fn unpack_stream<S, F>(
    config: &UnpackerConfig,
    policy: ProtocolErrorPolicy,
    source: S,
    mut progress: F,
) -> Result<StreamSummary, ProcessorError>
where
    S: WordSource,
    F: FnMut(u64) -> Result<(), ProcessorError>,
{
    let mut unpacker = Unpacker::with_scaler_sink(config.clone(), source, ScalerTotals::new())?;
    let mut record = unpacker.new_record();
    let mut summary = StreamSummary::new(config.channel_count);

    loop {
        match unpacker.decode_next(&mut record) {
            Ok(DecodeStatus::Event { .. }) => summary.tally_event(&record),
            Ok(DecodeStatus::EndOfSource) => break,
            Ok(_) => (),
            Err(UnpackerError::Protocol(_)) if policy == ProtocolErrorPolicy::Resync => (),
            Err(e) => return Err(ProcessorError::UnpackerError(e)),
        }
        progress(unpacker.stats().words_read)?;
    }

    while unpacker.flush_oldest(&mut record)?.is_some() {
        summary.tally_event(&record);
        summary.flushed_events += 1;
    }
    if summary.flushed_events > 0 {
        spdlog::warn!(
            "Stream ended without a run end; flushed {} buffered events",
            summary.flushed_events
        );
    }

    summary.stats = unpacker.stats();
    let (_, scaler_totals) = unpacker.into_parts();
    summary.scaler_totals = scaler_totals;
    Ok(summary)
}

/// Unpack one of the configured inputs, reporting progress over `tx`.
pub fn process_input(
    config: &Config,
    input_number: usize,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<StreamSummary, ProcessorError> {
    let input_path = match config.input_paths.get(input_number) {
        Some(p) if config.does_input_exist(p) => p.clone(),
        Some(p) => return Err(ProcessorError::BadFilePath(p.clone())),
        None => return Err(ProcessorError::BadFilePath(PathBuf::from("None"))),
    };

    let size_bytes = input_path.metadata()?.len();
    spdlog::info!(
        "Total stream size: {}",
        human_bytes::human_bytes(size_bytes as f64)
    );
    let total_words = (size_bytes / WORD_SIZE as u64).max(1);
    let flush_frac: f32 = 0.01;
    let flush_val = ((total_words as f64 * flush_frac as f64) as u64).max(1);
    let mut next_flush = flush_val;

    tx.send(WorkerStatus::new(0.0, input_number, *worker_id))?;
    let reader = WordReader::new(
        BufReader::new(File::open(&input_path)?),
        config.unpacker.byte_order,
    );
    let mut summary = unpack_stream(
        &config.unpacker,
        config.on_protocol_error,
        reader,
        |words_read| {
            if words_read >= next_flush {
                next_flush = words_read + flush_val;
                tx.send(WorkerStatus::new(
                    words_read as f32 / total_words as f32,
                    input_number,
                    *worker_id,
                ))?;
            }
            Ok(())
        },
    )?;
    tx.send(WorkerStatus::new(1.0, input_number, *worker_id))?;

    summary.input_path = input_path;
    summary.size_bytes = size_bytes;
    Ok(summary)
}

/// What one worker produced: a summary for every input that was unpacked, and the error for
/// every input that was not
#[derive(Debug, Default)]
pub struct SubsetReport {
    pub summaries: Vec<StreamSummary>,
    pub failures: Vec<(PathBuf, ProcessorError)>,
}

/// The function to be called by a separate thread.
/// Unpacks every configured input in order
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<SubsetReport, ProcessorError> {
    let subset = (0..config.input_paths.len()).collect();
    process_subset(config, tx, worker_id, subset)
}

/// Process a subset of the inputs, given by their position in the config.
///
/// A failed input is logged and recorded in the report, and the worker moves on to the next
/// one. Only losing the status channel stops the whole subset.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<usize>,
) -> Result<SubsetReport, ProcessorError> {
    let mut report = SubsetReport::default();
    for input_number in subset {
        let path = match config.input_paths.get(input_number) {
            Some(p) => p,
            None => continue,
        };
        if !config.does_input_exist(path) {
            spdlog::info!("Input {} does not exist, skipping...", path.to_string_lossy());
            continue;
        }

        spdlog::info!("Processing {}...", path.to_string_lossy());
        match process_input(&config, input_number, &tx, &worker_id) {
            Ok(summary) => {
                spdlog::info!("Finished processing {}.", path.to_string_lossy());
                report.summaries.push(summary);
            }
            Err(ProcessorError::SendError(e)) => return Err(ProcessorError::SendError(e)),
            Err(e) => {
                spdlog::error!("Stopped processing {}: {e}", path.to_string_lossy());
                report.failures.push((path.clone(), e));
            }
        }
    }
    Ok(report)
}

/// Divide the inputs in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<usize>> {
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for idx in 0..config.input_paths.len() {
        subsets[idx % n_subsets].push(idx)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BUFFER_BOUNDARY, RUN_END, SCALER_START};
    use crate::word::{make_end_block, make_header, make_parameter};
    use crate::word_source::WordBuffer;
    use std::io::Write;
    use std::sync::mpsc;

    fn sample_words() -> Vec<u32> {
        vec![
            make_header(2),
            make_parameter(0, 10),
            make_end_block(1),
            make_header(3),
            make_parameter(4, 20),
            make_end_block(1),
            SCALER_START,
            2,
            5,
            6,
            make_header(2),
            make_parameter(0, 11),
            make_end_block(2),
            BUFFER_BOUNDARY,
            make_header(2),
            make_parameter(1, 12),
            make_end_block(3),
            RUN_END,
        ]
    }

    #[test]
    fn test_create_subsets() {
        let mut config = Config::default();
        config.input_paths = (0..5).map(|i| PathBuf::from(format!("{i}.dat"))).collect();
        config.n_threads = 2;
        assert_eq!(create_subsets(&config), vec![vec![0, 2, 4], vec![1, 3]]);

        config.n_threads = 8;
        let subsets = create_subsets(&config);
        assert_eq!(subsets.len(), 8);
        assert_eq!(subsets.iter().filter(|s| s.is_empty()).count(), 3);
    }

    #[test]
    fn test_unpack_stream_summary() {
        let summary = unpack_stream(
            &UnpackerConfig::new(256, 4),
            ProtocolErrorPolicy::Abort,
            WordBuffer::new(sample_words()),
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(summary.stats.events_emitted, 3);
        assert_eq!(summary.stats.scaler_snapshots, 1);
        assert_eq!(summary.stats.boundaries, 1);
        assert_eq!(summary.flushed_events, 0);
        assert_eq!(summary.channel_hits[0], 2);
        assert_eq!(summary.channel_hits[1], 1);
        assert_eq!(summary.channel_hits[36], 1);
        assert_eq!(summary.active_channels(), 3);
        assert_eq!(summary.scaler_totals.totals(), &[5, 6]);
    }

    #[test]
    fn test_unpack_stream_flushes_truncated_stream() {
        let mut words = sample_words();
        words.pop(); // no run end
        let summary = unpack_stream(
            &UnpackerConfig::new(256, 4),
            ProtocolErrorPolicy::Abort,
            WordBuffer::new(words),
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(summary.flushed_events, 1);
        assert_eq!(summary.stats.events_emitted, 3);
    }

    #[test]
    fn test_protocol_error_policy() {
        let mut words = vec![make_header(2), make_parameter(0, 1)];
        words.extend(sample_words());

        let aborted = unpack_stream(
            &UnpackerConfig::new(256, 4),
            ProtocolErrorPolicy::Abort,
            WordBuffer::new(words.clone()),
            |_| Ok(()),
        );
        assert!(matches!(
            aborted,
            Err(ProcessorError::UnpackerError(UnpackerError::Protocol(_)))
        ));

        let resynced = unpack_stream(
            &UnpackerConfig::new(256, 4),
            ProtocolErrorPolicy::Resync,
            WordBuffer::new(words),
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(resynced.stats.protocol_errors, 1);
        assert_eq!(resynced.stats.events_emitted, 3);
    }

    fn write_words(path: &std::path::Path, words: &[u32]) {
        let mut file = File::create(path).unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn test_process_input_file() {
        let dir = std::env::temp_dir().join(format!("vme_merger_process_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run_0001.dat");
        write_words(&path, &sample_words());

        let mut config = Config::default();
        config.input_paths = vec![path.clone(), dir.join("missing.dat")];
        let (tx, rx) = mpsc::channel::<WorkerStatus>();
        let report = process(config, tx, 0).unwrap();
        assert!(report.failures.is_empty());
        let summaries = report.summaries;

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].input_path, path);
        assert_eq!(summaries[0].size_bytes, 4 * sample_words().len() as u64);
        assert_eq!(summaries[0].stats.events_emitted, 3);
        assert_eq!(
            summaries[0].stats.words_read,
            sample_words().len() as u64
        );

        let statuses: Vec<WorkerStatus> = rx.try_iter().collect();
        assert_eq!(statuses.first().map(|s| s.progress), Some(0.0));
        assert_eq!(statuses.last().map(|s| s.progress), Some(1.0));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_broken_input_does_not_stop_the_subset() {
        let dir =
            std::env::temp_dir().join(format!("vme_merger_broken_input_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("run_0001.dat");
        let broken = dir.join("run_0002.dat");
        let good_too = dir.join("run_0003.dat");
        write_words(&good, &sample_words());
        let mut broken_words = vec![make_header(2), make_parameter(0, 1)];
        broken_words.extend(sample_words());
        write_words(&broken, &broken_words);
        write_words(&good_too, &sample_words());

        let mut config = Config::default();
        config.input_paths = vec![good.clone(), broken.clone(), good_too.clone()];
        config.on_protocol_error = ProtocolErrorPolicy::Abort;
        let (tx, _rx) = mpsc::channel::<WorkerStatus>();
        let report = process(config, tx, 0).unwrap();

        let processed: Vec<&PathBuf> = report.summaries.iter().map(|s| &s.input_path).collect();
        assert_eq!(processed, vec![&good, &good_too]);
        assert_eq!(report.summaries[1].stats.events_emitted, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, broken);
        assert!(matches!(
            report.failures[0].1,
            ProcessorError::UnpackerError(UnpackerError::Protocol(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_lost_status_channel_stops_the_subset() {
        let dir =
            std::env::temp_dir().join(format!("vme_merger_lost_channel_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run_0001.dat");
        write_words(&path, &sample_words());

        let mut config = Config::default();
        config.input_paths = vec![path];
        let (tx, rx) = mpsc::channel::<WorkerStatus>();
        drop(rx);
        assert!(matches!(
            process(config, tx, 0),
            Err(ProcessorError::SendError(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
