//! The counting pipeline driver.
//!
//! Drives corpus tokens through in-memory counting blocks into sorted run
//! files:
//!
//! ```text
//!  tokens ──► sentences ──► worker 0: CountingBlock ──sort──► run-00000.grs
//!                     └───► worker 1: CountingBlock ──sort──► run-00001.grs
//!                     └───► ...                               + .json manifests
//! ```
//!
//! Workers are bulk-synchronous threads: each owns one counting block for
//! its entire insert, sort, emit lifetime, seals it into a freshly named
//! run file when it reaches its record target, and starts a new block. Run
//! files are written sequentially start to end by a single worker; no
//! ordering holds across files (a downstream k-way merge handles that).
//!
//! Word id 0 is the sentence boundary: n-grams are windows within one
//! sentence, so none ever spans a boundary or contains the sentinel.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::Config;
use crate::counting::CountingBlock;
use crate::errinput;
use crate::error::{Error, Result};
use crate::hasher::KeyHasher;
use crate::order::SortOrder;
use crate::record::{BlockStats, WordId, MAX_ORDER, SENTENCE_BREAK};
use crate::run::{FrontCodedWriter, RunManifest, RunSummary};

/// A sealed run file and its manifest.
#[derive(Clone, Debug)]
pub struct RunFile {
    pub path: PathBuf,
    pub manifest: RunManifest,
}

/// Totals across one pipeline execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Tokens consumed, sentence boundaries included.
    pub tokens: u64,
    /// Non-empty sentences seen.
    pub sentences: u64,
    /// N-gram occurrences counted.
    pub ngrams: u64,
    /// Distinct n-grams across all runs (before merging).
    pub distinct_ngrams: u64,
    /// Run files written.
    pub runs: u64,
    /// Bytes written across all run files, manifests excluded.
    pub bytes_written: u64,
}

/// Everything a pipeline execution produces.
#[derive(Debug)]
pub struct PipelineOutput {
    pub runs: Vec<RunFile>,
    pub stats: PipelineStats,
}

#[derive(Default)]
struct WorkerOutput {
    ngrams: u64,
    bytes: u64,
    runs: Vec<RunFile>,
}

/// Owns one counting pass over a corpus.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Validates the configuration and creates the run directory. All input
    /// errors surface here, before any work begins.
    pub fn new(config: Config) -> Result<Self> {
        if config.order <= 2 || config.order > MAX_ORDER {
            return errinput!(
                "model order must be > 2 and <= {MAX_ORDER}, got {}",
                config.order
            );
        }
        if config.threads == 0 {
            return errinput!("thread count must be > 0");
        }
        if config.ram_bytes == 0 {
            return errinput!("ram budget must be > 0");
        }
        fs::create_dir_all(&config.tmp_dir)
            .map_err(|err| Error::IO(format!("{}: {err}", config.tmp_dir.display())))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consumes the token stream and drives it to completion, returning the
    /// run files plus totals. On any failure every partial run file is
    /// deleted before the error surfaces.
    pub fn run<I>(&self, tokens: I) -> Result<PipelineOutput>
    where
        I: IntoIterator<Item = WordId>,
    {
        let target = self.config.block_target_size();
        let run_seq = AtomicU64::new(0);
        let (tx, rx) = mpsc::sync_channel::<Vec<WordId>>(self.config.threads * 4);
        let rx = Arc::new(Mutex::new(rx));

        let mut stats = PipelineStats::default();
        let mut worker_results: Vec<Result<WorkerOutput>> = Vec::new();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.config.threads);
            for _ in 0..self.config.threads {
                let rx = Arc::clone(&rx);
                let run_seq = &run_seq;
                handles.push(scope.spawn(move || self.worker(rx, target, run_seq)));
            }

            // Split the stream into sentences and feed the pool. A closed
            // channel means every worker is gone; stop feeding and collect
            // the error below.
            let mut sentence: Vec<WordId> = Vec::new();
            for token in tokens {
                stats.tokens += 1;
                if token != SENTENCE_BREAK {
                    sentence.push(token);
                    continue;
                }
                if sentence.is_empty() {
                    continue;
                }
                stats.sentences += 1;
                if sentence.len() >= self.config.order {
                    if tx.send(std::mem::take(&mut sentence)).is_err() {
                        break;
                    }
                } else {
                    sentence.clear();
                }
            }
            if !sentence.is_empty() {
                stats.sentences += 1;
                if sentence.len() >= self.config.order {
                    let _ = tx.send(sentence);
                }
            }
            drop(tx);

            for handle in handles {
                worker_results.push(
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Internal("worker thread panicked".into()))),
                );
            }
        });

        let mut runs = Vec::new();
        let mut first_error = None;
        for result in worker_results {
            match result {
                Ok(output) => {
                    stats.ngrams += output.ngrams;
                    stats.bytes_written += output.bytes;
                    runs.extend(output.runs);
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            self.discard_runs(&runs);
            return Err(err);
        }

        runs.sort_by(|a, b| a.path.cmp(&b.path));
        for run in &runs {
            stats.distinct_ngrams += run.manifest.records;
        }
        stats.runs = runs.len() as u64;
        tracing::info!(
            tokens = stats.tokens,
            ngrams = stats.ngrams,
            distinct = stats.distinct_ngrams,
            runs = stats.runs,
            bytes = stats.bytes_written,
            "counting pipeline complete"
        );
        Ok(PipelineOutput { runs, stats })
    }

    fn worker(
        &self,
        rx: Arc<Mutex<Receiver<Vec<WordId>>>>,
        target: usize,
        run_seq: &AtomicU64,
    ) -> Result<WorkerOutput> {
        let order = self.config.order;
        let ordering = self.config.ordering.build(order);
        let hasher = KeyHasher::new();
        let mut block = CountingBlock::new(order, target);
        let mut output = WorkerOutput::default();

        loop {
            let message = rx.lock()?.recv();
            let Ok(sentence) = message else { break };
            for window in sentence.windows(order) {
                if block.is_full() {
                    self.seal(block, ordering.as_ref(), run_seq, &mut output)?;
                    block = CountingBlock::new(order, target);
                }
                let (existed, id) = block.find_or_insert(window, hasher.hash(window))?;
                if existed {
                    *block.count_mut(id) += 1;
                }
                output.ngrams += 1;
            }
        }

        if !block.is_empty() {
            self.seal(block, ordering.as_ref(), run_seq, &mut output)?;
        }
        Ok(output)
    }

    /// Sorts a full block and streams it into a freshly named run file plus
    /// manifest. A failed write leaves no file behind.
    fn seal(
        &self,
        mut block: CountingBlock,
        ordering: &dyn SortOrder,
        run_seq: &AtomicU64,
        output: &mut WorkerOutput,
    ) -> Result<()> {
        let load_factor = block.load_factor();
        block.sort(ordering, self.config.sort);
        let stats = block.stats();

        let seq = run_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let path = self.config.tmp_dir.join(format!("run-{seq:05}.grs"));

        let summary = match self.write_run(&path, &block, ordering, &stats) {
            Ok(summary) => summary,
            Err(err) => {
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        };
        let manifest = RunManifest {
            order: self.config.order,
            ordering: self.config.ordering,
            schedule: ordering.schedule(),
            records: summary.records,
            blocks: summary.blocks,
            max_word_id: stats.max_word_id,
            max_count: stats.max_count,
        };
        if let Err(err) = manifest.save(&path) {
            let _ = fs::remove_file(&path);
            return Err(err);
        }

        tracing::info!(
            run = %path.display(),
            records = summary.records,
            blocks = summary.blocks,
            load_factor,
            w = stats.word_bits(),
            v = stats.count_bits(),
            "sealed counting block"
        );
        output.bytes += summary.bytes;
        output.runs.push(RunFile { path, manifest });
        Ok(())
    }

    fn write_run(
        &self,
        path: &Path,
        block: &CountingBlock,
        ordering: &dyn SortOrder,
        stats: &BlockStats,
    ) -> Result<RunSummary> {
        let file = File::create(path)
            .map_err(|err| Error::IO(format!("{}: {err}", path.display())))?;
        let mut out = BufWriter::new(file);
        let mut writer = FrontCodedWriter::new(self.config.order);
        let summary = writer.write_run(&mut out, block.iter(), stats, ordering)?;
        out.flush()
            .map_err(|err| Error::IO(format!("{}: {err}", path.display())))?;
        Ok(summary)
    }

    /// Deletes run files and manifests after a failure.
    fn discard_runs(&self, runs: &[RunFile]) {
        for run in runs {
            tracing::warn!(run = %run.path.display(), "discarding partial run after failure");
            let _ = fs::remove_file(&run.path);
            let _ = fs::remove_file(RunManifest::path_for(&run.path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::SortStrategy;
    use crate::order::OrderKind;
    use crate::run::RunReader;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn tokens_of(sentences: &[&[WordId]]) -> Vec<WordId> {
        let mut tokens = Vec::new();
        for sentence in sentences {
            tokens.extend_from_slice(sentence);
            tokens.push(SENTENCE_BREAK);
        }
        tokens
    }

    /// Sums counts per key across every run of the output.
    fn aggregate(output: &PipelineOutput) -> HashMap<Vec<WordId>, u64> {
        let mut totals = HashMap::new();
        for run in &output.runs {
            let ordering = run.manifest.ordering.build(run.manifest.order);
            let mut reader =
                RunReader::open(&run.path, run.manifest.order).expect("open run");
            for (key, count) in reader.collect_records(ordering.as_ref()).expect("read run") {
                *totals.entry(key).or_insert(0) += count;
            }
        }
        totals
    }

    #[test]
    fn test_rejects_invalid_order() {
        let dir = TempDir::new().unwrap();
        for order in [0, 1, 2, MAX_ORDER + 1] {
            let config = Config::new(order).tmp_dir(dir.path());
            assert!(
                matches!(Pipeline::new(config), Err(Error::InvalidInput(_))),
                "order {order} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_zero_threads() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(3).tmp_dir(dir.path()).threads(0);
        assert!(matches!(Pipeline::new(config), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_single_worker_counts_and_sorts() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(3).tmp_dir(dir.path());
        let pipeline = Pipeline::new(config).unwrap();

        let tokens = tokens_of(&[&[1, 2, 3, 4], &[1, 2, 3], &[9, 8]]);
        let output = pipeline.run(tokens).expect("pipeline failed");

        assert_eq!(output.stats.tokens, 12);
        assert_eq!(output.stats.sentences, 3);
        // Windows: (1,2,3), (2,3,4) from the first sentence, (1,2,3) from
        // the second; the third is too short.
        assert_eq!(output.stats.ngrams, 3);
        assert_eq!(output.stats.distinct_ngrams, 2);
        assert_eq!(output.runs.len(), 1);

        let run = &output.runs[0];
        assert_eq!(run.manifest.order, 3);
        assert_eq!(run.manifest.schedule, vec![2, 0, 1]);
        assert_eq!(run.manifest.records, 2);
        assert_eq!(run.manifest.max_word_id, 4);
        assert_eq!(run.manifest.max_count, 2);
        assert!(RunManifest::path_for(&run.path).exists());

        let ordering = run.manifest.ordering.build(3);
        let mut reader = RunReader::open(&run.path, 3).unwrap();
        let records = reader.collect_records(ordering.as_ref()).unwrap();
        // Context order: last word 3 before last word 4.
        assert_eq!(records, vec![(vec![1, 2, 3], 2), (vec![2, 3, 4], 1)]);
    }

    #[test]
    fn test_multiple_runs_when_block_fills() {
        let dir = TempDir::new().unwrap();
        // A 1-byte budget clamps the block target to its 1024-record
        // minimum, so 2000 distinct trigrams must span two runs.
        let config = Config::new(3).tmp_dir(dir.path()).ram_bytes(1);
        let pipeline = Pipeline::new(config).unwrap();

        let tokens: Vec<WordId> = (1..=2002).collect();
        let output = pipeline.run(tokens).expect("pipeline failed");

        assert_eq!(output.stats.ngrams, 2000);
        assert_eq!(output.stats.distinct_ngrams, 2000);
        assert_eq!(output.runs.len(), 2);
        assert_eq!(output.runs[0].manifest.records, 1024);
        assert_eq!(output.runs[1].manifest.records, 976);

        let totals = aggregate(&output);
        assert_eq!(totals.len(), 2000);
        assert!(totals.values().all(|&count| count == 1));
        assert_eq!(totals[&vec![1, 2, 3]], 1);
        assert_eq!(totals[&vec![2000, 2001, 2002]], 1);
    }

    #[test]
    fn test_multi_threaded_aggregate_counts() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(3)
            .tmp_dir(dir.path())
            .threads(4)
            .sort(SortStrategy::Comparison)
            .ordering(OrderKind::Prefix);
        let pipeline = Pipeline::new(config).unwrap();

        // Repeat a handful of sentences; counts must aggregate exactly no
        // matter how sentences land on workers.
        let sentences: Vec<Vec<WordId>> = vec![
            vec![1, 2, 3, 4, 5],
            vec![2, 3, 4],
            vec![1, 2, 3],
            vec![7, 8, 9, 7, 8, 9],
        ];
        let mut tokens = Vec::new();
        for _ in 0..50 {
            for sentence in &sentences {
                tokens.extend_from_slice(sentence);
                tokens.push(SENTENCE_BREAK);
            }
        }

        let output = pipeline.run(tokens).expect("pipeline failed");
        let totals = aggregate(&output);

        // Per iteration: (1,2,3) x2, (2,3,4) x2, (3,4,5) x1, (7,8,9) x2,
        // (8,9,7) x1, (9,7,8) x1.
        assert_eq!(totals[&vec![1, 2, 3]], 100);
        assert_eq!(totals[&vec![2, 3, 4]], 100);
        assert_eq!(totals[&vec![3, 4, 5]], 50);
        assert_eq!(totals[&vec![7, 8, 9]], 100);
        assert_eq!(totals[&vec![8, 9, 7]], 50);
        assert_eq!(totals[&vec![9, 7, 8]], 50);
        assert_eq!(totals.len(), 6);

        // Every run is itself sorted by its manifest's ordering.
        for run in &output.runs {
            let ordering = run.manifest.ordering.build(run.manifest.order);
            let mut reader = RunReader::open(&run.path, run.manifest.order).unwrap();
            let records = reader.collect_records(ordering.as_ref()).unwrap();
            for pair in records.windows(2) {
                assert_eq!(
                    ordering.compare(&pair[0].0, &pair[1].0),
                    std::cmp::Ordering::Less
                );
            }
        }
    }

    #[test]
    fn test_empty_input_produces_no_runs() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::new(3).tmp_dir(dir.path())).unwrap();
        let output = pipeline.run(Vec::new()).expect("pipeline failed");
        assert!(output.runs.is_empty());
        assert_eq!(output.stats, PipelineStats::default());
    }

    #[test]
    fn test_sentences_never_span_boundaries() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::new(3).tmp_dir(dir.path())).unwrap();
        // Without the boundary this would produce (2,3,4) and (3,4,5).
        let tokens = vec![2, 3, SENTENCE_BREAK, 4, 5, SENTENCE_BREAK];
        let output = pipeline.run(tokens).expect("pipeline failed");
        assert_eq!(output.stats.ngrams, 0);
        assert!(output.runs.is_empty());
    }
}
