//! Log window extraction: find the binary log files whose contents cover the
//! replay interval `(from, to]`.
//!
//! Files are discovered through the server's log index when one exists and
//! by directory scan otherwise. Coverage is judged by each file's recorded
//! time span; a window whose beginning was rotated away by retention, or
//! whose file sequence has a hole, is unavailable rather than silently
//! shortened.

use chrono::{DateTime, Duration, Utc};
use rewind_core::{BinlogFile, BinlogReader, LogWindow, Result, RewindError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct LogWindowExtractor {
    search_dirs: Vec<PathBuf>,
    index_name: String,
}

impl LogWindowExtractor {
    pub fn new(search_dirs: Vec<PathBuf>, index_name: impl Into<String>) -> Self {
        Self {
            search_dirs,
            index_name: index_name.into(),
        }
    }

    /// All log files visible across the search directories, ascending by
    /// sequence, deduplicated by sequence number.
    pub fn discover(&self) -> Result<Vec<BinlogFile>> {
        let mut by_sequence: BTreeMap<u64, BinlogFile> = BTreeMap::new();
        for dir in &self.search_dirs {
            if !dir.exists() {
                continue;
            }
            let index = dir.join(&self.index_name);
            let files = if index.is_file() {
                self.read_index(&index, dir)?
            } else {
                self.scan_dir(dir)?
            };
            for file in files {
                by_sequence.entry(file.sequence).or_insert(file);
            }
        }
        Ok(by_sequence.into_values().collect())
    }

    /// Index entries are written by the server relative to its own working
    /// directory; only the basename is trustworthy here.
    fn read_index(&self, index: &Path, dir: &Path) -> Result<Vec<BinlogFile>> {
        let contents = fs::read_to_string(index)?;
        let mut files = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(name) = Path::new(line).file_name() else {
                continue;
            };
            let path = dir.join(name);
            if !path.is_file() {
                tracing::warn!("log index names {} but it is missing", path.display());
                continue;
            }
            if let Some(file) = BinlogFile::from_path(&path) {
                files.push(file);
            }
        }
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path) -> Result<Vec<BinlogFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(file) = BinlogFile::from_path(&entry.path()) {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Select the files covering `(from, to]` and verify coverage.
    pub async fn extract(
        &self,
        reader: &dyn BinlogReader,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LogWindow> {
        if from >= to {
            tracing::info!("replay interval is empty, no log files needed");
            return Ok(LogWindow {
                from,
                to,
                source_files: Vec::new(),
            });
        }

        let files = self.discover()?;
        if files.is_empty() {
            return Err(RewindError::WindowUnavailable(format!(
                "no binary log files found under {:?}",
                self.search_dirs
            )));
        }

        // Event timestamps carry one-second granularity; widen the probe by a
        // second on each side so boundary events are never dropped by the
        // span check. The script generator enforces the exact boundary.
        let probe_from = from - Duration::seconds(1);
        let probe_to = to + Duration::seconds(1);

        let mut selected = Vec::new();
        for file in files {
            // A freshly rotated tail often holds no timestamped events yet.
            // A file with no readable span cannot overlap the window; if one
            // actually sat inside it, the sequence check below catches the
            // hole it leaves.
            let (start, end) = match reader.time_span(&file.path).await {
                Ok(span) => span,
                Err(e) => {
                    tracing::warn!(
                        "skipping {}: time span unavailable: {}",
                        file.path.display(),
                        e
                    );
                    continue;
                }
            };
            if end < probe_from || start > probe_to {
                continue;
            }
            selected.push((file, start));
        }

        if selected.is_empty() {
            return Err(RewindError::WindowUnavailable(format!(
                "no binary log covers {from} to {to}; the window has been rotated away"
            )));
        }
        let (first, first_start) = &selected[0];
        if *first_start > from {
            return Err(RewindError::WindowUnavailable(format!(
                "earliest surviving log {} begins at {first_start}, after the replay start \
                 {from}; earlier logs were rotated away",
                first.path.display()
            )));
        }
        for pair in selected.windows(2) {
            let (a, _) = &pair[0];
            let (b, _) = &pair[1];
            if b.sequence != a.sequence + 1 {
                return Err(RewindError::WindowUnavailable(format!(
                    "gap in log sequence between {} and {}",
                    a.path.display(),
                    b.path.display()
                )));
            }
        }

        let source_files = selected.into_iter().map(|(f, _)| f).collect();
        Ok(LogWindow {
            from,
            to,
            source_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct SpanReader {
        spans: HashMap<PathBuf, (DateTime<Utc>, DateTime<Utc>)>,
    }

    #[async_trait]
    impl BinlogReader for SpanReader {
        async fn time_span(&self, file: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
            self.spans
                .get(file)
                .copied()
                .ok_or_else(|| RewindError::NotFound(file.display().to_string()))
        }

        async fn read_events(
            &self,
            _files: &[PathBuf],
            _start: Option<DateTime<Utc>>,
            _stop: DateTime<Utc>,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        use chrono::NaiveDateTime;
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    fn span_reader(spans: &[(&PathBuf, &str, &str)]) -> SpanReader {
        SpanReader {
            spans: spans
                .iter()
                .map(|(p, a, b)| ((*p).clone(), (utc(a), utc(b))))
                .collect(),
        }
    }

    #[test]
    fn discovery_prefers_the_index_and_normalizes_paths() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "mysql-bin.000001");
        touch(dir.path(), "mysql-bin.000002");
        // Stale entry for a rotated-away file plus server-relative paths.
        fs::write(
            dir.path().join("mysql-bin.index"),
            "./mysql-bin.000000\n./mysql-bin.000001\n/var/lib/mysql/mysql-bin.000002\n",
        )
        .unwrap();

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let files = extractor.discover().unwrap();
        assert_eq!(
            files.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(files[0].path.starts_with(dir.path()));
    }

    #[test]
    fn discovery_falls_back_to_directory_scan() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "mysql-bin.000003");
        touch(dir.path(), "mysql-bin.000001");
        touch(dir.path(), "ib_logfile0");

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let files = extractor.discover().unwrap();
        assert_eq!(
            files.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[tokio::test]
    async fn selects_only_overlapping_files() {
        let dir = TempDir::new().unwrap();
        let f1 = touch(dir.path(), "mysql-bin.000001");
        let f2 = touch(dir.path(), "mysql-bin.000002");
        let f3 = touch(dir.path(), "mysql-bin.000003");
        let reader = span_reader(&[
            (&f1, "2025-11-26 00:00:00", "2025-11-26 02:00:00"),
            (&f2, "2025-11-26 02:00:00", "2025-11-26 04:00:00"),
            (&f3, "2025-11-26 04:00:00", "2025-11-26 06:00:00"),
        ]);

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let window = extractor
            .extract(&reader, utc("2025-11-26 02:30:00"), utc("2025-11-26 03:30:00"))
            .await
            .unwrap();
        assert_eq!(
            window.source_files.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[tokio::test]
    async fn rotated_away_start_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let f2 = touch(dir.path(), "mysql-bin.000002");
        let reader = span_reader(&[(&f2, "2025-11-26 03:00:00", "2025-11-26 04:00:00")]);

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let err = extractor
            .extract(&reader, utc("2025-11-26 02:00:00"), utc("2025-11-26 03:30:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::WindowUnavailable(_)));
    }

    #[tokio::test]
    async fn sequence_gap_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let f1 = touch(dir.path(), "mysql-bin.000001");
        let f3 = touch(dir.path(), "mysql-bin.000003");
        let reader = span_reader(&[
            (&f1, "2025-11-26 00:00:00", "2025-11-26 02:00:00"),
            (&f3, "2025-11-26 02:00:00", "2025-11-26 06:00:00"),
        ]);

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let err = extractor
            .extract(&reader, utc("2025-11-26 01:00:00"), utc("2025-11-26 05:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::WindowUnavailable(_)));
    }

    #[tokio::test]
    async fn unreadable_tail_outside_the_window_is_skipped() {
        let dir = TempDir::new().unwrap();
        let f1 = touch(dir.path(), "mysql-bin.000001");
        let f2 = touch(dir.path(), "mysql-bin.000002");
        // The newest log exists but yields no span, as a just-rotated file
        // with no events does.
        touch(dir.path(), "mysql-bin.000003");
        let reader = span_reader(&[
            (&f1, "2025-11-26 00:00:00", "2025-11-26 02:00:00"),
            (&f2, "2025-11-26 02:00:00", "2025-11-26 04:00:00"),
        ]);

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let window = extractor
            .extract(&reader, utc("2025-11-26 02:30:00"), utc("2025-11-26 03:30:00"))
            .await
            .unwrap();
        assert_eq!(
            window.source_files.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[tokio::test]
    async fn unreadable_file_inside_the_window_leaves_a_gap() {
        let dir = TempDir::new().unwrap();
        let f1 = touch(dir.path(), "mysql-bin.000001");
        touch(dir.path(), "mysql-bin.000002");
        let f3 = touch(dir.path(), "mysql-bin.000003");
        let reader = span_reader(&[
            (&f1, "2025-11-26 00:00:00", "2025-11-26 02:00:00"),
            (&f3, "2025-11-26 04:00:00", "2025-11-26 06:00:00"),
        ]);

        let extractor =
            LogWindowExtractor::new(vec![dir.path().to_path_buf()], "mysql-bin.index");
        let err = extractor
            .extract(&reader, utc("2025-11-26 01:00:00"), utc("2025-11-26 05:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::WindowUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_interval_needs_no_files() {
        let extractor = LogWindowExtractor::new(Vec::new(), "mysql-bin.index");
        let reader = span_reader(&[]);
        let at = utc("2025-11-26 02:00:00");
        let window = extractor.extract(&reader, at, at).await.unwrap();
        assert!(window.is_empty_interval());
        assert!(window.source_files.is_empty());
    }
}
