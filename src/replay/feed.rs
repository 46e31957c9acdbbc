//! Record Feeds
//!
//! A feed yields the transaction log one batch at a time; the orchestrator
//! never looks past a batch boundary. [`DailyLogFeed`] reads a directory of
//! daily `.tsv.gz` exports, one file per batch, in file-name order.

use crate::replay::records::{Amount, RawRecord};
use async_compression::tokio::bufread::GzipDecoder;
use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tracing::{info, warn};

pub const DAILY_LOG_EXTENSION: &str = ".tsv.gz";

const SENDER_COLUMN: &str = "sender";
const RECIPIENT_COLUMN: &str = "recipient";
const TOKEN_COLUMN: &str = "token_address";
const VALUE_COLUMN: &str = "value";

/// One unit of replay work: the records of one log file (one day).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub label: String,
    pub records: Vec<RawRecord>,
    /// Data rows in the source, including skipped ones.
    pub rows_total: usize,
    pub rows_skipped: usize,
}

impl RecordBatch {
    pub fn new(label: impl Into<String>, records: Vec<RawRecord>) -> Self {
        let rows_total = records.len();
        Self {
            label: label.into(),
            records,
            rows_total,
            rows_skipped: 0,
        }
    }
}

/// A source of record batches in replay order.
pub trait RecordFeed {
    fn next_batch(&mut self) -> Option<RecordBatch>;

    /// Batches still queued, if known.
    fn remaining(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &str {
        "unknown"
    }
}

/// In-memory feed.
pub struct VecFeed {
    batches: VecDeque<RecordBatch>,
    name: String,
}

impl VecFeed {
    pub fn new(name: impl Into<String>, batches: Vec<RecordBatch>) -> Self {
        Self {
            batches: batches.into(),
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl RecordFeed for VecFeed {
    fn next_batch(&mut self) -> Option<RecordBatch> {
        self.batches.pop_front()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.batches.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub enum FeedError {
    Io { path: PathBuf, source: std::io::Error },
    Csv { path: PathBuf, source: csv_async::Error },
    MissingColumn { path: PathBuf, column: &'static str },
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {}", path.display(), source),
            Self::Csv { path, source } => write!(f, "malformed log {}: {}", path.display(), source),
            Self::MissingColumn { path, column } => {
                write!(f, "{} has no `{}` column", path.display(), column)
            }
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::MissingColumn { .. } => None,
        }
    }
}

struct Columns {
    sender: usize,
    recipient: usize,
    token: usize,
    value: usize,
}

impl Columns {
    fn locate(headers: &StringRecord, path: &Path) -> Result<Self, FeedError> {
        let find = |column: &'static str| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| FeedError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                })
        };
        Ok(Self {
            sender: find(SENDER_COLUMN)?,
            recipient: find(RECIPIENT_COLUMN)?,
            token: find(TOKEN_COLUMN)?,
            value: find(VALUE_COLUMN)?,
        })
    }

    fn parse(&self, row: &StringRecord) -> Option<RawRecord> {
        let sender = row.get(self.sender).filter(|s| !s.is_empty())?;
        let recipient = row.get(self.recipient).filter(|s| !s.is_empty())?;
        let token = row.get(self.token).filter(|s| !s.is_empty())?;
        let amount: Amount = row.get(self.value)?.parse().ok()?;
        Some(RawRecord::new(sender, recipient, token, amount))
    }
}

/// Decompress and parse one daily export.
pub async fn read_daily_log(path: &Path) -> Result<RecordBatch, FeedError> {
    let io_err = |source| FeedError::Io {
        path: path.to_path_buf(),
        source,
    };
    let csv_err = |source| FeedError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let decoder = GzipDecoder::new(BufReader::new(file));
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .trim(Trim::All)
        .create_reader(decoder);

    let columns = Columns::locate(reader.headers().await.map_err(csv_err)?, path)?;

    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut batch = RecordBatch {
        label,
        ..RecordBatch::default()
    };

    let mut rows = reader.records();
    while let Some(row) = rows.next().await {
        let row = row.map_err(csv_err)?;
        batch.rows_total += 1;
        match columns.parse(&row) {
            Some(record) => batch.records.push(record),
            None => {
                batch.rows_skipped += 1;
                warn!(
                    "{}: skipping malformed row {}",
                    batch.label,
                    row.position().map_or(0, |p| p.line())
                );
            }
        }
    }
    Ok(batch)
}

/// Daily `.tsv.gz` exports from one directory.
pub struct DailyLogFeed {
    dir: PathBuf,
    files: VecDeque<PathBuf>,
    runtime: tokio::runtime::Runtime,
    name: String,
}

impl DailyLogFeed {
    /// List `dir` in sorted order. Entries without the daily-log extension are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FeedError> {
        let dir = dir.into();
        let io_err = |source| FeedError::Io {
            path: dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err)? {
            names.push(entry.map_err(io_err)?.file_name());
        }
        names.sort();

        let mut files = VecDeque::new();
        for name in names {
            let name = name.to_string_lossy().into_owned();
            if name.ends_with(DAILY_LOG_EXTENSION) {
                files.push_back(dir.join(name));
            } else {
                warn!("File {} is not valid", name);
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(io_err)?;

        Ok(Self {
            name: dir.display().to_string(),
            dir,
            files,
            runtime,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordFeed for DailyLogFeed {
    fn next_batch(&mut self) -> Option<RecordBatch> {
        while let Some(path) = self.files.pop_front() {
            info!("Opening {}", path.display());
            match self.runtime.block_on(read_daily_log(&path)) {
                Ok(batch) => return Some(batch),
                Err(e) => warn!("skipping {}: {}", path.display(), e),
            }
        }
        None
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
