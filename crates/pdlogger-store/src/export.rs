//! Merged CSV export of all cataloged segments.
//!
//! The exporter walks the catalog in order and produces one logical CSV
//! document: a single [`CSV_HEADER`] row followed by the data rows of every
//! segment (each segment's own header row is dropped).
//!
//! # Modes
//!
//! - [`ExportMode::Full`] copies segment bodies verbatim in fixed-size chunks.
//! - [`ExportMode::Windowed`] reads row by row and keeps only rows whose
//!   leading field is an integer epoch at or after the window start.
//!
//! # Streaming and cancellation
//!
//! Output is pushed as [`Bytes`] chunks into a bounded channel; the HTTP
//! layer turns the receiving half into a response body of unknown length.
//! After every chunk the producer yields to the scheduler. When the client
//! goes away the channel closes, the next send fails and the producer stops,
//! dropping any open segment reader.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pdlogger_types::{CSV_DELIMITER, CSV_HEADER};

use crate::catalog::Catalog;
use crate::storage::{LogStorage, SegmentReader};

/// Default size of streamed chunks in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Chunks buffered between the producer and the HTTP body.
const CHANNEL_CAPACITY: usize = 4;

/// Which rows an export emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Every data row, copied verbatim.
    Full,
    /// Rows with a numeric leading epoch, optionally bounded below.
    Windowed {
        /// Rows older than this epoch are dropped. `None` keeps every
        /// well-formed row.
        min_epoch: Option<i64>,
    },
}

/// Outcome of one export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Segments that were opened and streamed.
    pub segments_streamed: usize,
    /// Segments skipped because they could not be opened or read.
    pub segments_skipped: usize,
    /// Rows emitted (windowed mode only).
    pub rows: u64,
    /// Rows dropped because of a malformed or out-of-window epoch.
    pub rows_dropped: u64,
    /// Payload bytes sent, header included.
    pub bytes: u64,
    /// Whether the consumer went away before the export finished.
    pub cancelled: bool,
}

/// Marker for a closed output channel.
#[derive(Debug)]
struct Cancelled;

/// Batches output into fixed-size chunks and yields after each send.
struct ChunkWriter<'a> {
    tx: &'a mpsc::Sender<Bytes>,
    buf: BytesMut,
    chunk_size: usize,
    bytes: u64,
}

impl<'a> ChunkWriter<'a> {
    fn new(tx: &'a mpsc::Sender<Bytes>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            bytes: 0,
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Cancelled> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let chunk = self.buf.split_to(self.chunk_size).freeze();
            self.send(chunk).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Cancelled> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.send(chunk).await
    }

    async fn send(&mut self, chunk: Bytes) -> Result<(), Cancelled> {
        let len = chunk.len() as u64;
        self.tx.send(chunk).await.map_err(|_| Cancelled)?;
        self.bytes += len;
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Streams cataloged segments as one CSV document.
#[derive(Clone)]
pub struct LogExporter {
    storage: Arc<dyn LogStorage>,
    chunk_size: usize,
}

impl LogExporter {
    /// Create an exporter reading from `storage`.
    pub fn new(storage: Arc<dyn LogStorage>) -> Self {
        Self {
            storage,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the chunk size (at least 1 byte).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Run the export in a background task and return the chunk stream.
    ///
    /// The stream ends when the export is complete. Dropping it cancels the
    /// export at the next chunk boundary.
    pub fn stream(
        self,
        catalog: Catalog,
        mode: ExportMode,
    ) -> BoxStream<'static, std::io::Result<Bytes>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let summary = self.export(&catalog, mode, tx).await;
            info!(
                "Export finished: {} segment(s) streamed, {} skipped, {} bytes{}",
                summary.segments_streamed,
                summary.segments_skipped,
                summary.bytes,
                if summary.cancelled { " (client went away)" } else { "" }
            );
        });
        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
        .boxed()
    }

    /// Export every cataloged segment into `tx`.
    ///
    /// Segments that fail to open are skipped with a warning; the export
    /// always runs to the end unless the receiver is dropped.
    pub async fn export(
        &self,
        catalog: &Catalog,
        mode: ExportMode,
        tx: mpsc::Sender<Bytes>,
    ) -> ExportSummary {
        let mut summary = ExportSummary::default();
        let mut writer = ChunkWriter::new(&tx, self.chunk_size);

        let result = self.export_inner(catalog, mode, &mut writer, &mut summary).await;
        let result = match result {
            Ok(()) => writer.flush().await,
            Err(cancelled) => Err(cancelled),
        };
        summary.bytes = writer.bytes;
        if result.is_err() {
            debug!("Export cancelled after {} bytes", summary.bytes);
            summary.cancelled = true;
        }
        summary
    }

    async fn export_inner(
        &self,
        catalog: &Catalog,
        mode: ExportMode,
        writer: &mut ChunkWriter<'_>,
        summary: &mut ExportSummary,
    ) -> Result<(), Cancelled> {
        writer.write(CSV_HEADER.as_bytes()).await?;
        writer.write(b"\n").await?;

        for segment in catalog.segments() {
            let reader = match self.storage.open(&segment.id).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Skipping segment {}: {}", segment.id, e);
                    summary.segments_skipped += 1;
                    continue;
                }
            };

            let mut reader = BufReader::new(reader);
            let mut header = Vec::new();
            if let Err(e) = reader.read_until(b'\n', &mut header).await {
                warn!("Skipping segment {}: {}", segment.id, e);
                summary.segments_skipped += 1;
                continue;
            }

            let streamed = match mode {
                ExportMode::Full => self.copy_segment(&mut reader, writer).await?,
                ExportMode::Windowed { min_epoch } => {
                    filter_segment(&mut reader, min_epoch, writer, summary).await?
                }
            };
            if streamed {
                summary.segments_streamed += 1;
            } else {
                warn!("Segment {} failed mid-read, output truncated", segment.id);
                summary.segments_skipped += 1;
            }
        }
        Ok(())
    }

    /// Copy the remaining bytes of a segment, terminating the last row.
    ///
    /// Returns `Ok(false)` if reading failed part way.
    async fn copy_segment(
        &self,
        reader: &mut BufReader<SegmentReader>,
        writer: &mut ChunkWriter<'_>,
    ) -> Result<bool, Cancelled> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut last_byte = None;
        let mut ok = true;
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    last_byte = Some(buf[n - 1]);
                    writer.write(&buf[..n]).await?;
                }
                Err(e) => {
                    debug!("Read error during export: {}", e);
                    ok = false;
                    break;
                }
            }
        }
        if last_byte.is_some_and(|b| b != b'\n') {
            writer.write(b"\n").await?;
        }
        Ok(ok)
    }
}

/// Emit the rows of one segment that pass the epoch filter.
async fn filter_segment(
    reader: &mut BufReader<SegmentReader>,
    min_epoch: Option<i64>,
    writer: &mut ChunkWriter<'_>,
    summary: &mut ExportSummary,
) -> Result<bool, Cancelled> {
    let mut line = Vec::with_capacity(64);
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return Ok(true),
            Ok(_) => {}
            Err(e) => {
                debug!("Read error during export: {}", e);
                return Ok(false);
            }
        }

        let row = trim_line_end(&line);
        if row.is_empty() {
            continue;
        }
        if !row_in_window(row, min_epoch) {
            summary.rows_dropped += 1;
            continue;
        }
        writer.write(row).await?;
        writer.write(b"\n").await?;
        summary.rows += 1;
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Leading epoch field of a row, if it is a non-empty run of digits.
pub fn row_epoch(row: &[u8]) -> Option<i64> {
    let end = row.iter().position(|b| *b == CSV_DELIMITER)?;
    let field = &row[..end];
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn row_in_window(row: &[u8], min_epoch: Option<i64>) -> bool {
    match (row_epoch(row), min_epoch) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(epoch), Some(min)) => epoch >= min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_MAX_SEGMENTS;
    use crate::storage::MemoryLogStorage;

    const HEADER: &str = "epoch;bus_V;curr_mA\n";

    fn storage_with(segments: &[(&str, &str)]) -> Arc<MemoryLogStorage> {
        let storage = Arc::new(MemoryLogStorage::new());
        for (name, contents) in segments {
            storage.insert(name, *contents);
        }
        storage
    }

    async fn run(
        storage: Arc<MemoryLogStorage>,
        mode: ExportMode,
        chunk_size: usize,
    ) -> (String, ExportSummary, Vec<usize>) {
        let catalog = Catalog::build(storage.as_ref(), DEFAULT_MAX_SEGMENTS)
            .await
            .unwrap();
        let exporter = LogExporter::new(storage).with_chunk_size(chunk_size);
        let (tx, mut rx) = mpsc::channel(1024);
        let summary = exporter.export(&catalog, mode, tx).await;

        let mut out = Vec::new();
        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.len());
            out.extend_from_slice(&chunk);
        }
        (String::from_utf8(out).unwrap(), summary, sizes)
    }

    fn data_rows(csv: &str) -> Vec<&str> {
        csv.lines().skip(1).collect()
    }

    #[tokio::test]
    async fn test_full_export_single_header() {
        let storage = storage_with(&[
            ("log_0002.csv", "epoch;bus_V;curr_mA\n300;5;1\n400;5;2\n"),
            ("log_0001.csv", "epoch;bus_V;curr_mA\n100;5;1\n200;5;2\n"),
            ("log_0003.csv", "epoch;bus_V;curr_mA\n500;5;1\n"),
        ]);

        let (csv, summary, _) = run(storage, ExportMode::Full, DEFAULT_CHUNK_SIZE).await;

        assert_eq!(csv.matches("epoch;bus_V;curr_mA").count(), 1);
        assert!(csv.starts_with(HEADER));
        assert_eq!(
            data_rows(&csv),
            vec!["100;5;1", "200;5;2", "300;5;1", "400;5;2", "500;5;1"]
        );
        assert_eq!(summary.segments_streamed, 3);
        assert_eq!(summary.segments_skipped, 0);
        assert_eq!(summary.bytes, csv.len() as u64);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_full_export_terminates_unterminated_rows() {
        let storage = storage_with(&[
            ("log_0001.csv", "epoch;bus_V;curr_mA\n100;5;1"),
            ("log_0002.csv", "epoch;bus_V;curr_mA\n200;5;1\n"),
        ]);

        let (csv, _, _) = run(storage, ExportMode::Full, DEFAULT_CHUNK_SIZE).await;
        assert_eq!(data_rows(&csv), vec!["100;5;1", "200;5;1"]);
        assert!(csv.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_full_export_fixed_size_chunks() {
        let body: String = (0..100).map(|i| format!("{};5.0;12.5\n", 1000 + i)).collect();
        let storage = storage_with(&[("log_0001.csv", &format!("{}{}", HEADER, body))]);

        let (csv, _, sizes) = run(storage, ExportMode::Full, 64).await;

        assert_eq!(csv, format!("{}{}", HEADER, body));
        let (last, full) = sizes.split_last().unwrap();
        assert!(full.iter().all(|s| *s == 64));
        assert!(*last <= 64 && *last > 0);
    }

    #[tokio::test]
    async fn test_unreadable_segment_is_skipped() {
        let storage = storage_with(&[
            ("log_0001.csv", "epoch;bus_V;curr_mA\n100;5;1\n"),
            ("log_0002.csv", "epoch;bus_V;curr_mA\n200;5;1\n"),
            ("log_0003.csv", "epoch;bus_V;curr_mA\n300;5;1\n"),
        ]);
        storage.mark_unreadable("log_0002.csv");

        let (csv, summary, _) = run(storage, ExportMode::Full, DEFAULT_CHUNK_SIZE).await;

        assert_eq!(data_rows(&csv), vec!["100;5;1", "300;5;1"]);
        assert_eq!(summary.segments_streamed, 2);
        assert_eq!(summary.segments_skipped, 1);
    }

    #[tokio::test]
    async fn test_header_only_segments() {
        let storage = storage_with(&[("log_0001.csv", HEADER), ("log_0002.csv", "")]);
        let (csv, summary, _) = run(storage, ExportMode::Full, DEFAULT_CHUNK_SIZE).await;
        assert_eq!(csv, HEADER);
        assert_eq!(summary.segments_streamed, 2);
    }

    #[tokio::test]
    async fn test_windowed_excludes_old_rows() {
        let storage = storage_with(&[(
            "log_0001.csv",
            "epoch;bus_V;curr_mA\n900;5;1\n939;5;1\n940;5;1\n970;5;1\n1000;5;1\n",
        )]);

        let mode = ExportMode::Windowed {
            min_epoch: pdlogger_types::ExportWindow::LastSeconds(60).min_epoch(Some(1000)),
        };
        let (csv, summary, _) = run(storage, mode, DEFAULT_CHUNK_SIZE).await;

        assert!(csv.starts_with(HEADER));
        assert_eq!(data_rows(&csv), vec!["940;5;1", "970;5;1", "1000;5;1"]);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.rows_dropped, 2);
    }

    #[tokio::test]
    async fn test_windowed_unbounded_matches_full() {
        let segments = [
            ("log_0003.csv", "epoch;bus_V;curr_mA\n500;5;1\n600;4.9;2\n"),
            ("log_0001.csv", "epoch;bus_V;curr_mA\n100;5;1\n200;5;2\n"),
            ("log_0002.csv", "epoch;bus_V;curr_mA\n300;5;1\n"),
        ];

        let (full, _, _) = run(storage_with(&segments), ExportMode::Full, 16).await;
        let (windowed, _, _) = run(
            storage_with(&segments),
            ExportMode::Windowed { min_epoch: None },
            16,
        )
        .await;

        assert_eq!(data_rows(&full), data_rows(&windowed));
    }

    #[tokio::test]
    async fn test_windowed_drops_malformed_rows() {
        let storage = storage_with(&[(
            "log_0001.csv",
            "epoch;bus_V;curr_mA\r\n100;5;1\r\nnan;5;1\n;5;1\n\n12a;5;1\nno-delimiter\n200;5;1",
        )]);

        let (csv, summary, _) = run(
            storage,
            ExportMode::Windowed { min_epoch: None },
            DEFAULT_CHUNK_SIZE,
        )
        .await;

        assert_eq!(data_rows(&csv), vec!["100;5;1", "200;5;1"]);
        assert!(!csv.contains('\r'));
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.rows_dropped, 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_export() {
        let body: String = (0..200).map(|i| format!("{};5.0;12.5\n", 1000 + i)).collect();
        let storage = storage_with(&[
            ("log_0001.csv", &format!("{}{}", HEADER, body)),
            ("log_0002.csv", &format!("{}{}", HEADER, body)),
        ]);
        let catalog = Catalog::build(storage.as_ref(), DEFAULT_MAX_SEGMENTS)
            .await
            .unwrap();
        let exporter = LogExporter::new(storage).with_chunk_size(32);

        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { exporter.export(&catalog, ExportMode::Full, tx).await });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 32);
        drop(rx);

        let summary = handle.await.unwrap();
        assert!(summary.cancelled);
        assert!(summary.bytes < (2 * (HEADER.len() + body.len())) as u64);
    }

    #[tokio::test]
    async fn test_stream_yields_whole_document() {
        let storage = storage_with(&[
            ("log_0001.csv", "epoch;bus_V;curr_mA\n100;5;1\n"),
            ("log_0002.csv", "epoch;bus_V;curr_mA\n200;5;1\n"),
        ]);
        let catalog = Catalog::build(storage.as_ref(), DEFAULT_MAX_SEGMENTS)
            .await
            .unwrap();

        let mut stream = LogExporter::new(storage).stream(catalog, ExportMode::Full);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "epoch;bus_V;curr_mA\n100;5;1\n200;5;1\n"
        );
    }

    #[test]
    fn test_row_epoch() {
        assert_eq!(row_epoch(b"1700000000;5.0;1.0"), Some(1_700_000_000));
        assert_eq!(row_epoch(b"0;5.0;1.0"), Some(0));
        assert_eq!(row_epoch(b";5.0"), None);
        assert_eq!(row_epoch(b"-5;5.0"), None);
        assert_eq!(row_epoch(b"1e3;5.0"), None);
        assert_eq!(row_epoch(b"1700000000"), None);
        assert_eq!(row_epoch(b"99999999999999999999;1"), None);
    }
}
