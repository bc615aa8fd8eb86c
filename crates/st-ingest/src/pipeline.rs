//! Ingestion pipeline
//!
//! Streams raw records through validation and columnar encoding into staged
//! partition files. Nothing produced here is visible to readers: the result
//! is a set of [`StagedPartition`] proposals that only the catalog publishes.

use crate::chunk::{ChunkBuilder, Rejection};
use crate::error::{IngestError, PipelineResult};
use crate::profiler::widen_column;
use crate::source::RawRecord;
use crate::validate::{Growth, QuarantineReason, ValidationError};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use st_catalog::{arrow_schema, ColumnStats, PartitionFileWriter, StagedPartition, StorageLayout};
use st_core::{file_checksum, BatchId, IngestConfig, TableName, TableSchema, WideningPolicy};
use std::collections::BTreeMap;

/// Chunking, quarantine and widening limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub chunk_rows: usize,
    pub max_partition_rows: usize,
    pub quarantine_threshold: usize,
    /// Storage widenings allowed when a valid value outgrows its column
    pub widening: WideningPolicy,
}

impl PipelineOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            chunk_rows: config.chunk_rows,
            max_partition_rows: config.max_partition_rows,
            quarantine_threshold: config.quarantine_threshold,
            widening: config.widening,
        }
    }
}

/// Outcome of ingesting one table of a batch
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub table: TableName,
    pub batch: BatchId,
    /// Version the last partition was written with
    pub schema_version: u32,
    /// Every schema version the partitions were written with, oldest first;
    /// versions past the input schema were widened during ingestion
    pub schemas: Vec<TableSchema>,
    pub rows_accepted: u64,
    /// Rows rejected by validation, with reasons
    pub quarantined: Vec<ValidationError>,
    /// Staged partitions awaiting commit
    pub partitions: Vec<StagedPartition>,
    /// Bytes of raw field text consumed
    pub raw_bytes: u64,
    /// Bytes of the encoded partition files
    pub encoded_bytes: u64,
}

impl IngestResult {
    /// Bytes saved by the columnar encoding relative to the raw text
    pub fn bytes_saved(&self) -> i64 {
        self.raw_bytes as i64 - self.encoded_bytes as i64
    }

    /// Delete every staged file of this result
    pub fn discard(&self) {
        for partition in &self.partitions {
            partition.discard();
        }
    }
}

/// The partition file currently being written
struct OpenPartition {
    writer: PartitionFileWriter,
    stats: BTreeMap<String, ColumnStats>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

/// Writes chunks into staged partition files, rolling over at the row limit
struct PartitionSink<'a> {
    layout: &'a StorageLayout,
    table: &'a TableName,
    batch: &'a BatchId,
    schema_version: u32,
    arrow: SchemaRef,
    max_rows: u64,
    open: Option<OpenPartition>,
    finished: Vec<StagedPartition>,
}

impl<'a> PartitionSink<'a> {
    fn write(
        &mut self,
        batch: RecordBatch,
        stats: Vec<(String, ColumnStats)>,
    ) -> PipelineResult<()> {
        let incoming = batch.num_rows() as u64;
        if self
            .open
            .as_ref()
            .is_some_and(|p| p.writer.rows() > 0 && p.writer.rows() + incoming > self.max_rows)
        {
            self.close()?;
        }
        let open = match self.open.take() {
            Some(open) => open,
            None => self.create()?,
        };
        let open = self.open.insert(open);

        open.writer.write(&batch)?;
        for (name, chunk_stats) in stats {
            open.stats
                .entry(name)
                .and_modify(|s| s.merge(&chunk_stats))
                .or_insert(chunk_stats);
        }
        open.to = Utc::now();
        Ok(())
    }

    fn create(&self) -> PipelineResult<OpenPartition> {
        let path = self.layout.new_staged_path();
        let now = Utc::now();
        Ok(OpenPartition {
            writer: PartitionFileWriter::create(&path, &self.arrow)?,
            stats: BTreeMap::new(),
            from: now,
            to: now,
        })
    }

    fn close(&mut self) -> PipelineResult<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        let written = open.writer.finish()?;
        let checksum = match file_checksum(&written.path) {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = std::fs::remove_file(&written.path);
                return Err(e.into());
            }
        };
        log::debug!(
            "Staged partition {} of '{}' batch '{}': {} rows, {} bytes",
            self.finished.len(),
            self.table,
            self.batch,
            written.rows,
            written.size_bytes
        );
        self.finished.push(StagedPartition {
            table: self.table.clone(),
            batch: self.batch.clone(),
            part: self.finished.len() as u32,
            schema_version: self.schema_version,
            staged_file: written.path,
            row_count: written.rows,
            checksum,
            size_bytes: written.size_bytes,
            ingested_from: open.from,
            ingested_to: open.to,
            stats: open.stats,
        });
        Ok(())
    }

    /// Close the last file; a batch without accepted rows still yields one
    /// empty partition so it can replace an earlier ingestion of the batch
    fn finish(&mut self) -> PipelineResult<Vec<StagedPartition>> {
        if self.open.is_none() && self.finished.is_empty() {
            self.open = Some(self.create()?);
        }
        self.close()?;
        Ok(std::mem::take(&mut self.finished))
    }

    fn abandon(&mut self) {
        if let Some(open) = self.open.take() {
            let path = open.writer.path().to_path_buf();
            drop(open);
            let _ = std::fs::remove_file(&path);
        }
        for staged in self.finished.drain(..) {
            staged.discard();
        }
    }
}

/// Validates, encodes and stages the rows of one table
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    layout: StorageLayout,
    options: PipelineOptions,
}

impl IngestionPipeline {
    pub fn new(layout: StorageLayout, options: PipelineOptions) -> Self {
        Self { layout, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Ingest a lazy stream of records whose fields follow `header`
    ///
    /// Records are consumed chunk by chunk. Rows failing validation are
    /// quarantined. A valid value too wide for its column's storage moves
    /// the table to the next schema version from that row on, as far as the
    /// [`WideningPolicy`] allows; beyond that it is
    /// [`IngestError::SchemaDrift`]. On drift, once more than
    /// `quarantine_threshold` rows have been quarantined, or on any I/O
    /// error, every staged file is removed and the error is returned.
    pub fn ingest<I>(
        &self,
        table: &TableName,
        batch: &BatchId,
        schema: &TableSchema,
        header: &[String],
        records: I,
    ) -> PipelineResult<IngestResult>
    where
        I: IntoIterator<Item = PipelineResult<RawRecord>>,
    {
        let mut chunk = self.chunk_builder(schema, header)?;
        let mut sink = PartitionSink {
            layout: &self.layout,
            table,
            batch,
            schema_version: schema.version,
            arrow: arrow_schema(schema),
            max_rows: self.options.max_partition_rows as u64,
            open: None,
            finished: Vec::new(),
        };

        let mut result = IngestResult {
            table: table.clone(),
            batch: batch.clone(),
            schema_version: schema.version,
            schemas: vec![schema.clone()],
            rows_accepted: 0,
            quarantined: Vec::new(),
            partitions: Vec::new(),
            raw_bytes: 0,
            encoded_bytes: 0,
        };

        let outcome = self
            .drive(header, &mut chunk, &mut sink, &mut result, records)
            .and_then(|()| sink.finish());
        match outcome {
            Ok(partitions) => {
                result.encoded_bytes = partitions.iter().map(|p| p.size_bytes).sum();
                result.partitions = partitions;
            }
            Err(e) => {
                sink.abandon();
                log::warn!("Ingestion of '{}' batch '{}' failed: {}", table, batch, e);
                return Err(e);
            }
        }

        log::info!(
            "Ingested '{}' batch '{}': {} accepted, {} quarantined, {} partition(s), {} -> {} bytes",
            table,
            batch,
            result.rows_accepted,
            result.quarantined.len(),
            result.partitions.len(),
            result.raw_bytes,
            result.encoded_bytes
        );
        Ok(result)
    }

    fn chunk_builder(&self, schema: &TableSchema, header: &[String]) -> PipelineResult<ChunkBuilder> {
        ChunkBuilder::new(schema, header, self.options.chunk_rows).map_err(|message| {
            IngestError::MalformedInput {
                file: schema.table.to_string(),
                message,
            }
        })
    }

    fn drive<I>(
        &self,
        header: &[String],
        chunk: &mut ChunkBuilder,
        sink: &mut PartitionSink<'_>,
        result: &mut IngestResult,
        records: I,
    ) -> PipelineResult<()>
    where
        I: IntoIterator<Item = PipelineResult<RawRecord>>,
    {
        for record in records {
            let record = record?;
            result.raw_bytes += record.fields.iter().map(|f| f.len() as u64 + 1).sum::<u64>();

            let pushed = match chunk.push(&record) {
                Err(Rejection::Outgrown(growth)) => {
                    if self.widen(&growth, header, chunk, sink, result)? {
                        chunk.push(&record)
                    } else {
                        Err(Rejection::Outgrown(growth))
                    }
                }
                pushed => pushed,
            };
            match pushed {
                Ok(()) => result.rows_accepted += 1,
                Err(rejection) => {
                    let rejected = match rejection {
                        Rejection::Invalid(rejected) => rejected,
                        Rejection::Outgrown(growth) => out_of_range(&record, &growth),
                    };
                    log::debug!("Quarantined {}", rejected);
                    result.quarantined.push(rejected);
                    if result.quarantined.len() > self.options.quarantine_threshold {
                        return Err(IngestError::QuarantineThresholdExceeded {
                            table: result.table.to_string(),
                            quarantined: result.quarantined.len(),
                            threshold: self.options.quarantine_threshold,
                        });
                    }
                }
            }

            if chunk.len() >= self.options.chunk_rows {
                flush(chunk, sink)?;
            }
        }
        if !chunk.is_empty() {
            flush(chunk, sink)?;
        }
        Ok(())
    }

    /// Move ingestion onto the next schema version, widened for `growth`
    ///
    /// Buffered rows are written under the current version first, and the
    /// open partition is closed so every partition holds a single version.
    /// Returns `false` when widening would not change the schema.
    fn widen(
        &self,
        growth: &[(String, Growth)],
        header: &[String],
        chunk: &mut ChunkBuilder,
        sink: &mut PartitionSink<'_>,
        result: &mut IngestResult,
    ) -> PipelineResult<bool> {
        let Some(current) = result.schemas.last() else {
            return Ok(false);
        };
        let mut columns = current.columns.clone();
        let mut changes = Vec::new();
        for (name, g) in growth {
            let Some(column) = columns.iter_mut().find(|c| &c.name == name) else {
                continue;
            };
            match widen_column(column, *g, &self.options.widening) {
                Ok(widened) => *column = widened,
                Err(change) => changes.push(change),
            }
        }
        if !changes.is_empty() {
            log::warn!("Schema drift for '{}': {}", result.table, changes.join("; "));
            return Err(IngestError::SchemaDrift {
                table: result.table.to_string(),
                changes,
            });
        }
        if columns == current.columns {
            return Ok(false);
        }

        let widened = TableSchema::new(result.table.clone(), current.version + 1, columns);
        if !chunk.is_empty() {
            flush(chunk, sink)?;
        }
        sink.close()?;
        *chunk = self.chunk_builder(&widened, header)?;
        sink.schema_version = widened.version;
        sink.arrow = arrow_schema(&widened);
        log::info!(
            "Widened '{}' to schema version {} at {}",
            result.table,
            widened.version,
            growth
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        result.schema_version = widened.version;
        result.schemas.push(widened);
        Ok(true)
    }
}

/// Quarantine entry for a row whose values still do not fit after widening
fn out_of_range(record: &RawRecord, growth: &[(String, Growth)]) -> ValidationError {
    ValidationError {
        file: record.provenance.file.to_string(),
        line: record.provenance.line,
        column: growth.first().map(|(name, _)| name.clone()),
        reason: QuarantineReason::OutOfRange,
        value: None,
    }
}

fn flush(chunk: &mut ChunkBuilder, sink: &mut PartitionSink<'_>) -> PipelineResult<()> {
    let stats = chunk.stats()?;
    let batch = chunk.take_batch(&sink.arrow)?;
    sink.write(batch, stats)
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
