//! Arrow IPC partition files
//!
//! Partition files are Arrow IPC streams. The stream format is used rather
//! than the file format because categorical columns are dictionary encoded per
//! chunk, and only the stream format accepts a new dictionary per batch.

use crate::error::{CatalogError, CatalogResult};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use st_core::{IntWidth, SemanticType, TableSchema};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arrow storage type of a semantic column type
pub fn arrow_type(ty: &SemanticType) -> DataType {
    match ty {
        SemanticType::Int64 { width } => match width {
            IntWidth::U8 => DataType::UInt8,
            IntWidth::I8 => DataType::Int8,
            IntWidth::U16 => DataType::UInt16,
            IntWidth::I16 => DataType::Int16,
            IntWidth::U32 => DataType::UInt32,
            IntWidth::I32 => DataType::Int32,
            IntWidth::I64 => DataType::Int64,
        },
        SemanticType::Decimal { precision, scale } => {
            DataType::Decimal128(*precision, *scale as i8)
        }
        SemanticType::Categorical => {
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
        }
        SemanticType::String => DataType::Utf8,
        SemanticType::Date => DataType::Date32,
    }
}

/// Arrow schema for one version of a table schema
pub fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .columns
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(&c.ty), c.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Summary of a finished partition file
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: u64,
    pub size_bytes: u64,
}

/// Appends record batches to a partition file
pub struct PartitionFileWriter {
    path: PathBuf,
    writer: StreamWriter<BufWriter<File>>,
    rows: u64,
}

impl PartitionFileWriter {
    /// Create the file and write the stream header
    pub fn create(path: &Path, schema: &SchemaRef) -> CatalogResult<Self> {
        let file = File::create(path).map_err(|e| CatalogError::io(path, e))?;
        let writer = StreamWriter::try_new(BufWriter::new(file), schema.as_ref())?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write(&mut self, batch: &RecordBatch) -> CatalogResult<()> {
        self.writer.write(batch)?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    /// Write the end-of-stream marker and flush the file to disk
    pub fn finish(mut self) -> CatalogResult<WrittenFile> {
        self.writer.finish()?;
        let mut buffered = self.writer.into_inner()?;
        buffered.flush().map_err(|e| CatalogError::io(&self.path, e))?;
        let file = buffered
            .into_inner()
            .map_err(|e| CatalogError::io(&self.path, e.into_error()))?;
        file.sync_all().map_err(|e| CatalogError::io(&self.path, e))?;
        let size_bytes = file
            .metadata()
            .map_err(|e| CatalogError::io(&self.path, e))?
            .len();
        Ok(WrittenFile {
            path: self.path,
            rows: self.rows,
            size_bytes,
        })
    }
}

/// Record batches of one partition file, optionally projected
pub struct PartitionBatches {
    reader: StreamReader<BufReader<File>>,
    /// Schema of the batches the reader yields
    schema: SchemaRef,
}

impl PartitionBatches {
    /// Open a partition file; `projection` indexes the file's columns
    pub fn open(path: &Path, projection: Option<Vec<usize>>) -> CatalogResult<Self> {
        let file = File::open(path).map_err(|e| CatalogError::io(path, e))?;
        let reader = StreamReader::try_new(BufReader::new(file), projection.clone())?;
        // the reader reports the file's full schema even when projecting
        let schema = match projection {
            Some(indices) => Arc::new(reader.schema().project(&indices)?),
            None => reader.schema(),
        };
        Ok(Self { reader, schema })
    }

    /// Schema of the (projected) batches
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}

impl Iterator for PartitionBatches {
    type Item = CatalogResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next().map(|r| r.map_err(CatalogError::from))
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod tests;
