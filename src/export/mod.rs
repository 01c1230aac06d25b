//! Dataset export.
//!
//! Joins transcripts with their annotations and writes the result as a
//! Parquet file.

pub mod dataset;
pub mod parquet_writer;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;

pub use dataset::{
    build_dataset, load_annotation_rows, load_conversation_rows, merge, AnnotationRow,
    ConversationRow, DatasetRow,
};
pub use parquet_writer::{dataset_schema, read_parquet_summary, rows_to_record_batch, write_parquet};

/// What an export produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub rows: usize,
    pub annotated_rows: usize,
    pub conversations: usize,
    pub output_path: String,
}

/// Build the merged dataset and write it to `output_path`.
pub fn export_dataset(
    conversations_dir: &Path,
    annotations_dir: &Path,
    output_path: &Path,
) -> Result<ExportSummary, ExportError> {
    let rows = build_dataset(conversations_dir, annotations_dir)?;
    write_parquet(&rows, output_path)?;

    let mut conv_ids: Vec<&str> = rows.iter().map(|r| r.conversation.conv_id.as_str()).collect();
    conv_ids.sort_unstable();
    conv_ids.dedup();

    Ok(ExportSummary {
        rows: rows.len(),
        annotated_rows: rows.iter().filter(|r| r.annotation.is_some()).count(),
        conversations: conv_ids.len(),
        output_path: output_path.display().to_string(),
    })
}
