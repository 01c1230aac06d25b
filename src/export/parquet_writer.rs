//! Parquet writer for the merged discussion/annotation dataset.
//!
//! One row per (message, annotation) pair. Annotation columns are null for
//! messages nobody annotated.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, StringBuilder, UInt32Builder, UInt64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::dataset::DatasetRow;
use crate::error::ExportError;
use crate::persona::Persona;

/// Persona traits exported for both sides of the join, without prefix.
const PERSONA_TRAITS: [&str; 7] = [
    "age",
    "sex",
    "sexual_orientation",
    "demographic_group",
    "current_employment",
    "education_level",
    "personality_characteristics",
];

fn persona_fields(prefix: &str) -> Vec<Field> {
    PERSONA_TRAITS
        .iter()
        .map(|name| {
            let data_type = if *name == "age" {
                DataType::UInt32
            } else {
                DataType::Utf8
            };
            Field::new(format!("{}_{}", prefix, name), data_type, true)
        })
        .collect()
}

/// Column builders for one persona. Unset traits are written as nulls.
#[derive(Default)]
struct PersonaColumns {
    age: UInt32Builder,
    sex: StringBuilder,
    sexual_orientation: StringBuilder,
    demographic_group: StringBuilder,
    current_employment: StringBuilder,
    education_level: StringBuilder,
    personality_characteristics: StringBuilder,
}

impl PersonaColumns {
    fn append(&mut self, persona: Option<&Persona>) {
        fn text(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        self.age.append_option(persona.map(|p| p.age).filter(|age| *age > 0));
        append_opt(&mut self.sex, text(persona.map(|p| p.sex.as_str())));
        append_opt(
            &mut self.sexual_orientation,
            text(persona.map(|p| p.sexual_orientation.as_str())),
        );
        append_opt(
            &mut self.demographic_group,
            text(persona.map(|p| p.demographic_group.as_str())),
        );
        append_opt(
            &mut self.current_employment,
            text(persona.map(|p| p.current_employment.as_str())),
        );
        append_opt(
            &mut self.education_level,
            text(persona.map(|p| p.education_level.as_str())),
        );
        let characteristics = persona
            .map(|p| p.personality_characteristics.join(", "))
            .filter(|c| !c.is_empty());
        append_opt(&mut self.personality_characteristics, characteristics.as_deref());
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.age.finish()),
            Arc::new(self.sex.finish()),
            Arc::new(self.sexual_orientation.finish()),
            Arc::new(self.demographic_group.finish()),
            Arc::new(self.current_employment.finish()),
            Arc::new(self.education_level.finish()),
            Arc::new(self.personality_characteristics.finish()),
        ]
    }
}

/// Column layout of the exported dataset.
pub fn dataset_schema() -> Schema {
    let mut fields = vec![
        Field::new("conv_id", DataType::Utf8, false),
        Field::new("conv_variant", DataType::Utf8, false),
        Field::new("timestamp_conv", DataType::Utf8, false),
        Field::new("user", DataType::Utf8, false),
        Field::new("message", DataType::Utf8, false),
        Field::new("model", DataType::Utf8, false),
        Field::new("is_moderator", DataType::Boolean, false),
        Field::new("user_prompt", DataType::Utf8, true),
        Field::new("ctx_length_conv", DataType::UInt64, false),
    ];
    fields.extend(persona_fields("user"));
    // annotation side of the join
    fields.extend([
        Field::new("annotation_variant", DataType::Utf8, true),
        Field::new("timestamp_annot", DataType::Utf8, true),
        Field::new("annotator_model", DataType::Utf8, true),
        Field::new("annotator_prompt", DataType::Utf8, true),
        Field::new("ctx_length_annot", DataType::UInt64, true),
        Field::new("annotation", DataType::Utf8, true),
    ]);
    fields.extend(persona_fields("annotator"));
    Schema::new(fields)
}

fn append_opt(builder: &mut StringBuilder, value: Option<&str>) {
    match value {
        Some(v) => builder.append_value(v),
        None => builder.append_null(),
    }
}

/// Convert dataset rows into an Arrow RecordBatch.
pub fn rows_to_record_batch(rows: &[DatasetRow]) -> Result<RecordBatch, ExportError> {
    let schema = Arc::new(dataset_schema());

    let mut conv_id = StringBuilder::new();
    let mut conv_variant = StringBuilder::new();
    let mut timestamp_conv = StringBuilder::new();
    let mut user = StringBuilder::new();
    let mut message = StringBuilder::new();
    let mut model = StringBuilder::new();
    let mut is_moderator = BooleanBuilder::new();
    let mut user_prompt = StringBuilder::new();
    let mut ctx_length_conv = UInt64Builder::new();
    let mut user_traits = PersonaColumns::default();
    let mut annotation_variant = StringBuilder::new();
    let mut timestamp_annot = StringBuilder::new();
    let mut annotator_model = StringBuilder::new();
    let mut annotator_prompt = StringBuilder::new();
    let mut ctx_length_annot = UInt64Builder::new();
    let mut annotation = StringBuilder::new();
    let mut annotator_traits = PersonaColumns::default();

    for row in rows {
        let conv = &row.conversation;
        conv_id.append_value(&conv.conv_id);
        conv_variant.append_value(&conv.conv_variant);
        timestamp_conv.append_value(&conv.timestamp);
        user.append_value(&conv.user);
        message.append_value(&conv.message);
        model.append_value(&conv.model);
        is_moderator.append_value(conv.is_moderator);
        append_opt(&mut user_prompt, conv.user_prompt.as_deref());
        ctx_length_conv.append_value(conv.ctx_length);
        user_traits.append(conv.persona.as_ref());

        let annot = row.annotation.as_ref();
        append_opt(&mut annotation_variant, annot.map(|a| a.annotation_variant.as_str()));
        append_opt(&mut timestamp_annot, annot.map(|a| a.timestamp.as_str()));
        append_opt(&mut annotator_model, annot.map(|a| a.annotator_model.as_str()));
        append_opt(&mut annotator_prompt, annot.map(|a| a.annotator_prompt.as_str()));
        ctx_length_annot.append_option(annot.map(|a| a.ctx_length));
        append_opt(&mut annotation, annot.map(|a| a.annotation.as_str()));
        annotator_traits.append(annot.and_then(|a| a.annotator_persona.as_ref()));
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(conv_id.finish()),
        Arc::new(conv_variant.finish()),
        Arc::new(timestamp_conv.finish()),
        Arc::new(user.finish()),
        Arc::new(message.finish()),
        Arc::new(model.finish()),
        Arc::new(is_moderator.finish()),
        Arc::new(user_prompt.finish()),
        Arc::new(ctx_length_conv.finish()),
    ];
    columns.extend(user_traits.finish());
    let annotation_columns: [ArrayRef; 6] = [
        Arc::new(annotation_variant.finish()),
        Arc::new(timestamp_annot.finish()),
        Arc::new(annotator_model.finish()),
        Arc::new(annotator_prompt.finish()),
        Arc::new(ctx_length_annot.finish()),
        Arc::new(annotation.finish()),
    ];
    columns.extend(annotation_columns);
    columns.extend(annotator_traits.finish());

    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Write dataset rows to a Parquet file, creating parent directories.
pub fn write_parquet(rows: &[DatasetRow], output_path: &Path) -> Result<(), ExportError> {
    if rows.is_empty() {
        return Err(ExportError::NoRows);
    }

    let batch = rows_to_record_batch(rows)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = std::fs::File::create(output_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!(
        path = %output_path.display(),
        rows = rows.len(),
        "Parquet file written"
    );

    Ok(())
}

/// Read back the `(conv_id, message, annotation)` columns of a dataset file.
pub fn read_parquet_summary(
    input_path: &Path,
) -> Result<Vec<(String, String, Option<String>)>, ExportError> {
    use arrow::array::{Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = std::fs::File::open(input_path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch?;
        let column = |name: &str| -> Result<StringArray, ExportError> {
            batch
                .column_by_name(name)
                .and_then(|col| col.as_any().downcast_ref::<StringArray>())
                .cloned()
                .ok_or_else(|| ExportError::InvalidRecord {
                    path: input_path.display().to_string(),
                    reason: format!("missing string column '{}'", name),
                })
        };
        let ids = column("conv_id")?;
        let messages = column("message")?;
        let annotations = column("annotation")?;

        for i in 0..batch.num_rows() {
            let annotation = if annotations.is_null(i) {
                None
            } else {
                Some(annotations.value(i).to_string())
            };
            out.push((ids.value(i).to_string(), messages.value(i).to_string(), annotation));
        }
    }

    Ok(out)
}
