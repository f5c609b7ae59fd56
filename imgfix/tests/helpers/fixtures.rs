//! Fixture generation: images, archives, metadata tables, manifests

use image::{ImageBuffer, ImageFormat, Rgb};
use imgfix_common::config::{FetchTransport, RepairConfig};
use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Valid PNG; `seed` varies the pixel content so files are distinguishable
pub fn png_bytes(seed: u8) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(12, 12, |x, y| Rgb([seed, x as u8 * 20, y as u8 * 20]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// PNG cut off mid-stream (decodable signature, no IEND)
pub fn corrupt_png_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = png_bytes(seed);
    bytes.truncate(bytes.len() / 2);
    bytes
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

/// Zip archive with the given `(member name, bytes)` entries
pub fn write_zip(path: &Path, members: &[(&str, Vec<u8>)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Manifest with one record per path, plus an unrelated field
pub fn write_manifest(path: &Path, image_paths: &[&str]) {
    let records: Vec<serde_json::Value> = image_paths
        .iter()
        .map(|p| serde_json::json!({ "image_path": p, "prompt": "a cat" }))
        .collect();
    write_file(path, serde_json::to_string_pretty(&records).unwrap().as_bytes());
}

/// JSON metadata table
pub fn write_metadata_json(path: &Path, rows: &[(&str, u32)]) {
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|(name, part)| serde_json::json!({ "image_name": name, "part_id": part }))
        .collect();
    write_file(path, serde_json::to_string(&records).unwrap().as_bytes());
}

/// Parquet metadata table with `image_name` (UTF8) and `part_id` (INT64)
pub fn write_metadata_parquet(path: &Path, rows: &[(&str, u32)]) {
    let schema = Arc::new(
        parse_message_type(
            "message schema { REQUIRED BINARY image_name (UTF8); REQUIRED INT64 part_id; }",
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer = SerializedFileWriter::new(File::create(path).unwrap(), schema, props).unwrap();

    let names: Vec<ByteArray> = rows.iter().map(|(n, _)| ByteArray::from(*n)).collect();
    let parts: Vec<i64> = rows.iter().map(|(_, p)| i64::from(*p)).collect();

    let mut row_group = writer.next_row_group().unwrap();
    if let Some(mut column) = row_group.next_column().unwrap() {
        column
            .typed::<ByteArrayType>()
            .write_batch(&names, None, None)
            .unwrap();
        column.close().unwrap();
    }
    if let Some(mut column) = row_group.next_column().unwrap() {
        column
            .typed::<Int64Type>()
            .write_batch(&parts, None, None)
            .unwrap();
        column.close().unwrap();
    }
    row_group.close().unwrap();
    writer.close().unwrap();
}

/// Config rooted in `root`: JSON checkpoint, no retries, scratch inside root
pub fn test_config(root: &Path) -> RepairConfig {
    let mut config = RepairConfig::with_dataset_root(root.join("dataset"));
    config.metadata_path = root.join("metadata.json");
    config.scratch_dir = root.join("scratch");
    config.archive_url_template = "http://127.0.0.1:9/part-{partition}.zip".to_string();
    config.transport = FetchTransport::Http;
    config.fetch_retries = 0;
    config.retry_base_delay = Duration::from_millis(1);
    config
}
