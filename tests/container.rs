//! Container writer and reader, driven directly with hand-built blocks.

use anyhow::Result;
use csv::ByteRecord;
use hypercopy::*;
use std::fs;
use std::io::{Cursor, Write};
use tempfile::TempDir;

fn schema() -> CompiledSchema {
    CompiledSchema::new([
        ("id", LogicalType::Int64),
        ("price", LogicalType::Float64),
        ("label", LogicalType::Utf8),
        ("at", LogicalType::Timestamp),
    ])
    .unwrap()
}

fn block(
    pool: &BufferPool,
    schema: &CompiledSchema,
    file_index: u32,
    block_seq: u32,
    rows: &[[&str; 4]],
) -> HyperBlock {
    let mut block = HyperBlock::new(schema, pool.acquire(0).unwrap(), file_index, block_seq);
    for row in rows {
        let record = ByteRecord::from(row.to_vec());
        let size = HyperBlock::record_bytes(&record, schema);
        block.push_record(&record, size).unwrap();
    }
    block
}

#[test]
fn every_type_round_trips() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("typed.hcc");
    let schema = schema();
    let pool = BufferPool::new(1 << 20, 1 << 16, CancelToken::new())?;

    let mut writer = ContainerWriter::create(&path, &schema, BlockCompression::None, 3)?;
    writer.submit(block(
        &pool,
        &schema,
        0,
        0,
        &[
            ["1", "2.5", "plain", "2024-01-02T03:04:05Z"],
            ["-7", "-0.125", "", "2024-01-01"],
            ["9223372036854775807", "1e10", "naïve, \"quoted\"", "1970-01-01 00:00:00.5"],
        ],
    ))?;
    let sealed = writer.finalize()?;
    assert_eq!(sealed.total_rows, 3);
    assert_eq!(sealed.blocks, 1);
    assert_eq!(sealed.bytes_written, fs::metadata(&path)?.len());

    let mut reader = ContainerReader::open(&path)?;
    assert_eq!(reader.schema(), &schema);
    assert!(!reader.is_compressed());
    let rows = reader.read_rows()?;
    assert_eq!(
        rows,
        vec![
            vec![
                Value::Int64(1),
                Value::Float64(2.5),
                Value::Utf8("plain".into()),
                Value::Timestamp(1_704_164_645_000_000),
            ],
            vec![
                Value::Int64(-7),
                Value::Float64(-0.125),
                Value::Utf8(String::new()),
                Value::Timestamp(1_704_067_200_000_000),
            ],
            vec![
                Value::Int64(i64::MAX),
                Value::Float64(1e10),
                Value::Utf8("naïve, \"quoted\"".into()),
                Value::Timestamp(500_000),
            ],
        ]
    );
    Ok(())
}

#[cfg(feature = "compression-zstd")]
#[test]
fn zstd_payloads_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("packed.hcc");
    let schema = schema();
    let pool = BufferPool::new(1 << 20, 1 << 16, CancelToken::new())?;

    let rows: Vec<[String; 4]> = (0..500)
        .map(|i| {
            [
                i.to_string(),
                format!("{}.25", i % 7),
                format!("label-{}", i % 3),
                "2023-06-30 12:00:00".to_string(),
            ]
        })
        .collect();
    let borrowed: Vec<[&str; 4]> = rows
        .iter()
        .map(|r| [r[0].as_str(), r[1].as_str(), r[2].as_str(), r[3].as_str()])
        .collect();

    let mut writer = ContainerWriter::create(&path, &schema, BlockCompression::Zstd, 9)?;
    writer.submit(block(&pool, &schema, 0, 0, &borrowed[..250]))?;
    writer.submit(block(&pool, &schema, 0, 1, &borrowed[250..]))?;
    writer.finalize()?;

    let mut reader = ContainerReader::open(&path)?;
    assert!(reader.is_compressed());
    let columns = reader.read_all()?;
    assert_eq!(columns[0], ColumnData::Int64((0..500).collect()));
    assert_eq!(columns[2].str_at(499), Some("label-1"));
    Ok(())
}

#[test]
fn out_of_order_blocks_read_back_in_file_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ordered.hcc");
    let schema = schema();
    let pool = BufferPool::new(1 << 20, 1 << 12, CancelToken::new())?;
    let row = |id: &'static str| [id, "0", "x", "2020-01-01"];

    let mut writer = ContainerWriter::create(&path, &schema, BlockCompression::None, 3)?;
    writer.submit(block(&pool, &schema, 2, 0, &[row("5")]))?;
    writer.submit(block(&pool, &schema, 0, 1, &[row("2"), row("3")]))?;
    writer.submit(block(&pool, &schema, 1, 0, &[row("4")]))?;
    writer.submit(block(&pool, &schema, 0, 0, &[row("1")]))?;
    writer.finalize()?;

    let mut reader = ContainerReader::open(&path)?;
    let index: Vec<(u32, u32, u64, u64)> = reader
        .blocks()
        .iter()
        .map(|e| (e.file_index, e.block_seq, e.row_start, e.row_count))
        .collect();
    assert_eq!(
        index,
        vec![(0, 0, 0, 1), (0, 1, 1, 2), (1, 0, 3, 1), (2, 0, 4, 1)]
    );
    assert_eq!(reader.read_all()?[0], ColumnData::Int64(vec![1, 2, 3, 4, 5]));

    let second = reader.blocks()[1];
    let decoded = reader.read_block(&second)?;
    assert_eq!(decoded.rows(), 2);
    assert_eq!((decoded.file_index, decoded.block_seq, decoded.row_start), (0, 1, 1));
    assert_eq!(decoded.columns[0], ColumnData::Int64(vec![2, 3]));
    Ok(())
}

#[test]
fn flushed_blocks_release_their_lease() -> Result<()> {
    let schema = schema();
    let pool = BufferPool::new(1 << 12, 1 << 12, CancelToken::new())?;
    let mut writer =
        ContainerWriter::new(Cursor::new(Vec::new()), &schema, BlockCompression::None, 3)?;

    writer.submit(block(&pool, &schema, 0, 0, &[["1", "1", "a", "2020-01-01"]]))?;
    assert_eq!(pool.stats().reserved_bytes, 0);
    // The single-block budget is free again, so this does not block.
    writer.submit(block(&pool, &schema, 0, 1, &[["2", "2", "b", "2020-01-02"]]))?;
    assert_eq!(writer.rows_written(), 2);
    assert_eq!(pool.stats().leases_granted, 2);
    Ok(())
}

#[test]
fn mismatched_block_shape_is_a_writer_error() -> Result<()> {
    let schema = schema();
    let other = CompiledSchema::new([("id", LogicalType::Int64)])?;
    let pool = BufferPool::new(1 << 12, 1 << 10, CancelToken::new())?;

    let mut writer =
        ContainerWriter::new(Cursor::new(Vec::new()), &schema, BlockCompression::None, 3)?;
    let mut narrow = HyperBlock::new(&other, pool.acquire(0).unwrap(), 0, 0);
    let record = ByteRecord::from(vec!["1"]);
    narrow
        .push_record(&record, HyperBlock::record_bytes(&record, &other))
        .unwrap();

    let err = writer.submit(narrow).unwrap_err();
    assert_eq!(err.code(), -7);
    Ok(())
}

#[test]
fn unsealed_container_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("partial.hcc");
    let schema = schema();
    let pool = BufferPool::new(1 << 12, 1 << 10, CancelToken::new())?;

    let mut writer = ContainerWriter::create(&path, &schema, BlockCompression::None, 3)?;
    writer.submit(block(&pool, &schema, 0, 0, &[["1", "1", "a", "2020-01-01"]]))?;
    let mut file = writer.into_inner();
    file.flush()?;
    drop(file);

    let err = ContainerReader::open(&path).err().expect("unsealed container opened");
    assert!(err.to_string().contains("did not complete"));
    Ok(())
}

#[test]
fn foreign_and_truncated_files_are_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let foreign = dir.path().join("foreign.hcc");
    fs::write(&foreign, b"id,name\n1,alpha\n2,beta\n3,gamma\n")?;
    assert!(ContainerReader::open(&foreign).is_err());

    let schema = schema();
    let sealed = dir.path().join("sealed.hcc");
    ContainerWriter::create(&sealed, &schema, BlockCompression::None, 3)?.finalize()?;
    assert_eq!(ContainerReader::open(&sealed)?.total_rows(), 0);

    let bytes = fs::read(&sealed)?;
    let truncated = dir.path().join("truncated.hcc");
    fs::write(&truncated, &bytes[..bytes.len() - 3])?;
    assert!(ContainerReader::open(&truncated).is_err());
    Ok(())
}
