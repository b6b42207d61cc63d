//! Schema and config compilation.

use anyhow::Result;
use hypercopy::*;

fn report() -> SystemReport {
    SystemReport::synthetic(6, 16, 8 << 30)
}

fn config(json: &str) -> std::result::Result<CompiledConfig, HyperError> {
    compile_config(&RawConfig::from_json(json)?, &report())
}

#[test]
fn parallel_and_entry_schema_shapes_agree() -> Result<()> {
    let parallel = compile_schema(
        r#"{"column_names": ["id", "amount", "name", "at"],
            "column_types": ["Int64", "Float64", "String", "Datetime"]}"#,
    )?;
    let entries = compile_schema(
        r#"[{"name": "id", "type": "int64"}, {"name": "amount", "type": "f64"},
            {"name": "name", "type": "Utf8"}, {"name": "at", "type": "Timestamp"}]"#,
    )?;
    assert_eq!(parallel, entries);

    let encodings: Vec<_> = parallel.encodings().collect();
    assert_eq!(
        encodings,
        [
            PhysicalEncoding::Int64,
            PhysicalEncoding::Float64,
            PhysicalEncoding::VarUtf8,
            PhysicalEncoding::TimestampMicros,
        ]
    );
    assert_eq!(parallel.columns()[3].logical, LogicalType::Timestamp);
    Ok(())
}

#[test]
fn schema_rejections() {
    let cases = [
        r#"{"column_names": [], "column_types": []}"#,
        r#"[]"#,
        r#"{"column_names": ["a", "b"], "column_types": ["Int64"]}"#,
        r#"{"column_names": ["a"], "column_types": ["Decimal"]}"#,
        r#"{"column_names": ["a", "a"], "column_types": ["Int64", "Utf8"]}"#,
        r#"{"column_names": [" "], "column_types": ["Int64"]}"#,
        r#"{"columns": 3}"#,
        "not json",
    ];
    for case in cases {
        let err = compile_schema(case).unwrap_err();
        assert_eq!(err.code(), -3, "{case}: {err}");
    }
}

#[test]
fn config_defaults_come_from_the_report() -> Result<()> {
    let cfg = config("{}")?;
    assert_eq!(cfg.delimiter, b',');
    assert_eq!(cfg.quote_char, b'"');
    assert!(cfg.has_header);
    assert_eq!(cfg.chunk_size_bytes, 16 * 1024 * 1024);
    assert_eq!(cfg.target_ram_ratio, 0.45);
    assert_eq!(cfg.max_threads, 6);
    assert_eq!(cfg.compression, BlockCompression::None);
    assert_eq!(cfg.compression_level, 3);
    assert_eq!(cfg.budget_bytes(&report()), ((8u64 << 30) as f64 * 0.45) as u64);
    Ok(())
}

#[test]
fn config_overrides() -> Result<()> {
    let cfg = config(
        r#"{"delimiter": 124, "quote_char": "'", "has_header": false,
            "chunk_size_bytes": 4096, "target_ram_ratio": 1.0, "threads": 64}"#,
    )?;
    assert_eq!(cfg.delimiter, b'|');
    assert_eq!(cfg.quote_char, b'\'');
    assert!(!cfg.has_header);
    assert_eq!(cfg.chunk_size_bytes, 4096);
    assert_eq!(cfg.max_threads, 6, "threads are clamped to the host");
    assert_eq!(config(r#"{"threads": 2}"#)?.max_threads, 2);
    assert_eq!(config(r#"{"threads": 0}"#)?.max_threads, 6);
    Ok(())
}

#[cfg(feature = "compression-zstd")]
#[test]
fn zstd_compression_is_accepted() -> Result<()> {
    let cfg = config(r#"{"compression": "zstd", "compression_level": 19}"#)?;
    assert_eq!(cfg.compression, BlockCompression::Zstd);
    assert_eq!(cfg.compression_level, 19);
    Ok(())
}

#[test]
fn config_rejections() {
    let cases = [
        r#"{"chunk_size": 0}"#,
        r#"{"target_ram_ratio": 0}"#,
        r#"{"target_ram_ratio": -0.5}"#,
        r#"{"target_ram_ratio": 1.01}"#,
        r#"{"delimiter": "ab"}"#,
        r#"{"delimiter": 300}"#,
        r#"{"delimiter": "\n"}"#,
        r#"{"delimiter": "\"", "quote_char": "\""}"#,
        r#"{"compression": "brotli"}"#,
        r#"{"compression_level": 0}"#,
        r#"{"has_header": "yes"}"#,
        "42",
    ];
    for case in cases {
        let err = config(case).unwrap_err();
        assert_eq!(err.code(), -4, "{case}: {err}");
    }
}
