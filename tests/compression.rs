#[cfg(any(feature = "compression-gzip", feature = "compression-zstd"))]
mod compression_tests {
    use anyhow::Result;
    use hypercopy::io::compression::{SourceCodec, SourceReader, open_source, register_codec};
    use hypercopy::*;
    use std::fs;
    use std::io::{Read, Write};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SCHEMA: &str =
        r#"{"column_names": ["id", "city"], "column_types": ["Int64", "Utf8"]}"#;

    fn body(start: i64, rows: i64) -> String {
        let mut s = String::from("id,city\n");
        for i in start..start + rows {
            s.push_str(&format!("{i},\"City {i}, Somewhere\"\n"));
        }
        s
    }

    fn copy(dir: &Path, glob: &str) -> Result<Vec<i64>> {
        let out = dir.join("out.hcc");
        let rows = hyper_copy(
            &format!("{}/{glob}", dir.display()),
            out.to_str().unwrap(),
            SCHEMA,
            r#"{"chunk_size": 1024}"#,
        );
        anyhow::ensure!(rows >= 0, "copy failed with {rows}");
        match ContainerReader::open(&out)?.read_all()?.remove(0) {
            ColumnData::Int64(ids) => Ok(ids),
            other => anyhow::bail!("unexpected column {other:?}"),
        }
    }

    #[cfg(feature = "compression-gzip")]
    fn gzip(text: &str) -> Result<Vec<u8>> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(text.as_bytes())?;
        Ok(enc.finish()?)
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_sources() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.csv.gz"), gzip(&body(0, 300))?)?;
        fs::write(dir.path().join("b.csv.gz"), gzip(&body(300, 5))?)?;

        let ids = copy(dir.path(), "*.csv.gz")?;
        assert_eq!(ids, (0..305).collect::<Vec<_>>());
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_detected_by_magic() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("disguised.data"), gzip(&body(10, 3))?)?;

        let ids = copy(dir.path(), "*.data")?;
        assert_eq!(ids, vec![10, 11, 12]);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_concatenated_gzip_members() -> Result<()> {
        let dir = TempDir::new()?;
        let mut bytes = gzip(&body(0, 2))?;
        bytes.extend(gzip("2,\"Later\"\n")?);
        let path = dir.path().join("multi.gz");
        fs::write(&path, bytes)?;

        let mut text = String::new();
        open_source(&path, 64)?.read_to_string(&mut text)?;
        assert!(text.ends_with("2,\"Later\"\n"));
        Ok(())
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn test_zstd_sources_mixed_with_plain() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("a.csv.zst"),
            zstd::encode_all(body(0, 100).as_bytes(), 3)?,
        )?;
        fs::write(dir.path().join("b.csv"), body(100, 50))?;

        let ids = copy(dir.path(), "*.csv*")?;
        assert_eq!(ids, (0..150).collect::<Vec<_>>());
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_corrupt_archive_fails_the_run() -> Result<()> {
        let dir = TempDir::new()?;
        let mut bytes = gzip(&body(0, 500))?;
        bytes.truncate(bytes.len() / 2);
        fs::write(dir.path().join("broken.csv.gz"), bytes)?;

        let out = dir.path().join("out.hcc");
        let code = hyper_copy(
            &format!("{}/*.gz", dir.path().display()),
            out.to_str().unwrap(),
            SCHEMA,
            "{}",
        );
        assert_eq!(code, -11);
        assert!(ContainerReader::open(&out).is_err());
        Ok(())
    }

    /// Stores the file byte-reversed.
    struct Reverse;

    impl SourceCodec for Reverse {
        fn name(&self) -> &str {
            "reverse"
        }

        fn extensions(&self) -> &[&str] {
            &[".rev"]
        }

        fn magic_bytes(&self) -> Option<&[u8]> {
            None
        }

        fn wrap(&self, mut reader: SourceReader) -> std::io::Result<SourceReader> {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            bytes.reverse();
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }
    }

    #[test]
    fn test_custom_codec() -> Result<()> {
        register_codec(Arc::new(Reverse));
        let dir = TempDir::new()?;
        let mut reversed = body(0, 4).into_bytes();
        reversed.reverse();
        fs::write(dir.path().join("flipped.rev"), reversed)?;

        let ids = copy(dir.path(), "*.rev")?;
        assert_eq!(ids, vec![0, 1, 2, 3]);
        Ok(())
    }
}
