//! Schema compilation: logical column declarations to physical encodings.
//!
//! The boundary accepts a loosely-typed JSON document; [`compile_schema`] turns it
//! into a [`CompiledSchema`] whose columns carry closed [`LogicalType`] and
//! [`PhysicalEncoding`] values. Nothing downstream ever sees the raw JSON.
//!
//! Two JSON shapes are accepted:
//!
//! ```json
//! {"column_names": ["id", "ts"], "column_types": ["Int64", "Timestamp"]}
//! ```
//!
//! ```json
//! [{"name": "id", "type": "Int64"}, {"name": "ts", "type": "Datetime"}]
//! ```

use crate::error::{HyperError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// User-facing column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Int64,
    Float64,
    /// Variable-length UTF-8 text (`String` is accepted as an alias).
    Utf8,
    /// Point in time (`Datetime` is accepted as an alias).
    Timestamp,
}

impl LogicalType {
    /// Resolve a declared type name, including the friendly aliases.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Int64" | "int64" | "i64" => Some(LogicalType::Int64),
            "Float64" | "float64" | "f64" => Some(LogicalType::Float64),
            "Utf8" | "utf8" | "String" | "string" | "str" => Some(LogicalType::Utf8),
            "Timestamp" | "timestamp" | "Datetime" | "datetime" => Some(LogicalType::Timestamp),
            _ => None,
        }
    }

    /// Deterministic physical representation for this logical type.
    #[must_use]
    pub fn physical(self) -> PhysicalEncoding {
        match self {
            LogicalType::Int64 => PhysicalEncoding::Int64,
            LogicalType::Float64 => PhysicalEncoding::Float64,
            LogicalType::Utf8 => PhysicalEncoding::VarUtf8,
            LogicalType::Timestamp => PhysicalEncoding::TimestampMicros,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// On-disk column representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PhysicalEncoding {
    /// 64-bit signed little-endian integers.
    Int64 = 1,
    /// IEEE-754 binary64, little-endian.
    Float64 = 2,
    /// `u64` offsets followed by concatenated UTF-8 bytes.
    VarUtf8 = 3,
    /// Microseconds since the Unix epoch (UTC) as `i64`.
    TimestampMicros = 4,
}

impl PhysicalEncoding {
    /// Width of one value for fixed-width encodings.
    #[must_use]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            PhysicalEncoding::VarUtf8 => None,
            _ => Some(8),
        }
    }
}

/// One compiled column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub logical: LogicalType,
    pub encoding: PhysicalEncoding,
}

/// Validated, ordered column list for one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledSchema {
    columns: Vec<ColumnSpec>,
}

impl CompiledSchema {
    /// Build from `(name, type)` pairs, enforcing non-empty and unique names.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, LogicalType)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (name, logical) in columns {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(HyperError::Schema(format!(
                    "column #{} has an empty name",
                    out.len() + 1
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(HyperError::Schema(format!("duplicate column name `{name}`")));
            }
            out.push(ColumnSpec {
                name,
                logical,
                encoding: logical.physical(),
            });
        }
        if out.is_empty() {
            return Err(HyperError::Schema("schema declares no columns".into()));
        }
        Ok(Self { columns: out })
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Encodings in column order, used for block shape checks.
    pub fn encodings(&self) -> impl Iterator<Item = PhysicalEncoding> + '_ {
        self.columns.iter().map(|c| c.encoding)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDecl {
    Parallel {
        column_names: Vec<String>,
        column_types: Vec<String>,
    },
    Entries(Vec<ColumnDecl>),
}

#[derive(Deserialize)]
struct ColumnDecl {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

/// Compile a schema JSON document.
///
/// # Errors
/// [`HyperError::Schema`] when the JSON is malformed, the column lists disagree in
/// length, a type name is not recognized, a name repeats, or there are no columns.
pub fn compile_schema(schema_json: &str) -> Result<CompiledSchema> {
    let decl: SchemaDecl = serde_json::from_str(schema_json)
        .map_err(|e| HyperError::Schema(format!("malformed schema JSON: {e}")))?;
    let pairs: Vec<(String, String)> = match decl {
        SchemaDecl::Parallel {
            column_names,
            column_types,
        } => {
            if column_names.len() != column_types.len() {
                return Err(HyperError::Schema(format!(
                    "{} column names but {} column types",
                    column_names.len(),
                    column_types.len()
                )));
            }
            column_names.into_iter().zip(column_types).collect()
        }
        SchemaDecl::Entries(entries) => entries.into_iter().map(|c| (c.name, c.ty)).collect(),
    };

    let mut typed = Vec::with_capacity(pairs.len());
    for (name, ty) in pairs {
        let logical = LogicalType::from_name(&ty).ok_or_else(|| {
            HyperError::Schema(format!("column `{name}` has unknown type `{ty}`"))
        })?;
        typed.push((name, logical));
    }
    CompiledSchema::new(typed)
}
