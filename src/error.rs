//! Error types.
//!
//! Each failure domain has its own error type.
//! Codec and model errors are local to a single record, compile errors stop query construction,
//! and connection / execution errors terminate a single in-flight query.

use std::time::Duration;

use thiserror::Error;

//-----------------------------------------------------------------------------

/// Malformed matrix or variant description text.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty matrix text")]
    EmptyMatrix,

    #[error("Ragged matrix: row {row} has {found} columns, expected {expected}")]
    RaggedMatrix { row: usize, expected: usize, found: usize },

    #[error("Invalid matrix cell: {0}")]
    InvalidCell(String),

    #[error("Expected {expected} matrix rows, found {found}")]
    WrongRowCount { expected: usize, found: usize },

    #[error("Invalid variant description: {0}")]
    InvalidDescription(String),

    #[error("Member {member} has {found} allele copies, expected ploidy {expected}")]
    PloidyMismatch { member: usize, expected: usize, found: usize },
}

//-----------------------------------------------------------------------------

/// A set of alleles or a genotype that does not describe a valid variant.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum MalformedVariantError {
    #[error("No allele records")]
    Empty,

    #[error("Records of summary variant {expected} mixed with summary variant {found}")]
    MixedSummaryIndex { expected: u64, found: u64 },

    #[error("Summary variant {summary_index}: records from bucket {expected} mixed with bucket {found}")]
    MixedBucketIndex { summary_index: u64, expected: u32, found: u32 },

    #[error("Summary variant {summary_index}: expected allele {expected}, found allele {found}")]
    AlleleGap { summary_index: u64, expected: usize, found: usize },

    #[error("Summary variant {summary_index}: duplicate allele {allele_index}")]
    DuplicateAllele { summary_index: u64, allele_index: usize },

    #[error("Summary variant {summary_index}: allele {allele_index} has no alternative sequence")]
    MissingAlternative { summary_index: u64, allele_index: usize },

    #[error("Summary variant {summary_index}: the reference allele has an alternative sequence")]
    ReferenceWithAlternative { summary_index: u64 },

    #[error("Genotype has {0} rows, expected 2")]
    GenotypeRows(usize),

    #[error("Genotype has {found} columns, family {family_id} has {expected} members")]
    GenotypeWidth { family_id: String, expected: usize, found: usize },

    #[error("Genotype refers to allele {allele_index}, but the variant has {allele_count} alleles")]
    AlleleOutOfRange { allele_index: i32, allele_count: usize },
}

//-----------------------------------------------------------------------------

/// Failure to turn a stored record into a variant object.
///
/// A decode error drops the offending record but does not stop the scan.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Malformed(#[from] MalformedVariantError),

    #[error("Invalid variant blob: {0}")]
    Blob(String),

    #[error("Unknown family: {0}")]
    UnknownFamily(String),

    #[error("Unexpected value in column {column}: {message}")]
    Column { column: String, message: String },
}

//-----------------------------------------------------------------------------

/// An unsupported or unsatisfiable static filter combination.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum QueryCompileError {
    #[error("Unknown effect type: {0}")]
    UnknownEffectType(String),

    #[error("Unknown real attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid {filter} filter: {message}")]
    Filter { filter: &'static str, message: String },

    #[error("Unknown value {name} in {filter} filter")]
    UnknownName { filter: &'static str, name: String },

    #[error("Filter {0} is not supported for summary variant queries")]
    UnsupportedFilter(&'static str),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Empty {0} set")]
    EmptySet(&'static str),

    #[error("Invalid range for {name}: {range}")]
    InvalidRange { name: String, range: String },
}

//-----------------------------------------------------------------------------

/// Connection pool failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Cannot open a connection: {0}")]
    Open(String),

    #[error("No connection available within {0:?}")]
    Timeout(Duration),

    #[error("The connection pool has been closed")]
    PoolClosed,
}

//-----------------------------------------------------------------------------

/// The error marker of a failed query handle.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Cannot decode rows: {0}")]
    Decode(String),

    #[error("Query cancelled: nobody consumed the results after {0} attempts")]
    Cancelled(usize),
}

//-----------------------------------------------------------------------------

/// Failures when creating, opening, or importing into a variant store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database {0} already exists")]
    Exists(String),

    #[error("Unsupported database version: {found} (expected {expected})")]
    Version { found: String, expected: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot encode variant data: {0}")]
    Encode(String),

    #[error(transparent)]
    Malformed(#[from] MalformedVariantError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

//-----------------------------------------------------------------------------
