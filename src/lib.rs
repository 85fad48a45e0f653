//! # Famvar-base: family and summary variants in partitioned SQL tables.
//!
//! This crate stores genetic variants observed in families so that large cohorts can be queried interactively.
//! A variant exists at two levels.
//! A [`SummaryVariant`] describes a locus and its alleles across the whole population, together with effects and frequencies.
//! A [`FamilyVariant`] describes the genotypes of the members of a single [`Family`] at that locus.
//!
//! ### Storage
//!
//! Each allele becomes a row in a flattened table: `summary_alleles` for summary alleles and `family_alleles` for family alleles.
//! The rows carry denormalized columns for filtering and a serialized blob for reconstructing the full variant.
//! Rows are also tagged with partition bins (region, coding, frequency, and family) derived from a [`PartitionConfig`].
//! Queries use the bins to restrict the scan to the partitions that can contain matching rows.
//! See [`VariantStore`] for the SQLite implementation and [`partition`] for the bin functions.
//!
//! ### Queries
//!
//! [`QueryBuilder`] compiles a set of filters into a [`CompiledQuery`] for a given SQL [`Dialect`].
//! Bitmask filters over roles, sexes, statuses, inheritance, and variant types use a small boolean grammar described in [`filter`].
//! A [`QueryExecutor`] runs compiled queries on worker threads with a shared [`ConnectionPool`].
//! Results stream back through a [`QueryHandle`] that the consumer can close at any time.
//!
//! ### Data formats
//!
//! Variant descriptions use the compact `sub(A->G)`, `ins(T)`, `del(3)`, `comp(AT->G)` forms of [`codec`].
//! Genotypes and best states are 2-row integer matrices with a text encoding.
//! Pedigrees are read from tab-separated PED files with [`Person::from_ped_line`].

pub mod codec;
pub mod db;
pub mod dialect;
pub mod effects;
pub mod error;
pub mod family_variant;
pub mod filter;
pub mod partition;
pub mod pedigree;
pub mod query;
pub mod runner;
pub mod serialize;
pub mod utils;
pub mod variant;

pub use codec::{Matrix, VariantDescription};
pub use db::{ImportBatch, StoreSchema, VariantStore};
pub use dialect::{Dialect, ImpalaDialect, SqliteDialect};
pub use error::{CodecError, ConnectionError, DecodeError, MalformedVariantError, QueryCompileError, QueryError, StoreError};
pub use family_variant::{FamilyAllele, FamilyVariant, Inheritance};
pub use partition::{PartitionConfig, PartitionDescriptor, Region};
pub use pedigree::{Family, FamilyLookup, FamilyRegistry, Person, Role, Sex, Status};
pub use query::{CompiledQuery, QueryBuilder, QueryContext, VariantResult};
pub use runner::{ConnectionPool, ExecutorParams, HandleState, QueryExecutor, QueryHandle};
pub use variant::{EffectGene, SummaryAllele, SummaryVariant, VariantType};

#[cfg(test)]
mod internal;
