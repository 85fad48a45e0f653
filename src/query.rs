//! Compiling structured variant filters into SQL.
//!
//! A [`QueryBuilder`] accumulates filters in any order and [`QueryBuilder::build`] compiles them into a [`CompiledQuery`]:
//! SQL text with positional `?` parameters, a decoding plan for the result columns, and the region bins the query is restricted to.
//! Compiling never touches the backend.
//!
//! ### Family queries
//!
//! ```text
//! SELECT <columns>
//! FROM family_alleles AS fa
//! JOIN summary_alleles AS sa ON (<same allele>)
//! [<unnest fa.allele_in_members AS m> JOIN pedigree AS pd ON (<same family and person>)]
//! WHERE <predicate>
//! [GROUP BY <columns>]
//! [LIMIT n]
//! ```
//!
//! The pedigree join is only added for person-scoped filters.
//! Role, sex, status, inheritance, and variant type filters are evaluated on bitmask columns of the allele rows.
//!
//! ### Pruning
//!
//! When pruning is enabled (the default), the predicate also restricts the partition bin columns.
//! Bin predicates never change the result: frequency bins that cannot be proven to match exactly keep the exact predicate on the stored values.
//! See [`FrequencyPlan`].

use crate::dialect::Dialect;
use crate::effects;
use crate::error::{DecodeError, QueryCompileError};
use crate::family_variant::{FamilyVariant, Inheritance};
use crate::filter::{self, BitFlag, Expr, Visitor};
use crate::partition::{self, FrequencyPlan, PartitionConfig};
use crate::pedigree::{FamilyLookup, Role, Sex, Status};
use crate::serialize;
use crate::variant::{SummaryVariant, VariantType};
use crate::db::StoreSchema;

pub use crate::partition::Region;

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::types::Value;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Everything the query builder needs to know about a store.
#[derive(Clone, Debug)]
pub struct QueryContext {
    pub config: PartitionConfig,
    pub schema: StoreSchema,
    pub dialect: Arc<dyn Dialect>,
}

impl QueryContext {
    pub fn new(config: PartitionConfig, schema: StoreSchema, dialect: Arc<dyn Dialect>) -> Self {
        QueryContext { config, schema, dialect }
    }
}

/// Kind of the query and its results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// One row per matching family allele.
    Family,
    /// One row per matching summary allele.
    Summary,
}

/// A bound query parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Integer(value) => Value::Integer(*value),
            Literal::Real(value) => Value::Real(*value),
            Literal::Text(value) => Value::Text(value.clone()),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{}", value),
            Literal::Real(value) => write!(f, "{}", value),
            Literal::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

//-----------------------------------------------------------------------------

/// Values collected from the columns of one result row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowState {
    pub bucket_index: Option<u32>,
    pub summary_index: Option<u64>,
    pub allele_index: Option<usize>,
    pub family_id: Option<String>,
    pub summary_blob: Option<Vec<u8>>,
    pub family_blob: Option<Vec<u8>>,
}

/// Stores the value of one column in the row state.
pub type ColumnDecoder = fn(&Value, &mut RowState) -> Result<(), DecodeError>;

fn column_error(column: &str, value: &Value) -> DecodeError {
    DecodeError::Column { column: column.to_string(), message: format!("unexpected value {:?}", value.data_type()) }
}

fn integer(column: &str, value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::Integer(value) => Ok(*value),
        _ => Err(column_error(column, value)),
    }
}

fn unsigned(column: &str, value: &Value) -> Result<u64, DecodeError> {
    u64::try_from(integer(column, value)?).map_err(|x| DecodeError::Column { column: column.to_string(), message: x.to_string() })
}

fn blob(column: &str, value: &Value) -> Result<Vec<u8>, DecodeError> {
    match value {
        Value::Blob(value) => Ok(value.clone()),
        _ => Err(column_error(column, value)),
    }
}

fn decode_bucket_index(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    let bucket_index = unsigned("bucket_index", value)?;
    row.bucket_index = Some(u32::try_from(bucket_index).map_err(|x| DecodeError::Column { column: String::from("bucket_index"), message: x.to_string() })?);
    Ok(())
}

fn decode_summary_index(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    row.summary_index = Some(unsigned("summary_index", value)?);
    Ok(())
}

fn decode_allele_index(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    row.allele_index = Some(unsigned("allele_index", value)? as usize);
    Ok(())
}

fn decode_family_id(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    match value {
        Value::Text(value) => {
            row.family_id = Some(value.clone());
            Ok(())
        },
        _ => Err(column_error("family_id", value)),
    }
}

fn decode_summary_blob(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    row.summary_blob = Some(blob("summary_variant_data", value)?);
    Ok(())
}

fn decode_family_blob(value: &Value, row: &mut RowState) -> Result<(), DecodeError> {
    row.family_blob = Some(blob("family_variant_data", value)?);
    Ok(())
}

/// A result column and its decoder.
#[derive(Clone, Debug)]
pub struct ColumnPlan {
    /// Qualified column expression in the select list.
    pub name: String,
    pub decoder: ColumnDecoder,
}

//-----------------------------------------------------------------------------

/// A summary variant returned by a summary query.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryResult {
    pub variant: Arc<SummaryVariant>,
    /// Alleles selected by the query.
    pub matched_alleles: Vec<usize>,
}

/// A decoded result row.
#[derive(Clone, Debug)]
pub enum VariantResult {
    Summary(SummaryResult),
    Family(FamilyVariant),
}

impl VariantResult {
    /// Returns the summary variant.
    pub fn summary(&self) -> &Arc<SummaryVariant> {
        match self {
            VariantResult::Summary(result) => &result.variant,
            VariantResult::Family(variant) => variant.summary(),
        }
    }

    /// Returns the alleles selected by the query.
    pub fn matched_alleles(&self) -> &[usize] {
        match self {
            VariantResult::Summary(result) => &result.matched_alleles,
            VariantResult::Family(variant) => variant.matched_alleles(),
        }
    }

    /// Returns the family variant, if this is a family query result.
    pub fn family_variant(&self) -> Option<&FamilyVariant> {
        match self {
            VariantResult::Family(variant) => Some(variant),
            VariantResult::Summary(_) => None,
        }
    }

    /// Returns `true` if both results are rows of the same variant.
    pub fn same_variant(&self, other: &VariantResult) -> bool {
        match (self, other) {
            (VariantResult::Family(a), VariantResult::Family(b)) => a.same_variant(b),
            (VariantResult::Summary(a), VariantResult::Summary(b)) => {
                a.variant.bucket_index() == b.variant.bucket_index() && a.variant.summary_index() == b.variant.summary_index()
            },
            _ => false,
        }
    }

    // Merges the matched alleles of another row of the same variant.
    fn merge(&mut self, other: VariantResult) {
        match self {
            VariantResult::Family(variant) => variant.merge_matched_alleles(other.matched_alleles()),
            VariantResult::Summary(result) => {
                for allele in other.matched_alleles() {
                    if !result.matched_alleles.contains(allele) {
                        result.matched_alleles.push(*allele);
                    }
                }
                result.matched_alleles.sort_unstable();
            },
        }
    }
}

impl Display for VariantResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantResult::Summary(result) => write!(f, "{}", result.variant),
            VariantResult::Family(variant) => write!(f, "{}", variant),
        }
    }
}

/// Merges consecutive rows of the same variant.
pub struct CoalesceRows<I: Iterator<Item = VariantResult>> {
    inner: I,
    pending: Option<VariantResult>,
}

impl<I: Iterator<Item = VariantResult>> Iterator for CoalesceRows<I> {
    type Item = VariantResult;

    fn next(&mut self) -> Option<Self::Item> {
        let mut current = self.pending.take().or_else(|| self.inner.next())?;
        for next in self.inner.by_ref() {
            if current.same_variant(&next) {
                current.merge(next);
            } else {
                self.pending = Some(next);
                break;
            }
        }
        Some(current)
    }
}

/// Returns an iterator that merges consecutive rows of the same variant, preserving the order.
pub fn coalesce_rows<I: IntoIterator<Item = VariantResult>>(rows: I) -> CoalesceRows<I::IntoIter> {
    CoalesceRows { inner: rows.into_iter(), pending: None }
}

/// The last summary variant decoded from a result stream.
///
/// Consecutive rows of the same summary variant share the decoded variant.
#[derive(Debug, Default)]
pub struct SummaryCache {
    last: Option<((u32, u64), Arc<SummaryVariant>)>,
}

impl SummaryCache {
    fn get(&mut self, bucket_index: u32, summary_index: u64, blob: &[u8]) -> Result<Arc<SummaryVariant>, DecodeError> {
        if let Some((key, variant)) = self.last.as_ref() {
            if *key == (bucket_index, summary_index) {
                return Ok(variant.clone());
            }
        }
        let variant = Arc::new(serialize::deserialize_summary_variant(blob)?);
        self.last = Some(((bucket_index, summary_index), variant.clone()));
        Ok(variant)
    }
}

//-----------------------------------------------------------------------------

/// A compiled query.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub kind: QueryKind,
    /// SQL text with positional `?` parameters.
    pub sql: String,
    pub params: Vec<Literal>,
    /// Result columns in the select order.
    pub columns: Vec<ColumnPlan>,
    /// Region bins the query is restricted to, or `None` if the query is not restricted by region.
    pub partitions: Option<BTreeSet<String>>,
    pub limit: Option<usize>,
}

impl CompiledQuery {
    /// Returns the parameters as SQLite values.
    pub fn sql_params(&self) -> Vec<Value> {
        self.params.iter().map(Value::from).collect()
    }

    /// Returns the SQL text with the parameters inlined, for logging and for backends without parameter binding.
    pub fn inline_sql(&self) -> String {
        let mut result = String::with_capacity(self.sql.len());
        let mut params = self.params.iter().peekable();
        for c in self.sql.chars() {
            match (c, params.next_if(|_| c == '?')) {
                (_, Some(param)) => result.push_str(&param.to_string()),
                (c, None) => result.push(c),
            }
        }
        result
    }

    /// Decodes one result row.
    ///
    /// # Errors
    ///
    /// Fails if the row does not match the column plan, the blobs cannot be decoded, or the family is unknown.
    pub fn decode_row(&self, values: &[Value], families: &dyn FamilyLookup, cache: &mut SummaryCache) -> Result<VariantResult, DecodeError> {
        if values.len() != self.columns.len() {
            return Err(DecodeError::Column {
                column: String::from("*"),
                message: format!("expected {} columns, found {}", self.columns.len(), values.len()),
            });
        }
        let mut row = RowState::default();
        for (column, value) in self.columns.iter().zip(values.iter()) {
            (column.decoder)(value, &mut row)?;
        }

        let missing = |column: &str| DecodeError::Column { column: column.to_string(), message: String::from("missing from the row") };
        let bucket_index = row.bucket_index.ok_or(missing("bucket_index"))?;
        let summary_index = row.summary_index.ok_or(missing("summary_index"))?;
        let allele_index = row.allele_index.ok_or(missing("allele_index"))?;
        let summary_blob = row.summary_blob.as_ref().ok_or(missing("summary_variant_data"))?;
        let summary = cache.get(bucket_index, summary_index, summary_blob)?;

        match self.kind {
            QueryKind::Summary => Ok(VariantResult::Summary(SummaryResult { variant: summary, matched_alleles: vec![allele_index] })),
            QueryKind::Family => {
                let family_blob = row.family_blob.as_ref().ok_or(missing("family_variant_data"))?;
                let variant = serialize::deserialize_family_variant(family_blob, summary, families)?;
                if let Some(family_id) = row.family_id.as_ref() {
                    if family_id != variant.family_id() {
                        return Err(DecodeError::Column {
                            column: String::from("family_id"),
                            message: format!("row has family {}, blob has family {}", family_id, variant.family_id()),
                        });
                    }
                }
                Ok(VariantResult::Family(variant.with_matched_alleles(vec![allele_index])))
            },
        }
    }
}

impl Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

//-----------------------------------------------------------------------------

// Lowers a bitmask filter to a SQL predicate on a column.
struct BitmaskLowering<'a, F: BitFlag> {
    dialect: &'a dyn Dialect,
    column: String,
    filter: &'static str,
    _marker: PhantomData<F>,
}

impl<'a, F: BitFlag> BitmaskLowering<'a, F> {
    fn mask(&self, names: &[String]) -> Result<u64, QueryCompileError> {
        F::mask_of(names).map_err(|name| QueryCompileError::UnknownName { filter: self.filter, name })
    }
}

impl<'a, F: BitFlag> Visitor for BitmaskLowering<'a, F> {
    type Output = String;
    type Error = QueryCompileError;

    fn name(&mut self, name: &str) -> Result<String, QueryCompileError> {
        let mask = self.mask(&[name.to_string()])?;
        Ok(self.dialect.bit_test(&self.column, mask))
    }

    fn not(&mut self, inner: String) -> Result<String, QueryCompileError> {
        Ok(format!("NOT ({})", inner))
    }

    fn and(&mut self, left: String, right: String) -> Result<String, QueryCompileError> {
        Ok(format!("({} AND {})", left, right))
    }

    fn or(&mut self, left: String, right: String) -> Result<String, QueryCompileError> {
        Ok(format!("({} OR {})", left, right))
    }

    fn any(&mut self, names: &[String]) -> Result<String, QueryCompileError> {
        let mask = self.mask(names)?;
        Ok(self.dialect.bit_test(&self.column, mask))
    }

    fn all(&mut self, names: &[String]) -> Result<String, QueryCompileError> {
        let mask = self.mask(names)?;
        Ok(format!("{} = {}", self.dialect.bit_and(&self.column, mask), mask))
    }

    fn eq(&mut self, names: &[String]) -> Result<String, QueryCompileError> {
        let mask = self.mask(names)?;
        Ok(format!("{} = {}", self.column, mask))
    }
}

// Positions beyond the integer range of SQL saturate.
fn position_literal(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}

fn lower_bitmask<F: BitFlag>(dialect: &dyn Dialect, column: String, filter: &'static str, text: &str) -> Result<String, QueryCompileError> {
    let expr: Expr = filter::parse(text).map_err(|message| QueryCompileError::Filter { filter, message })?;
    let mut visitor = BitmaskLowering::<F> { dialect, column, filter, _marker: PhantomData };
    expr.accept(&mut visitor)
}

// Predicates and parameters in the order they appear in the SQL text.
#[derive(Default)]
struct Clauses {
    predicates: Vec<String>,
    params: Vec<Literal>,
}

impl Clauses {
    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    fn push(&mut self, predicate: String) {
        self.predicates.push(predicate);
    }

    // Adds `expr IN (?, ...)` with text parameters.
    fn push_text_set<S: AsRef<str>>(&mut self, expr: &str, values: &[S]) {
        self.predicates.push(format!("{} IN ({})", expr, Self::placeholders(values.len())));
        self.params.extend(values.iter().map(|x| Literal::Text(x.as_ref().to_string())));
    }

    // Adds `expr IN ('a', ...)` with the values inlined as quoted literals.
    fn push_inline_text_set<'b, I: IntoIterator<Item = &'b String>>(&mut self, expr: &str, values: I) {
        let values: Vec<String> = values.into_iter().map(|x| Literal::Text(x.clone()).to_string()).collect();
        if values.is_empty() {
            self.predicates.push(String::from("1 = 0"));
        } else {
            self.predicates.push(format!("{} IN ({})", expr, values.join(", ")));
        }
    }

    fn push_int_set<I: IntoIterator<Item = u64>>(&mut self, expr: &str, values: I) {
        let values: Vec<String> = values.into_iter().map(|x| x.to_string()).collect();
        if values.is_empty() {
            self.predicates.push(String::from("1 = 0"));
        } else {
            self.predicates.push(format!("{} IN ({})", expr, values.join(", ")));
        }
    }
}

//-----------------------------------------------------------------------------

/// A builder for family and summary variant queries.
///
/// # Examples
///
/// ```
/// use famvar_base::db::StoreSchema;
/// use famvar_base::dialect::SqliteDialect;
/// use famvar_base::partition::{PartitionConfig, Region};
/// use famvar_base::query::{QueryBuilder, QueryContext};
/// use std::sync::Arc;
///
/// let config = PartitionConfig { region_length: 100, ..PartitionConfig::default() };
/// let context = QueryContext::new(config, StoreSchema::default(), Arc::new(SqliteDialect));
/// let query = QueryBuilder::family(&context)
///     .with_regions(vec![Region::new("chr1", 100, 200)])
///     .with_roles("prb and not sib")
///     .with_limit(Some(10))
///     .build()
///     .unwrap();
/// assert!(query.sql.contains("(fa.\"allele_in_roles\" & 1) != 0"));
/// assert_eq!(query.partitions.unwrap().len(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct QueryBuilder<'a> {
    context: &'a QueryContext,
    kind: QueryKind,
    regions: Option<Vec<Region>>,
    genes: Option<Vec<String>>,
    effect_types: Option<Vec<String>>,
    roles: Option<String>,
    sexes: Option<String>,
    statuses: Option<String>,
    inheritance: Option<String>,
    variant_type: Option<String>,
    real_attr_filters: Vec<(String, Option<f64>, Option<f64>)>,
    frequency_range: Option<(Option<f64>, Option<f64>)>,
    ultra_rare: bool,
    family_ids: Option<Vec<String>>,
    person_ids: Option<Vec<String>>,
    return_reference: bool,
    return_unknown: bool,
    limit: Option<usize>,
    pruning: bool,
}

/// Alias of the family allele table.
pub const FAMILY_ALIAS: &str = "fa";

/// Alias of the summary allele table.
pub const SUMMARY_ALIAS: &str = "sa";

/// Alias of the pedigree table.
pub const PEDIGREE_ALIAS: &str = "pd";

// Aliases of unnested arrays.
const MEMBER_ALIAS: &str = "m";
const EFFECT_ALIAS: &str = "eg";

/// Field of an `effect_gene` element with the gene symbol.
pub const EFFECT_GENE_SYMBOL: &str = "effect_gene_symbols";

/// Field of an `effect_gene` element with the effect type.
pub const EFFECT_GENE_TYPE: &str = "effect_types";

impl<'a> QueryBuilder<'a> {
    /// Default for returning reference alleles.
    pub const DEFAULT_RETURN_REFERENCE: bool = false;

    /// Default for returning alleles with unknown calls.
    pub const DEFAULT_RETURN_UNKNOWN: bool = false;

    /// Default for partition pruning.
    pub const DEFAULT_PRUNING: bool = true;

    fn new(context: &'a QueryContext, kind: QueryKind) -> Self {
        QueryBuilder {
            context, kind,
            regions: None,
            genes: None,
            effect_types: None,
            roles: None,
            sexes: None,
            statuses: None,
            inheritance: None,
            variant_type: None,
            real_attr_filters: Vec::new(),
            frequency_range: None,
            ultra_rare: false,
            family_ids: None,
            person_ids: None,
            return_reference: Self::DEFAULT_RETURN_REFERENCE,
            return_unknown: Self::DEFAULT_RETURN_UNKNOWN,
            limit: None,
            pruning: Self::DEFAULT_PRUNING,
        }
    }

    /// Starts a family variant query.
    pub fn family(context: &'a QueryContext) -> Self {
        Self::new(context, QueryKind::Family)
    }

    /// Starts a summary variant query.
    pub fn summary(context: &'a QueryContext) -> Self {
        Self::new(context, QueryKind::Summary)
    }

    /// Restricts the query to alleles starting in any of the regions.
    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = Some(regions);
        self
    }

    /// Restricts the query to alleles with an effect on any of the genes.
    pub fn with_genes<S: AsRef<str>>(mut self, genes: &[S]) -> Self {
        self.genes = Some(genes.iter().map(|x| x.as_ref().to_string()).collect());
        self
    }

    /// Restricts the query to alleles with any of the effect types or effect type groups.
    pub fn with_effect_types<S: AsRef<str>>(mut self, effect_types: &[S]) -> Self {
        self.effect_types = Some(effect_types.iter().map(|x| x.as_ref().to_string()).collect());
        self
    }

    /// Filters the roles of the carriers, e.g. `prb and not sib`.
    pub fn with_roles(mut self, filter: &str) -> Self {
        self.roles = Some(filter.to_string());
        self
    }

    /// Filters the sexes of the carriers.
    pub fn with_sexes(mut self, filter: &str) -> Self {
        self.sexes = Some(filter.to_string());
        self
    }

    /// Filters the affected statuses of the carriers.
    pub fn with_statuses(mut self, filter: &str) -> Self {
        self.statuses = Some(filter.to_string());
        self
    }

    /// Filters the inheritance classifications of the allele in the family members, e.g. `denovo or omission`.
    pub fn with_inheritance(mut self, filter: &str) -> Self {
        self.inheritance = Some(filter.to_string());
        self
    }

    /// Filters the variant types, e.g. `sub or ins`.
    pub fn with_variant_type(mut self, filter: &str) -> Self {
        self.variant_type = Some(filter.to_string());
        self
    }

    /// Restricts a real-valued summary attribute to a range.
    ///
    /// Alleles without the attribute do not match.
    pub fn with_real_attr_filter(mut self, name: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.real_attr_filters.push((name.to_string(), min, max));
        self
    }

    /// Restricts the allele frequency (in percent) to a range.
    ///
    /// A missing frequency is treated as 0.0.
    pub fn with_frequency_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.frequency_range = Some((min, max));
        self
    }

    /// Restricts the query to alleles with at most one observed copy.
    pub fn with_ultra_rare(mut self, ultra_rare: bool) -> Self {
        self.ultra_rare = ultra_rare;
        self
    }

    /// Restricts the query to the families.
    pub fn with_family_ids<S: AsRef<str>>(mut self, family_ids: &[S]) -> Self {
        self.family_ids = Some(family_ids.iter().map(|x| x.as_ref().to_string()).collect());
        self
    }

    /// Restricts the query to alleles carried by any of the persons.
    pub fn with_person_ids<S: AsRef<str>>(mut self, person_ids: &[S]) -> Self {
        self.person_ids = Some(person_ids.iter().map(|x| x.as_ref().to_string()).collect());
        self
    }

    /// Includes reference alleles in the results.
    pub fn with_return_reference(mut self, return_reference: bool) -> Self {
        self.return_reference = return_reference;
        self
    }

    /// Includes family alleles with unknown calls in the results.
    pub fn with_return_unknown(mut self, return_unknown: bool) -> Self {
        self.return_unknown = return_unknown;
        self
    }

    /// Sets the maximum number of rows.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Enables or disables partition bin predicates.
    pub fn with_pruning(mut self, pruning: bool) -> Self {
        self.pruning = pruning;
        self
    }

    //-------------------------------------------------------------------------

    fn dialect(&self) -> &'a dyn Dialect {
        self.context.dialect.as_ref()
    }

    fn col(&self, alias: &str, column: &str) -> String {
        self.dialect().column(alias, column)
    }

    // Alias of the table with the summary-level data.
    fn allele_alias(&self) -> &'static str {
        match self.kind {
            QueryKind::Family => FAMILY_ALIAS,
            QueryKind::Summary => SUMMARY_ALIAS,
        }
    }

    // Aliases of the tables with partition bins.
    fn bin_aliases(&self) -> &'static [&'static str] {
        match self.kind {
            QueryKind::Family => &[FAMILY_ALIAS, SUMMARY_ALIAS],
            QueryKind::Summary => &[SUMMARY_ALIAS],
        }
    }

    fn validate(&self) -> Result<(), QueryCompileError> {
        if self.kind == QueryKind::Summary {
            let family_only = [
                ("roles", self.roles.is_some()),
                ("sexes", self.sexes.is_some()),
                ("statuses", self.statuses.is_some()),
                ("inheritance", self.inheritance.is_some()),
                ("family_ids", self.family_ids.is_some()),
                ("person_ids", self.person_ids.is_some()),
            ];
            if let Some((filter, _)) = family_only.iter().find(|(_, present)| *present) {
                return Err(QueryCompileError::UnsupportedFilter(*filter));
            }
        }
        let sets = [
            ("region", self.regions.as_ref().map(|x| x.is_empty())),
            ("gene", self.genes.as_ref().map(|x| x.is_empty())),
            ("effect type", self.effect_types.as_ref().map(|x| x.is_empty())),
            ("family id", self.family_ids.as_ref().map(|x| x.is_empty())),
            ("person id", self.person_ids.as_ref().map(|x| x.is_empty())),
        ];
        if let Some((name, _)) = sets.iter().find(|(_, empty)| *empty == Some(true)) {
            return Err(QueryCompileError::EmptySet(*name));
        }
        if let Some(regions) = self.regions.as_ref() {
            if let Some(region) = regions.iter().find(|x| matches!((x.start, x.end), (Some(start), Some(end)) if start > end)) {
                return Err(QueryCompileError::InvalidRegion(region.to_string()));
            }
        }
        let ranges = self.real_attr_filters.iter().map(|(name, min, max)| (name.clone(), *min, *max));
        let ranges = ranges.chain(self.frequency_range.iter().map(|(min, max)| (String::from("frequency"), *min, *max)));
        for (name, min, max) in ranges {
            let invalid = match (min, max) {
                (Some(min), Some(max)) => min > max || min.is_nan() || max.is_nan(),
                (Some(bound), None) | (None, Some(bound)) => bound.is_nan(),
                (None, None) => false,
            };
            if invalid {
                let bound = |x: Option<f64>| x.map_or(String::new(), |x| x.to_string());
                return Err(QueryCompileError::InvalidRange { name, range: format!("{}..{}", bound(min), bound(max)) });
            }
        }
        for (name, _, _) in self.real_attr_filters.iter() {
            if !self.context.schema.real_attributes.contains(name) {
                return Err(QueryCompileError::UnknownAttribute(name.clone()));
            }
        }
        Ok(())
    }

    fn region_clauses(&self, clauses: &mut Clauses) -> Option<BTreeSet<String>> {
        let regions = self.regions.as_ref()?;
        let chromosome = self.col(SUMMARY_ALIAS, "chromosome");
        let position = self.col(SUMMARY_ALIAS, "position");
        let mut alternatives = Vec::with_capacity(regions.len());
        for region in regions {
            let mut parts = vec![format!("{} = ?", chromosome)];
            clauses.params.push(Literal::Text(region.chromosome.clone()));
            if let Some(start) = region.start {
                parts.push(format!("{} >= ?", position));
                clauses.params.push(Literal::Integer(position_literal(start)));
            }
            if let Some(end) = region.end {
                parts.push(format!("{} <= ?", position));
                clauses.params.push(Literal::Integer(position_literal(end)));
            }
            alternatives.push(format!("({})", parts.join(" AND ")));
        }
        clauses.push(format!("({})", alternatives.join(" OR ")));

        let bins = partition::prune(&self.context.config, regions)?;
        if self.pruning {
            for alias in self.bin_aliases() {
                clauses.push_inline_text_set(&self.col(alias, "region_bin"), bins.iter());
            }
        }
        Some(bins)
    }

    fn effect_clauses(&self, clauses: &mut Clauses) -> Result<(), QueryCompileError> {
        let effect_types = match self.effect_types.as_ref() {
            Some(effect_types) => Some(effects::expand_effect_types(effect_types)?),
            None => None,
        };
        if self.genes.is_none() && effect_types.is_none() {
            return Ok(());
        }

        let dialect = self.dialect();
        let mut inner = Clauses::default();
        if let Some(genes) = self.genes.as_ref() {
            inner.push_text_set(&dialect.struct_field(EFFECT_ALIAS, EFFECT_GENE_SYMBOL), genes);
        }
        if let Some(effect_types) = effect_types.as_ref() {
            let effect_types: Vec<&String> = effect_types.iter().collect();
            inner.push_text_set(&dialect.struct_field(EFFECT_ALIAS, EFFECT_GENE_TYPE), &effect_types);
        }
        let table = dialect.unnest_table(&self.col(SUMMARY_ALIAS, "effect_gene"), EFFECT_ALIAS);
        clauses.push(format!("EXISTS (SELECT 1 FROM {} WHERE {})", table, inner.predicates.join(" AND ")));
        clauses.params.extend(inner.params);

        if let Some(effect_types) = effect_types {
            if self.pruning && effect_types.iter().all(|x| self.context.config.is_coding(x)) {
                for alias in self.bin_aliases() {
                    clauses.push(format!("{} = 1", self.col(alias, "coding_bin")));
                }
            }
        }
        Ok(())
    }

    fn bitmask_clauses(&self, clauses: &mut Clauses) -> Result<(), QueryCompileError> {
        let dialect = self.dialect();
        if let Some(text) = self.roles.as_ref() {
            clauses.push(lower_bitmask::<Role>(dialect, self.col(FAMILY_ALIAS, "allele_in_roles"), "roles", text)?);
        }
        if let Some(text) = self.sexes.as_ref() {
            clauses.push(lower_bitmask::<Sex>(dialect, self.col(FAMILY_ALIAS, "allele_in_sexes"), "sexes", text)?);
        }
        if let Some(text) = self.statuses.as_ref() {
            clauses.push(lower_bitmask::<Status>(dialect, self.col(FAMILY_ALIAS, "allele_in_statuses"), "statuses", text)?);
        }
        if let Some(text) = self.inheritance.as_ref() {
            let column = self.col(FAMILY_ALIAS, "inheritance_in_members");
            clauses.push(lower_bitmask::<Inheritance>(dialect, column, "inheritance", text)?);
        }
        if let Some(text) = self.variant_type.as_ref() {
            clauses.push(lower_bitmask::<VariantType>(dialect, self.col(SUMMARY_ALIAS, "variant_type"), "variant_type", text)?);
        }
        Ok(())
    }

    // Adds a frequency bin plan with the exact residual predicate.
    fn frequency_plan_clause(&self, clauses: &mut Clauses, plan: &FrequencyPlan, residual: String, residual_params: Vec<Literal>) {
        if !self.pruning {
            clauses.push(residual);
            clauses.params.extend(residual_params);
            return;
        }
        let bin = self.col(self.allele_alias(), "frequency_bin");
        let set = |bins: &BTreeSet<u8>| bins.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", ");
        match (plan.exact.is_empty(), plan.residual.is_empty()) {
            (true, true) => clauses.push(String::from("1 = 0")),
            (false, true) => clauses.push(format!("{} IN ({})", bin, set(&plan.exact))),
            (true, false) => {
                clauses.push(format!("({} IN ({}) AND {})", bin, set(&plan.residual), residual));
                clauses.params.extend(residual_params);
            },
            (false, false) => {
                clauses.push(format!(
                    "({} IN ({}) OR ({} IN ({}) AND {}))",
                    bin, set(&plan.exact), bin, set(&plan.residual), residual
                ));
                clauses.params.extend(residual_params);
            },
        }
    }

    fn frequency_clauses(&self, clauses: &mut Clauses) {
        if let Some((min, max)) = self.frequency_range {
            let plan = FrequencyPlan::for_range(min, max, self.context.config.rare_boundary_pct);
            let value = format!("COALESCE({}, 0.0)", self.col(SUMMARY_ALIAS, "af_allele_freq"));
            let mut parts = Vec::new();
            let mut params = Vec::new();
            if let Some(min) = min {
                parts.push(format!("{} >= ?", value));
                params.push(Literal::Real(min));
            }
            if let Some(max) = max {
                parts.push(format!("{} <= ?", value));
                params.push(Literal::Real(max));
            }
            if parts.is_empty() {
                parts.push(String::from("1 = 1"));
            }
            self.frequency_plan_clause(clauses, &plan, format!("({})", parts.join(" AND ")), params);
        }
        if self.ultra_rare {
            let residual = format!("COALESCE({}, 0) <= 1", self.col(SUMMARY_ALIAS, "af_allele_count"));
            self.frequency_plan_clause(clauses, &FrequencyPlan::ultra_rare(), residual, Vec::new());
        }
    }

    fn attribute_clauses(&self, clauses: &mut Clauses) {
        for (name, min, max) in self.real_attr_filters.iter() {
            let column = self.col(SUMMARY_ALIAS, name);
            clauses.push(format!("{} IS NOT NULL", column));
            if let Some(min) = min {
                clauses.push(format!("{} >= ?", column));
                clauses.params.push(Literal::Real(*min));
            }
            if let Some(max) = max {
                clauses.push(format!("{} <= ?", column));
                clauses.params.push(Literal::Real(*max));
            }
        }
    }

    fn family_clauses(&self, clauses: &mut Clauses) {
        if let Some(family_ids) = self.family_ids.as_ref() {
            if self.pruning {
                let size = self.context.config.family_bin_size;
                let bins: BTreeSet<u64> = family_ids.iter().map(|x| partition::family_bin(x, size)).collect();
                clauses.push_int_set(&self.col(FAMILY_ALIAS, "family_bin"), bins);
            }
            clauses.push_text_set(&self.col(FAMILY_ALIAS, "family_id"), family_ids);
        }
        if let Some(person_ids) = self.person_ids.as_ref() {
            clauses.push_text_set(&self.col(PEDIGREE_ALIAS, "person_id"), person_ids);
        }
    }

    fn default_clauses(&self, clauses: &mut Clauses) {
        if !self.return_reference {
            clauses.push(format!("{} > 0", self.col(self.allele_alias(), "allele_index")));
        }
        if self.kind == QueryKind::Family && !self.return_unknown {
            let column = self.col(FAMILY_ALIAS, "inheritance_in_members");
            clauses.push(format!("NOT ({})", self.dialect().bit_test(&column, Inheritance::Unknown.bit())));
        }
    }

    fn column_plan(&self) -> Vec<ColumnPlan> {
        let alias = self.allele_alias();
        let mut columns = vec![
            ColumnPlan { name: self.col(alias, "bucket_index"), decoder: decode_bucket_index },
            ColumnPlan { name: self.col(alias, "summary_index"), decoder: decode_summary_index },
            ColumnPlan { name: self.col(alias, "allele_index"), decoder: decode_allele_index },
        ];
        if self.kind == QueryKind::Family {
            columns.push(ColumnPlan { name: self.col(FAMILY_ALIAS, "family_id"), decoder: decode_family_id });
        }
        columns.push(ColumnPlan { name: self.col(SUMMARY_ALIAS, "summary_variant_data"), decoder: decode_summary_blob });
        if self.kind == QueryKind::Family {
            columns.push(ColumnPlan { name: self.col(FAMILY_ALIAS, "family_variant_data"), decoder: decode_family_blob });
        }
        columns
    }

    fn from_clause(&self) -> String {
        let dialect = self.dialect();
        let schema = &self.context.schema;
        let summary_table = format!("{} AS {}", dialect.quote(&schema.summary_table), SUMMARY_ALIAS);
        if self.kind == QueryKind::Summary {
            return format!("FROM {}", summary_table);
        }

        let same = |column: &str| format!("{} = {}", self.col(FAMILY_ALIAS, column), self.col(SUMMARY_ALIAS, column));
        let mut result = format!(
            "FROM {} AS {} JOIN {} ON ({} AND {} AND {})",
            dialect.quote(&schema.family_table), FAMILY_ALIAS, summary_table,
            same("bucket_index"), same("summary_index"), same("allele_index")
        );
        if self.person_ids.is_some() {
            result.push_str(&format!(
                " {} JOIN {} AS {} ON ({} = {} AND {} = {})",
                dialect.unnest_join(&self.col(FAMILY_ALIAS, "allele_in_members"), MEMBER_ALIAS),
                dialect.quote(&schema.pedigree_table), PEDIGREE_ALIAS,
                self.col(PEDIGREE_ALIAS, "family_id"), self.col(FAMILY_ALIAS, "family_id"),
                self.col(PEDIGREE_ALIAS, "person_id"), dialect.array_element(MEMBER_ALIAS)
            ));
        }
        result
    }

    /// Compiles the query.
    ///
    /// Calling this repeatedly returns the same query.
    ///
    /// # Errors
    ///
    /// Fails on unknown effect types, attributes, or filter names, unparsable filters, empty sets, invalid ranges, and filters that do not apply to summary queries.
    pub fn build(&self) -> Result<CompiledQuery, QueryCompileError> {
        self.validate()?;

        let mut clauses = Clauses::default();
        let partitions = self.region_clauses(&mut clauses);
        self.effect_clauses(&mut clauses)?;
        self.bitmask_clauses(&mut clauses)?;
        self.attribute_clauses(&mut clauses);
        self.frequency_clauses(&mut clauses);
        self.family_clauses(&mut clauses);
        self.default_clauses(&mut clauses);

        let columns = self.column_plan();
        let select: Vec<&str> = columns.iter().map(|x| x.name.as_str()).collect();
        let mut sql = format!("SELECT {} {}", select.join(", "), self.from_clause());
        if !clauses.predicates.is_empty() {
            sql.push_str(&format!(" WHERE {}", clauses.predicates.join(" AND ")));
        }
        if self.person_ids.is_some() {
            sql.push_str(&format!(" GROUP BY {}", select.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push(' ');
            sql.push_str(&self.dialect().limit(limit));
        }

        Ok(CompiledQuery {
            kind: self.kind,
            sql,
            params: clauses.params,
            columns,
            partitions,
            limit: self.limit,
        })
    }
}

//-----------------------------------------------------------------------------
