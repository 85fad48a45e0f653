//! Variant store: an SQLite database with partitioned summary and family allele tables.
//!
//! The store has four tables:
//!
//! * `Tags`: key-value pairs with the version, the partition configuration, and the schema.
//! * `pedigree`: one row per family member.
//! * `summary_alleles`: one row per allele of each summary variant, including the reference allele.
//! * `family_alleles`: one row per family and allele for the reference allele and the alleles present in the family.
//!
//! Partition bins are materialized as indexed columns in the allele tables.
//! Both allele tables also store the variant objects as blobs; see [`crate::serialize`].

use crate::dialect::{Dialect, SqliteDialect};
use crate::error::{DecodeError, StoreError};
use crate::family_variant::{FamilyAllele, FamilyVariant, Inheritance};
use crate::filter::BitFlag;
use crate::partition::{PartitionConfig, PartitionDescriptor};
use crate::pedigree::{Family, FamilyLookup, FamilyRegistry, Person, Role, Sex, Status};
use crate::query::QueryContext;
use crate::variant::{Attributes, EffectGene, SummaryAllele, SummaryVariant, SummaryVariantFactory};
use crate::{codec, serialize, utils};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Statement};

use serde::{Deserialize, Serialize};

use tracing::{debug, info};


//-----------------------------------------------------------------------------

/// Table names and materialized attribute columns of a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSchema {
    pub summary_table: String,
    pub family_table: String,
    pub pedigree_table: String,
    /// Real-valued summary attributes stored as columns, such as genomic scores.
    pub real_attributes: Vec<String>,
}

impl Default for StoreSchema {
    fn default() -> Self {
        StoreSchema {
            summary_table: String::from("summary_alleles"),
            family_table: String::from("family_alleles"),
            pedigree_table: String::from("pedigree"),
            real_attributes: Vec::new(),
        }
    }
}

impl StoreSchema {
    // Fixed columns of the summary allele table.
    const SUMMARY_COLUMNS: [&'static str; 18] = [
        "bucket_index", "summary_index", "allele_index",
        "chromosome", "position", "end_position",
        "effect_gene", "variant_type", "transmission_type",
        "reference", "alternative",
        "af_allele_count", "af_allele_freq", "af_parents_called", "af_parents_freq",
        "region_bin", "coding_bin", "frequency_bin",
    ];

    fn is_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
            _ => false,
        }
    }

    /// Checks that the names are valid identifiers and that attribute columns do not shadow fixed columns.
    pub fn validate(&self) -> Result<(), String> {
        for name in [&self.summary_table, &self.family_table, &self.pedigree_table].into_iter().chain(self.real_attributes.iter()) {
            if !Self::is_identifier(name) {
                return Err(format!("Invalid identifier: {}", name));
            }
        }
        let tables: HashSet<&str> = [self.summary_table.as_str(), self.family_table.as_str(), self.pedigree_table.as_str()].into();
        if tables.len() != 3 {
            return Err(String::from("Table names must be distinct"));
        }
        let mut seen = HashSet::new();
        for name in self.real_attributes.iter() {
            if Self::SUMMARY_COLUMNS.contains(&name.as_str()) || name == "summary_variant_data" {
                return Err(format!("Attribute {} shadows a fixed column", name));
            }
            if !seen.insert(name) {
                return Err(format!("Duplicate attribute {}", name));
            }
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// Variants imported in a single transaction.
#[derive(Clone, Debug, Default)]
pub struct ImportBatch {
    pub summary_variants: Vec<Arc<SummaryVariant>>,
    pub family_variants: Vec<FamilyVariant>,
}

impl ImportBatch {
    pub fn is_empty(&self) -> bool {
        self.summary_variants.is_empty() && self.family_variants.is_empty()
    }
}

// An element of the `effect_gene` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct EffectGeneColumn {
    #[serde(rename = "effect_gene_symbols")]
    symbol: String,
    #[serde(rename = "effect_types")]
    effect_type: String,
}

//-----------------------------------------------------------------------------

/// A connection to a variant store.
///
/// The store is opened for reading and importing.
/// Queries are executed through their own connections; see [`crate::runner`].
///
/// # Examples
///
/// ```
/// use famvar_base::db::{StoreSchema, VariantStore};
/// use famvar_base::partition::PartitionConfig;
///
/// let dir = tempfile::tempdir().unwrap();
/// let filename = dir.path().join("variants.db");
/// let result = VariantStore::create(&filename, &PartitionConfig::default(), &StoreSchema::default());
/// assert!(result.is_ok());
///
/// let store = VariantStore::open(&filename).unwrap();
/// assert_eq!(store.version(), VariantStore::VERSION);
/// assert_eq!(store.summary_count().unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct VariantStore {
    connection: Connection,
    version: String,
    descriptor: PartitionDescriptor,
    schema: StoreSchema,
}

/// Using the store.
impl VariantStore {
    // Key for store version.
    const KEY_VERSION: &'static str = "version";

    /// Current store version.
    pub const VERSION: &'static str = "famvar-base v0.1.0";

    // Key for the partition configuration.
    const KEY_CONFIG: &'static str = "partition_config";

    // Key for the schema.
    const KEY_SCHEMA: &'static str = "schema";

    /// Returns `true` if the store exists.
    pub fn exists<P: AsRef<Path>>(filename: P) -> bool {
        utils::file_exists(filename)
    }

    /// Opens a connection to the store in the given file.
    ///
    /// Reads the header information and passes through any database errors.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(filename, flags)?;

        let mut get_tag = connection.prepare("SELECT value FROM Tags WHERE key = ?1")?;
        let version = get_string_value(&mut get_tag, Self::KEY_VERSION)?;
        if version != Self::VERSION {
            return Err(StoreError::Version { found: version, expected: Self::VERSION.to_string() });
        }
        let config: PartitionConfig = serde_json::from_str(&get_string_value(&mut get_tag, Self::KEY_CONFIG)?)
            .map_err(|x| StoreError::Config(x.to_string()))?;
        config.validate().map_err(StoreError::Config)?;
        let schema: StoreSchema = serde_json::from_str(&get_string_value(&mut get_tag, Self::KEY_SCHEMA)?)
            .map_err(|x| StoreError::Config(x.to_string()))?;
        schema.validate().map_err(StoreError::Config)?;
        drop(get_tag);

        Ok(VariantStore {
            connection,
            version,
            descriptor: PartitionDescriptor::new(config),
            schema,
        })
    }

    /// Returns the filename of the store or `None` if there is no filename.
    pub fn filename(&self) -> Option<&str> {
        self.connection.path()
    }

    /// Returns the size of the store file in a human-readable format.
    pub fn file_size(&self) -> Option<String> {
        let filename = self.filename()?;
        utils::file_size(filename)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the partition configuration used by the writer.
    pub fn config(&self) -> &PartitionConfig {
        self.descriptor.config()
    }

    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    /// Returns a query context for the store with the given dialect.
    pub fn context(&self, dialect: Arc<dyn Dialect>) -> QueryContext {
        QueryContext::new(self.config().clone(), self.schema.clone(), dialect)
    }

    /// Returns a query context for querying this store directly.
    pub fn sqlite_context(&self) -> QueryContext {
        self.context(Arc::new(SqliteDialect))
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let count: i64 = self.connection.query_row(sql, (), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns the number of summary variants.
    pub fn summary_count(&self) -> Result<usize, StoreError> {
        let table = SqliteDialect.quote(&self.schema.summary_table);
        self.count(&format!("SELECT COUNT(*) FROM {} WHERE allele_index = 0", table))
    }

    /// Returns the number of family variants.
    pub fn family_variant_count(&self) -> Result<usize, StoreError> {
        let table = SqliteDialect.quote(&self.schema.family_table);
        self.count(&format!("SELECT COUNT(*) FROM {} WHERE allele_index = 0", table))
    }

    /// Returns the number of rows in the family allele table.
    pub fn family_allele_count(&self) -> Result<usize, StoreError> {
        let table = SqliteDialect.quote(&self.schema.family_table);
        self.count(&format!("SELECT COUNT(*) FROM {}", table))
    }

    /// Loads all families from the pedigree table.
    pub fn load_families(&self) -> Result<FamilyRegistry, StoreError> {
        let sql = format!(
            "SELECT family_id, person_id, mom_id, dad_id, sex, status, role FROM {} ORDER BY family_index, member_index",
            SqliteDialect.quote(&self.schema.pedigree_table)
        );
        let mut statement = self.connection.prepare(&sql)?;
        let mut rows = statement.query(())?;
        let mut families: Vec<(String, Vec<Person>)> = Vec::new();
        while let Some(row) = rows.next()? {
            let family_id: String = row.get(0)?;
            let bits: (i64, i64, i64) = (row.get(4)?, row.get(5)?, row.get(6)?);
            let invalid = |field: &str, bit: i64| StoreError::Database(format!("Invalid {} {} in family {}", field, bit, family_id));
            let person = Person {
                person_id: row.get(1)?,
                family_id: family_id.clone(),
                mom_id: row.get(2)?,
                dad_id: row.get(3)?,
                sex: Sex::from_bit(bits.0 as u64).ok_or(invalid("sex", bits.0))?,
                status: Status::from_bit(bits.1 as u64).ok_or(invalid("status", bits.1))?,
                role: Role::from_bit(bits.2 as u64).ok_or(invalid("role", bits.2))?,
            };
            match families.last_mut() {
                Some((id, members)) if *id == family_id => members.push(person),
                _ => families.push((family_id, vec![person])),
            }
        }

        let mut registry = FamilyRegistry::new();
        for (family_id, members) in families {
            let family = Family::new(&family_id, members).map_err(StoreError::Database)?;
            registry.insert(family);
        }
        debug!("Loaded {} families", registry.len());
        Ok(registry)
    }
}

//-----------------------------------------------------------------------------

/// Creating the store and importing data.
impl VariantStore {
    /// Creates a new empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store already exists or if the configuration or the schema is invalid.
    /// Passes through any database errors.
    pub fn create<P: AsRef<Path>>(filename: P, config: &PartitionConfig, schema: &StoreSchema) -> Result<(), StoreError> {
        info!("Creating store {}", filename.as_ref().display());
        if utils::file_exists(&filename) {
            return Err(StoreError::Exists(filename.as_ref().display().to_string()));
        }
        config.validate().map_err(StoreError::Config)?;
        schema.validate().map_err(StoreError::Config)?;

        let mut connection = Connection::open(filename)?;
        Self::insert_tags(config, schema, &mut connection)?;
        Self::create_tables(schema, &mut connection)?;
        Ok(())
    }

    fn insert_tags(config: &PartitionConfig, schema: &StoreSchema, connection: &mut Connection) -> Result<(), StoreError> {
        connection.execute(
            "CREATE TABLE Tags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) STRICT",
            (),
        )?;

        let config = serde_json::to_string(config).map_err(|x| StoreError::Config(x.to_string()))?;
        let schema = serde_json::to_string(schema).map_err(|x| StoreError::Config(x.to_string()))?;
        let transaction = connection.transaction()?;
        {
            let mut insert = transaction.prepare("INSERT INTO Tags(key, value) VALUES (?1, ?2)")?;
            insert.execute((Self::KEY_VERSION, Self::VERSION))?;
            insert.execute((Self::KEY_CONFIG, config))?;
            insert.execute((Self::KEY_SCHEMA, schema))?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn create_tables(schema: &StoreSchema, connection: &mut Connection) -> Result<(), StoreError> {
        let pedigree = SqliteDialect.quote(&schema.pedigree_table);
        let summary = SqliteDialect.quote(&schema.summary_table);
        let family = SqliteDialect.quote(&schema.family_table);
        let attributes: String = schema.real_attributes.iter()
            .map(|x| format!("{} REAL,\n", SqliteDialect.quote(x)))
            .collect();

        let transaction = connection.transaction()?;
        transaction.execute(&format!(
            "CREATE TABLE {} (
                family_id TEXT NOT NULL,
                person_id TEXT NOT NULL,
                family_index INTEGER NOT NULL,
                member_index INTEGER NOT NULL,
                mom_id TEXT,
                dad_id TEXT,
                sex INTEGER NOT NULL,
                status INTEGER NOT NULL,
                role INTEGER NOT NULL,
                PRIMARY KEY (family_id, person_id)
            ) STRICT",
            pedigree
        ), ())?;
        transaction.execute(&format!(
            "CREATE TABLE {} (
                bucket_index INTEGER NOT NULL,
                summary_index INTEGER NOT NULL,
                allele_index INTEGER NOT NULL,
                chromosome TEXT NOT NULL,
                position INTEGER NOT NULL,
                end_position INTEGER NOT NULL,
                effect_gene TEXT NOT NULL,
                variant_type INTEGER NOT NULL,
                transmission_type INTEGER NOT NULL,
                reference TEXT NOT NULL,
                alternative TEXT,
                af_allele_count INTEGER,
                af_allele_freq REAL,
                af_parents_called INTEGER,
                af_parents_freq REAL,
                {}summary_variant_data BLOB NOT NULL,
                region_bin TEXT NOT NULL,
                coding_bin INTEGER NOT NULL,
                frequency_bin INTEGER NOT NULL,
                PRIMARY KEY (bucket_index, summary_index, allele_index)
            ) STRICT",
            summary, attributes
        ), ())?;
        transaction.execute(&format!(
            "CREATE TABLE {} (
                bucket_index INTEGER NOT NULL,
                summary_index INTEGER NOT NULL,
                allele_index INTEGER NOT NULL,
                family_index INTEGER NOT NULL,
                family_id TEXT NOT NULL,
                is_denovo INTEGER NOT NULL,
                allele_in_sexes INTEGER NOT NULL,
                allele_in_statuses INTEGER NOT NULL,
                allele_in_roles INTEGER NOT NULL,
                inheritance_in_members INTEGER NOT NULL,
                allele_in_members TEXT NOT NULL,
                family_variant_data BLOB NOT NULL,
                region_bin TEXT NOT NULL,
                coding_bin INTEGER NOT NULL,
                frequency_bin INTEGER NOT NULL,
                family_bin INTEGER NOT NULL,
                PRIMARY KEY (bucket_index, summary_index, family_id, allele_index)
            ) STRICT",
            family
        ), ())?;

        // Partition bins and the locus.
        let indexes = [
            format!("CREATE INDEX summary_bins ON {}(region_bin, coding_bin, frequency_bin)", summary),
            format!("CREATE INDEX summary_locus ON {}(chromosome, position)", summary),
            format!("CREATE INDEX family_bins ON {}(region_bin, coding_bin, frequency_bin, family_bin)", family),
            format!("CREATE INDEX family_ids ON {}(family_id)", family),
        ];
        for index in indexes.iter() {
            transaction.execute(index, ())?;
        }
        transaction.commit()?;
        Ok(())
    }

    /// Inserts the families into the pedigree table.
    ///
    /// Returns the number of inserted members.
    /// Fails if a family already exists.
    pub fn insert_families(&mut self, families: &[Arc<Family>]) -> Result<usize, StoreError> {
        let pedigree = SqliteDialect.quote(&self.schema.pedigree_table);
        let transaction = self.connection.transaction()?;
        let first_index: i64 = transaction.query_row(
            &format!("SELECT COALESCE(MAX(family_index) + 1, 0) FROM {}", pedigree), (), |row| row.get(0)
        )?;
        let mut inserted = 0;
        {
            let mut insert = transaction.prepare(&format!(
                "INSERT INTO {}(family_id, person_id, family_index, member_index, mom_id, dad_id, sex, status, role)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                pedigree
            ))?;
            for (family_index, family) in families.iter().enumerate() {
                for (member_index, person) in family.members().iter().enumerate() {
                    insert.execute((
                        family.family_id(), &person.person_id,
                        first_index + family_index as i64, member_index as i64,
                        &person.mom_id, &person.dad_id,
                        person.sex.bit() as i64, person.status.bit() as i64, person.role.bit() as i64,
                    ))?;
                    inserted += 1;
                }
            }
        }
        transaction.commit()?;

        info!("Inserted {} families with {} members", families.len(), inserted);
        Ok(inserted)
    }

    // Returns the family indexes of the families in the pedigree table.
    fn family_indexes(connection: &Connection, pedigree: &str) -> Result<HashMap<String, i64>, StoreError> {
        let mut statement = connection.prepare(&format!("SELECT DISTINCT family_id, family_index FROM {}", pedigree))?;
        let rows = statement.query_map((), |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut result = HashMap::new();
        for row in rows {
            let (family_id, family_index) = row?;
            result.insert(family_id, family_index);
        }
        Ok(result)
    }

    fn effect_gene_json(allele: &SummaryAllele) -> Result<String, StoreError> {
        let effects: Vec<EffectGeneColumn> = allele.effect_genes().iter()
            .map(|x| EffectGeneColumn { symbol: x.symbol.clone(), effect_type: x.effect_type.clone() })
            .collect();
        serde_json::to_string(&effects).map_err(|x| StoreError::Encode(x.to_string()))
    }

    fn summary_row(&self, allele: &SummaryAllele, blob: &[u8], seen_as_denovo: bool) -> Result<Vec<Value>, StoreError> {
        let bins = self.descriptor.summary_allele_bins(allele, seen_as_denovo);
        let optional_int = |x: Option<u64>| x.map(|x| Value::Integer(x as i64)).unwrap_or(Value::Null);
        let optional_real = |x: Option<f64>| x.map(Value::Real).unwrap_or(Value::Null);
        let mut row = vec![
            Value::Integer(allele.bucket_index() as i64),
            Value::Integer(allele.summary_index() as i64),
            Value::Integer(allele.allele_index() as i64),
            Value::Text(allele.chromosome().to_string()),
            Value::Integer(allele.position() as i64),
            Value::Integer(allele.end_position() as i64),
            Value::Text(Self::effect_gene_json(allele)?),
            Value::Integer(allele.variant_type_mask() as i64),
            Value::Integer(allele.transmission_type().code()),
            Value::Text(allele.reference().to_string()),
            allele.alternative().map(|x| Value::Text(x.to_string())).unwrap_or(Value::Null),
            optional_int(allele.af_allele_count()),
            optional_real(allele.af_allele_freq()),
            optional_int(allele.af_parents_called()),
            optional_real(allele.af_parents_freq()),
        ];
        for name in self.schema.real_attributes.iter() {
            row.push(optional_real(allele.real_attribute(name)));
        }
        row.push(Value::Blob(blob.to_vec()));
        row.push(Value::Text(bins.region_bin));
        row.push(Value::Integer(bins.coding_bin as i64));
        row.push(Value::Integer(bins.frequency_bin as i64));
        Ok(row)
    }

    // Returns `true` if the family allele has its own row.
    fn stored_family_allele(allele: &FamilyAllele) -> bool {
        allele.allele_index() == 0
            || !allele.carriers().is_empty()
            || allele.inheritance_in_members() & !Inheritance::Reference.bit() != 0
    }

    fn family_row(&self, allele: &FamilyAllele, family_index: i64, blob: &[u8]) -> Result<Vec<Value>, StoreError> {
        let bins = self.descriptor.family_allele_bins(allele);
        let summary = allele.summary_allele();
        let members = serde_json::to_string(&allele.allele_in_members()).map_err(|x| StoreError::Encode(x.to_string()))?;
        Ok(vec![
            Value::Integer(summary.bucket_index() as i64),
            Value::Integer(summary.summary_index() as i64),
            Value::Integer(allele.allele_index() as i64),
            Value::Integer(family_index),
            Value::Text(allele.variant().family_id().to_string()),
            Value::Integer(allele.is_denovo() as i64),
            Value::Integer(allele.allele_in_sexes() as i64),
            Value::Integer(allele.allele_in_statuses() as i64),
            Value::Integer(allele.allele_in_roles() as i64),
            Value::Integer(allele.inheritance_in_members() as i64),
            Value::Text(members),
            Value::Blob(blob.to_vec()),
            Value::Text(bins.region_bin),
            Value::Integer(bins.coding_bin as i64),
            Value::Integer(bins.frequency_bin as i64),
            bins.family_bin.map(|x| Value::Integer(x as i64)).unwrap_or(Value::Null),
        ])
    }

    fn insert_statement(table: &str, columns: &[&str]) -> String {
        let placeholders: Vec<String> = (1..=columns.len()).map(|x| format!("?{}", x)).collect();
        format!("INSERT INTO {}({}) VALUES ({})", SqliteDialect.quote(table), columns.join(", "), placeholders.join(", "))
    }

    /// Imports a batch of variants in a single transaction.
    ///
    /// Summary alleles get the de novo frequency bin if any family allele in the batch is de novo.
    /// Every family must already be in the pedigree table.
    /// Returns the number of inserted summary and family allele rows.
    pub fn import(&mut self, batch: &ImportBatch) -> Result<(usize, usize), StoreError> {
        let seen_as_denovo: HashSet<(u32, u64, usize)> = batch.family_variants.iter()
            .flat_map(|variant| variant.family_alt_alleles().filter(|x| x.is_denovo()).map(|x| {
                let summary = x.summary_allele();
                (summary.bucket_index(), summary.summary_index(), summary.allele_index())
            }).collect::<Vec<_>>())
            .collect();

        let mut summary_columns: Vec<&str> = StoreSchema::SUMMARY_COLUMNS[..15].to_vec();
        summary_columns.extend(self.schema.real_attributes.iter().map(|x| x.as_str()));
        summary_columns.extend(["summary_variant_data", "region_bin", "coding_bin", "frequency_bin"]);
        let summary_sql = Self::insert_statement(&self.schema.summary_table, &summary_columns);
        let family_sql = Self::insert_statement(&self.schema.family_table, &[
            "bucket_index", "summary_index", "allele_index", "family_index", "family_id", "is_denovo",
            "allele_in_sexes", "allele_in_statuses", "allele_in_roles", "inheritance_in_members", "allele_in_members",
            "family_variant_data", "region_bin", "coding_bin", "frequency_bin", "family_bin",
        ]);

        // Encode everything before opening the transaction.
        let mut summary_rows = Vec::new();
        for variant in batch.summary_variants.iter() {
            let blob = serialize::serialize_summary_variant(variant).map_err(StoreError::Encode)?;
            for allele in variant.alleles() {
                let key = (allele.bucket_index(), allele.summary_index(), allele.allele_index());
                summary_rows.push(self.summary_row(allele, &blob, seen_as_denovo.contains(&key))?);
            }
        }

        let pedigree = SqliteDialect.quote(&self.schema.pedigree_table);
        let family_indexes = Self::family_indexes(&self.connection, &pedigree)?;
        let mut family_rows = Vec::new();
        for variant in batch.family_variants.iter() {
            let family_index = *family_indexes.get(variant.family_id())
                .ok_or(StoreError::Decode(DecodeError::UnknownFamily(variant.family_id().to_string())))?;
            let blob = serialize::serialize_family_variant(variant).map_err(StoreError::Encode)?;
            for allele in variant.alleles().filter(Self::stored_family_allele) {
                family_rows.push(self.family_row(&allele, family_index, &blob)?);
            }
        }

        let transaction = self.connection.transaction()?;
        {
            let mut insert = transaction.prepare(&summary_sql)?;
            for row in summary_rows.iter() {
                insert.execute(rusqlite::params_from_iter(row.iter()))?;
            }
            let mut insert = transaction.prepare(&family_sql)?;
            for row in family_rows.iter() {
                insert.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        transaction.commit()?;

        info!(
            "Imported {} summary variants ({} alleles) and {} family variants ({} alleles)",
            batch.summary_variants.len(), summary_rows.len(), batch.family_variants.len(), family_rows.len()
        );
        Ok((summary_rows.len(), family_rows.len()))
    }
}

//-----------------------------------------------------------------------------

// Fixed columns of a variant table.
const COLUMN_BUCKET: &str = "bucket";
const COLUMN_SUMMARY_INDEX: &str = "summary_index";
const COLUMN_CHROMOSOME: &str = "chrom";
const COLUMN_POSITION: &str = "pos";
const COLUMN_REFERENCE: &str = "ref";
const COLUMN_ALTERNATIVE: &str = "alt";
const COLUMN_FAMILY_ID: &str = "family_id";
const COLUMN_GENOTYPE: &str = "genotype";
const COLUMN_EFFECTS: &str = "effects";

const REQUIRED_COLUMNS: [&str; 8] = [
    COLUMN_BUCKET, COLUMN_SUMMARY_INDEX, COLUMN_CHROMOSOME, COLUMN_POSITION,
    COLUMN_REFERENCE, COLUMN_ALTERNATIVE, COLUMN_FAMILY_ID, COLUMN_GENOTYPE,
];

// Parses a per-allele attribute value.
fn attribute_value(text: &str) -> Option<serde_json::Value> {
    if text.is_empty() || text == "." {
        return None;
    }
    if let Ok(value) = text.parse::<i64>() {
        return Some(serde_json::Value::from(value));
    }
    if let Ok(value) = text.parse::<f64>() {
        return serde_json::Number::from_f64(value).map(serde_json::Value::Number);
    }
    Some(serde_json::Value::from(text))
}

// Parses `gene:effect;gene:effect` for one allele.
fn parse_effects(text: &str) -> Result<Vec<EffectGene>, String> {
    let mut result = Vec::new();
    for effect in text.split(';').filter(|x| !x.is_empty() && *x != ".") {
        let (gene, effect_type) = effect.split_once(':').ok_or(format!("Invalid effect: {}", effect))?;
        result.push(EffectGene::new(gene, effect_type));
    }
    Ok(result)
}

/// Reads a tab-separated variant table with one line per family variant.
///
/// The header names the columns.
/// Required columns are `bucket`, `summary_index`, `chrom`, `pos`, `ref`, `alt` (comma-separated), `family_id`, and `genotype` in the matrix text encoding.
/// Optional column `effects` lists `gene:effect;...` for each alternative allele, separated by `|`.
/// Any other column is a summary attribute with comma-separated values for the alternative alleles; `.` is a missing value.
///
/// Lines of the same summary variant share the summary variant, and the first line defines it.
pub fn read_variant_table<R: BufRead>(reader: R, families: &dyn FamilyLookup) -> Result<ImportBatch, String> {
    let mut lines = reader.lines().enumerate();
    let header = match lines.next() {
        Some((_, line)) => line.map_err(|x| x.to_string())?,
        None => return Ok(ImportBatch::default()),
    };
    let header: Vec<String> = header.trim_start_matches('#').split('\t').map(|x| x.trim().to_string()).collect();
    let index_of = |name: &str| header.iter().position(|x| x == name);
    let mut required = BTreeMap::new();
    for name in REQUIRED_COLUMNS {
        required.insert(name, index_of(name).ok_or(format!("Missing column {}", name))?);
    }
    let effects_column = index_of(COLUMN_EFFECTS);
    let attribute_columns: Vec<(usize, &String)> = header.iter().enumerate()
        .filter(|(_, name)| !REQUIRED_COLUMNS.contains(&name.as_str()) && name.as_str() != COLUMN_EFFECTS)
        .collect();

    let mut batch = ImportBatch::default();
    let mut summaries: HashMap<(u32, u64), Arc<SummaryVariant>> = HashMap::new();
    for (line_num, line) in lines {
        let line = line.map_err(|x| x.to_string())?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != header.len() {
            return Err(format!("Line {}: expected {} fields, found {}", line_num + 1, header.len(), fields.len()));
        }
        let field = |name: &str| fields[required[name]];
        let context = |message: String| format!("Line {}: {}", line_num + 1, message);

        let bucket_index: u32 = field(COLUMN_BUCKET).parse().map_err(|x| context(format!("Invalid bucket: {}", x)))?;
        let summary_index: u64 = field(COLUMN_SUMMARY_INDEX).parse().map_err(|x| context(format!("Invalid summary index: {}", x)))?;
        let summary = match summaries.get(&(bucket_index, summary_index)) {
            Some(summary) => summary.clone(),
            None => {
                let position: u64 = field(COLUMN_POSITION).parse().map_err(|x| context(format!("Invalid position: {}", x)))?;
                let alternatives: Vec<&str> = field(COLUMN_ALTERNATIVE).split(',').collect();
                let mut variant = SummaryVariantFactory::from_raw(
                    bucket_index, summary_index, field(COLUMN_CHROMOSOME), position, field(COLUMN_REFERENCE), &alternatives
                ).map_err(|x| context(x.to_string()))?;
                if let Some(column) = effects_column {
                    for (offset, effects) in fields[column].split('|').enumerate() {
                        let effects = parse_effects(effects).map_err(context)?;
                        variant.set_effects(offset + 1, effects).map_err(|x| context(x.to_string()))?;
                    }
                }
                for allele_index in 1..variant.allele_count() {
                    let mut attributes = Attributes::new();
                    for (column, name) in attribute_columns.iter() {
                        let value = fields[*column].split(',').nth(allele_index - 1).and_then(attribute_value);
                        if let Some(value) = value {
                            attributes.insert(name.to_string(), value);
                        }
                    }
                    variant.set_attributes(allele_index, attributes).map_err(|x| context(x.to_string()))?;
                }
                let variant = Arc::new(variant);
                summaries.insert((bucket_index, summary_index), variant.clone());
                batch.summary_variants.push(variant.clone());
                variant
            },
        };

        let family_id = field(COLUMN_FAMILY_ID);
        let family = families.family(family_id).ok_or(context(format!("Unknown family {}", family_id)))?;
        let genotype = codec::decode_genotype(field(COLUMN_GENOTYPE)).map_err(|x| context(x.to_string()))?;
        let variant = FamilyVariant::new(summary, family, genotype).map_err(|x| context(x.to_string()))?;
        batch.family_variants.push(variant);
    }

    Ok(batch)
}

//-----------------------------------------------------------------------------

fn get_string_value(statement: &mut Statement, key: &str) -> Result<String, StoreError> {
    let result: Option<String> = statement.query_row((key,), |row| row.get(0)).optional()?;
    result.ok_or(StoreError::Database(format!("Key not found: {}", key)))
}

//-----------------------------------------------------------------------------
