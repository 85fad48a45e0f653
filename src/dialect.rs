//! SQL dialects.
//!
//! The query builder renders backend-specific SQL through the [`Dialect`] trait.
//! [`SqliteDialect`] targets the embedded store, where JSON arrays are unnested with `json_each`.
//! [`ImpalaDialect`] targets partitioned Parquet tables with nested array columns.

use std::fmt::Debug;

//-----------------------------------------------------------------------------

/// Backend-specific SQL rendering rules.
pub trait Dialect: Debug + Send + Sync {
    /// Name of the backend.
    fn name(&self) -> &'static str;

    /// Character used for quoting identifiers.
    fn escape_char(&self) -> char;

    /// Quotes an identifier.
    fn quote(&self, identifier: &str) -> String {
        let escape = self.escape_char();
        let doubled: String = [escape, escape].iter().collect();
        format!("{}{}{}", escape, identifier.replace(escape, &doubled), escape)
    }

    /// Returns a qualified column reference `alias.column`.
    fn column(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.quote(column))
    }

    /// Returns the bitwise AND of an integer expression and a mask.
    fn bit_and(&self, expr: &str, mask: u64) -> String;

    /// Returns a predicate that is true if any bit of the mask is set.
    fn bit_test(&self, expr: &str, mask: u64) -> String {
        format!("{} != 0", self.bit_and(expr, mask))
    }

    /// Returns a table expression that unnests an array column into rows with the given alias.
    fn unnest_table(&self, array: &str, alias: &str) -> String;

    /// Returns a join clause that unnests an array column into rows with the given alias.
    fn unnest_join(&self, array: &str, alias: &str) -> String;

    /// Returns the scalar element of an unnested row.
    fn array_element(&self, alias: &str) -> String;

    /// Returns a field of a struct-valued element of an unnested row.
    fn struct_field(&self, alias: &str, field: &str) -> String;

    /// Returns the `LIMIT` clause.
    fn limit(&self, limit: usize) -> String {
        format!("LIMIT {}", limit)
    }
}

//-----------------------------------------------------------------------------

/// The embedded SQLite backend.
///
/// Array columns are stored as JSON text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn escape_char(&self) -> char {
        '"'
    }

    fn bit_and(&self, expr: &str, mask: u64) -> String {
        format!("({} & {})", expr, mask)
    }

    fn unnest_table(&self, array: &str, alias: &str) -> String {
        format!("json_each({}) AS {}", array, alias)
    }

    fn unnest_join(&self, array: &str, alias: &str) -> String {
        format!("JOIN {}", self.unnest_table(array, alias))
    }

    fn array_element(&self, alias: &str) -> String {
        format!("{}.value", alias)
    }

    fn struct_field(&self, alias: &str, field: &str) -> String {
        format!("json_extract({}.value, '$.{}')", alias, field)
    }
}

//-----------------------------------------------------------------------------

/// Impala over partitioned Parquet tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImpalaDialect;

impl Dialect for ImpalaDialect {
    fn name(&self) -> &'static str {
        "impala"
    }

    fn escape_char(&self) -> char {
        '`'
    }

    fn bit_and(&self, expr: &str, mask: u64) -> String {
        format!("BITAND({}, {})", expr, mask)
    }

    fn unnest_table(&self, array: &str, alias: &str) -> String {
        format!("{} AS {}", array, alias)
    }

    fn unnest_join(&self, array: &str, alias: &str) -> String {
        format!("CROSS JOIN {}", self.unnest_table(array, alias))
    }

    fn array_element(&self, alias: &str) -> String {
        format!("{}.item", alias)
    }

    fn struct_field(&self, alias: &str, field: &str) -> String {
        format!("{}.{}", alias, field)
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(SqliteDialect.quote("position"), "\"position\"", "Wrong SQLite quoting");
        assert_eq!(SqliteDialect.quote("a\"b"), "\"a\"\"b\"", "Embedded quote was not doubled");
        assert_eq!(ImpalaDialect.quote("position"), "`position`", "Wrong Impala quoting");
        assert_eq!(ImpalaDialect.column("fa", "family_id"), "fa.`family_id`", "Wrong qualified column");
    }

    #[test]
    fn functions() {
        assert_eq!(SqliteDialect.bit_test("fa.x", 6), "(fa.x & 6) != 0", "Wrong SQLite bit test");
        assert_eq!(ImpalaDialect.bit_test("fa.x", 6), "BITAND(fa.x, 6) != 0", "Wrong Impala bit test");
        assert_eq!(SqliteDialect.unnest_join("sa.effect_gene", "eg"), "JOIN json_each(sa.effect_gene) AS eg", "Wrong SQLite unnest");
        assert_eq!(ImpalaDialect.struct_field("eg", "effect_types"), "eg.effect_types", "Wrong Impala struct field");
        assert_eq!(SqliteDialect.struct_field("eg", "effect_types"), "json_extract(eg.value, '$.effect_types')", "Wrong SQLite struct field");
    }
}

//-----------------------------------------------------------------------------
