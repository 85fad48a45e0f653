use super::*;

use crate::dialect::{ImpalaDialect, SqliteDialect};
use crate::internal;
use crate::pedigree::FamilyRegistry;

//-----------------------------------------------------------------------------

fn sqlite_context() -> QueryContext {
    QueryContext::new(internal::test_config(), internal::test_schema(), Arc::new(SqliteDialect))
}

fn compile(builder: QueryBuilder) -> CompiledQuery {
    let query = builder.build();
    assert!(query.is_ok(), "Failed to compile the query: {}", query.unwrap_err());
    query.unwrap()
}

fn compile_error(builder: QueryBuilder) -> QueryCompileError {
    let query = builder.build();
    assert!(query.is_err(), "Compiled an invalid query: {}", query.unwrap());
    query.unwrap_err()
}

fn text(value: &str) -> Literal {
    Literal::Text(value.to_string())
}

//-----------------------------------------------------------------------------

#[test]
fn default_family_query() {
    let context = sqlite_context();
    let builder = QueryBuilder::family(&context);
    let query = compile(builder.clone());
    let truth = concat!(
        "SELECT fa.\"bucket_index\", fa.\"summary_index\", fa.\"allele_index\", fa.\"family_id\", ",
        "sa.\"summary_variant_data\", fa.\"family_variant_data\" ",
        "FROM \"family_alleles\" AS fa JOIN \"summary_alleles\" AS sa ON (",
        "fa.\"bucket_index\" = sa.\"bucket_index\" AND fa.\"summary_index\" = sa.\"summary_index\" AND ",
        "fa.\"allele_index\" = sa.\"allele_index\") ",
        "WHERE fa.\"allele_index\" > 0 AND NOT ((fa.\"inheritance_in_members\" & 16) != 0)"
    );
    assert_eq!(query.sql, truth, "Wrong SQL for the default family query");
    assert!(query.params.is_empty(), "Default query has parameters");
    assert_eq!(query.columns.len(), 6, "Wrong number of result columns");
    assert_eq!(query.kind, QueryKind::Family, "Wrong query kind");
    assert!(query.partitions.is_none(), "Default query is restricted by region");

    let again = compile(builder);
    assert_eq!(again.sql, query.sql, "Build is not idempotent");
}

#[test]
fn default_summary_query() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::summary(&context).with_return_reference(true));
    let truth = concat!(
        "SELECT sa.\"bucket_index\", sa.\"summary_index\", sa.\"allele_index\", sa.\"summary_variant_data\" ",
        "FROM \"summary_alleles\" AS sa"
    );
    assert_eq!(query.sql, truth, "Wrong SQL for a summary query with reference alleles");
    assert_eq!(query.columns.len(), 4, "Wrong number of result columns");
}

#[test]
fn region_lowering() {
    let context = sqlite_context();
    let builder = QueryBuilder::family(&context).with_regions(vec![Region::new("chr1", 100, 200), Region::chromosome("chr3")]);
    let query = compile(builder.clone());
    assert!(
        query.sql.contains("((sa.\"chromosome\" = ? AND sa.\"position\" >= ? AND sa.\"position\" <= ?) OR (sa.\"chromosome\" = ?))"),
        "Wrong region predicate: {}", query.sql
    );
    let bins = "IN ('chr1_0', 'other_0', 'other_1', 'other_2', 'other_3', 'other_4', 'other_5', 'other_6')";
    assert!(query.sql.contains(&format!("fa.\"region_bin\" {}", bins)), "Missing family region bins: {}", query.sql);
    assert!(query.sql.contains(&format!("sa.\"region_bin\" {}", bins)), "Missing summary region bins: {}", query.sql);
    assert_eq!(query.params, vec![text("chr1"), Literal::Integer(100), Literal::Integer(200), text("chr3")], "Wrong region parameters");

    // chr1_0 plus bins other_0 to other_6 for the whole chr3.
    let partitions = query.partitions.unwrap();
    assert_eq!(partitions.len(), 8, "Wrong number of partitions");
    assert!(partitions.contains("chr1_0") && partitions.contains("other_6"), "Missing partitions: {:?}", partitions);

    let query = compile(builder.with_pruning(false));
    assert!(!query.sql.contains("region_bin"), "Region bins with pruning disabled: {}", query.sql);
    assert_eq!(query.params.len(), 4, "Wrong number of parameters without pruning");
    assert!(query.partitions.is_some(), "Partitions should not depend on pruning");

    let query = compile(QueryBuilder::family(&context).with_regions(vec![Region::chromosome("chrUn")]));
    assert!(query.partitions.is_none(), "Regions of unknown length cannot be pruned");
    assert!(!query.sql.contains("region_bin"), "Region bins for an unknown chromosome: {}", query.sql);

    let error = compile_error(QueryBuilder::family(&context).with_regions(Vec::new()));
    assert_eq!(error, QueryCompileError::EmptySet("region"), "Wrong error for no regions");
}

#[test]
fn large_region_lowering() {
    let context = sqlite_context();

    // The end is clamped to the length of chr1.
    let query = compile(QueryBuilder::family(&context).with_regions(vec![Region::new("chr1", 1, 40_000_000)]));
    assert_eq!(query.partitions.as_ref().map(|x| x.len()), Some(11), "Region past the chromosome end was not clamped");
    assert_eq!(query.params.len(), 3, "Region bins should not be parameters");

    // Only the position bounds are parameters, and they saturate.
    let query = compile(QueryBuilder::family(&context).with_regions(vec![Region::new("chrUn", 1, u64::MAX)]));
    assert!(query.partitions.is_none(), "Too many bins should disable pruning");
    assert!(!query.sql.contains("region_bin"), "Region bins without pruning: {}", query.sql);
    assert_eq!(query.params[2], Literal::Integer(i64::MAX), "Position bound did not saturate");
}

#[test]
fn bitmask_lowering() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::family(&context).with_roles("prb and not sib"));
    assert!(
        query.sql.contains("((fa.\"allele_in_roles\" & 1) != 0 AND NOT ((fa.\"allele_in_roles\" & 2) != 0))"),
        "Wrong role predicate: {}", query.sql
    );

    let query = compile(QueryBuilder::family(&context).with_inheritance("denovo or omission"));
    assert!(
        query.sql.contains("((fa.\"inheritance_in_members\" & 4) != 0 OR (fa.\"inheritance_in_members\" & 8) != 0)"),
        "Wrong inheritance predicate: {}", query.sql
    );

    let query = compile(QueryBuilder::family(&context).with_sexes("eq(M, F)").with_statuses("any(affected, unspecified)"));
    assert!(query.sql.contains("fa.\"allele_in_sexes\" = 3"), "Wrong sex predicate: {}", query.sql);
    assert!(query.sql.contains("(fa.\"allele_in_statuses\" & 6) != 0"), "Wrong status predicate: {}", query.sql);

    let query = compile(QueryBuilder::summary(&context).with_variant_type("all(sub, tr)"));
    assert!(query.sql.contains("(sa.\"variant_type\" & 65) = 65"), "Wrong variant type predicate: {}", query.sql);
    assert!(query.params.is_empty(), "Bit masks should be inlined");
}

#[test]
fn effect_lowering() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::family(&context).with_genes(&["GENE1", "GENE2"]).with_effect_types(&["missense"]));
    let truth = concat!(
        "EXISTS (SELECT 1 FROM json_each(sa.\"effect_gene\") AS eg WHERE ",
        "json_extract(eg.value, '$.effect_gene_symbols') IN (?, ?) AND json_extract(eg.value, '$.effect_types') IN (?))"
    );
    assert!(query.sql.contains(truth), "Wrong effect predicate: {}", query.sql);
    assert_eq!(query.params, vec![text("GENE1"), text("GENE2"), text("missense")], "Wrong effect parameters");
    assert!(query.sql.contains("fa.\"coding_bin\" = 1"), "Missing coding bin for coding effects: {}", query.sql);

    let query = compile(QueryBuilder::family(&context).with_effect_types(&["missense", "intron"]));
    assert!(!query.sql.contains("coding_bin"), "Coding bin with a noncoding effect: {}", query.sql);

    let query = compile(QueryBuilder::family(&context).with_effect_types(&["LGDs"]));
    assert_eq!(query.params.len(), 4, "Effect group was not expanded");

    let query = compile(QueryBuilder::family(&context).with_genes(&["GENE1"]));
    assert!(!query.sql.contains("effect_types"), "Effect type predicate without effect types: {}", query.sql);
}

#[test]
fn frequency_lowering() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::family(&context).with_frequency_range(None, Some(5.0)));
    let truth = concat!(
        "(fa.\"frequency_bin\" IN (2) OR (fa.\"frequency_bin\" IN (0, 1) AND ",
        "(COALESCE(sa.\"af_allele_freq\", 0.0) <= ?)))"
    );
    assert!(query.sql.contains(truth), "Wrong frequency predicate: {}", query.sql);
    assert_eq!(query.params, vec![Literal::Real(5.0)], "Wrong frequency parameters");

    let query = compile(QueryBuilder::summary(&context).with_ultra_rare(true));
    let truth = "(sa.\"frequency_bin\" IN (1) OR (sa.\"frequency_bin\" IN (0) AND COALESCE(sa.\"af_allele_count\", 0) <= 1))";
    assert!(query.sql.contains(truth), "Wrong ultra-rare predicate: {}", query.sql);

    let query = compile(QueryBuilder::family(&context).with_ultra_rare(true).with_pruning(false));
    assert!(!query.sql.contains("frequency_bin"), "Frequency bins with pruning disabled: {}", query.sql);
    assert!(query.sql.contains("COALESCE(sa.\"af_allele_count\", 0) <= 1"), "Missing the exact predicate: {}", query.sql);

    let query = compile(QueryBuilder::family(&context).with_real_attr_filter("cadd_raw", Some(20.0), None));
    assert!(query.sql.contains("sa.\"cadd_raw\" IS NOT NULL AND sa.\"cadd_raw\" >= ?"), "Wrong attribute predicate: {}", query.sql);
}

#[test]
fn family_and_person_lowering() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::family(&context).with_family_ids(&["f1", "f2"]));
    let bins: BTreeSet<u64> = ["f1", "f2"].iter().map(|x| partition::family_bin(x, 4)).collect();
    let bins: Vec<String> = bins.iter().map(|x| x.to_string()).collect();
    assert!(query.sql.contains(&format!("fa.\"family_bin\" IN ({})", bins.join(", "))), "Wrong family bins: {}", query.sql);
    assert!(query.sql.contains("fa.\"family_id\" IN (?, ?)"), "Wrong family predicate: {}", query.sql);
    assert!(!query.sql.contains("pedigree"), "Pedigree join without person filters: {}", query.sql);

    let query = compile(QueryBuilder::family(&context).with_person_ids(&["f1.p1"]).with_limit(Some(10)));
    let join = "JOIN json_each(fa.\"allele_in_members\") AS m JOIN \"pedigree\" AS pd ON (pd.\"family_id\" = fa.\"family_id\" AND pd.\"person_id\" = m.value)";
    assert!(query.sql.contains(join), "Wrong pedigree join: {}", query.sql);
    assert!(query.sql.contains("pd.\"person_id\" IN (?)"), "Wrong person predicate: {}", query.sql);
    assert!(query.sql.contains(" GROUP BY fa.\"bucket_index\""), "Missing GROUP BY: {}", query.sql);
    assert!(query.sql.ends_with(" LIMIT 10"), "Missing LIMIT: {}", query.sql);
    assert_eq!(query.limit, Some(10), "Wrong limit");
}

#[test]
fn compile_errors() {
    let context = sqlite_context();
    assert_eq!(
        compile_error(QueryBuilder::family(&context).with_effect_types(&["Missense"])),
        QueryCompileError::UnknownEffectType(String::from("Missense")),
        "Unknown effect type was accepted"
    );
    assert_eq!(
        compile_error(QueryBuilder::family(&context).with_real_attr_filter("phylop", None, Some(1.0))),
        QueryCompileError::UnknownAttribute(String::from("phylop")),
        "Unknown attribute was accepted"
    );
    assert_eq!(
        compile_error(QueryBuilder::family(&context).with_roles("grandpa")),
        QueryCompileError::UnknownName { filter: "roles", name: String::from("grandpa") },
        "Unknown role was accepted"
    );
    assert!(
        matches!(compile_error(QueryBuilder::family(&context).with_inheritance("denovo and")), QueryCompileError::Filter { filter: "inheritance", .. }),
        "Incomplete filter was accepted"
    );
    assert_eq!(
        compile_error(QueryBuilder::summary(&context).with_roles("prb")),
        QueryCompileError::UnsupportedFilter("roles"),
        "Role filter was accepted for a summary query"
    );
    assert_eq!(
        compile_error(QueryBuilder::family(&context).with_family_ids::<&str>(&[])),
        QueryCompileError::EmptySet("family id"),
        "Empty family set was accepted"
    );
    assert!(
        matches!(compile_error(QueryBuilder::family(&context).with_frequency_range(Some(3.0), Some(1.0))), QueryCompileError::InvalidRange { .. }),
        "Empty frequency range was accepted"
    );
    for (min, max) in [(Some(f64::NAN), None), (None, Some(f64::NAN)), (Some(1.0), Some(f64::NAN))] {
        let error = compile_error(QueryBuilder::family(&context).with_frequency_range(min, max));
        assert!(matches!(error, QueryCompileError::InvalidRange { .. }), "Accepted frequency range {:?}..{:?}", min, max);
    }
    let error = compile_error(QueryBuilder::summary(&context).with_real_attr_filter("cadd_raw", None, Some(f64::NAN)));
    assert!(matches!(error, QueryCompileError::InvalidRange { .. }), "Accepted a NaN score bound");
}

#[test]
fn impala_dialect() {
    let context = QueryContext::new(internal::test_config(), internal::test_schema(), Arc::new(ImpalaDialect));
    let query = compile(QueryBuilder::family(&context).with_roles("prb").with_person_ids(&["p1"]));
    assert!(query.sql.contains("FROM `family_alleles` AS fa JOIN `summary_alleles` AS sa"), "Wrong table quoting: {}", query.sql);
    assert!(query.sql.contains("BITAND(fa.`allele_in_roles`, 1) != 0"), "Wrong bit test: {}", query.sql);
    assert!(query.sql.contains("CROSS JOIN fa.`allele_in_members` AS m JOIN `pedigree` AS pd"), "Wrong unnest: {}", query.sql);
    assert!(query.sql.contains("pd.`person_id` = m.item"), "Wrong array element: {}", query.sql);
}

#[test]
fn inline_parameters() {
    let context = sqlite_context();
    let query = compile(QueryBuilder::family(&context).with_regions(vec![Region::new("chr1", 100, 200)]).with_pruning(false).with_genes(&["O'NEIL"]));
    let inlined = query.inline_sql();
    assert!(inlined.contains("sa.\"chromosome\" = 'chr1' AND sa.\"position\" >= 100 AND sa.\"position\" <= 200"), "Wrong inlined region: {}", inlined);
    assert!(inlined.contains("IN ('O''NEIL')"), "Text was not escaped: {}", inlined);
    assert!(!inlined.contains('?'), "Placeholders left in: {}", inlined);
}

//-----------------------------------------------------------------------------

#[test]
fn decode_rows() {
    let context = sqlite_context();
    let family = Arc::new(internal::trio("f1"));
    let families = internal::registry(vec![internal::trio("f1")]);
    let summary = Arc::new(internal::annotated_variant(7, "chr1", 100, "A", &["G", "T"], &[], &[]));
    let variant = internal::family_variant(&summary, &family, [&[0, 0, 1], &[0, 2, 2]]);
    let summary_blob = serialize::serialize_summary_variant(&summary).unwrap();
    let family_blob = serialize::serialize_family_variant(&variant).unwrap();

    let query = compile(QueryBuilder::family(&context));
    let mut cache = SummaryCache::default();
    let mut decoded = Vec::new();
    for allele_index in [1, 2] {
        let values = vec![
            Value::Integer(0), Value::Integer(7), Value::Integer(allele_index),
            Value::Text(String::from("f1")), Value::Blob(summary_blob.clone()), Value::Blob(family_blob.clone()),
        ];
        let result = query.decode_row(&values, &families, &mut cache);
        assert!(result.is_ok(), "Failed to decode allele {}: {}", allele_index, result.unwrap_err());
        decoded.push(result.unwrap());
    }
    assert_eq!(decoded[0].matched_alleles(), &[1], "Wrong matched allele");
    assert_eq!(decoded[0].family_variant().unwrap().genotype(), variant.genotype(), "Wrong genotype");
    assert!(Arc::ptr_eq(decoded[0].summary(), decoded[1].summary()), "Consecutive rows do not share the summary variant");

    let coalesced: Vec<VariantResult> = coalesce_rows(decoded).collect();
    assert_eq!(coalesced.len(), 1, "Rows of the same variant were not merged");
    assert_eq!(coalesced[0].matched_alleles(), &[1, 2], "Wrong merged alleles");

    let wrong_type = vec![
        Value::Text(String::from("0")), Value::Integer(7), Value::Integer(1),
        Value::Text(String::from("f1")), Value::Blob(summary_blob.clone()), Value::Blob(family_blob.clone()),
    ];
    let result = query.decode_row(&wrong_type, &families, &mut cache);
    assert!(matches!(result, Err(DecodeError::Column { .. })), "Wrong column type was accepted");
    let result = query.decode_row(&wrong_type[1..], &families, &mut cache);
    assert!(matches!(result, Err(DecodeError::Column { .. })), "Wrong number of columns was accepted");

    let result = query.decode_row(
        &[Value::Integer(0), Value::Integer(7), Value::Integer(1), Value::Text(String::from("f1")), Value::Blob(summary_blob), Value::Blob(family_blob)],
        &FamilyRegistry::new(), &mut SummaryCache::default()
    );
    assert!(matches!(result, Err(DecodeError::UnknownFamily(_))), "Unknown family was accepted");
}

#[test]
fn coalesce_summary_rows() {
    let first = Arc::new(internal::annotated_variant(1, "chr1", 100, "A", &["G", "T"], &[], &[]));
    let second = Arc::new(internal::annotated_variant(2, "chr1", 200, "C", &["G"], &[], &[]));
    let row = |variant: &Arc<SummaryVariant>, allele: usize| {
        VariantResult::Summary(SummaryResult { variant: variant.clone(), matched_alleles: vec![allele] })
    };
    let rows = vec![row(&first, 2), row(&first, 1), row(&second, 1), row(&first, 1)];
    let coalesced: Vec<VariantResult> = coalesce_rows(rows).collect();
    assert_eq!(coalesced.len(), 3, "Only consecutive rows should be merged");
    assert_eq!(coalesced[0].matched_alleles(), &[1, 2], "Merged alleles are not sorted");
    assert_eq!(coalesced[1].summary().summary_index(), 2, "Order was not preserved");
    assert_eq!(coalesced[2].matched_alleles(), &[1], "Wrong alleles for the last row");
}

//-----------------------------------------------------------------------------
