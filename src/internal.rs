use crate::codec::Matrix;
use crate::db::{ImportBatch, VariantStore};
use crate::family_variant::FamilyVariant;
use crate::partition::PartitionConfig;
use crate::pedigree::{Family, FamilyRegistry, Person, Role, Sex, Status};
use crate::variant::{Attributes, EffectGene, SummaryVariant, SummaryVariantFactory, AF_ALLELE_COUNT, AF_ALLELE_FREQ};
use crate::db::StoreSchema;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

//-----------------------------------------------------------------------------

// Pedigree utilities.

pub(crate) fn person(family_id: &str, person_id: &str, parents: Option<(&str, &str)>, sex: Sex, role: Role) -> Person {
    Person {
        person_id: format!("{}.{}", family_id, person_id),
        family_id: family_id.to_string(),
        mom_id: parents.map(|x| format!("{}.{}", family_id, x.0)),
        dad_id: parents.map(|x| format!("{}.{}", family_id, x.1)),
        sex,
        status: if role == Role::Proband { Status::Affected } else { Status::Unaffected },
        role,
    }
}

/// Members: mom, dad, male proband.
pub(crate) fn trio(family_id: &str) -> Family {
    let members = vec![
        person(family_id, "mo", None, Sex::Female, Role::Mother),
        person(family_id, "fa", None, Sex::Male, Role::Father),
        person(family_id, "p1", Some(("mo", "fa")), Sex::Male, Role::Proband),
    ];
    Family::new(family_id, members).unwrap()
}

/// Members: mom, dad, male proband, female sibling.
pub(crate) fn quad(family_id: &str) -> Family {
    let members = vec![
        person(family_id, "mo", None, Sex::Female, Role::Mother),
        person(family_id, "fa", None, Sex::Male, Role::Father),
        person(family_id, "p1", Some(("mo", "fa")), Sex::Male, Role::Proband),
        person(family_id, "s1", Some(("mo", "fa")), Sex::Female, Role::Sibling),
    ];
    Family::new(family_id, members).unwrap()
}

pub(crate) fn registry(families: Vec<Family>) -> FamilyRegistry {
    let mut result = FamilyRegistry::new();
    for family in families {
        result.insert(family);
    }
    result
}

//-----------------------------------------------------------------------------

// Variant utilities.

pub(crate) fn annotated_variant(
    summary_index: u64, chromosome: &str, position: u64, reference: &str, alternatives: &[&str],
    effects: &[(&str, &str)], frequencies: &[(u64, f64)]
) -> SummaryVariant {
    let mut variant = SummaryVariantFactory::from_raw(0, summary_index, chromosome, position, reference, alternatives).unwrap();
    for allele_index in 1..variant.allele_count() {
        if let Some((gene, effect)) = effects.get(allele_index - 1) {
            variant.set_effects(allele_index, vec![EffectGene::new(gene, effect)]).unwrap();
        }
        if let Some((count, frequency)) = frequencies.get(allele_index - 1) {
            let mut attributes = Attributes::new();
            attributes.insert(AF_ALLELE_COUNT.to_string(), json!(count));
            attributes.insert(AF_ALLELE_FREQ.to_string(), json!(frequency));
            variant.set_attributes(allele_index, attributes).unwrap();
        }
    }
    variant
}

pub(crate) fn family_variant(summary: &Arc<SummaryVariant>, family: &Arc<Family>, rows: [&[i32]; 2]) -> FamilyVariant {
    let genotype = Matrix::from_rows(vec![rows[0].to_vec(), rows[1].to_vec()]).unwrap();
    let result = FamilyVariant::new(summary.clone(), family.clone(), genotype);
    assert!(result.is_ok(), "Failed to create a family variant: {}", result.unwrap_err());
    result.unwrap()
}

//-----------------------------------------------------------------------------

// Store utilities.

pub(crate) fn test_config() -> PartitionConfig {
    PartitionConfig {
        region_length: 1000,
        target_chromosomes: vec![String::from("chr1"), String::from("chr2")],
        chromosome_lengths: vec![
            (String::from("chr1"), 10_000),
            (String::from("chr2"), 8_000),
            (String::from("chr3"), 6_000),
            (String::from("chrX"), 5_000),
        ],
        family_bin_size: 4,
        rare_boundary_pct: 5.0,
        ..PartitionConfig::default()
    }
}

pub(crate) fn test_schema() -> StoreSchema {
    StoreSchema {
        real_attributes: vec![String::from("cadd_raw")],
        ..StoreSchema::default()
    }
}

/// Creates an empty store in a temporary directory.
pub(crate) fn create_store(config: &PartitionConfig) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("variants.db");
    let result = VariantStore::create(&filename, config, &test_schema());
    assert!(result.is_ok(), "Failed to create a store: {}", result.unwrap_err());
    (dir, filename)
}

pub(crate) fn open_store(filename: &PathBuf) -> VariantStore {
    let store = VariantStore::open(filename);
    assert!(store.is_ok(), "Failed to open the store: {}", store.unwrap_err());
    store.unwrap()
}

/// A store with two quads, one trio, and variants covering every frequency bin and inheritance class.
///
/// Summary variants:
///
/// 1. chr1:1500 A->G, missense in GENE1, count 1 freq 0.1; denovo in the f1 proband.
/// 2. chr1:2500 C->T,A, synonymous / frame-shift in GENE2, counts 3 / 40 with freq 2.0 / 30.0; mendelian in f1 and f2.
/// 3. chr2:500 AT->A, intron in GENE3, count 10 freq 6.0; mendelian in f3 (trio), unknown in f2.
/// 4. chr3:100 G->GA, non-coding in GENE4, count 2 freq 4.0; omission in f2.
/// 5. chrX:4000 T->C, missense in GENE5, count 2 freq 1.5; transmitted from the mother to the f1 proband.
pub(crate) fn populated_store() -> (TempDir, PathBuf) {
    let (dir, filename) = create_store(&test_config());
    let mut store = open_store(&filename);

    let f1 = Arc::new(quad("f1"));
    let f2 = Arc::new(quad("f2"));
    let f3 = Arc::new(trio("f3"));
    let result = store.insert_families(&[f1.clone(), f2.clone(), f3.clone()]);
    assert!(result.is_ok(), "Failed to insert families: {}", result.unwrap_err());

    let mut scores = Attributes::new();
    scores.insert(String::from("cadd_raw"), json!(25.0));
    let mut v1 = annotated_variant(1, "chr1", 1500, "A", &["G"], &[("GENE1", "missense")], &[(1, 0.1)]);
    v1.set_attributes(1, scores).unwrap();
    let v1 = Arc::new(v1);
    let v2 = Arc::new(annotated_variant(
        2, "chr1", 2500, "C", &["T", "A"],
        &[("GENE2", "synonymous"), ("GENE2", "frame-shift")], &[(3, 2.0), (40, 30.0)]
    ));
    let v3 = Arc::new(annotated_variant(3, "chr2", 500, "AT", &["A"], &[("GENE3", "intron")], &[(10, 6.0)]));
    let v4 = Arc::new(annotated_variant(4, "chr3", 100, "G", &["GA"], &[("GENE4", "non-coding")], &[(2, 4.0)]));
    let v5 = Arc::new(annotated_variant(5, "chrX", 4000, "T", &["C"], &[("GENE5", "missense")], &[(2, 1.5)]));

    let family_variants = vec![
        family_variant(&v1, &f1, [&[0, 0, 0, 0], &[0, 0, 1, 0]]),
        family_variant(&v2, &f1, [&[1, 0, 1, 0], &[0, 2, 2, 0]]),
        family_variant(&v2, &f2, [&[1, 0, 0, 1], &[0, 1, 1, 0]]),
        family_variant(&v3, &f3, [&[1, 0, 1], &[0, 0, 0]]),
        family_variant(&v3, &f2, [&[1, 0, -1, 0], &[0, 0, -1, 0]]),
        family_variant(&v4, &f2, [&[1, 0, 0, 1], &[1, 0, 0, 0]]),
        family_variant(&v5, &f1, [&[1, 0, 1, 0], &[0, 0, 0, 0]]),
    ];
    let batch = ImportBatch {
        summary_variants: vec![v1, v2, v3, v4, v5],
        family_variants,
    };
    let result = store.import(&batch);
    assert!(result.is_ok(), "Failed to import variants: {}", result.unwrap_err());
    (dir, filename)
}

//-----------------------------------------------------------------------------
