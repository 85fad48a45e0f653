use super::*;

use crate::internal;
use crate::pedigree::Role;
use crate::variant::SummaryVariantFactory;

//-----------------------------------------------------------------------------

fn make_summary(chromosome: &str, position: u64, alternatives: &[&str]) -> Arc<SummaryVariant> {
    Arc::new(SummaryVariantFactory::from_raw(0, 1, chromosome, position, "A", alternatives).unwrap())
}

fn classify(family: &Arc<Family>, chromosome: &str, rows: [&[i32]; 2]) -> Inheritance {
    let summary = make_summary(chromosome, 1000, &["G", "T"]);
    internal::family_variant(&summary, family, rows).inheritance()
}

//-----------------------------------------------------------------------------

#[test]
fn trio_reference_and_mendelian() {
    let family = Arc::new(internal::trio("f1"));
    let summary = make_summary("chr1", 100, &["G"]);

    let reference = internal::family_variant(&summary, &family, [&[0, 0, 0], &[0, 0, 0]]);
    assert_eq!(reference.inheritance(), Inheritance::Reference, "All-reference trio should be reference");
    assert!(!reference.is_mendelian(), "A reference variant is not mendelian");

    let mendelian = internal::family_variant(&summary, &family, [&[1, 0, 0], &[0, 0, 1]]);
    assert_eq!(mendelian.inheritance(), Inheritance::Mendelian, "Transmitted allele should be mendelian");
    assert!(mendelian.is_mendelian(), "is_mendelian() disagrees with inheritance()");
}

#[test]
fn denovo_and_omission() {
    let family = Arc::new(internal::trio("f1"));
    assert_eq!(classify(&family, "chr1", [&[0, 0, 0], &[0, 0, 1]]), Inheritance::Denovo, "Allele absent in parents");
    assert_eq!(classify(&family, "chr1", [&[1, 0, 1], &[0, 0, 1]]), Inheritance::Denovo, "Two copies with one transmitting parent");
    assert_eq!(classify(&family, "chr1", [&[1, 0, 0], &[1, 0, 0]]), Inheritance::Omission, "Homozygous mother did not transmit");
    assert_eq!(classify(&family, "chr1", [&[1, 1, 0], &[1, 1, 1]]), Inheritance::Omission, "Homozygous parents, heterozygous child");
    assert_eq!(classify(&family, "chr1", [&[1, 0, 2], &[1, 0, 0]]), Inheritance::Denovo, "Denovo takes precedence over omission");
}

#[test]
fn unknown_calls() {
    let family = Arc::new(internal::trio("f1"));
    assert_eq!(classify(&family, "chr1", [&[-1, 0, 0], &[-1, 0, 1]]), Inheritance::Unknown, "Unknown parent call");
    assert_eq!(classify(&family, "chr1", [&[0, 0, 0], &[0, 0, -1]]), Inheritance::Unknown, "Unknown child call");

    let summary = make_summary("chr1", 100, &["G"]);
    let variant = internal::family_variant(&summary, &family, [&[0, 0, -1], &[1, 0, -1]]);
    assert_eq!(variant.best_state().get(0, 2), UNKNOWN, "Unknown call should give an unknown column");
    let allele = variant.allele(1).unwrap();
    assert_eq!(allele.inheritance_in_members() & Inheritance::Unknown.bit(), Inheritance::Unknown.bit(), "Missing unknown bit");
    assert_eq!(allele.carriers(), vec![0], "Unknown calls should not be carriers");
}

#[test]
fn quads_with_transmitted_alleles() {
    let family = Arc::new(internal::quad("f1"));
    let cases: [[&[i32]; 2]; 4] = [
        [&[1, 0, 1, 0], &[0, 0, 0, 0]],
        [&[1, 2, 1, 0], &[0, 0, 2, 2]],
        [&[1, 1, 1, 1], &[1, 1, 1, 1]],
        [&[1, 0, 0, 1], &[0, 1, 1, 0]],
    ];
    for rows in cases {
        assert_eq!(classify(&family, "chr1", rows), Inheritance::Mendelian, "Wrong classification for {:?}", rows);
    }
}

#[test]
fn multiallelic_joint_check() {
    let family = Arc::new(internal::trio("f1"));
    // The child has both alleles of the mother and nothing from the father.
    assert_eq!(classify(&family, "chr1", [&[1, 0, 1], &[2, 0, 2]]), Inheritance::Omission, "The father did not transmit a copy");
    assert_eq!(classify(&family, "chr1", [&[1, 0, 1], &[2, 0, 0]]), Inheritance::Mendelian, "One copy from each parent");
}

#[test]
fn sex_chromosomes() {
    let family = Arc::new(internal::trio("f1"));
    // Male proband on X gets his only copy from the mother; the second genotype row is ignored.
    assert_eq!(classify(&family, "chrX", [&[1, 0, 1], &[0, 0, 0]]), Inheritance::Mendelian, "Maternal X allele");
    assert_eq!(classify(&family, "chrX", [&[0, 1, 1], &[0, 0, 0]]), Inheritance::Denovo, "Paternal X allele in a son");
    // Inside PAR1 the locus is autosomal.
    let summary = make_summary("chrX", 20_000, &["G"]);
    let variant = internal::family_variant(&summary, &family, [&[0, 1, 1], &[0, 0, 0]]);
    assert_eq!(variant.inheritance(), Inheritance::Mendelian, "Paternal allele in PAR1");
    // Y is transmitted from father to son.
    assert_eq!(classify(&family, "Y", [&[0, 1, 1], &[0, 0, 0]]), Inheritance::Mendelian, "Paternal Y allele");
    assert_eq!(classify(&family, "Y", [&[0, 0, 1], &[0, 0, 0]]), Inheritance::Denovo, "Y allele absent in the father");

    assert_eq!(ploidy("chrX", 5_000_000, Sex::Male), 1, "Males are haploid on X");
    assert_eq!(ploidy("chrX", 5_000_000, Sex::Female), 2, "Females are diploid on X");
    assert_eq!(ploidy("chrY", 5_000_000, Sex::Female), 0, "Females have no Y");
    assert_eq!(ploidy("chrY", 56_900_000, Sex::Male), 2, "PAR2 on Y is diploid");
    assert_eq!(ploidy("chr7", 5_000_000, Sex::Male), 2, "Autosomes are diploid");

    let summary = make_summary("chrX", 1_000_000, &["G"]);
    let variant = internal::family_variant(&summary, &family, [&[1, 1, 1], &[1, 0, 0]]);
    assert_eq!(variant.best_state().to_rows(), vec![vec![0, 0, 0], vec![2, 1, 1]], "Haploid members should use the first row only");
}

#[test]
fn carrier_masks() {
    let family = Arc::new(internal::quad("f1"));
    let summary = make_summary("chr1", 100, &["G"]);
    let variant = internal::family_variant(&summary, &family, [&[1, 0, 1, 0], &[0, 0, 0, 0]]);
    let allele = variant.allele(1).unwrap();

    assert_eq!(allele.carriers(), vec![0, 2], "Wrong carriers");
    assert_eq!(allele.allele_in_members(), vec!["f1.mo", "f1.p1"], "Wrong carrier identifiers");
    assert_eq!(allele.allele_in_roles(), Role::Mother.bit() | Role::Proband.bit(), "Wrong role mask");
    assert_eq!(allele.allele_in_sexes(), Sex::Female.bit() | Sex::Male.bit(), "Wrong sex mask");
    assert_eq!(
        allele.inheritance_in_members(),
        Inheritance::Mendelian.bit() | Inheritance::Reference.bit(),
        "Wrong inheritance mask"
    );
    assert!(!allele.is_denovo(), "Transmitted allele is not de novo");
    assert_eq!(variant.family_alt_alleles().count(), 1, "Wrong number of carried alternative alleles");
}

#[test]
fn invalid_genotypes() {
    let family = Arc::new(internal::trio("f1"));
    let summary = make_summary("chr1", 100, &["G"]);

    let narrow = Matrix::from_rows(vec![vec![0, 0], vec![0, 1]]).unwrap();
    let result = FamilyVariant::new(summary.clone(), family.clone(), narrow);
    assert!(matches!(result, Err(MalformedVariantError::GenotypeWidth { .. })), "Narrow genotype was accepted");

    let out_of_range = Matrix::from_rows(vec![vec![0, 0, 0], vec![0, 0, 2]]).unwrap();
    let result = FamilyVariant::new(summary.clone(), family.clone(), out_of_range);
    assert!(matches!(result, Err(MalformedVariantError::AlleleOutOfRange { allele_index: 2, allele_count: 2 })), "Nonexistent allele was accepted");

    let three_rows = Matrix::from_rows(vec![vec![0, 0, 0], vec![0, 0, 0], vec![0, 0, 0]]).unwrap();
    let result = FamilyVariant::new(summary, family, three_rows);
    assert!(matches!(result, Err(MalformedVariantError::GenotypeRows(3))), "Three-row genotype was accepted");
}

#[test]
fn stored_best_state() {
    let family = Arc::new(internal::trio("f1"));
    let summary = make_summary("chr1", 100, &["G"]);
    let variant = internal::family_variant(&summary, &family, [&[1, 0, 0], &[0, 0, 1]]);
    let derived = variant.best_state().clone();

    let fresh = internal::family_variant(&summary, &family, [&[1, 0, 0], &[0, 0, 1]]);
    let stored = fresh.with_best_state(derived.clone());
    assert!(stored.is_ok(), "Valid best state was rejected: {}", stored.unwrap_err());
    assert_eq!(stored.unwrap().best_state(), &derived, "Stored best state was not used");

    let fresh = internal::family_variant(&summary, &family, [&[1, 0, 0], &[0, 0, 1]]);
    let wrong = Matrix::from_rows(vec![vec![1, 2, 1], vec![1, 1, 1]]).unwrap();
    assert!(fresh.with_best_state(wrong).is_err(), "Best state violating ploidy was accepted");
}

#[test]
fn matched_alleles() {
    let family = Arc::new(internal::trio("f1"));
    let summary = make_summary("chr1", 100, &["G", "T"]);
    let first = internal::family_variant(&summary, &family, [&[1, 0, 1], &[2, 0, 2]]).with_matched_alleles(vec![2]);
    let mut second = internal::family_variant(&summary, &family, [&[1, 0, 1], &[2, 0, 2]]).with_matched_alleles(vec![1]);
    assert!(first.same_variant(&second), "Rows of the same variant were not recognized");
    second.merge_matched_alleles(first.matched_alleles());
    assert_eq!(second.matched_alleles(), &[1, 2], "Wrong merged alleles");
}

//-----------------------------------------------------------------------------
