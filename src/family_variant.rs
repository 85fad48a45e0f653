//! Family variants: the occurrence of a summary variant in one family.
//!
//! A [`FamilyVariant`] combines a shared [`SummaryVariant`], a [`Family`], and a genotype matrix with two rows (chromosome copies) and one column per family member.
//! The best state matrix (allele copy counts per member) and the inheritance classification are derived from the genotype and the pedigree on first access and cached.
//!
//! ### Ploidy
//!
//! Members are diploid, except on the sex chromosomes outside the GRCh38 pseudo-autosomal regions.
//! There males are haploid on both X and Y, and females have no Y chromosome.
//! The genotype of a haploid member is read from the first row only.
//!
//! ### Inheritance
//!
//! Every non-founder must receive one chromosome copy from each parent that can transmit one at the locus.
//! A parent missing from the family can transmit anything.
//! Per allele, copies above the achievable maximum are de novo and copies below the achievable minimum are omissions.
//! The classification of the variant is the most severe classification over the members, with precedence
//! unknown > denovo > omission > mendelian > reference.

use crate::codec::{self, Matrix, UNKNOWN};
use crate::error::{DecodeError, MalformedVariantError, CodecError};
use crate::filter::BitFlag;
use crate::pedigree::{Family, Sex};
use crate::utils;
use crate::variant::{Attributes, SummaryAllele, SummaryVariant};

use std::fmt::{self, Display};
use std::sync::{Arc, OnceLock};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// GRCh38 pseudo-autosomal regions on chromosome X (1-based, inclusive).
pub const PAR_X: [(u64, u64); 2] = [(10_001, 2_781_479), (155_701_383, 156_030_895)];

/// GRCh38 pseudo-autosomal regions on chromosome Y (1-based, inclusive).
pub const PAR_Y: [(u64, u64); 2] = [(10_001, 2_781_479), (56_887_903, 57_217_415)];

fn in_regions(regions: &[(u64, u64)], position: u64) -> bool {
    regions.iter().any(|(start, end)| *start <= position && position <= *end)
}

/// Returns `true` if the position is in a pseudo-autosomal region.
pub fn is_pseudoautosomal(chromosome: &str, position: u64) -> bool {
    match utils::chromosome_base(chromosome) {
        "X" => in_regions(&PAR_X, position),
        "Y" => in_regions(&PAR_Y, position),
        _ => false,
    }
}

/// Returns the number of chromosome copies a person of the given sex has at the locus.
pub fn ploidy(chromosome: &str, position: u64, sex: Sex) -> usize {
    let base = utils::chromosome_base(chromosome);
    if (base != "X" && base != "Y") || is_pseudoautosomal(chromosome, position) {
        return 2;
    }
    match (base, sex) {
        ("X", Sex::Female) => 2,
        ("X", _) => 1,
        ("Y", Sex::Female) => 0,
        _ => 1,
    }
}

//-----------------------------------------------------------------------------

/// Inheritance classification of an allele in a member, or of a whole family variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Inheritance {
    Reference,
    Mendelian,
    Omission,
    Denovo,
    Unknown,
}

impl BitFlag for Inheritance {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "reference" => Some(Inheritance::Reference),
            "mendelian" => Some(Inheritance::Mendelian),
            "denovo" => Some(Inheritance::Denovo),
            "omission" => Some(Inheritance::Omission),
            "unknown" => Some(Inheritance::Unknown),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        match self {
            Inheritance::Reference => 1,
            Inheritance::Mendelian => 2,
            Inheritance::Denovo => 4,
            Inheritance::Omission => 8,
            Inheritance::Unknown => 16,
        }
    }
}

impl Display for Inheritance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Inheritance::Reference => "reference",
            Inheritance::Mendelian => "mendelian",
            Inheritance::Omission => "omission",
            Inheritance::Denovo => "denovo",
            Inheritance::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

//-----------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Classification {
    variant: Inheritance,
    // Indexed by member, then allele.
    members: Vec<Vec<Inheritance>>,
}

// Alleles a parent can transmit, or `None` for a parent missing from the family.
type Transmissible = Option<Vec<bool>>;

fn can_transmit(source: &Transmissible, allele: usize) -> bool {
    source.as_ref().map_or(true, |x| x[allele])
}

fn transmits_only(source: &Transmissible, allele: usize) -> bool {
    source.as_ref().is_some_and(|x| x.iter().enumerate().all(|(other, can)| *can == (other == allele)))
}

// Tries to assign each copy to a distinct source that can transmit it.
fn assign_copies(copies: &[usize], sources: &[Transmissible], used: &mut [bool]) -> bool {
    let Some((first, rest)) = copies.split_first() else {
        return true;
    };
    for (index, source) in sources.iter().enumerate() {
        if !used[index] && can_transmit(source, *first) {
            used[index] = true;
            if assign_copies(rest, sources, used) {
                return true;
            }
            used[index] = false;
        }
    }
    false
}

//-----------------------------------------------------------------------------

/// A summary variant in one family.
///
/// # Examples
///
/// ```
/// use famvar_base::codec::Matrix;
/// use famvar_base::family_variant::{FamilyVariant, Inheritance};
/// use famvar_base::pedigree::{Family, Person, Role, Sex, Status};
/// use famvar_base::variant::SummaryVariantFactory;
/// use std::sync::Arc;
///
/// let person = |id: &str, mom: Option<&str>, dad: Option<&str>, sex, role| Person {
///     person_id: id.to_string(), family_id: String::from("f1"),
///     mom_id: mom.map(String::from), dad_id: dad.map(String::from),
///     sex, status: Status::Unaffected, role,
/// };
/// let family = Family::new("f1", vec![
///     person("mom", None, None, Sex::Female, Role::Mother),
///     person("dad", None, None, Sex::Male, Role::Father),
///     person("prb", Some("mom"), Some("dad"), Sex::Male, Role::Proband),
/// ]).unwrap();
/// let summary = SummaryVariantFactory::from_raw(0, 1, "chr1", 100, "A", &["G"]).unwrap();
///
/// let genotype = Matrix::from_rows(vec![vec![1, 0, 0], vec![0, 0, 1]]).unwrap();
/// let variant = FamilyVariant::new(Arc::new(summary), Arc::new(family), genotype).unwrap();
/// assert_eq!(variant.inheritance(), Inheritance::Mendelian);
/// assert!(variant.is_mendelian());
/// ```
#[derive(Clone, Debug)]
pub struct FamilyVariant {
    summary: Arc<SummaryVariant>,
    family: Arc<Family>,
    genotype: Matrix,
    attributes: Attributes,
    matched_alleles: Vec<usize>,
    best_state: OnceLock<Matrix>,
    classification: OnceLock<Classification>,
}

impl FamilyVariant {
    /// Creates a family variant.
    ///
    /// # Errors
    ///
    /// Fails if the genotype does not have two rows, does not have a column for each member, or refers to nonexistent alleles.
    pub fn new(summary: Arc<SummaryVariant>, family: Arc<Family>, genotype: Matrix) -> Result<Self, MalformedVariantError> {
        if genotype.rows() != 2 {
            return Err(MalformedVariantError::GenotypeRows(genotype.rows()));
        }
        if genotype.cols() != family.len() {
            return Err(MalformedVariantError::GenotypeWidth {
                family_id: family.family_id().to_string(),
                expected: family.len(),
                found: genotype.cols(),
            });
        }
        let allele_count = summary.allele_count();
        for row in 0..genotype.rows() {
            if let Some(cell) = genotype.row(row).iter().find(|x| **x != UNKNOWN && **x as usize >= allele_count) {
                return Err(MalformedVariantError::AlleleOutOfRange { allele_index: *cell, allele_count });
            }
        }

        Ok(FamilyVariant {
            summary, family, genotype,
            attributes: Attributes::new(),
            matched_alleles: Vec::new(),
            best_state: OnceLock::new(),
            classification: OnceLock::new(),
        })
    }

    /// Uses a stored best state instead of deriving it from the genotype.
    ///
    /// # Errors
    ///
    /// Fails if the matrix does not have a row for each allele and a column for each member, or violates the ploidy of a member.
    pub fn with_best_state(self, best_state: Matrix) -> Result<Self, DecodeError> {
        if best_state.rows() != self.summary.allele_count() {
            return Err(CodecError::WrongRowCount { expected: self.summary.allele_count(), found: best_state.rows() }.into());
        }
        if best_state.cols() != self.family.len() {
            return Err(MalformedVariantError::GenotypeWidth {
                family_id: self.family.family_id().to_string(),
                expected: self.family.len(),
                found: best_state.cols(),
            }.into());
        }
        codec::validate_best_state(&best_state, &self.ploidies())?;
        let _ = self.best_state.set(best_state);
        Ok(self)
    }

    /// Returns the variant with the given matched alleles.
    pub fn with_matched_alleles(mut self, matched_alleles: Vec<usize>) -> Self {
        self.matched_alleles = matched_alleles;
        self
    }

    /// Attaches annotation attributes.
    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes.extend(attributes);
    }

    pub fn summary(&self) -> &Arc<SummaryVariant> {
        &self.summary
    }

    pub fn family(&self) -> &Arc<Family> {
        &self.family
    }

    pub fn family_id(&self) -> &str {
        self.family.family_id()
    }

    pub fn genotype(&self) -> &Matrix {
        &self.genotype
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the alleles selected by the query that produced the variant.
    ///
    /// Variants that were not produced by a query have no matched alleles.
    pub fn matched_alleles(&self) -> &[usize] {
        &self.matched_alleles
    }

    /// Adds the matched alleles of another row of the same variant.
    pub fn merge_matched_alleles(&mut self, other: &[usize]) {
        for allele in other {
            if !self.matched_alleles.contains(allele) {
                self.matched_alleles.push(*allele);
            }
        }
        self.matched_alleles.sort_unstable();
    }

    /// Returns `true` if both variants are the same summary variant in the same family.
    pub fn same_variant(&self, other: &FamilyVariant) -> bool {
        self.family_id() == other.family_id()
            && self.summary.bucket_index() == other.summary.bucket_index()
            && self.summary.summary_index() == other.summary.summary_index()
    }

    /// Returns the ploidy of each member at the locus.
    pub fn ploidies(&self) -> Vec<usize> {
        let (chromosome, position) = (self.summary.chromosome(), self.summary.position());
        self.family.members().iter().map(|x| ploidy(chromosome, position, x.sex)).collect()
    }

    /// Returns the allele copy counts per member.
    ///
    /// Members with an unknown call have an unknown column.
    pub fn best_state(&self) -> &Matrix {
        self.best_state.get_or_init(|| self.derive_best_state())
    }

    fn derive_best_state(&self) -> Matrix {
        let mut result = Matrix::new(self.summary.allele_count(), self.family.len());
        for (member, ploidy) in self.ploidies().into_iter().enumerate() {
            let copies: Vec<i32> = (0..ploidy.min(2)).map(|row| self.genotype.get(row, member)).collect();
            if copies.contains(&UNKNOWN) {
                for allele in 0..result.rows() {
                    result.set(allele, member, UNKNOWN);
                }
                continue;
            }
            for allele in copies {
                let allele = allele as usize;
                result.set(allele, member, result.get(allele, member) + 1);
            }
        }
        result
    }

    fn has_unknown_call(&self, member: usize) -> bool {
        self.best_state().column(member).any(|x| x == UNKNOWN)
    }

    // Parents that transmit a chromosome copy to the member at the locus.
    fn sources(&self, member: usize) -> Vec<Option<usize>> {
        let person = &self.family.members()[member];
        let (chromosome, position) = (self.summary.chromosome(), self.summary.position());
        let (mom, dad) = (self.family.mom_of(member), self.family.dad_of(member));
        match ploidy(chromosome, position, person.sex) {
            0 => Vec::new(),
            1 if utils::chromosome_base(chromosome) == "Y" => vec![dad],
            1 => vec![mom],
            _ => vec![mom, dad],
        }
    }

    fn transmissible(&self, parent: Option<usize>) -> Transmissible {
        let best_state = self.best_state();
        parent.map(|parent| (0..best_state.rows()).map(|allele| best_state.get(allele, parent) > 0).collect())
    }

    fn classify_member(&self, member: usize) -> Vec<Inheritance> {
        let best_state = self.best_state();
        let allele_count = best_state.rows();
        if self.has_unknown_call(member) {
            return vec![Inheritance::Unknown; allele_count];
        }
        let counts: Vec<usize> = best_state.column(member).map(|x| x as usize).collect();
        let founder_state = |count: usize| if count > 0 { Inheritance::Mendelian } else { Inheritance::Reference };
        if self.family.is_founder(member) {
            return counts.into_iter().map(founder_state).collect();
        }

        let parents = self.sources(member);
        if parents.iter().flatten().any(|parent| self.has_unknown_call(*parent)) {
            return vec![Inheritance::Unknown; allele_count];
        }
        let sources: Vec<Transmissible> = parents.into_iter().map(|x| self.transmissible(x)).collect();

        // Extra reference copies mean that an alternative allele was not transmitted.
        let mut result = Vec::with_capacity(allele_count);
        for (allele, count) in counts.iter().enumerate() {
            let max = sources.iter().filter(|x| can_transmit(x, allele)).count();
            let min = sources.iter().filter(|x| transmits_only(x, allele)).count();
            if allele > 0 && *count > max {
                result.push(Inheritance::Denovo);
            } else if *count > max || *count < min {
                result.push(Inheritance::Omission);
            } else {
                result.push(founder_state(*count));
            }
        }

        // The copies may be achievable one allele at a time but not jointly.
        let copies: Vec<usize> = counts.iter().enumerate().flat_map(|(allele, count)| std::iter::repeat(allele).take(*count)).collect();
        let explained = copies.len() == sources.len() && assign_copies(&copies, &sources, &mut vec![false; sources.len()]);
        let flagged = result.iter().any(|x| *x == Inheritance::Denovo || *x == Inheritance::Omission);
        if !explained && !flagged {
            let mut carrier = false;
            for (allele, count) in counts.iter().enumerate().skip(1) {
                if *count > 0 {
                    result[allele] = Inheritance::Denovo;
                    carrier = true;
                }
            }
            if !carrier {
                result[0] = Inheritance::Omission;
            }
        }
        result
    }

    fn classification(&self) -> &Classification {
        self.classification.get_or_init(|| {
            let members: Vec<Vec<Inheritance>> = (0..self.family.len()).map(|member| self.classify_member(member)).collect();
            let worst = members.iter().flatten().copied().max().unwrap_or(Inheritance::Reference);
            let carrier = members.iter().any(|x| x.iter().skip(1).any(|y| *y != Inheritance::Reference));
            let variant = match worst {
                Inheritance::Unknown | Inheritance::Denovo | Inheritance::Omission => worst,
                _ if carrier => Inheritance::Mendelian,
                _ => Inheritance::Reference,
            };
            Classification { variant, members }
        })
    }

    /// Returns the inheritance classification of the variant.
    pub fn inheritance(&self) -> Inheritance {
        self.classification().variant
    }

    /// Returns `true` if the variant is classified as Mendelian.
    pub fn is_mendelian(&self) -> bool {
        self.inheritance() == Inheritance::Mendelian
    }

    /// Returns the inheritance classification of the allele in the member.
    pub fn member_inheritance(&self, member: usize, allele_index: usize) -> Inheritance {
        self.classification().members[member][allele_index]
    }

    /// Returns a view of the allele in this family.
    pub fn allele(&self, allele_index: usize) -> Option<FamilyAllele<'_>> {
        if allele_index < self.summary.allele_count() {
            Some(FamilyAllele { variant: self, allele_index })
        } else {
            None
        }
    }

    /// Returns views of all alleles, including the reference.
    pub fn alleles(&self) -> impl Iterator<Item = FamilyAllele<'_>> {
        (0..self.summary.allele_count()).map(move |allele_index| FamilyAllele { variant: self, allele_index })
    }

    /// Returns views of the alternative alleles carried by at least one member.
    pub fn family_alt_alleles(&self) -> impl Iterator<Item = FamilyAllele<'_>> {
        self.alleles().skip(1).filter(|x| !x.carriers().is_empty())
    }
}

impl Display for FamilyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.summary, self.family_id(), codec::encode_genotype(&self.genotype), self.inheritance())
    }
}

//-----------------------------------------------------------------------------

/// An allele of a summary variant in one family.
#[derive(Clone, Copy, Debug)]
pub struct FamilyAllele<'a> {
    variant: &'a FamilyVariant,
    allele_index: usize,
}

impl<'a> FamilyAllele<'a> {
    pub fn allele_index(&self) -> usize {
        self.allele_index
    }

    pub fn variant(&self) -> &'a FamilyVariant {
        self.variant
    }

    pub fn summary_allele(&self) -> &'a SummaryAllele {
        &self.variant.summary.alleles()[self.allele_index]
    }

    /// Returns the members with at least one copy of the allele.
    pub fn carriers(&self) -> Vec<usize> {
        let best_state = self.variant.best_state();
        (0..best_state.cols()).filter(|member| best_state.get(self.allele_index, *member) > 0).collect()
    }

    /// Returns the identifiers of the carriers.
    pub fn allele_in_members(&self) -> Vec<&'a str> {
        let members = self.variant.family.members();
        self.carriers().into_iter().map(|x| members[x].person_id.as_str()).collect()
    }

    fn carrier_mask<F: Fn(usize) -> u64>(&self, bit: F) -> u64 {
        self.carriers().into_iter().fold(0, |mask, member| mask | bit(member))
    }

    /// Returns the union of the roles of the carriers.
    pub fn allele_in_roles(&self) -> u64 {
        let members = self.variant.family.members();
        self.carrier_mask(|x| members[x].role.bit())
    }

    /// Returns the union of the sexes of the carriers.
    pub fn allele_in_sexes(&self) -> u64 {
        let members = self.variant.family.members();
        self.carrier_mask(|x| members[x].sex.bit())
    }

    /// Returns the union of the affected statuses of the carriers.
    pub fn allele_in_statuses(&self) -> u64 {
        let members = self.variant.family.members();
        self.carrier_mask(|x| members[x].status.bit())
    }

    /// Returns the inheritance classification of the allele in each member.
    pub fn member_inheritance(&self) -> Vec<Inheritance> {
        (0..self.variant.family.len()).map(|member| self.variant.member_inheritance(member, self.allele_index)).collect()
    }

    /// Returns the union of the inheritance classifications over all members.
    pub fn inheritance_in_members(&self) -> u64 {
        self.member_inheritance().into_iter().fold(0, |mask, x| mask | x.bit())
    }

    /// Returns `true` if the allele is de novo in at least one member.
    pub fn is_denovo(&self) -> bool {
        self.member_inheritance().contains(&Inheritance::Denovo)
    }
}

//-----------------------------------------------------------------------------
