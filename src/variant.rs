//! Summary variants: multi-allelic variants at one locus, independent of any family.
//!
//! A [`SummaryVariant`] is built from per-allele [`SummaryRecord`]s by [`SummaryVariantFactory`].
//! Allele 0 is always the reference allele and has no alternative sequence.
//! Allele indices are dense and the alleles are sorted by index.
//!
//! Annotations (effects, frequencies, genomic scores) are opaque per-allele attribute maps.
//! They can be attached once with [`SummaryVariant::set_attributes`] and [`SummaryVariant::set_effects`] before the variant is shared.

use crate::codec::{self, RepeatDirection, VariantDescription, VariantKind};
use crate::error::MalformedVariantError;
use crate::filter::BitFlag;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};


//-----------------------------------------------------------------------------

/// Attribute key for the number of observed alternative allele copies.
pub const AF_ALLELE_COUNT: &str = "af_allele_count";

/// Attribute key for the allele frequency in percent.
pub const AF_ALLELE_FREQ: &str = "af_allele_freq";

/// Attribute key for the number of parents with a call at the locus.
pub const AF_PARENTS_CALLED: &str = "af_parents_called";

/// Attribute key for the percentage of parents with a call at the locus.
pub const AF_PARENTS_FREQ: &str = "af_parents_freq";

/// Symbolic alternative alleles for copy number gains.
pub const CNV_GAIN_ALLELES: [&str; 3] = ["<DUP>", "<CNV+>", "<INS>"];

/// Symbolic alternative alleles for copy number losses.
pub const CNV_LOSS_ALLELES: [&str; 2] = ["<DEL>", "<CNV->"];

/// Per-allele annotation attributes.
pub type Attributes = BTreeMap<String, serde_json::Value>;

//-----------------------------------------------------------------------------

/// Variant type of an alternative allele.
///
/// Tandem repeats are an additional tag on top of one of the generic types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariantType {
    Substitution,
    Insertion,
    Deletion,
    Complex,
    CnvGain,
    CnvLoss,
    TandemRepeat,
}

impl VariantType {
    /// Returns the generic type of a normalized edit.
    pub fn from_kind(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Substitution => VariantType::Substitution,
            VariantKind::Insertion => VariantType::Insertion,
            VariantKind::Deletion => VariantType::Deletion,
            VariantKind::Complex => VariantType::Complex,
        }
    }
}

impl BitFlag for VariantType {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sub" | "substitution" => Some(VariantType::Substitution),
            "ins" | "insertion" => Some(VariantType::Insertion),
            "del" | "deletion" => Some(VariantType::Deletion),
            "comp" | "complex" => Some(VariantType::Complex),
            "cnv+" => Some(VariantType::CnvGain),
            "cnv-" => Some(VariantType::CnvLoss),
            "tr" | "tandem_repeat" => Some(VariantType::TandemRepeat),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

impl Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantType::Substitution => "sub",
            VariantType::Insertion => "ins",
            VariantType::Deletion => "del",
            VariantType::Complex => "comp",
            VariantType::CnvGain => "CNV+",
            VariantType::CnvLoss => "CNV-",
            VariantType::TandemRepeat => "TR",
        };
        write!(f, "{}", name)
    }
}

/// How an allele was observed in the collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionType {
    #[default]
    Transmitted,
    Denovo,
}

impl TransmissionType {
    /// Returns the integer stored in the `transmission_type` column.
    pub fn code(self) -> i64 {
        match self {
            TransmissionType::Transmitted => 1,
            TransmissionType::Denovo => 0,
        }
    }
}

/// An effect of an allele on a gene.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectGene {
    pub symbol: String,
    pub effect_type: String,
}

impl EffectGene {
    pub fn new(symbol: &str, effect_type: &str) -> Self {
        EffectGene { symbol: symbol.to_string(), effect_type: effect_type.to_string() }
    }
}

//-----------------------------------------------------------------------------

/// A stored per-allele record of a summary variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub bucket_index: u32,
    pub summary_index: u64,
    pub allele_index: usize,
    pub chromosome: String,
    /// 1-based position of the first reference base.
    pub position: u64,
    /// End position for symbolic alleles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_position: Option<u64>,
    pub reference: String,
    /// Alternative sequence, or `None` for the reference allele.
    #[serde(default)]
    pub alternative: Option<String>,
    #[serde(default)]
    pub transmission_type: TransmissionType,
    #[serde(default)]
    pub effect_genes: Vec<EffectGene>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// One allele of a summary variant.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryAllele {
    record: SummaryRecord,
    end_position: u64,
    variant_type: Option<VariantType>,
    tandem_repeat: Option<RepeatDirection>,
}

impl SummaryAllele {
    fn cnv_type(alternative: &str) -> Option<VariantType> {
        let upper = alternative.to_ascii_uppercase();
        if CNV_GAIN_ALLELES.contains(&upper.as_str()) {
            Some(VariantType::CnvGain)
        } else if CNV_LOSS_ALLELES.contains(&upper.as_str()) {
            Some(VariantType::CnvLoss)
        } else {
            None
        }
    }

    /// Creates an allele from a record, deriving the variant type and end position.
    pub fn from_record(record: SummaryRecord) -> Result<Self, MalformedVariantError> {
        if record.allele_index == 0 && record.alternative.is_some() {
            return Err(MalformedVariantError::ReferenceWithAlternative { summary_index: record.summary_index });
        }
        if record.allele_index > 0 && record.alternative.is_none() {
            return Err(MalformedVariantError::MissingAlternative {
                summary_index: record.summary_index,
                allele_index: record.allele_index,
            });
        }

        let reference_end = record.position + (record.reference.len().max(1) as u64) - 1;
        let mut end_position = record.end_position.unwrap_or(reference_end);
        let mut variant_type = None;
        let mut tandem_repeat = None;
        if let Some(alternative) = record.alternative.as_ref() {
            if let Some(cnv) = Self::cnv_type(alternative) {
                variant_type = Some(cnv);
            } else {
                let description = codec::normalize(record.position, &record.reference, alternative);
                variant_type = Some(VariantType::from_kind(description.kind));
                tandem_repeat = description.tandem_repeat.as_ref().map(|x| x.direction);
                end_position = end_position.max(description.end_position());
            }
        }

        Ok(SummaryAllele { record, end_position, variant_type, tandem_repeat })
    }

    /// Returns the stored record.
    pub fn record(&self) -> &SummaryRecord {
        &self.record
    }

    pub fn bucket_index(&self) -> u32 {
        self.record.bucket_index
    }

    pub fn summary_index(&self) -> u64 {
        self.record.summary_index
    }

    pub fn allele_index(&self) -> usize {
        self.record.allele_index
    }

    pub fn chromosome(&self) -> &str {
        &self.record.chromosome
    }

    /// Returns the 1-based position of the first reference base.
    pub fn position(&self) -> u64 {
        self.record.position
    }

    /// Returns the last reference position affected by the allele.
    pub fn end_position(&self) -> u64 {
        self.end_position
    }

    pub fn reference(&self) -> &str {
        &self.record.reference
    }

    pub fn alternative(&self) -> Option<&str> {
        self.record.alternative.as_deref()
    }

    /// Returns `true` for the implicit reference allele.
    pub fn is_reference(&self) -> bool {
        self.record.allele_index == 0
    }

    /// Returns the generic variant type, or `None` for the reference allele.
    pub fn variant_type(&self) -> Option<VariantType> {
        self.variant_type
    }

    /// Returns the direction of the tandem repeat change, if the allele is a tandem repeat.
    pub fn tandem_repeat(&self) -> Option<RepeatDirection> {
        self.tandem_repeat
    }

    /// Returns the variant type bitmask stored in the `variant_type` column.
    ///
    /// Tandem repeats have both the generic bit and the tandem repeat bit set.
    pub fn variant_type_mask(&self) -> u64 {
        let mut result = self.variant_type.map(|x| x.bit()).unwrap_or(0);
        if self.tandem_repeat.is_some() {
            result |= VariantType::TandemRepeat.bit();
        }
        result
    }

    /// Returns the normalized description of the edit, or `None` for reference and symbolic alleles.
    pub fn description(&self) -> Option<VariantDescription> {
        let alternative = self.alternative()?;
        if Self::cnv_type(alternative).is_some() {
            return None;
        }
        Some(codec::normalize(self.position(), self.reference(), alternative))
    }

    pub fn transmission_type(&self) -> TransmissionType {
        self.record.transmission_type
    }

    pub fn effect_genes(&self) -> &[EffectGene] {
        &self.record.effect_genes
    }

    /// Returns the distinct effect types of the allele.
    pub fn effect_types(&self) -> BTreeSet<&str> {
        self.record.effect_genes.iter().map(|x| x.effect_type.as_str()).collect()
    }

    /// Returns the distinct gene symbols of the allele.
    pub fn genes(&self) -> BTreeSet<&str> {
        self.record.effect_genes.iter().map(|x| x.symbol.as_str()).collect()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.record.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.record.attributes.get(name)
    }

    /// Returns a numeric attribute as a real number.
    pub fn real_attribute(&self, name: &str) -> Option<f64> {
        self.attribute(name).and_then(|x| x.as_f64())
    }

    /// Returns a numeric attribute as a non-negative integer.
    pub fn count_attribute(&self, name: &str) -> Option<u64> {
        let value = self.attribute(name)?;
        value.as_u64().or_else(|| value.as_f64().filter(|x| *x >= 0.0).map(|x| x as u64))
    }

    pub fn af_allele_count(&self) -> Option<u64> {
        self.count_attribute(AF_ALLELE_COUNT)
    }

    pub fn af_allele_freq(&self) -> Option<f64> {
        self.real_attribute(AF_ALLELE_FREQ)
    }

    pub fn af_parents_called(&self) -> Option<u64> {
        self.count_attribute(AF_PARENTS_CALLED)
    }

    pub fn af_parents_freq(&self) -> Option<f64> {
        self.real_attribute(AF_PARENTS_FREQ)
    }
}

impl Display for SummaryAllele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(description) => write!(f, "{}:{} {}", self.chromosome(), description.position, description),
            None => match self.alternative() {
                Some(alternative) => write!(f, "{}:{}-{} {}", self.chromosome(), self.position(), self.end_position(), alternative),
                None => write!(f, "{}:{} {}", self.chromosome(), self.position(), self.reference()),
            },
        }
    }
}

//-----------------------------------------------------------------------------

/// A multi-allelic variant at one locus.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryVariant {
    alleles: Vec<SummaryAllele>,
}

impl SummaryVariant {
    pub fn bucket_index(&self) -> u32 {
        self.alleles[0].bucket_index()
    }

    pub fn summary_index(&self) -> u64 {
        self.alleles[0].summary_index()
    }

    pub fn chromosome(&self) -> &str {
        self.alleles[0].chromosome()
    }

    pub fn position(&self) -> u64 {
        self.alleles[0].position()
    }

    /// Returns the largest end position over the alleles.
    pub fn end_position(&self) -> u64 {
        self.alleles.iter().map(|x| x.end_position()).max().unwrap_or(self.position())
    }

    /// Returns the number of alleles, including the reference.
    #[inline]
    pub fn allele_count(&self) -> usize {
        self.alleles.len()
    }

    /// Returns all alleles sorted by allele index.
    pub fn alleles(&self) -> &[SummaryAllele] {
        &self.alleles
    }

    pub fn allele(&self, allele_index: usize) -> Option<&SummaryAllele> {
        self.alleles.get(allele_index)
    }

    /// Returns the reference allele.
    pub fn reference(&self) -> &SummaryAllele {
        &self.alleles[0]
    }

    /// Returns the alternative alleles.
    pub fn alt_alleles(&self) -> &[SummaryAllele] {
        &self.alleles[1..]
    }

    /// Returns the records of all alleles.
    pub fn records(&self) -> Vec<SummaryRecord> {
        self.alleles.iter().map(|x| x.record().clone()).collect()
    }

    fn allele_mut(&mut self, allele_index: usize) -> Result<&mut SummaryAllele, MalformedVariantError> {
        let allele_count = self.allele_count();
        self.alleles.get_mut(allele_index).ok_or(MalformedVariantError::AlleleOutOfRange {
            allele_index: allele_index as i32,
            allele_count,
        })
    }

    /// Merges annotation attributes into an allele.
    pub fn set_attributes(&mut self, allele_index: usize, attributes: Attributes) -> Result<(), MalformedVariantError> {
        let allele = self.allele_mut(allele_index)?;
        allele.record.attributes.extend(attributes);
        Ok(())
    }

    /// Replaces the effects of an allele.
    pub fn set_effects(&mut self, allele_index: usize, effects: Vec<EffectGene>) -> Result<(), MalformedVariantError> {
        let allele = self.allele_mut(allele_index)?;
        allele.record.effect_genes = effects;
        Ok(())
    }
}

impl Display for SummaryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alternatives: Vec<&str> = self.alt_alleles().iter().filter_map(|x| x.alternative()).collect();
        write!(f, "{}:{} {}->{}", self.chromosome(), self.position(), self.reference().reference(), alternatives.join(","))
    }
}

//-----------------------------------------------------------------------------

/// Builds summary variants from records or raw fields.
pub struct SummaryVariantFactory;

impl SummaryVariantFactory {
    /// Builds a summary variant from its per-allele records in any order.
    ///
    /// # Errors
    ///
    /// Fails if the records are empty or belong to different summary variants or buckets.
    /// Also fails if the allele indices are not dense and unique.
    pub fn from_records(mut records: Vec<SummaryRecord>) -> Result<SummaryVariant, MalformedVariantError> {
        let first = records.first().ok_or(MalformedVariantError::Empty)?;
        let summary_index = first.summary_index;
        if let Some(other) = records.iter().find(|x| x.summary_index != summary_index) {
            return Err(MalformedVariantError::MixedSummaryIndex { expected: summary_index, found: other.summary_index });
        }
        let bucket_index = first.bucket_index;
        if let Some(other) = records.iter().find(|x| x.bucket_index != bucket_index) {
            return Err(MalformedVariantError::MixedBucketIndex { summary_index, expected: bucket_index, found: other.bucket_index });
        }

        records.sort_by_key(|x| x.allele_index);
        for (expected, record) in records.iter().enumerate() {
            if record.allele_index == expected {
                continue;
            }
            if expected > 0 && record.allele_index == expected - 1 {
                return Err(MalformedVariantError::DuplicateAllele { summary_index, allele_index: record.allele_index });
            }
            return Err(MalformedVariantError::AlleleGap { summary_index, expected, found: record.allele_index });
        }

        let alleles = records.into_iter().map(SummaryAllele::from_record).collect::<Result<Vec<_>, _>>()?;
        Ok(SummaryVariant { alleles })
    }

    /// Builds a summary variant from a raw VCF-style call with no annotations.
    pub fn from_raw(
        bucket_index: u32, summary_index: u64,
        chromosome: &str, position: u64, reference: &str, alternatives: &[&str]
    ) -> Result<SummaryVariant, MalformedVariantError> {
        let mut records = Vec::with_capacity(alternatives.len() + 1);
        let alleles = std::iter::once(None).chain(alternatives.iter().map(|x| Some(x.to_string())));
        for (allele_index, alternative) in alleles.enumerate() {
            records.push(SummaryRecord {
                bucket_index, summary_index, allele_index,
                chromosome: chromosome.to_string(),
                position,
                end_position: None,
                reference: reference.to_string(),
                alternative,
                transmission_type: TransmissionType::default(),
                effect_genes: Vec::new(),
                attributes: Attributes::new(),
            });
        }
        Self::from_records(records)
    }
}

//-----------------------------------------------------------------------------
