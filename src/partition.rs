//! Partition bins and scan pruning.
//!
//! Every allele is assigned to a partition by four bins:
//!
//! * Region bin: `<chrom>_<n>` for target chromosomes and `other_<n>` for the rest, where `n` is the position divided by the region length.
//!   Non-target chromosomes share one coordinate space, in the order of [`PartitionConfig::chromosome_lengths`].
//! * Coding bin: 1 if any effect type of the allele is a coding effect type.
//! * Frequency bin: 0 for de novo, 1 for ultra-rare (at most one observed copy), 2 for rare, and 3 for common alleles.
//! * Family bin: a stable hash of the family id modulo the number of family bins (family alleles only).
//!
//! The family bin uses 64-bit FNV-1a over the UTF-8 bytes of the family id.
//! Readers and writers of the same store must agree on it, so it must never change.

use crate::effects;
use crate::family_variant::FamilyAllele;
use crate::variant::SummaryAllele;

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};


//-----------------------------------------------------------------------------

/// GRCh38 primary assembly chromosome lengths.
pub const GRCH38_CHROMOSOMES: [(&str, u64); 25] = [
    ("chr1", 248_956_422), ("chr2", 242_193_529), ("chr3", 198_295_559), ("chr4", 190_214_555),
    ("chr5", 181_538_259), ("chr6", 170_805_979), ("chr7", 159_345_973), ("chr8", 145_138_636),
    ("chr9", 138_394_717), ("chr10", 133_797_422), ("chr11", 135_086_622), ("chr12", 133_275_309),
    ("chr13", 114_364_328), ("chr14", 107_043_718), ("chr15", 101_991_189), ("chr16", 90_338_345),
    ("chr17", 83_257_441), ("chr18", 80_373_285), ("chr19", 58_617_616), ("chr20", 64_444_167),
    ("chr21", 46_709_983), ("chr22", 50_818_468), ("chrX", 156_040_895), ("chrY", 57_227_415),
    ("chrM", 16_569),
];

/// Partitioning parameters.
///
/// The configuration is stored with the data, and readers always use the configuration of the writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Length of a genomic region bin in bases.
    pub region_length: u64,
    /// Chromosomes with their own region bins.
    pub target_chromosomes: Vec<String>,
    /// Chromosome lengths in canonical order.
    pub chromosome_lengths: Vec<(String, u64)>,
    /// Number of family bins.
    pub family_bin_size: u64,
    /// Upper bound (in percent) for rare alleles.
    pub rare_boundary_pct: f64,
    /// Effect types that place an allele in coding bin 1.
    pub coding_effect_types: Vec<String>,
}

impl PartitionConfig {
    /// Default region length.
    pub const REGION_LENGTH: u64 = 3_000_000;

    /// Default number of family bins.
    pub const FAMILY_BIN_SIZE: u64 = 10;

    /// Default upper bound for rare alleles.
    pub const RARE_BOUNDARY_PCT: f64 = 5.0;

    /// Parses a configuration from TOML.
    ///
    /// Missing fields get their default values.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let config: PartitionConfig = toml::from_str(text).map_err(|x| x.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let text = fs::read_to_string(&filename).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
        Self::from_toml_str(&text)
    }

    /// Checks that the parameters are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.region_length == 0 {
            return Err(String::from("Region length must be positive"));
        }
        if self.family_bin_size == 0 {
            return Err(String::from("Family bin size must be positive"));
        }
        if !(0.0..=100.0).contains(&self.rare_boundary_pct) {
            return Err(format!("Rare boundary {} is not a percentage", self.rare_boundary_pct));
        }
        let mut seen = BTreeSet::new();
        for (name, _) in self.chromosome_lengths.iter() {
            if !seen.insert(name) {
                return Err(format!("Duplicate chromosome length for {}", name));
            }
        }
        for effect_type in self.coding_effect_types.iter() {
            if !effects::is_known_effect_type(effect_type) {
                return Err(format!("Unknown coding effect type: {}", effect_type));
            }
        }
        Ok(())
    }

    /// Returns `true` if the chromosome has its own region bins.
    pub fn is_target(&self, chromosome: &str) -> bool {
        self.target_chromosomes.iter().any(|x| x == chromosome)
    }

    /// Returns the length of the chromosome, if known.
    pub fn chromosome_length(&self, chromosome: &str) -> Option<u64> {
        self.chromosome_lengths.iter().find(|(name, _)| name == chromosome).map(|(_, len)| *len)
    }

    // Offset of a non-target chromosome in the shared coordinate space.
    fn other_offset(&self, chromosome: &str) -> u64 {
        let mut offset = 0;
        for (name, len) in self.chromosome_lengths.iter() {
            if name == chromosome {
                return offset;
            }
            if !self.is_target(name) {
                offset += len;
            }
        }
        0
    }

    /// Returns `true` if the effect type is a coding effect type.
    pub fn is_coding(&self, effect_type: &str) -> bool {
        self.coding_effect_types.iter().any(|x| x == effect_type)
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        let chromosome_lengths: Vec<(String, u64)> = GRCH38_CHROMOSOMES.iter().map(|(name, len)| (name.to_string(), *len)).collect();
        let target_chromosomes = chromosome_lengths.iter().take(23).map(|(name, _)| name.clone()).collect();
        PartitionConfig {
            region_length: Self::REGION_LENGTH,
            target_chromosomes,
            chromosome_lengths,
            family_bin_size: Self::FAMILY_BIN_SIZE,
            rare_boundary_pct: Self::RARE_BOUNDARY_PCT,
            coding_effect_types: effects::default_coding_effect_types(),
        }
    }
}

//-----------------------------------------------------------------------------

const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// 64-bit FNV-1a hash of the bytes.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Returns the region bin of a position.
///
/// Positions past the end of a chromosome of known length go to the bin of the last position.
pub fn region_bin(config: &PartitionConfig, chromosome: &str, position: u64) -> String {
    let position = clamp_position(config, chromosome, position);
    if config.is_target(chromosome) {
        format!("{}_{}", chromosome, position / config.region_length)
    } else {
        format!("other_{}", config.other_offset(chromosome).saturating_add(position) / config.region_length)
    }
}

fn clamp_position(config: &PartitionConfig, chromosome: &str, position: u64) -> u64 {
    match config.chromosome_length(chromosome) {
        Some(length) => position.min(length),
        None => position,
    }
}

/// Frequency bin for de novo alleles.
pub const DENOVO_BIN: u8 = 0;

/// Frequency bin for alleles with at most one observed copy.
pub const ULTRA_RARE_BIN: u8 = 1;

/// Frequency bin for rare alleles.
pub const RARE_BIN: u8 = 2;

/// Frequency bin for common alleles.
pub const COMMON_BIN: u8 = 3;

/// Returns the frequency bin of an allele.
///
/// A missing allele count is treated as 0 and a missing frequency as 0.0.
/// Values exactly at a boundary go to the rarer bin.
pub fn frequency_bin(allele_count: Option<u64>, allele_freq: Option<f64>, is_denovo: bool, rare_boundary_pct: f64) -> u8 {
    if is_denovo {
        DENOVO_BIN
    } else if allele_count.unwrap_or(0) <= 1 {
        ULTRA_RARE_BIN
    } else if allele_freq.unwrap_or(0.0) <= rare_boundary_pct {
        RARE_BIN
    } else {
        COMMON_BIN
    }
}

/// Returns 1 if any of the effect types is a coding effect type.
pub fn coding_bin<'a, I: IntoIterator<Item = &'a str>>(config: &PartitionConfig, effect_types: I) -> u8 {
    if effect_types.into_iter().any(|x| config.is_coding(x)) { 1 } else { 0 }
}

/// Returns the family bin of a family id.
pub fn family_bin(family_id: &str, family_bin_size: u64) -> u64 {
    fnv1a(family_id.as_bytes()) % family_bin_size.max(1)
}

//-----------------------------------------------------------------------------

/// Partition bins of an allele.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionBins {
    pub region_bin: String,
    pub coding_bin: u8,
    pub frequency_bin: u8,
    /// Only for family alleles.
    pub family_bin: Option<u64>,
}

impl PartitionBins {
    /// Returns the path of the summary allele partition.
    pub fn summary_path(&self) -> String {
        format!("region_bin={}/coding_bin={}/frequency_bin={}", self.region_bin, self.coding_bin, self.frequency_bin)
    }

    /// Returns the path of the family allele partition, or the summary partition if there is no family bin.
    pub fn family_path(&self) -> String {
        match self.family_bin {
            Some(family_bin) => format!("{}/family_bin={}", self.summary_path(), family_bin),
            None => self.summary_path(),
        }
    }
}

impl Display for PartitionBins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.family_path())
    }
}

//-----------------------------------------------------------------------------

/// A genomic region for queries.
///
/// Positions are 1-based and inclusive.
/// Missing bounds extend to the start or end of the chromosome.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub chromosome: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl Region {
    /// Creates a region with both bounds.
    pub fn new(chromosome: &str, start: u64, end: u64) -> Self {
        Region { chromosome: chromosome.to_string(), start: Some(start), end: Some(end) }
    }

    /// Creates a region covering the entire chromosome.
    pub fn chromosome(chromosome: &str) -> Self {
        Region { chromosome: chromosome.to_string(), start: None, end: None }
    }

    /// Parses `chrom`, `chrom:pos`, or `chrom:start-end`.
    ///
    /// Thousands separators `,` are allowed in positions.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let (chromosome, interval) = match text.rsplit_once(':') {
            Some((chromosome, interval)) => (chromosome, Some(interval)),
            None => (text, None),
        };
        if chromosome.is_empty() {
            return Err(format!("Missing chromosome in region {}", text));
        }
        let Some(interval) = interval else {
            return Ok(Region::chromosome(chromosome));
        };

        let parse_position = |value: &str| -> Result<u64, String> {
            value.replace(',', "").trim().parse::<u64>().map_err(|_| format!("Invalid position {} in region {}", value, text))
        };
        let (start, end) = match interval.split_once('-') {
            Some((start, end)) => (parse_position(start)?, parse_position(end)?),
            None => {
                let position = parse_position(interval)?;
                (position, position)
            },
        };
        if start > end {
            return Err(format!("Region {} ends before it starts", text));
        }
        Ok(Region::new(chromosome, start, end))
    }

    /// Returns `true` if the region contains the position.
    pub fn contains(&self, chromosome: &str, position: u64) -> bool {
        self.chromosome == chromosome
            && self.start.map_or(true, |x| x <= position)
            && self.end.map_or(true, |x| position <= x)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (None, None) => write!(f, "{}", self.chromosome),
            (start, end) => write!(f, "{}:{}-{}", self.chromosome, start.unwrap_or(0), end.map_or(String::new(), |x| x.to_string())),
        }
    }
}

/// Maximum number of region bins listed by [`prune`].
pub const MAX_PRUNED_BINS: u64 = 4096;

/// Returns the region bins intersecting the regions.
///
/// Returns `None` if pruning is not possible, because a region extends to the end of a chromosome with unknown length,
/// or because the regions cover more than [`MAX_PRUNED_BINS`] bins.
pub fn prune(config: &PartitionConfig, regions: &[Region]) -> Option<BTreeSet<String>> {
    let mut result = BTreeSet::new();
    for region in regions {
        let start = region.start.unwrap_or(0);
        let end = match region.end {
            Some(end) => end,
            None => config.chromosome_length(&region.chromosome)?,
        };
        if end < start {
            continue;
        }
        let start = clamp_position(config, &region.chromosome, start);
        let end = clamp_position(config, &region.chromosome, end);
        let (prefix, offset) = if config.is_target(&region.chromosome) {
            (region.chromosome.as_str(), 0)
        } else {
            ("other", config.other_offset(&region.chromosome))
        };
        let first = offset.saturating_add(start) / config.region_length;
        let last = offset.saturating_add(end) / config.region_length;
        if last - first >= MAX_PRUNED_BINS.saturating_sub(result.len() as u64) {
            return None;
        }
        for bin in first..=last {
            result.insert(format!("{}_{}", prefix, bin));
        }
    }
    Some(result)
}

//-----------------------------------------------------------------------------

/// Frequency bins eligible for a frequency filter.
///
/// Rows in `exact` bins match the filter.
/// Rows in `residual` bins need the exact predicate on the stored values.
/// Other bins cannot contain matching rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrequencyPlan {
    pub exact: BTreeSet<u8>,
    pub residual: BTreeSet<u8>,
}

impl FrequencyPlan {
    /// Plans a filter `min <= frequency <= max` on the allele frequency, with a missing frequency treated as 0.0.
    pub fn for_range(min: Option<f64>, max: Option<f64>, rare_boundary_pct: f64) -> Self {
        let mut result = FrequencyPlan::default();

        // De novo and ultra-rare alleles may have any frequency.
        result.residual.insert(DENOVO_BIN);
        result.residual.insert(ULTRA_RARE_BIN);

        // Rare alleles have frequency in (-inf, boundary].
        if !min.is_some_and(|x| x > rare_boundary_pct) {
            if min.is_none() && max.map_or(true, |x| x >= rare_boundary_pct) {
                result.exact.insert(RARE_BIN);
            } else {
                result.residual.insert(RARE_BIN);
            }
        }

        // Common alleles have frequency in (boundary, inf).
        if !max.is_some_and(|x| x <= rare_boundary_pct) {
            if max.is_none() && min.map_or(true, |x| x <= rare_boundary_pct) {
                result.exact.insert(COMMON_BIN);
            } else {
                result.residual.insert(COMMON_BIN);
            }
        }

        result
    }

    /// Plans an ultra-rare filter: at most one observed copy, with a missing count treated as 0.
    pub fn ultra_rare() -> Self {
        FrequencyPlan {
            exact: BTreeSet::from([ULTRA_RARE_BIN]),
            residual: BTreeSet::from([DENOVO_BIN]),
        }
    }

    /// Returns all bins that may contain matching rows.
    pub fn eligible(&self) -> BTreeSet<u8> {
        self.exact.union(&self.residual).copied().collect()
    }
}

//-----------------------------------------------------------------------------

/// Computes the partition bins of alleles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionDescriptor {
    config: PartitionConfig,
}

impl PartitionDescriptor {
    pub fn new(config: PartitionConfig) -> Self {
        PartitionDescriptor { config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Returns the bins of a summary allele.
    ///
    /// `seen_as_denovo` should be `true` if the allele is de novo in any family.
    pub fn summary_allele_bins(&self, allele: &SummaryAllele, seen_as_denovo: bool) -> PartitionBins {
        PartitionBins {
            region_bin: region_bin(&self.config, allele.chromosome(), allele.position()),
            coding_bin: coding_bin(&self.config, allele.effect_types()),
            frequency_bin: frequency_bin(allele.af_allele_count(), allele.af_allele_freq(), seen_as_denovo, self.config.rare_boundary_pct),
            family_bin: None,
        }
    }

    /// Returns the bins of a family allele.
    pub fn family_allele_bins(&self, allele: &FamilyAllele) -> PartitionBins {
        let mut result = self.summary_allele_bins(allele.summary_allele(), allele.is_denovo());
        result.family_bin = Some(family_bin(allele.variant().family_id(), self.config.family_bin_size));
        result
    }

    /// Returns the region bins intersecting the regions.
    pub fn prune(&self, regions: &[Region]) -> Option<BTreeSet<String>> {
        prune(&self.config, regions)
    }
}

//-----------------------------------------------------------------------------
