//! Blob columns for summary and family variants.
//!
//! Both blobs are gzip-compressed JSON.
//! The summary blob is the list of [`SummaryRecord`]s of the variant.
//! The family blob stores the family id, the genotype and the best state in the matrix text encoding, and the family-level attributes.

use crate::codec;
use crate::error::DecodeError;
use crate::family_variant::FamilyVariant;
use crate::pedigree::FamilyLookup;
use crate::utils;
use crate::variant::{Attributes, SummaryRecord, SummaryVariant, SummaryVariantFactory};

use std::sync::Arc;

use serde::{Deserialize, Serialize};


//-----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct FamilyVariantData {
    family_id: String,
    genotype: String,
    best_state: String,
    #[serde(default)]
    attributes: Attributes,
}

fn decode_json<T: for<'de> Deserialize<'de>>(blob: &[u8]) -> Result<T, DecodeError> {
    let bytes = utils::gunzip(blob).map_err(DecodeError::Blob)?;
    serde_json::from_slice(&bytes).map_err(|x| DecodeError::Blob(x.to_string()))
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let bytes = serde_json::to_vec(value).map_err(|x| x.to_string())?;
    utils::gzip(&bytes)
}

//-----------------------------------------------------------------------------

/// Serializes a summary variant into a `summary_variant_data` blob.
pub fn serialize_summary_variant(variant: &SummaryVariant) -> Result<Vec<u8>, String> {
    encode_json(&variant.records())
}

/// Deserializes a `summary_variant_data` blob.
pub fn deserialize_summary_variant(blob: &[u8]) -> Result<SummaryVariant, DecodeError> {
    let records: Vec<SummaryRecord> = decode_json(blob)?;
    Ok(SummaryVariantFactory::from_records(records)?)
}

/// Serializes a family variant into a `family_variant_data` blob.
pub fn serialize_family_variant(variant: &FamilyVariant) -> Result<Vec<u8>, String> {
    let data = FamilyVariantData {
        family_id: variant.family_id().to_string(),
        genotype: codec::encode_genotype(variant.genotype()),
        best_state: codec::encode_best_state(variant.best_state()),
        attributes: variant.attributes().clone(),
    };
    encode_json(&data)
}

/// Deserializes a `family_variant_data` blob for the given summary variant.
///
/// The family is resolved through the lookup.
pub fn deserialize_family_variant(
    blob: &[u8], summary: Arc<SummaryVariant>, families: &dyn FamilyLookup
) -> Result<FamilyVariant, DecodeError> {
    let data: FamilyVariantData = decode_json(blob)?;
    let family = families.family(&data.family_id).ok_or(DecodeError::UnknownFamily(data.family_id.clone()))?;
    let genotype = codec::decode_genotype(&data.genotype)?;
    let best_state = codec::decode_best_state(&data.best_state)?;
    let mut variant = FamilyVariant::new(summary, family, genotype)?.with_best_state(best_state)?;
    variant.set_attributes(data.attributes);
    Ok(variant)
}

//-----------------------------------------------------------------------------
