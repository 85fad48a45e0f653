//! Variant codec: allele normalization and matrix text encoding.
//!
//! ### Normalization
//!
//! [`normalize`] converts a raw `(position, reference, alternative)` triple into a minimal [`VariantDescription`].
//! The common suffix is trimmed first and the common prefix second, and the position is advanced by the length of the trimmed prefix.
//! The result has a canonical rendering (see [`VariantDescription`]'s `Display` implementation):
//!
//! * `sub(X->Y)`: single base substitution.
//! * `ins(SEQ)`: insertion of `SEQ` before the position.
//! * `del(N)`: deletion of `N` bases starting at the position.
//! * `comp(X->Y)`: any other change, including `comp(->)` for a no-op.
//!
//! A tandem repeat detector looks at the raw pair before trimming.
//! If both sequences are copies of the same repeat unit, the description also carries a [`TandemRepeat`].
//!
//! ### Matrices
//!
//! Genotypes (2 x members) and best states (alleles x members) are stored as text.
//! Cells in a row are separated by [`COLUMN_SEPARATOR`] and rows by [`ROW_SEPARATOR`].
//! Unknown calls ([`UNKNOWN`]) are written as [`UNKNOWN_TOKEN`].
//! For example, a trio genotype with the child heterozygous is `0,0,0/0,0,1`.

use crate::error::CodecError;

use std::fmt::{self, Display};


//-----------------------------------------------------------------------------

/// The kind of a normalized allele edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantKind {
    /// Single base substitution.
    Substitution,
    /// Insertion of one or more bases.
    Insertion,
    /// Deletion of one or more bases.
    Deletion,
    /// Anything else, including the no-op edit.
    Complex,
}

/// Whether a tandem repeat gains or loses copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepeatDirection {
    SmallInsertion,
    SmallDeletion,
}

/// A reference / alternative pair that consists of copies of the same repeat unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TandemRepeat {
    /// The primitive repeat unit.
    pub unit: String,
    /// Number of copies in the reference sequence.
    pub reference_copies: usize,
    /// Number of copies in the alternative sequence.
    pub alternative_copies: usize,
    /// Direction of the change.
    pub direction: RepeatDirection,
}

/// Payload of a normalized edit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Payload {
    /// Replaced bases for substitutions and complex edits.
    Change { reference: String, alternative: String },
    /// Inserted bases.
    Inserted(String),
    /// Number of deleted bases.
    Deleted(usize),
}

/// A minimal, deterministic description of an allele edit.
///
/// # Examples
///
/// ```
/// use famvar_base::codec::{self, VariantKind};
///
/// let ins = codec::normalize(1, "A", "AA");
/// assert_eq!(ins.kind, VariantKind::Insertion);
/// assert_eq!(ins.position, 1);
/// assert_eq!(ins.length, 1);
/// assert_eq!(ins.to_string(), "ins(A)");
///
/// let del = codec::normalize(1, "AAAAAA", "AAA");
/// assert_eq!(del.kind, VariantKind::Deletion);
/// assert_eq!(del.to_string(), "del(3)");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariantDescription {
    /// Kind of the edit.
    pub kind: VariantKind,
    /// 1-based position of the first affected base, or the base after the insertion point.
    pub position: u64,
    /// Payload of the edit.
    pub payload: Payload,
    /// Length of the edit in bases.
    pub length: usize,
    /// Tandem repeat annotation, if the raw pair is a repeat expansion or contraction.
    pub tandem_repeat: Option<TandemRepeat>,
    // Trimmed reference and alternative, if known.
    alleles: Option<(String, String)>,
}

impl VariantDescription {
    /// Returns the minimal `(position, reference, alternative)` triple for the edit.
    ///
    /// This is the trimmed pair produced by [`normalize`].
    /// Normalizing the returned triple again yields the same edit.
    /// Returns [`None`] for descriptions parsed from text, as deletions do not store the deleted bases.
    pub fn minimal(&self) -> Option<(u64, &str, &str)> {
        self.alleles.as_ref().map(|(reference, alternative)| {
            (self.position, reference.as_str(), alternative.as_str())
        })
    }

    /// Returns `true` if the edit is a tandem repeat expansion or contraction.
    pub fn is_tandem_repeat(&self) -> bool {
        self.tandem_repeat.is_some()
    }

    /// Returns the last reference position affected by the edit.
    ///
    /// Insertions do not consume reference bases, so their end is the position itself.
    pub fn end_position(&self) -> u64 {
        match &self.payload {
            Payload::Inserted(_) => self.position,
            Payload::Deleted(count) => self.position + *count as u64 - 1,
            Payload::Change { reference, .. } => {
                if reference.is_empty() {
                    self.position
                } else {
                    self.position + reference.len() as u64 - 1
                }
            }
        }
    }
}

impl Display for VariantDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.payload) {
            (VariantKind::Substitution, Payload::Change { reference, alternative }) => {
                write!(f, "sub({}->{})", reference, alternative)
            },
            (_, Payload::Inserted(sequence)) => write!(f, "ins({})", sequence),
            (_, Payload::Deleted(count)) => write!(f, "del({})", count),
            (_, Payload::Change { reference, alternative }) => {
                write!(f, "comp({}->{})", reference, alternative)
            },
        }
    }
}

/// Returns the canonical rendering of the description.
pub fn format(description: &VariantDescription) -> String {
    description.to_string()
}

//-----------------------------------------------------------------------------

// Returns the length of the shortest unit that repeats to form `sequence`.
fn primitive_root(sequence: &[u8]) -> usize {
    for unit in 1..sequence.len() {
        if sequence.len() % unit == 0 && sequence.chunks(unit).all(|chunk| chunk == &sequence[..unit]) {
            return unit;
        }
    }
    sequence.len()
}

/// Returns the tandem repeat annotation for a raw reference / alternative pair.
///
/// Both sequences must be non-empty copies of the same primitive unit with different copy counts.
pub fn detect_tandem_repeat(reference: &str, alternative: &str) -> Option<TandemRepeat> {
    let (ref_bytes, alt_bytes) = (reference.as_bytes(), alternative.as_bytes());
    if ref_bytes.is_empty() || alt_bytes.is_empty() || ref_bytes.len() == alt_bytes.len() {
        return None;
    }
    let unit_len = primitive_root(ref_bytes);
    if alt_bytes.len() % unit_len != 0 {
        return None;
    }
    let unit = &ref_bytes[..unit_len];
    if !alt_bytes.chunks(unit_len).all(|chunk| chunk == unit) {
        return None;
    }

    let reference_copies = ref_bytes.len() / unit_len;
    let alternative_copies = alt_bytes.len() / unit_len;
    let direction = if alternative_copies > reference_copies {
        RepeatDirection::SmallInsertion
    } else {
        RepeatDirection::SmallDeletion
    };
    Some(TandemRepeat {
        unit: String::from_utf8_lossy(unit).into_owned(),
        reference_copies, alternative_copies, direction,
    })
}

// Returns the length of the common suffix.
fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

// Returns the length of the common prefix.
fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Normalizes a raw allele into a minimal description.
///
/// This never fails: every pair has a defined classification, including `reference == alternative`, which becomes a complex edit of length 0.
pub fn normalize(position: u64, reference: &str, alternative: &str) -> VariantDescription {
    let tandem_repeat = detect_tandem_repeat(reference, alternative);

    let (ref_bytes, alt_bytes) = (reference.as_bytes(), alternative.as_bytes());
    let suffix = common_suffix(ref_bytes, alt_bytes);
    let ref_bytes = &ref_bytes[..ref_bytes.len() - suffix];
    let alt_bytes = &alt_bytes[..alt_bytes.len() - suffix];
    let prefix = common_prefix(ref_bytes, alt_bytes);
    let reference_trimmed = String::from_utf8_lossy(&ref_bytes[prefix..]).into_owned();
    let alternative_trimmed = String::from_utf8_lossy(&alt_bytes[prefix..]).into_owned();
    let position = position + prefix as u64;

    let (kind, payload, length) = match (reference_trimmed.len(), alternative_trimmed.len()) {
        (0, 0) => (
            VariantKind::Complex,
            Payload::Change { reference: String::new(), alternative: String::new() },
            0,
        ),
        (0, alt_len) => (VariantKind::Insertion, Payload::Inserted(alternative_trimmed.clone()), alt_len),
        (ref_len, 0) => (VariantKind::Deletion, Payload::Deleted(ref_len), ref_len),
        (ref_len, alt_len) => {
            let kind = if ref_len == 1 && alt_len == 1 { VariantKind::Substitution } else { VariantKind::Complex };
            let payload = Payload::Change {
                reference: reference_trimmed.clone(),
                alternative: alternative_trimmed.clone(),
            };
            (kind, payload, ref_len.max(alt_len))
        },
    };

    VariantDescription {
        kind, position, payload, length, tandem_repeat,
        alleles: Some((reference_trimmed, alternative_trimmed)),
    }
}

/// Parses a canonical rendering produced by [`format`].
///
/// The position is not part of the rendering and must be given separately.
/// Tandem repeat annotations cannot be recovered from the text.
pub fn parse_description(position: u64, text: &str) -> Result<VariantDescription, CodecError> {
    let invalid = || CodecError::InvalidDescription(text.to_string());
    let open = text.find('(').ok_or_else(invalid)?;
    if !text.ends_with(')') {
        return Err(invalid());
    }
    let (name, body) = (&text[..open], &text[open + 1..text.len() - 1]);

    let change = |body: &str| -> Option<(String, String)> {
        let (reference, alternative) = body.split_once("->")?;
        Some((reference.to_string(), alternative.to_string()))
    };

    let (kind, payload, length) = match name {
        "sub" => {
            let (reference, alternative) = change(body).ok_or_else(invalid)?;
            if reference.len() != 1 || alternative.len() != 1 {
                return Err(invalid());
            }
            (VariantKind::Substitution, Payload::Change { reference, alternative }, 1)
        },
        "ins" => {
            if body.is_empty() {
                return Err(invalid());
            }
            (VariantKind::Insertion, Payload::Inserted(body.to_string()), body.len())
        },
        "del" => {
            let count: usize = body.parse().map_err(|_| invalid())?;
            if count == 0 {
                return Err(invalid());
            }
            (VariantKind::Deletion, Payload::Deleted(count), count)
        },
        "comp" => {
            let (reference, alternative) = change(body).ok_or_else(invalid)?;
            let length = reference.len().max(alternative.len());
            (VariantKind::Complex, Payload::Change { reference, alternative }, length)
        },
        _ => return Err(invalid()),
    };

    Ok(VariantDescription { kind, position, payload, length, tandem_repeat: None, alleles: None })
}

//-----------------------------------------------------------------------------

/// Cell value for an unknown call.
pub const UNKNOWN: i32 = -1;

/// Separator between the rows of an encoded matrix.
pub const ROW_SEPARATOR: char = '/';

/// Separator between the cells of a row in an encoded matrix.
pub const COLUMN_SEPARATOR: char = ',';

/// Encoding of an unknown cell.
pub const UNKNOWN_TOKEN: &str = ".";

/// A dense row-major matrix of small integers.
///
/// Used for genotypes (row = chromosome copy, column = family member) and best states (row = allele, column = family member).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl Matrix {
    /// Creates a zero-filled matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix { rows, cols, data: vec![0; rows * cols] }
    }

    /// Builds a matrix from rows of equal length.
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Result<Self, CodecError> {
        let cols = rows.first().map(|row| row.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (index, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(CodecError::RaggedMatrix { row: index, expected: cols, found: row.len() });
            }
            data.extend_from_slice(row);
        }
        Ok(Matrix { rows: rows.len(), cols, data })
    }

    /// Returns the number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the cell at the given position.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.cols + col]
    }

    /// Sets the cell at the given position.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: i32) {
        self.data[row * self.cols + col] = value;
    }

    /// Returns the given row.
    pub fn row(&self, row: usize) -> &[i32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Returns an iterator over the cells of the given column.
    pub fn column(&self, col: usize) -> impl Iterator<Item = i32> + '_ {
        (0..self.rows).map(move |row| self.get(row, col))
    }

    /// Returns `true` if any cell is unknown.
    pub fn has_unknown(&self) -> bool {
        self.data.iter().any(|&value| value < 0)
    }

    /// Returns the matrix as a vector of rows.
    pub fn to_rows(&self) -> Vec<Vec<i32>> {
        (0..self.rows).map(|row| self.row(row).to_vec()).collect()
    }
}

//-----------------------------------------------------------------------------

fn encode_matrix(matrix: &Matrix) -> String {
    let mut result = String::with_capacity(2 * matrix.rows() * matrix.cols());
    for row in 0..matrix.rows() {
        if row > 0 {
            result.push(ROW_SEPARATOR);
        }
        for (col, value) in matrix.row(row).iter().enumerate() {
            if col > 0 {
                result.push(COLUMN_SEPARATOR);
            }
            if *value == UNKNOWN {
                result.push_str(UNKNOWN_TOKEN);
            } else {
                result.push_str(&value.to_string());
            }
        }
    }
    result
}

fn decode_cell(token: &str) -> Result<i32, CodecError> {
    if token == UNKNOWN_TOKEN {
        return Ok(UNKNOWN);
    }
    let value: i32 = token.parse().map_err(|_| CodecError::InvalidCell(token.to_string()))?;
    if value < 0 {
        return Err(CodecError::InvalidCell(token.to_string()));
    }
    Ok(value)
}

fn decode_matrix(text: &str) -> Result<Matrix, CodecError> {
    if text.is_empty() {
        return Err(CodecError::EmptyMatrix);
    }
    let mut rows: Vec<Vec<i32>> = Vec::new();
    for row in text.split(ROW_SEPARATOR) {
        let cells = if row.is_empty() {
            Vec::new()
        } else {
            row.split(COLUMN_SEPARATOR).map(decode_cell).collect::<Result<Vec<i32>, CodecError>>()?
        };
        rows.push(cells);
    }
    Matrix::from_rows(rows)
}

/// Encodes a 2 x members genotype matrix.
pub fn encode_genotype(genotype: &Matrix) -> String {
    encode_matrix(genotype)
}

/// Decodes a genotype matrix, which must have exactly two rows.
pub fn decode_genotype(text: &str) -> Result<Matrix, CodecError> {
    let matrix = decode_matrix(text)?;
    if matrix.rows() != 2 {
        return Err(CodecError::WrongRowCount { expected: 2, found: matrix.rows() });
    }
    Ok(matrix)
}

/// Encodes an alleles x members best state matrix.
pub fn encode_best_state(best_state: &Matrix) -> String {
    encode_matrix(best_state)
}

/// Decodes a best state matrix.
pub fn decode_best_state(text: &str) -> Result<Matrix, CodecError> {
    decode_matrix(text)
}

/// Checks that each known column of the best state sums to the expected ploidy of the member.
///
/// Columns with unknown cells are skipped.
pub fn validate_best_state(best_state: &Matrix, ploidies: &[usize]) -> Result<(), CodecError> {
    if ploidies.len() != best_state.cols() {
        return Err(CodecError::RaggedMatrix { row: 0, expected: ploidies.len(), found: best_state.cols() });
    }
    for (member, &expected) in ploidies.iter().enumerate() {
        if best_state.column(member).any(|value| value < 0) {
            continue;
        }
        let found: i32 = best_state.column(member).sum();
        if found as usize != expected {
            return Err(CodecError::PloidyMismatch { member, expected, found: found as usize });
        }
    }
    Ok(())
}

//-----------------------------------------------------------------------------
