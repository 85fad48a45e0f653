//! Utility functions.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::{GzDecoder, MultiGzDecoder};
use flate2::write::GzEncoder;

//-----------------------------------------------------------------------------

// Utilities for working with files.

const SIZE_UNITS: [(f64, &str); 5] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
];

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: usize) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns a human-readable size of the file.
pub fn file_size<P: AsRef<Path>>(filename: P) -> Option<String> {
    let metadata = fs::metadata(filename).ok()?;
    Some(human_readable_size(metadata.len() as usize))
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let Ok(file) = File::open(filename) else {
        return false;
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>, String> {
    let file = File::open(&filename).map_err(|x| x.to_string())?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

//-----------------------------------------------------------------------------

// Compression for blob columns.

/// Compresses the bytes with gzip.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(|x| x.to_string())?;
    encoder.finish().map_err(|x| x.to_string())
}

/// Decompresses gzip-compressed bytes.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut result = Vec::new();
    decoder.read_to_end(&mut result).map_err(|x| x.to_string())?;
    Ok(result)
}

//-----------------------------------------------------------------------------

// Chromosome names.

/// Returns the chromosome name without a `chr` prefix.
///
/// The prefix is matched case-insensitively.
pub fn chromosome_base(name: &str) -> &str {
    match (name.get(..3), name.get(3..)) {
        (Some(prefix), Some(rest)) if !rest.is_empty() && prefix.eq_ignore_ascii_case("chr") => rest,
        _ => name,
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromosome_names() {
        assert_eq!(chromosome_base("chr1"), "1", "Prefix was not removed");
        assert_eq!(chromosome_base("CHRX"), "X", "Prefix should be case-insensitive");
        assert_eq!(chromosome_base("22"), "22", "Name without a prefix changed");
        assert_eq!(chromosome_base("chr"), "chr", "A bare prefix is a name");
    }

    #[test]
    fn gzip_blobs() {
        let data = b"{\"family_id\":\"f1\",\"genotype\":\"0,0,1/0,1,1\"}".repeat(10);
        let compressed = gzip(&data).unwrap();
        assert!(compressed.len() < data.len(), "Repetitive data was not compressed");
        assert_eq!(gunzip(&compressed), Ok(data), "Wrong decompressed data");
        assert!(gunzip(b"not gzip").is_err(), "Decompressed invalid data");
    }

    #[test]
    fn sizes() {
        assert_eq!(human_readable_size(512), "512.000 B", "Wrong size in bytes");
        assert_eq!(human_readable_size(3 * 1024 * 1024), "3.000 MiB", "Wrong size in MiB");
    }
}

//-----------------------------------------------------------------------------
