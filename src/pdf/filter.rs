//! FlateDecode and stream predictors

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;

use crate::error::{PDFImportError, PDFImportResult};

/// Decompress zlib-wrapped stream data
pub fn flate_decode(data: &[u8]) -> PDFImportResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PDFImportError::parse(format!("flate decode failed: {e}")))?;
    Ok(out)
}

/// Compress data into a zlib stream
pub fn flate_encode(data: &[u8]) -> PDFImportResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PDFImportError::serialization(format!("flate encode failed: {e}")))
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse the stream predictor declared in `/DecodeParms`.
///
/// Predictor 1 is a no-op, 2 is the TIFF horizontal predictor, and 10-15 are
/// the PNG row filters (the per-row filter byte decides None/Sub/Up/Average/
/// Paeth regardless of which PNG predictor number was declared).
pub fn apply_predictor(
    data: &[u8],
    predictor: i64,
    columns: usize,
    colors: usize,
    bits_per_component: usize,
) -> PDFImportResult<Vec<u8>> {
    let bpp = (colors * bits_per_component + 7) / 8;
    let bytes_per_row = (columns * colors * bits_per_component + 7) / 8;
    if bytes_per_row == 0 {
        return Err(PDFImportError::parse("predictor row width is zero"));
    }

    match predictor {
        1 => Ok(data.to_vec()),

        2 => {
            let mut out = Vec::with_capacity(data.len());
            for row in data.chunks(bytes_per_row) {
                let mut prev = vec![0u8; bpp];
                for (i, &byte) in row.iter().enumerate() {
                    let decoded = byte.wrapping_add(prev[i % bpp]);
                    out.push(decoded);
                    prev[i % bpp] = decoded;
                }
            }
            Ok(out)
        }

        10..=15 => {
            trace!("reversing PNG row filters, {bytes_per_row} bytes per row");
            let mut out = Vec::with_capacity(data.len());
            let mut prev_row = vec![0u8; bytes_per_row];

            for row in data.chunks_exact(bytes_per_row + 1) {
                let filter_type = row[0];
                let row_data = &row[1..];
                let mut decoded = vec![0u8; bytes_per_row];

                for i in 0..bytes_per_row {
                    let left = if i >= bpp { decoded[i - bpp] } else { 0 };
                    let up = prev_row[i];
                    let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };

                    let predicted = match filter_type {
                        0 => 0,
                        1 => left,
                        2 => up,
                        3 => (((left as u16) + (up as u16)) / 2) as u8,
                        4 => paeth(left, up, up_left),
                        _ => {
                            return Err(PDFImportError::parse(format!(
                                "invalid PNG filter type: {filter_type}"
                            )))
                        }
                    };
                    decoded[i] = row_data[i].wrapping_add(predicted);
                }

                prev_row.copy_from_slice(&decoded);
                out.extend_from_slice(&decoded);
            }
            Ok(out)
        }

        _ => Err(PDFImportError::unsupported(format!(
            "predictor {predictor}"
        ))),
    }
}
