//! Tile layer payload decoding.
//!
//! A `<data>` block carries its GIDs either as CSV text or as Base64,
//! optionally wrapped in a zlib or gzip container around a DEFLATE stream.
//! Both containers are verified and skipped by hand and the remaining bytes
//! are handed to a raw DEFLATE decoder, after which every four bytes,
//! little-endian, form one GID.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;

use crate::error::{Error, Result};

/// Decode a CSV payload: a comma-separated list of decimal GIDs.
///
/// Whitespace around entries is ignored. An unparseable entry becomes GID 0
/// rather than failing the layer.
#[must_use]
pub fn decode_csv(content: &str) -> Vec<u32> {
    content
        .split(',')
        .map(|entry| entry.trim().parse().unwrap_or(0))
        .collect()
}

/// Decode a Base64 payload with optional compression into GIDs.
///
/// # Errors
///
/// Returns [`Error::Base64`] when the text does not decode,
/// [`Error::BadCompressionHeader`] when a zlib/gzip header does not indicate
/// DEFLATE, [`Error::UnsupportedCompression`] for unknown compression names,
/// and [`Error::Deflate`] when decompression fails. All of these are
/// layer-scoped at the call site: the layer is left empty and the rest of
/// the document continues loading.
pub fn decode_base64(content: &str, compression: Option<&str>) -> Result<Vec<u32>> {
    let decoded = BASE64
        .decode(content.trim())
        .map_err(|e| Error::Base64(e.to_string()))?;

    let bytes = match compression {
        None => decoded,
        Some("zlib") => {
            // A zlib header's first byte is 0x78: the 8 is the DEFLATE
            // method, the 7 a 32K window. The two header bytes are skipped
            // and the checksum trailer is left unread.
            if decoded.first() != Some(&0x78) {
                return Err(Error::BadCompressionHeader { scheme: "zlib" });
            }
            inflate(&decoded[2..])?
        }
        Some("gzip") => {
            // Magic number 0x1F 0x8B followed by method 0x08 (DEFLATE). The
            // rest of the ten-byte header is timestamps and flags Tiled
            // never sets.
            if decoded.len() < 10 || decoded[0] != 0x1F || decoded[1] != 0x8B || decoded[2] != 0x08
            {
                return Err(Error::BadCompressionHeader { scheme: "gzip" });
            }
            inflate(&decoded[10..])?
        }
        Some(other) => return Err(Error::UnsupportedCompression(other.to_owned())),
    };

    Ok(bytes
        .chunks_exact(4)
        .map(LittleEndian::read_u32)
        .collect())
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|e| Error::Deflate(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;

    use super::*;

    const GIDS: [u32; 8] = [1, 2, 3, 0, 2_147_483_649, 5, 6, 7];

    fn gid_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; GIDS.len() * 4];
        for (chunk, gid) in bytes.chunks_exact_mut(4).zip(GIDS) {
            LittleEndian::write_u32(chunk, gid);
        }
        bytes
    }

    #[test]
    fn csv_with_whitespace_and_newlines() {
        let content = "\n  1,2, 3,0,\n2147483649,5,\t6,7\n";
        assert_eq!(decode_csv(content), GIDS.to_vec());
    }

    #[test]
    fn csv_garbage_becomes_zero() {
        assert_eq!(decode_csv("1,x,3"), vec![1, 0, 3]);
    }

    #[test]
    fn equivalence_across_encodings() {
        let plain = BASE64.encode(gid_bytes());

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&gid_bytes()).unwrap();
        let zlib = BASE64.encode(zlib.finish().unwrap());

        let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
        gzip.write_all(&gid_bytes()).unwrap();
        let gzip = BASE64.encode(gzip.finish().unwrap());

        let csv = GIDS.map(|gid| gid.to_string()).join(",");

        let expected = GIDS.to_vec();
        assert_eq!(decode_csv(&csv), expected);
        assert_eq!(decode_base64(&plain, None).unwrap(), expected);
        assert_eq!(decode_base64(&zlib, Some("zlib")).unwrap(), expected);
        assert_eq!(decode_base64(&gzip, Some("gzip")).unwrap(), expected);
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let encoded = format!("\n    {}\n  ", BASE64.encode(gid_bytes()));
        assert_eq!(decode_base64(&encoded, None).unwrap(), GIDS.to_vec());
    }

    #[test]
    fn zlib_header_must_indicate_deflate() {
        // A raw DEFLATE stream passed off as zlib: first byte is not 0x78.
        let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
        deflate.write_all(&gid_bytes()).unwrap();
        let encoded = BASE64.encode(deflate.finish().unwrap());
        let err = decode_base64(&encoded, Some("zlib")).unwrap_err();
        assert!(matches!(
            err,
            Error::BadCompressionHeader { scheme: "zlib" }
        ));
    }

    #[test]
    fn unknown_compression_is_rejected() {
        let encoded = BASE64.encode(gid_bytes());
        let err = decode_base64(&encoded, Some("zstd")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(name) if name == "zstd"));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            decode_base64("!!not base64!!", None),
            Err(Error::Base64(_))
        ));
    }
}
