//! Base64 codec, URL-safe-first.
//!
//! ACME traffic is almost entirely the unpadded URL-safe variant (JWS
//! segments, JWK members, thumbprints, the CSR in `finalize`); the standard
//! alphabet appears only inside PEM bodies, which are decoded once and
//! re-encoded URL-safe before they go on the wire.

use thiserror::Error;

/// Decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A byte outside the expected alphabet.
    #[error("invalid base64 byte: {0:#04x}")]
    InvalidByte(u8),
    /// Padding missing, excessive, or followed by more data.
    #[error("malformed base64 padding")]
    BadPadding,
    /// The input length cannot hold a whole number of bytes.
    #[error("truncated base64 input")]
    TruncatedInput,
}

const URL_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Encodes bytes as unpadded URL-safe Base64, the form every ACME field
/// wants.
pub fn encode_url(input: impl AsRef<[u8]>) -> String {
    let bytes = input.as_ref();
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);

    let mut acc: u32 = 0;
    let mut bits: u8 = 0;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 6 {
            bits -= 6;
            out.push(URL_ALPHABET[((acc >> bits) & 0x3f) as usize] as char);
        }
    }
    if bits > 0 {
        // final partial sextet, zero-filled on the right
        out.push(URL_ALPHABET[((acc << (6 - bits)) & 0x3f) as usize] as char);
    }

    out
}

/// Decodes unpadded URL-safe Base64.
///
/// # Errors
///
/// [`DecodeError::BadPadding`] on any `=` (the URL-safe form is never
/// padded here), [`DecodeError::InvalidByte`] on bytes outside the URL-safe
/// alphabet, [`DecodeError::TruncatedInput`] when the length cannot encode
/// whole bytes.
pub fn decode_url(input: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = input.as_bytes();
    if bytes.contains(&b'=') {
        return Err(DecodeError::BadPadding);
    }
    decode_sextets(bytes, true)
}

/// Decodes standard (padded) Base64, as found between PEM armor lines.
///
/// # Errors
///
/// [`DecodeError::TruncatedInput`] when the length is not a multiple of
/// four, [`DecodeError::BadPadding`] when `=` appears anywhere but as the
/// final one or two bytes, [`DecodeError::InvalidByte`] on anything outside
/// the standard alphabet.
pub fn decode_standard(input: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = input.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::TruncatedInput);
    }

    let pad = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if pad > 2 {
        return Err(DecodeError::BadPadding);
    }
    let body = &bytes[..bytes.len() - pad];
    // padding is only legal as a suffix
    if body.contains(&b'=') {
        return Err(DecodeError::BadPadding);
    }

    decode_sextets(body, false)
}

fn decode_sextets(body: &[u8], url: bool) -> Result<Vec<u8>, DecodeError> {
    // a trailing group of one sextet holds fewer than 8 bits, i.e. no byte
    if body.len() % 4 == 1 {
        return Err(DecodeError::TruncatedInput);
    }

    let mut out = Vec::with_capacity(body.len() / 4 * 3 + 2);
    let mut acc: u32 = 0;
    let mut bits: u8 = 0;
    for &byte in body {
        acc = (acc << 6) | u32::from(sextet(byte, url)?);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }

    Ok(out)
}

fn sextet(byte: u8, url: bool) -> Result<u8, DecodeError> {
    match byte {
        b'A'..=b'Z' => Ok(byte - b'A'),
        b'a'..=b'z' => Ok(byte - b'a' + 26),
        b'0'..=b'9' => Ok(byte - b'0' + 52),
        b'-' if url => Ok(62),
        b'_' if url => Ok(63),
        b'+' if !url => Ok(62),
        b'/' if !url => Ok(63),
        other => Err(DecodeError::InvalidByte(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_url_rfc_vectors() {
        assert_eq!(encode_url(""), "");
        assert_eq!(encode_url("f"), "Zg");
        assert_eq!(encode_url("fo"), "Zm8");
        assert_eq!(encode_url("foo"), "Zm9v");
        assert_eq!(encode_url("foob"), "Zm9vYg");
        assert_eq!(encode_url("fooba"), "Zm9vYmE");
        assert_eq!(encode_url("foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_encode_url_uses_url_alphabet() {
        // 0xfb 0xf0 hits sextets 62 and 63
        assert_eq!(encode_url([0xfb, 0xf0]), "-_A");
    }

    #[test]
    fn test_decode_url_roundtrip() {
        assert_eq!(decode_url("-_A").unwrap(), [0xfb, 0xf0]);
        assert_eq!(decode_url("Zm9vYmE").unwrap(), b"fooba");
        assert_eq!(decode_url("").unwrap(), b"");
    }

    #[test]
    fn test_decode_url_rejects_standard_alphabet_and_padding() {
        assert_eq!(decode_url("a+b"), Err(DecodeError::InvalidByte(b'+')));
        assert_eq!(decode_url("Zg=="), Err(DecodeError::BadPadding));
    }

    #[test]
    fn test_decode_url_rejects_impossible_length() {
        assert_eq!(decode_url("Zm9vY"), Err(DecodeError::TruncatedInput));
    }

    #[test]
    fn test_decode_standard() {
        assert_eq!(decode_standard("Zm9vYg==").unwrap(), b"foob");
        assert_eq!(decode_standard("Zm9vYmE=").unwrap(), b"fooba");
        assert_eq!(decode_standard("Zm9vYmFy").unwrap(), b"foobar");
    }

    #[test]
    fn test_decode_standard_rejects_interior_padding() {
        // '=' at len-2 followed by data is not padding
        assert_eq!(decode_standard("AA=A"), Err(DecodeError::BadPadding));
        assert_eq!(decode_standard("A==="), Err(DecodeError::BadPadding));
        assert_eq!(decode_standard("AB=CD==="), Err(DecodeError::BadPadding));
    }

    #[test]
    fn test_decode_standard_rejects_bad_lengths_and_bytes() {
        assert_eq!(decode_standard("AAA"), Err(DecodeError::TruncatedInput));
        assert_eq!(decode_standard("Zm$v"), Err(DecodeError::InvalidByte(b'$')));
        assert_eq!(decode_standard("a-bc"), Err(DecodeError::InvalidByte(b'-')));
    }

    #[test]
    fn test_standard_body_reencodes_url_safe() {
        let der = decode_standard("+/v7").unwrap();
        let url = encode_url(&der);
        assert_eq!(url, "-_v7");
        assert_eq!(decode_url(&url).unwrap(), der);
    }
}
