//! The base32 flavor Nix uses for hashes.
//!
//! The alphabet drops E, O, U, and T, and the string is read from its
//! tail: the last character holds the lowest five bits of the first byte,
//! so encoding walks the 5-bit groups from the highest down.

use crate::error::{Error, Result};

const BASE32_CHARS: &[u8] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Converts the given byte slice to a nix-compatible base32 encoded String.
pub fn encode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let nchars = (bytes.len() * 8 - 1) / 5 + 1;

    let mut encoded = String::with_capacity(nchars);
    for group in (0..nchars).rev() {
        let bit = group * 5;
        let index = bit / 8;
        let offset = bit % 8;
        // a group straddles two bytes once its offset passes 3
        let mut value = bytes[index] >> offset;
        if offset > 3 && index + 1 < bytes.len() {
            value |= bytes[index + 1] << (8 - offset);
        }
        encoded.push(char::from(BASE32_CHARS[(value & 0x1f) as usize]));
    }
    encoded
}

/// Converts a nix-compatible base32 encoded string back to bytes.
///
/// Fails on characters outside the nix alphabet, and on strings whose
/// trailing bits do not fit the implied byte length.
pub fn decode(s: &str) -> Result<Vec<u8>> {
    let s = s.as_bytes();
    let hash_size = s.len() * 5 / 8;
    let mut hash: Vec<u8> = vec![0; hash_size];

    for n in 0..s.len() {
        let c = s[s.len() - n - 1];
        let digit = BASE32_CHARS
            .iter()
            .position(|b| *b == c)
            .ok_or_else(|| Error::MalformedEncoding {
                encoding: "nix32",
                detail: format!("invalid character '{}'", char::from(c)),
            })? as u8;
        let b = n * 5;
        let i = b / 8;
        let j = b % 8;
        if i >= hash_size {
            if digit != 0 {
                return Err(Error::MalformedEncoding {
                    encoding: "nix32",
                    detail: "invalid length for decoded bytes".to_string(),
                });
            }
            continue;
        }
        hash[i] |= digit.checked_shl(j as u32).unwrap_or(0);

        let v2 = digit.checked_shr(8 - j as u32).unwrap_or(0);
        if i + 1 < hash_size {
            hash[i + 1] |= v2;
        } else if v2 != 0 {
            return Err(Error::MalformedEncoding {
                encoding: "nix32",
                detail: "invalid length for decoded bytes".to_string(),
            });
        }
    }

    Ok(hash)
}
