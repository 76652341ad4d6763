//! Certificate thumbprint formatting
//!
//! Connection specs pin a backend server by the SHA-1 thumbprint of its
//! certificate, rendered as colon-separated uppercase hex pairs.

use sha1::{Digest, Sha1};

/// Thumbprint of a DER-encoded certificate in the pinning format, e.g.
/// `"DA:39:A3:EE:..."`.
#[must_use]
pub fn thumbprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    let hex = hex::encode_upper(digest);
    let mut out = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        for &b in pair {
            out.push(b as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_thumbprint() {
        // SHA-1 of the empty string
        assert_eq!(
            thumbprint(b""),
            "DA:39:A3:EE:5E:6B:4B:0D:32:55:BF:EF:95:60:18:90:AF:D8:07:09"
        );
    }

    #[test]
    fn test_shape() {
        let tp = thumbprint(b"certificate bytes");
        assert_eq!(tp.len(), 59);
        assert_eq!(tp.matches(':').count(), 19);
        assert!(tp.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
    }
}
