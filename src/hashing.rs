//! MD5 digests, used for segment keys, passwords and confirmation tokens.

use md5::{Digest, Md5};

/// Lowercase hex digest of the concatenation of `parts`.
pub fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn md5_bytes(parts: &[&str]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let mut bytes = [0; 16];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(md5_hex(&[""]), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(&["abc"]), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex(&["a", "b", "c"]), md5_hex(&["abc"]));
        assert_eq!(md5_bytes(&["abc"])[0], 0x90);
    }
}
