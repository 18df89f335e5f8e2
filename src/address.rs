//! Address primitives shared by the EVM platforms.

use tiny_keccak::{Hasher, Keccak};

use crate::error::AddressError;

/// Strip a leading `0x`, if present.
pub fn remove_0x(input: &str) -> &str {
    input.strip_prefix("0x").unwrap_or(input)
}

/// EIP-55 mixed-case checksum of a hex address, returned with `0x`.
///
/// Case of the input is ignored.
pub fn eip55_checksum(unchecksummed: &str) -> Result<String, AddressError> {
    let lower = unchecksummed.to_lowercase();
    let hex_digits = remove_0x(&lower);
    hex::decode(hex_digits)?;

    let mut hash = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(hex_digits.as_bytes());
    keccak.finalize(&mut hash);

    let checksummed: String = hex_digits
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = hash.get(i / 2).map(|byte| {
                if i % 2 == 0 {
                    byte >> 4
                } else {
                    byte & 0x0f
                }
            });

            match nibble {
                Some(n) if c.is_ascii_alphabetic() && n > 7 => c.to_ascii_uppercase(),
                _ => c,
            }
        })
        .collect();

    Ok(format!("0x{checksummed}"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CHECKSUMMED: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn test_known_vectors() {
        for expected in CHECKSUMMED {
            assert_eq!(eip55_checksum(&expected.to_lowercase()).unwrap(), expected);
        }
    }

    #[test]
    fn test_checksum_is_stable_on_its_own_output() {
        for expected in CHECKSUMMED {
            let first = eip55_checksum(&expected.to_lowercase()).unwrap();
            let second = eip55_checksum(&first.to_lowercase()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_accepts_missing_prefix() {
        assert_eq!(
            eip55_checksum("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap(),
            CHECKSUMMED[0]
        );
    }

    #[test]
    fn test_rejects_non_hex() {
        assert!(eip55_checksum("0xnothex").is_err());
        assert!(eip55_checksum("0xabc").is_err());
    }

    #[test]
    fn test_remove_0x_is_idempotent() {
        let once = remove_0x("0xdeadbeef");
        assert_eq!(once, "deadbeef");
        assert_eq!(remove_0x(once), once);
        assert_eq!(remove_0x("plain"), "plain");
    }
}
