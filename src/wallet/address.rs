use secp256k1::PublicKey;

/// Derive an address (hex of the compressed public key) from a hex pubkey.
/// Returns the normalized lowercase form.
pub fn address_from_pubkey_hex(pubkey_hex: &str) -> Result<String, &'static str> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| "invalid pubkey hex")?;
    let pk = PublicKey::from_slice(&bytes).map_err(|_| "invalid pubkey bytes")?;
    Ok(hex::encode(pk.serialize()))
}

/// Address validity predicate. The core treats addresses as opaque strings
/// and only asks this question of them.
pub fn is_valid(address: &str) -> bool {
    address.len() == 66
        && address
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        && address_from_pubkey_hex(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeyPair;

    #[test]
    fn generated_addresses_are_valid() {
        let kp = KeyPair::generate();
        assert!(is_valid(&kp.address()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(!is_valid(""));
        assert!(!is_valid("addr"));
        assert!(!is_valid(&"0".repeat(66)));
        let upper = KeyPair::generate().address().to_uppercase();
        assert!(!is_valid(&upper));
    }
}
