//! Private keys, public keys and Base58Check addresses

use crate::error::{RedeemError, Result};
use crate::params::{Network, NetworkParams};
use crate::script::{p2pkh_script_pubkey, pay_to_script_hash_target};
use crate::types::*;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash160 = RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// A signing key decoded for a specific network
#[derive(Clone)]
pub struct PrivateKey {
    secret: SecretKey,
    compressed: bool,
    network: Network,
}

impl PrivateKey {
    pub fn new(secret: SecretKey, compressed: bool, network: Network) -> Self {
        Self {
            secret,
            compressed,
            network,
        }
    }

    /// Decode a wallet-import-format key, rejecting keys of another network
    pub fn from_wif(params: &NetworkParams, wif: &str) -> Result<Self> {
        let decoded = bs58::decode(wif.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| RedeemError::InvalidInput(format!("private key is not Base58Check: {}", e)))?;

        let (version, payload) = decoded
            .split_first()
            .ok_or_else(|| RedeemError::InvalidInput("private key is empty".to_string()))?;
        if *version != params.wif_version {
            return Err(RedeemError::InvalidInput(format!(
                "private key version 0x{:02x} is not valid on network {}",
                version, params.network
            )));
        }

        let (key_bytes, compressed) = match payload.len() {
            33 if payload[32] == 0x01 => (&payload[..32], true),
            32 => (payload, false),
            n => {
                return Err(RedeemError::InvalidInput(format!(
                    "private key has invalid length {}",
                    n
                )))
            }
        };

        let secret = SecretKey::from_slice(key_bytes)
            .map_err(|e| RedeemError::InvalidInput(format!("private key out of range: {}", e)))?;
        Ok(Self::new(secret, compressed, params.network))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey::from_secret_key(&secp, &self.secret)
    }

    /// Serialized public key in the encoding the key was imported with
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let public_key = self.public_key();
        if self.compressed {
            public_key.serialize().to_vec()
        } else {
            public_key.serialize_uncompressed().to_vec()
        }
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key_bytes())
    }

    /// Locking script paying back to this key
    pub fn p2pkh_script_pubkey(&self) -> ByteString {
        p2pkh_script_pubkey(&self.pubkey_hash())
    }

    pub fn address(&self, params: &NetworkParams) -> Address {
        Address {
            version: params.p2pkh_version,
            hash: self.pubkey_hash(),
        }
    }

    /// ECDSA signature over a 32-byte digest; the nonce is derived per RFC 6979
    pub fn sign_digest(&self, digest: &Hash) -> Signature {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*digest);
        secp.sign_ecdsa(&message, &self.secret)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .field("network", &self.network)
            .finish()
    }
}

/// A Base58Check address: version byte plus a 20-byte hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub version: u8,
    pub hash: [u8; 20],
}

impl Address {
    /// Pay-to-script-hash address of a redeem script
    pub fn p2sh(params: &NetworkParams, redeem_script: &[u8]) -> Self {
        Self {
            version: params.p2sh_version,
            hash: hash160(redeem_script),
        }
    }

    /// Address a P2SH locking script pays to; `None` for any other script shape
    pub fn from_p2sh_script(params: &NetworkParams, script_pubkey: &[u8]) -> Option<Self> {
        pay_to_script_hash_target(script_pubkey).map(|hash| Self {
            version: params.p2sh_version,
            hash,
        })
    }

}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.version);
        payload.extend_from_slice(&self.hash);
        f.write_str(&bs58::encode(payload).with_check().into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::p2sh_script_pubkey;
    use hex_literal::hex;

    const KEY_ONE_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";

    #[test]
    fn test_hash160_of_empty_input() {
        assert_eq!(hash160(&[]), hex!("b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"));
    }

    #[test]
    fn test_decode_compressed_wif() {
        let params = NetworkParams::main();
        let key = PrivateKey::from_wif(&params, KEY_ONE_WIF).unwrap();
        assert!(key.is_compressed());
        assert_eq!(
            key.public_key_bytes(),
            hex!("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798").to_vec()
        );
        assert_eq!(
            key.address(&params).to_string(),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
    }

    #[test]
    fn test_wif_of_other_network_rejected() {
        let params = NetworkParams::test();
        assert!(matches!(
            PrivateKey::from_wif(&params, KEY_ONE_WIF),
            Err(RedeemError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wif_with_bad_checksum_rejected() {
        let params = NetworkParams::main();
        let mut corrupted = KEY_ONE_WIF.to_string();
        corrupted.pop();
        corrupted.push('o');
        assert!(PrivateKey::from_wif(&params, &corrupted).is_err());
    }

    #[test]
    fn test_uncompressed_key_round_trip() {
        let params = NetworkParams::regtest();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let key = PrivateKey::new(secret, false, Network::Regtest);
        let mut payload = vec![params.wif_version];
        payload.extend_from_slice(&[0x11; 32]);
        let wif = bs58::encode(payload).with_check().into_string();
        let decoded = PrivateKey::from_wif(&params, &wif).unwrap();
        assert!(!decoded.is_compressed());
        assert_eq!(decoded.public_key_bytes().len(), 65);
        assert_eq!(decoded.public_key_bytes(), key.public_key_bytes());
    }

    #[test]
    fn test_p2sh_address_matches_script() {
        let params = NetworkParams::main();
        let redeem_script = vec![0x51];
        let address = Address::p2sh(&params, &redeem_script);
        let script_pubkey = p2sh_script_pubkey(&address.hash);
        assert_eq!(Address::from_p2sh_script(&params, &script_pubkey), Some(address));
        assert!(address.to_string().starts_with('3'));
    }

    #[test]
    fn test_non_p2sh_script_has_no_p2sh_address() {
        let params = NetworkParams::main();
        let key = PrivateKey::from_wif(&params, KEY_ONE_WIF).unwrap();
        assert_eq!(Address::from_p2sh_script(&params, &key.p2pkh_script_pubkey()), None);
    }

    #[test]
    fn test_signing_is_deterministic() {
        let params = NetworkParams::main();
        let key = PrivateKey::from_wif(&params, KEY_ONE_WIF).unwrap();
        let digest = [0x42u8; 32];
        assert_eq!(key.sign_digest(&digest), key.sign_digest(&digest));
    }

    #[test]
    fn test_debug_hides_secret() {
        let params = NetworkParams::main();
        let key = PrivateKey::from_wif(&params, KEY_ONE_WIF).unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("0279be66"));
    }
}
