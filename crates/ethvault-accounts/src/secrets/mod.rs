pub mod store;
pub mod types;

pub use store::{SecretStore, SecretStoreError};
pub use types::{CipherParams, EncryptedSecret, KdfParams, SecretCrypto, XEthers};

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Map;

    use super::{CipherParams, EncryptedSecret, KdfParams, SecretCrypto};

    /// A structurally valid secret whose address is `fill` repeated to 40 hex chars.
    pub fn sample_secret(fill: &str) -> EncryptedSecret {
        let address: String = fill.repeat(40).chars().take(40).collect();
        EncryptedSecret {
            address,
            id: "3198bc9c-6672-5ab3-d995-4942343ae5b6".to_string(),
            version: 3,
            crypto: SecretCrypto {
                cipher: "aes-128-ctr".to_string(),
                cipherparams: CipherParams {
                    iv: "0".repeat(32),
                    extra: Map::new(),
                },
                ciphertext: "1".repeat(64),
                kdf: "scrypt".to_string(),
                kdfparams: KdfParams {
                    salt: "2".repeat(64),
                    n: 262_144,
                    dklen: 32,
                    p: 1,
                    r: 8,
                    extra: Map::new(),
                },
                mac: "3".repeat(64),
                extra: Map::new(),
            },
            x_ethers: None,
            extra: Map::new(),
        }
    }
}
