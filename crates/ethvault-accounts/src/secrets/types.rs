use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Encrypted JSON wallet (keystore v3 layout) stored apart from account metadata.
///
/// The core never inspects the key material. Fields it does not know about are
/// kept in `extra` so a blob reads back exactly as it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub address: String,
    pub id: String,
    pub version: u32,
    #[serde(rename = "Crypto")]
    pub crypto: SecretCrypto,
    #[serde(rename = "x-ethers", default, skip_serializing_if = "Option::is_none")]
    pub x_ethers: Option<XEthers>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretCrypto {
    pub cipher: String,
    pub cipherparams: CipherParams,
    pub ciphertext: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub salt: String,
    pub n: u64,
    pub dklen: u32,
    pub p: u32,
    pub r: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XEthers {
    pub client: String,
    pub geth_filename: String,
    pub mnemonic_counter: String,
    pub mnemonic_ciphertext: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
