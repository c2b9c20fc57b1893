//! Passphrase protection for key material (Web3 secret storage, version 3).
//!
//! Keys are encrypted with AES-128-CTR under the first half of a derived key; the second half
//! authenticates the ciphertext with a Keccak-256 MAC. New keys derive with PBKDF2-HMAC-SHA256.
//! Imported keys may also use scrypt, the derivation geth writes.

use crate::node::Address;
use crate::wallet::types::KeyStoreError;

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::Hmac;
use rand::Rng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use uuid::Uuid;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

const CIPHER: &str = "aes-128-ctr";
const KDF_PBKDF2: &str = "pbkdf2";
const KDF_SCRYPT: &str = "scrypt";
const PRF: &str = "hmac-sha256";
const DERIVED_KEY_LEN: usize = 32;

/// Upper bound on PBKDF2 iterations accepted from a key file.
pub const MAX_PBKDF2_ITERATIONS: u32 = KdfParams::standard().iterations * 4;
/// Upper bound on scrypt memory (`128 * r * n` bytes) accepted from a key file.
pub const MAX_SCRYPT_MEMORY: u64 = 256 * 1024 * 1024;
/// Upper bound on scrypt parallelism accepted from a key file.
pub const MAX_SCRYPT_PARALLELISM: u32 = 16;

/// Key derivation strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl KdfParams {
    /// Cheap derivation used for the on-device store.
    pub const fn light() -> Self {
        Self { iterations: 4096 }
    }

    /// Full-strength derivation used for keys leaving the device.
    pub const fn standard() -> Self {
        Self {
            iterations: 262_144,
        }
    }
}

/// A version 3 key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// Address as plain lowercase hex. Optional in the format; always written by this crate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub crypto: CryptoSection,
    pub id: Uuid,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoSection {
    pub cipher: String,
    pub ciphertext: String,
    pub cipherparams: CipherParams,
    pub kdf: String,
    pub kdfparams: KdfSection,
    pub mac: String,
}

/// Parameters of the key derivation named by `CryptoSection::kdf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KdfSection {
    Pbkdf2(Pbkdf2Params),
    Scrypt(ScryptParams),
}

impl KdfSection {
    /// PBKDF2 iteration count, `None` for scrypt.
    pub fn pbkdf2_iterations(&self) -> Option<u32> {
        match self {
            KdfSection::Pbkdf2(params) => Some(params.c),
            KdfSection::Scrypt(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pbkdf2Params {
    pub c: u32,
    pub dklen: usize,
    pub prf: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScryptParams {
    pub dklen: usize,
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub salt: String,
}

impl KeyFile {
    /// The address recorded in the file.
    pub fn address(&self) -> Result<Address, KeyStoreError> {
        self.address
            .as_deref()
            .ok_or_else(|| KeyStoreError::MalformedKey("no address recorded".to_string()))?
            .parse()
            .map_err(|e| KeyStoreError::MalformedKey(format!("bad address: {e}")))
    }
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Address derived from a secret key: last 20 bytes of the Keccak-256 of the public key.
pub fn address_of(secret: &SecretKey) -> Address {
    let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), secret);
    let uncompressed = public.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Generate a fresh secp256k1 secret key.
pub fn generate_secret() -> SecretKey {
    let mut rng = rand::rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        // Zero or above the curve order.
        if let Ok(secret) = SecretKey::from_slice(&bytes) {
            return secret;
        }
    }
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<[u8; DERIVED_KEY_LEN], KeyStoreError> {
    let mut derived = [0u8; DERIVED_KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), salt, iterations, &mut derived)
        .map_err(|e| KeyStoreError::MalformedKey(format!("key derivation failed: {e}")))?;
    Ok(derived)
}

fn derive_scrypt_key(
    passphrase: &str,
    salt: &[u8],
    params: &ScryptParams,
) -> Result<[u8; DERIVED_KEY_LEN], KeyStoreError> {
    if !params.n.is_power_of_two() || params.n < 2 {
        return Err(KeyStoreError::MalformedKey(format!(
            "scrypt n must be a power of two, got {}",
            params.n
        )));
    }
    let memory = 128u64
        .saturating_mul(u64::from(params.r))
        .saturating_mul(params.n);
    if params.r == 0 || memory > MAX_SCRYPT_MEMORY {
        return Err(KeyStoreError::MalformedKey(format!(
            "scrypt cost n={} r={} out of range",
            params.n, params.r
        )));
    }
    if params.p == 0 || params.p > MAX_SCRYPT_PARALLELISM {
        return Err(KeyStoreError::MalformedKey(format!(
            "scrypt parallelism {} out of range",
            params.p
        )));
    }

    let log_n = params.n.trailing_zeros() as u8;
    let scrypt_params = scrypt::Params::new(log_n, params.r, params.p, DERIVED_KEY_LEN)
        .map_err(|e| KeyStoreError::MalformedKey(format!("invalid scrypt parameters: {e}")))?;
    let mut derived = [0u8; DERIVED_KEY_LEN];
    scrypt::scrypt(passphrase.as_bytes(), salt, &scrypt_params, &mut derived)
        .map_err(|e| KeyStoreError::MalformedKey(format!("key derivation failed: {e}")))?;
    Ok(derived)
}

fn mac(derived: &[u8; DERIVED_KEY_LEN], ciphertext: &[u8]) -> [u8; 32] {
    let mut input = Vec::with_capacity(16 + ciphertext.len());
    input.extend_from_slice(&derived[16..32]);
    input.extend_from_slice(ciphertext);
    keccak256(&input)
}

fn apply_cipher(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), KeyStoreError> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|e| KeyStoreError::MalformedKey(format!("invalid cipher parameters: {e}")))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Encrypt `secret` under `passphrase`.
pub fn encrypt_key(
    secret: &SecretKey,
    id: Uuid,
    passphrase: &str,
    kdf: KdfParams,
) -> Result<KeyFile, KeyStoreError> {
    let mut rng = rand::rng();
    let mut salt = [0u8; 32];
    rng.fill(&mut salt);
    let mut iv = [0u8; 16];
    rng.fill(&mut iv);

    let derived = derive_key(passphrase, &salt, kdf.iterations)?;
    let mut ciphertext = secret.secret_bytes().to_vec();
    apply_cipher(&derived[..16], &iv, &mut ciphertext)?;

    Ok(KeyFile {
        address: Some(address_of(secret).to_plain_hex()),
        crypto: CryptoSection {
            cipher: CIPHER.to_string(),
            ciphertext: hex::encode(&ciphertext),
            cipherparams: CipherParams {
                iv: hex::encode(iv),
            },
            kdf: KDF_PBKDF2.to_string(),
            kdfparams: KdfSection::Pbkdf2(Pbkdf2Params {
                c: kdf.iterations,
                dklen: DERIVED_KEY_LEN,
                prf: PRF.to_string(),
                salt: hex::encode(salt),
            }),
            mac: hex::encode(mac(&derived, &ciphertext)),
        },
        id,
        version: 3,
    })
}

/// Decrypt a key file with `passphrase`.
///
/// Fails with `KeyStoreError::Decrypt` when the MAC does not match, i.e. on a wrong
/// passphrase or a tampered ciphertext. Derivation costs above the crate's bounds are
/// rejected as malformed before any work is done.
pub fn decrypt_key(file: &KeyFile, passphrase: &str) -> Result<SecretKey, KeyStoreError> {
    let crypto = &file.crypto;
    if file.version != 3 {
        return Err(KeyStoreError::MalformedKey(format!(
            "unsupported key version {}",
            file.version
        )));
    }
    if crypto.cipher != CIPHER {
        return Err(KeyStoreError::MalformedKey(format!(
            "unsupported cipher {}",
            crypto.cipher
        )));
    }

    let decode = |field: &str, value: &str| {
        hex::decode(value).map_err(|e| KeyStoreError::MalformedKey(format!("{field}: {e}")))
    };

    let derived = match (crypto.kdf.as_str(), &crypto.kdfparams) {
        (KDF_PBKDF2, KdfSection::Pbkdf2(params)) => {
            if params.prf != PRF {
                return Err(KeyStoreError::MalformedKey(format!(
                    "unsupported pbkdf2 prf {}",
                    params.prf
                )));
            }
            if params.dklen != DERIVED_KEY_LEN {
                return Err(KeyStoreError::MalformedKey(format!(
                    "unsupported derived key length {}",
                    params.dklen
                )));
            }
            if params.c == 0 || params.c > MAX_PBKDF2_ITERATIONS {
                return Err(KeyStoreError::MalformedKey(format!(
                    "pbkdf2 iteration count {} out of range",
                    params.c
                )));
            }
            derive_key(passphrase, &decode("salt", &params.salt)?, params.c)?
        }
        (KDF_SCRYPT, KdfSection::Scrypt(params)) => {
            if params.dklen != DERIVED_KEY_LEN {
                return Err(KeyStoreError::MalformedKey(format!(
                    "unsupported derived key length {}",
                    params.dklen
                )));
            }
            derive_scrypt_key(passphrase, &decode("salt", &params.salt)?, params)?
        }
        (kdf, _) => {
            return Err(KeyStoreError::MalformedKey(format!(
                "unsupported key derivation {kdf}"
            )));
        }
    };

    let iv = decode("iv", &crypto.cipherparams.iv)?;
    let mut ciphertext = decode("ciphertext", &crypto.ciphertext)?;
    let expected_mac = decode("mac", &crypto.mac)?;

    if mac(&derived, &ciphertext).as_slice() != expected_mac.as_slice() {
        return Err(KeyStoreError::Decrypt);
    }

    apply_cipher(&derived[..16], &iv, &mut ciphertext)?;
    let secret = SecretKey::from_slice(&ciphertext)
        .map_err(|e| KeyStoreError::MalformedKey(format!("invalid secret key: {e}")))?;

    if file.address.is_some() && address_of(&secret) != file.address()? {
        return Err(KeyStoreError::MalformedKey(
            "key does not match its address".to_string(),
        ));
    }

    Ok(secret)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams { iterations: 2 };

    #[test]
    fn derives_known_address() {
        // Secret key 1 maps to the well-known generator address.
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let secret = SecretKey::from_slice(&bytes).unwrap();
        assert_eq!(
            address_of(&secret).to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let secret = generate_secret();
        let file = encrypt_key(&secret, Uuid::new_v4(), "hunter2", FAST).unwrap();

        assert_eq!(file.address, Some(address_of(&secret).to_plain_hex()));
        assert_eq!(file.crypto.kdfparams.pbkdf2_iterations(), Some(2));
        let decrypted = decrypt_key(&file, "hunter2").unwrap();
        assert_eq!(decrypted.secret_bytes(), secret.secret_bytes());
    }

    #[test]
    fn wrong_passphrase_fails_mac_check() {
        let file = encrypt_key(&generate_secret(), Uuid::new_v4(), "right", FAST).unwrap();
        assert!(matches!(
            decrypt_key(&file, "wrong"),
            Err(KeyStoreError::Decrypt)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_mac_check() {
        let mut file = encrypt_key(&generate_secret(), Uuid::new_v4(), "pw", FAST).unwrap();
        let mut bytes = hex::decode(&file.crypto.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        file.crypto.ciphertext = hex::encode(bytes);
        assert!(matches!(decrypt_key(&file, "pw"), Err(KeyStoreError::Decrypt)));
    }

    #[test]
    fn rejects_kdf_name_not_matching_params() {
        let mut file = encrypt_key(&generate_secret(), Uuid::new_v4(), "pw", FAST).unwrap();
        file.crypto.kdf = "scrypt".to_string();
        assert!(matches!(
            decrypt_key(&file, "pw"),
            Err(KeyStoreError::MalformedKey(_))
        ));
    }

    #[test]
    fn rejects_excessive_iteration_count() {
        let mut file = encrypt_key(&generate_secret(), Uuid::new_v4(), "pw", FAST).unwrap();
        if let KdfSection::Pbkdf2(params) = &mut file.crypto.kdfparams {
            params.c = u32::MAX;
        }
        match decrypt_key(&file, "pw") {
            Err(KeyStoreError::MalformedKey(reason)) => assert!(reason.contains("out of range")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_excessive_scrypt_cost() {
        let file: KeyFile = serde_json::from_str(
            &SCRYPT_VECTOR.replace("\"n\" : 262144", "\"n\" : 1073741824"),
        )
        .unwrap();
        assert!(matches!(
            decrypt_key(&file, TEST_PASSWORD),
            Err(KeyStoreError::MalformedKey(_))
        ));
    }

    // Web3 Secret Storage v3 reference vectors; neither records an address.
    pub(crate) const TEST_PASSWORD: &str = "testpassword";
    const TEST_SECRET: &str = "7a28b5ba57c53603b0b07b56bba752f7784bf506fa95edc395f5cf6c7514fe9d";

    pub(crate) const PBKDF2_VECTOR: &str = r#"{
        "crypto" : {
            "cipher" : "aes-128-ctr",
            "cipherparams" : { "iv" : "6087dab2f9fdbbfaddc31a909735c1e6" },
            "ciphertext" : "5318b4d5bcd28de64ee5559e671353e16f075ecae9f99c7a79a38af5f869aa46",
            "kdf" : "pbkdf2",
            "kdfparams" : {
                "c" : 262144,
                "dklen" : 32,
                "prf" : "hmac-sha256",
                "salt" : "ae3cd4e7013836a3df6bd7241b12db061dbe2c6785853cce422d148a624ce0bd"
            },
            "mac" : "517ead924a9d0dc3124507e3393d175ce3ff7c1e96529c6c555ce9e51205e9b2"
        },
        "id" : "3198bc9c-6672-5ab3-d995-4942343ae5b6",
        "version" : 3
    }"#;

    pub(crate) const SCRYPT_VECTOR: &str = r#"{
        "crypto" : {
            "cipher" : "aes-128-ctr",
            "cipherparams" : { "iv" : "83dbcc02d8ccb40e466191a123791e0e" },
            "ciphertext" : "d172bf743a674da9cdad04534d56926ef8358534d458fffccd4e6ad2fbde479c",
            "kdf" : "scrypt",
            "kdfparams" : {
                "dklen" : 32,
                "n" : 262144,
                "r" : 1,
                "p" : 8,
                "salt" : "ab0c7876052600dd703518d6fc3fe8984592145b591fc8fb5c6d43190334ba19"
            },
            "mac" : "2103ac29920d71da29f15d75b4a16dbe95cfd7ff8faea1056c33131d846e3097"
        },
        "id" : "3198bc9c-6672-5ab3-d995-4942343ae5b6",
        "version" : 3
    }"#;

    #[test]
    fn decrypts_reference_pbkdf2_key() {
        let file: KeyFile = serde_json::from_str(PBKDF2_VECTOR).unwrap();
        assert!(file.address.is_none());
        let secret = decrypt_key(&file, TEST_PASSWORD).unwrap();
        assert_eq!(hex::encode(secret.secret_bytes()), TEST_SECRET);
    }

    #[test]
    fn decrypts_reference_scrypt_key() {
        let file: KeyFile = serde_json::from_str(SCRYPT_VECTOR).unwrap();
        assert!(file.crypto.kdfparams.pbkdf2_iterations().is_none());
        let secret = decrypt_key(&file, TEST_PASSWORD).unwrap();
        assert_eq!(hex::encode(secret.secret_bytes()), TEST_SECRET);
    }
}
