use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::CryptoError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration: three digest
/// rounds of `prev || secret || salt` yield 48 bytes; the first 32 are the
/// key, the last 16 the IV.
pub fn derive_key_iv(secret: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
	let mut material = Vec::with_capacity(KEY_LEN + IV_LEN);
	let mut block = Vec::new();

	while material.len() < KEY_LEN + IV_LEN {
		let mut input = block;
		input.extend_from_slice(secret);
		input.extend_from_slice(salt);
		block = md5::compute(&input).0.to_vec();
		material.extend_from_slice(&block);
	}

	let mut key = [0u8; KEY_LEN];
	let mut iv = [0u8; IV_LEN];
	key.copy_from_slice(&material[..KEY_LEN]);
	iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
	(key, iv)
}

pub fn decrypt(ciphertext_b64: &str, secret: &str) -> Result<String, CryptoError> {
	let blob = STANDARD
		.decode(ciphertext_b64.trim())
		.map_err(|err| CryptoError::Decrypt(format!("invalid base64: {err}")))?;

	if blob.len() <= MAGIC.len() + SALT_LEN {
		return Err(CryptoError::Decrypt(
			"ciphertext shorter than the salt header".to_string(),
		));
	}

	let salt = &blob[MAGIC.len()..MAGIC.len() + SALT_LEN];
	let body = &blob[MAGIC.len() + SALT_LEN..];
	let (key, iv) = derive_key_iv(secret.as_bytes(), salt);

	let mut buf = body.to_vec();
	let plaintext = Aes256CbcDec::new_from_slices(&key, &iv)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?
		.decrypt_padded_mut::<Pkcs7>(&mut buf)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?;

	String::from_utf8(plaintext.to_vec())
		.map_err(|err| CryptoError::Decrypt(format!("plaintext is not UTF-8: {err}")))
}

pub fn encrypt(plaintext: &str, secret: &str, salt: &[u8; SALT_LEN]) -> Result<String, CryptoError> {
	let (key, iv) = derive_key_iv(secret.as_bytes(), salt);
	let message = plaintext.as_bytes();

	let mut buf = vec![0u8; message.len() + 16];
	buf[..message.len()].copy_from_slice(message);
	let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?
		.encrypt_padded_mut::<Pkcs7>(&mut buf, message.len())
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?;

	let mut blob = MAGIC.to_vec();
	blob.extend_from_slice(salt);
	blob.extend_from_slice(ciphertext);
	Ok(STANDARD.encode(blob))
}

#[cfg(test)]
mod tests {
	use super::*;

	// Generated with `openssl enc -aes-256-cbc -md md5`.
	const FIXTURE_SECRET: &str = "Uk9MTHpYQnJ3ZUtNcVZMYQ";
	const FIXTURE_PLAINTEXT: &str =
		r#"[{"file":"https://vault-10.example.org/stream/10/05/master.m3u8","type":"hls"}]"#;
	const FIXTURE_CIPHERTEXT: &str = "U2FsdGVkX19qMfDCiFsZ7QAVXzYPprwDSN52kptDscwZHbxtX7/YpkD5NbDETHGdp48gXBUsHZIrNBTB4YGlEh+roe0EB0Iy9dvi+AGHTtvUs+6vWVL97VIa+bMbCIft";

	#[test]
	fn test_decrypt_openssl_fixture() {
		let plaintext = decrypt(FIXTURE_CIPHERTEXT, FIXTURE_SECRET).unwrap();
		assert_eq!(plaintext, FIXTURE_PLAINTEXT);
	}

	#[test]
	fn test_encrypt_matches_openssl_fixture() {
		let ciphertext =
			encrypt(FIXTURE_PLAINTEXT, FIXTURE_SECRET, &[0x6a, 0x31, 0xf0, 0xc2, 0x88, 0x5b, 0x19, 0xed])
				.unwrap();
		assert_eq!(ciphertext, FIXTURE_CIPHERTEXT);
	}

	#[test]
	fn test_round_trip() {
		let plaintext = r#"{"sources":[{"file":"https://cdn.example/uwu.m3u8"}]}"#;
		let ciphertext = encrypt(plaintext, "some shared secret", b"\x00\x01\x02\x03\x04\x05\x06\x07").unwrap();
		assert_eq!(decrypt(&ciphertext, "some shared secret").unwrap(), plaintext);
	}

	#[test]
	fn test_wrong_secret_fails() {
		assert!(decrypt(FIXTURE_CIPHERTEXT, "not the secret").is_err());
	}

	#[test]
	fn test_truncated_blob_fails() {
		assert!(decrypt("U2FsdGVkX18=", FIXTURE_SECRET).is_err());
		assert!(decrypt("not base64 at all!!", FIXTURE_SECRET).is_err());
	}
}
