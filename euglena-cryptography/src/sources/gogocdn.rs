use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::CryptoError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

// Embedded in the player the CDN serves; unchanged for years.
const KEY: &[u8; 32] = b"37911490979715163134003223491201";
const SECONDARY_KEY: &[u8; 32] = b"54674138327930866480207815084989";
const IV: &[u8; 16] = b"3134003223491201";

/// Decrypts the `data-value` token found on the embed page. Its plaintext is
/// a query-string fragment that must be passed back to the ajax endpoint.
pub fn decrypt_token(token_b64: &str) -> Result<String, CryptoError> {
	decrypt_with(token_b64, KEY)
}

/// Encrypts the video id the way the player does before requesting sources.
pub fn encrypt_id(id: &str) -> Result<String, CryptoError> {
	let message = id.as_bytes();
	let mut buf = vec![0u8; message.len() + 16];
	buf[..message.len()].copy_from_slice(message);

	let ciphertext = Aes256CbcEnc::new_from_slices(KEY, IV)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?
		.encrypt_padded_mut::<Pkcs7>(&mut buf, message.len())
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?;

	Ok(STANDARD.encode(ciphertext))
}

/// Decrypts the `data` field of the ajax response into the source-list JSON.
pub fn decrypt_payload(data_b64: &str) -> Result<String, CryptoError> {
	decrypt_with(data_b64, SECONDARY_KEY)
}

fn decrypt_with(ciphertext_b64: &str, key: &[u8; 32]) -> Result<String, CryptoError> {
	let mut buf = STANDARD
		.decode(ciphertext_b64.trim())
		.map_err(|err| CryptoError::Decrypt(format!("invalid base64: {err}")))?;

	let plaintext = Aes256CbcDec::new_from_slices(key, IV)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?
		.decrypt_padded_mut::<Pkcs7>(&mut buf)
		.map_err(|err| CryptoError::Decrypt(err.to_string()))?;

	String::from_utf8(plaintext.to_vec())
		.map_err(|err| CryptoError::Decrypt(format!("plaintext is not UTF-8: {err}")))
}
