//! RSA keypair loading, PEM (de)serialization, and raw sign/verify.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};

use relaystate_types::error::{ClResult, Error};

pub struct KeyPair {
	private: RsaPrivateKey,
	public: RsaPublicKey,
}

impl KeyPair {
	/// Generates a fresh 2048-bit RSA keypair, as used for every newly
	/// created local identity.
	pub fn generate() -> ClResult<Self> {
		let mut rng = rand::rng();
		let private = RsaPrivateKey::new(&mut rng, 2048)
			.map_err(|e| Error::CryptoError(format!("rsa keygen: {e}")))?;
		let public = RsaPublicKey::from(&private);
		Ok(Self { private, public })
	}

	pub fn from_private_pem(pem: &str) -> ClResult<Self> {
		let private = RsaPrivateKey::from_pkcs1_pem(pem)
			.map_err(|e| Error::CryptoError(format!("bad private key pem: {e}")))?;
		let public = RsaPublicKey::from(&private);
		Ok(Self { private, public })
	}

	/// Remote actors' `publicKey.publicKeyPem` is SPKI
	/// (`-----BEGIN PUBLIC KEY-----`), the format `cryptography.
	/// load_pem_public_key` accepts in the original Python implementation;
	/// PKCS#1 (`-----BEGIN RSA PUBLIC KEY-----`) is tried as a fallback for
	/// keys minted by this crate's own `public_pem`.
	pub fn public_from_pem(pem: &str) -> ClResult<RsaPublicKey> {
		if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
			return Ok(key);
		}
		RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| Error::CryptoError(format!("bad public key pem: {e}")))
	}

	pub fn private_pem(&self) -> ClResult<String> {
		self.private
			.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
			.map(|z| z.to_string())
			.map_err(|e| Error::CryptoError(format!("encode private key: {e}")))
	}

	pub fn public_pem(&self) -> ClResult<String> {
		self.public
			.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
			.map_err(|e| Error::CryptoError(format!("encode public key: {e}")))
	}

	pub fn public_key(&self) -> &RsaPublicKey {
		&self.public
	}

	/// Signs an arbitrary byte string with RSA-SHA256 (PKCS#1 v1.5), the
	/// scheme both HTTP Signatures and `RsaSignature2017` use.
	pub fn sign(&self, data: &[u8]) -> ClResult<Vec<u8>> {
		let signing_key = SigningKey::<Sha256>::new(self.private.clone());
		let mut rng = rand::rng();
		let signature = signing_key.sign_with_rng(&mut rng, data);
		Ok(signature.to_vec())
	}
}

/// Verifies an RSA-SHA256 signature against a PEM-encoded public key.
pub fn verify(public_key_pem: &str, data: &[u8], signature: &[u8]) -> ClResult<()> {
	let public = KeyPair::public_from_pem(public_key_pem)?;
	let verifying_key = VerifyingKey::<Sha256>::new(public);
	let signature = Signature::try_from(signature)
		.map_err(|e| Error::VerificationFormat(format!("bad signature bytes: {e}")))?;
	verifying_key
		.verify(data, &signature)
		.map_err(|_| Error::Verification("signature does not verify".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_then_verify_round_trips() {
		let pair = KeyPair::generate().unwrap();
		let sig = pair.sign(b"hello world").unwrap();
		verify(&pair.public_pem().unwrap(), b"hello world", &sig).unwrap();
	}

	#[test]
	fn verify_rejects_tampered_payload() {
		let pair = KeyPair::generate().unwrap();
		let sig = pair.sign(b"hello world").unwrap();
		let err = verify(&pair.public_pem().unwrap(), b"goodbye world", &sig);
		assert!(err.is_err());
	}

	#[test]
	fn pem_round_trips() {
		let pair = KeyPair::generate().unwrap();
		let pem = pair.private_pem().unwrap();
		let reloaded = KeyPair::from_private_pem(&pem).unwrap();
		assert_eq!(pair.public_pem().unwrap(), reloaded.public_pem().unwrap());
	}
}
