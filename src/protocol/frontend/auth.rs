//! Credential-proof messages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext, MD5 or crypt digest).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// `"md5" + hex(md5(hex(md5(password + username)) + salt))`
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Traditional DES `crypt(3)` of the password under the server's 2-byte salt.
#[cfg(feature = "legacy-crypt")]
pub fn crypt_password(password: &str, salt: &[u8; 2]) -> Result<String> {
    let salt = std::str::from_utf8(salt)
        .map_err(|_| Error::auth("crypt salt is not ASCII"))?;
    pwhash::unix_crypt::hash_with(salt, password)
        .map_err(|e| Error::auth(format!("crypt: {e}")))
}

#[cfg(not(feature = "legacy-crypt"))]
pub fn crypt_password(_password: &str, _salt: &[u8; 2]) -> Result<String> {
    Err(Error::auth("crypt authentication not supported"))
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::auth(format!("HMAC: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// SCRAM-SHA-256 client without channel binding.
pub struct ScramClient {
    nonce: String,
    password: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

/// GS2 header for "client does not support channel binding".
const GS2_HEADER: &str = "n,,";

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    /// Fixed-nonce constructor, used by tests and scripted servers.
    pub fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            nonce,
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// The username is left empty; the server uses the startup user.
    pub fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare())
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Consume `r=..,s=..,i=..` and produce the client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                combined_nonce = Some(v);
            } else if let Some(v) = part.strip_prefix("s=") {
                salt_b64 = Some(v);
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v.parse::<u32>().ok();
            }
        }
        let combined_nonce =
            combined_nonce.ok_or_else(|| Error::auth("SCRAM: missing nonce"))?;
        let salt = salt_b64.ok_or_else(|| Error::auth("SCRAM: missing salt"))?;
        let iterations = iterations.ok_or_else(|| Error::auth("SCRAM: missing iteration count"))?;
        if !combined_nonce.starts_with(&self.nonce) {
            return Err(Error::auth("SCRAM: server nonce does not extend client nonce"));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|e| Error::auth(format!("SCRAM: invalid salt: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c={},r={combined_nonce}", BASE64.encode(GS2_HEADER));
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare());
        let signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check `v=<server signature>` against our own computation.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::auth(format!("SCRAM: server rejected proof: {err}")));
        }
        let signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::auth("SCRAM: malformed server-final-message"))?;
        let signature = BASE64
            .decode(signature_b64)
            .map_err(|e| Error::auth(format!("SCRAM: invalid server signature: {e}")))?;

        let (Some(salted_password), Some(auth_message)) =
            (&self.salted_password, &self.auth_message)
        else {
            return Err(Error::auth("SCRAM: server-final before server-first"));
        };
        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;
        if signature.as_slice() != expected.as_slice() {
            return Err(Error::auth("SCRAM: server signature mismatch"));
        }
        Ok(())
    }

    /// Server-side counterpart of the exchange, for scripted servers.
    ///
    /// Returns `(server_final_message, proof_ok)` for a client-final-message.
    pub fn server_verify(
        password: &str,
        salt: &[u8],
        iterations: u32,
        client_first_bare: &str,
        server_first: &str,
        client_final: &str,
    ) -> Result<(String, bool)> {
        let (without_proof, proof_b64) = client_final
            .rsplit_once(",p=")
            .ok_or_else(|| Error::auth("SCRAM: client-final without proof"))?;
        let proof = BASE64
            .decode(proof_b64)
            .map_err(|e| Error::auth(format!("SCRAM: invalid proof: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted_password);
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let expected: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;
        Ok((format!("v={}", BASE64.encode(server_signature)), proof == expected))
    }
}
