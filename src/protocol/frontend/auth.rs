//! Authentication messages and the SCRAM-SHA-256 / MD5 password primitives.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism name this client implements.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding".
const GS2_HEADER: &str = "n,,";

/// base64("n,,"), the `c=` attribute of client-final-message.
const CHANNEL_BINDING: &str = "biws";

const NONCE_LEN: usize = 18;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute MD5 password hash.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash_hex = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(i32::try_from(initial_response.len()).unwrap_or(i32::MAX));
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("SCRAM: HMAC key rejected: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Escape a SCRAM `saslname`: `=` becomes `=3D` and `,` becomes `=2C`.
fn escape_username(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for c in user.chars() {
        match c {
            '=' => out.push_str("=3D"),
            ',' => out.push_str("=2C"),
            c => out.push(c),
        }
    }
    out
}

/// SCRAM-SHA-256 client exchange (RFC 5802 / RFC 7677) without channel binding.
///
/// The exchange is strictly ordered: [`client_first_message`](Self::client_first_message),
/// [`process_server_first`](Self::process_server_first), then
/// [`verify_server_final`](Self::verify_server_final).
pub struct ScramClient {
    nonce: String,
    password: String,
    client_first_bare: String,
    /// Salted password and AuthMessage, set once the server-first-message is processed
    verifier: Option<([u8; 32], String)>,
}

impl ScramClient {
    /// Create a client with a fresh random nonce.
    pub fn new(user: &str, password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(user, password, &BASE64.encode(nonce_bytes))
    }

    /// Create a client with a caller-chosen nonce.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            nonce: nonce.to_string(),
            password: password.to_string(),
            client_first_bare: format!("n={},r={}", escape_username(user), nonce),
            verifier: None,
        }
    }

    /// The client-first-message, sent in SASLInitialResponse.
    pub fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse::<u32>().ok();
            }
        }

        let missing = |what: &str| Error::Auth(format!("SCRAM: server-first-message lacks {what}"));
        let combined_nonce = combined_nonce.ok_or_else(|| missing("a nonce"))?;
        let salt_b64 = salt_b64.ok_or_else(|| missing("a salt"))?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or_else(|| missing("an iteration count"))?;

        if !combined_nonce.starts_with(&self.nonce) || combined_nonce.len() == self.nonce.len() {
            return Err(Error::Auth(
                "SCRAM: server nonce does not extend the client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| Error::Auth(format!("SCRAM: invalid salt: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let client_final_without_proof = format!("c={CHANNEL_BINDING},r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let mut client_proof = client_key;
        for (p, s) in client_proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        self.verifier = Some((salted_password, auth_message));
        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(client_proof)
        ))
    }

    /// Verify server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("SCRAM: server reported {err}")));
        }

        let server_signature_b64 = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| Error::Auth("SCRAM: malformed server-final-message".into()))?;
        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| Error::Auth(format!("SCRAM: invalid server signature: {e}")))?;

        let (salted_password, auth_message) = self
            .verifier
            .as_ref()
            .ok_or_else(|| Error::Auth("SCRAM: server-final before server-first".into()))?;

        let server_key = hmac(salted_password, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected.as_slice() {
            return Err(Error::Auth("SCRAM: server signature mismatch".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("client_first_bare", &self.client_first_bare)
            .finish_non_exhaustive()
    }
}
