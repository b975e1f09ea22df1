//! SCRAM-SHA-256 client conversation.
//!
//! Only the message arithmetic lives here; the session carries the
//! messages in `saslStart` and `saslContinue` commands. Passwords are used
//! as given, without SASLprep normalization.

use std::num::NonZeroU32;

use base64::prelude::*;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, hmac, pbkdf2};

use super::error::ProbeError;

/// SASL mechanism name.
pub(crate) const MECHANISM: &str = "SCRAM-SHA-256";

const NONCE_LEN: usize = 24;

/// Servers never issue fewer iterations than this.
const MIN_ITERATIONS: u32 = 4096;

/// Client state between the first and final messages.
#[derive(Debug)]
pub(crate) struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
}

/// The client's final message and the server signature it should earn.
#[derive(Debug)]
pub(crate) struct ClientFinal {
    pub(crate) message: String,
    server_signature: Vec<u8>,
}

impl ScramClient {
    /// Starts a conversation with a fresh random nonce.
    pub(crate) fn new(username: &str, password: &str) -> Result<Self, ProbeError> {
        let mut raw = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut raw)
            .map_err(|_| ProbeError::AuthFailed("no random source for the client nonce".to_string()))?;
        Ok(Self::with_nonce(username, password, BASE64_STANDARD.encode(raw)))
    }

    fn with_nonce(username: &str, password: &str, nonce: String) -> Self {
        let client_first_bare = format!("n={},r={nonce}", sasl_name(username));
        Self {
            password: password.to_string(),
            nonce,
            client_first_bare,
        }
    }

    /// Returns the client-first message, with an empty GS2 header.
    pub(crate) fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answers the server-first message with a proof of the password.
    pub(crate) fn client_final(&self, server_first: &str) -> Result<ClientFinal, ProbeError> {
        let nonce = attribute(server_first, 'r')?;
        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ProbeError::AuthFailed(
                "server nonce does not extend the client nonce".to_string(),
            ));
        }
        let salt = BASE64_STANDARD
            .decode(attribute(server_first, 's')?)
            .map_err(|e| ProbeError::AuthFailed(format!("bad salt: {e}")))?;
        let iterations = attribute(server_first, 'i')?
            .parse::<u32>()
            .ok()
            .filter(|i| *i >= MIN_ITERATIONS)
            .and_then(NonZeroU32::new)
            .ok_or_else(|| ProbeError::AuthFailed("bad iteration count".to_string()))?;

        let salted = salted_password(&self.password, &salt, iterations);
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_key = hmac_sha256(&salted, b"Client Key");
        let stored_key = digest::digest(&digest::SHA256, &client_key);
        let client_signature = hmac_sha256(stored_key.as_ref(), auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(key, sig)| key ^ sig)
            .collect();

        let server_key = hmac_sha256(&salted, b"Server Key");
        Ok(ClientFinal {
            message: format!("{without_proof},p={}", BASE64_STANDARD.encode(proof)),
            server_signature: hmac_sha256(&server_key, auth_message.as_bytes()),
        })
    }
}

impl ClientFinal {
    /// Checks that the server-final message proves the server knows the
    /// password too.
    pub(crate) fn verify(&self, server_final: &str) -> Result<(), ProbeError> {
        if let Ok(error) = attribute(server_final, 'e') {
            return Err(ProbeError::AuthFailed(error.to_string()));
        }
        let signature = BASE64_STANDARD
            .decode(attribute(server_final, 'v')?)
            .map_err(|e| ProbeError::AuthFailed(format!("bad server signature: {e}")))?;
        if signature == self.server_signature {
            Ok(())
        } else {
            Err(ProbeError::AuthFailed("server signature mismatch".to_string()))
        }
    }
}

pub(crate) fn salted_password(password: &str, salt: &[u8], iterations: NonZeroU32) -> [u8; 32] {
    let mut out = [0u8; digest::SHA256_OUTPUT_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut out,
    );
    out
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn sasl_name(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn attribute(message: &str, key: char) -> Result<&str, ProbeError> {
    message
        .split(',')
        .find_map(|part| {
            let mut chars = part.chars();
            (chars.next() == Some(key) && chars.next() == Some('=')).then(|| &part[2..])
        })
        .ok_or_else(|| ProbeError::AuthFailed(format!("server message lacks '{key}'")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Conversation from RFC 7677, section 3.
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    fn client() -> ScramClient {
        ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO".to_string())
    }

    #[test]
    fn test_known_conversation() {
        let client = client();
        assert_eq!(client.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let last = client.client_final(SERVER_FIRST).unwrap();
        assert_eq!(
            last.message,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        last.verify("v=6rriTRBi23WpRR/wktUn8IbOArmzkbKf9XSiMJ8bTA4=").unwrap();
    }

    #[test]
    fn test_wrong_server_signature_is_rejected() {
        let last = client().client_final(SERVER_FIRST).unwrap();
        let err = last.verify("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap_err();
        assert!(matches!(err, ProbeError::AuthFailed(_)));

        let err = last.verify("e=invalid-proof").unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed: invalid-proof");
    }

    #[test]
    fn test_server_nonce_must_extend_client_nonce() {
        let err = client()
            .client_final("r=somebodyElse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(err.to_string().contains("nonce"));
    }

    #[test]
    fn test_low_iteration_count_is_rejected() {
        let err = client()
            .client_final("r=rOprNGfwEbeRWgbNEkqOxyz,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1")
            .unwrap_err();
        assert!(err.to_string().contains("iteration"));
    }

    #[test]
    fn test_username_is_escaped() {
        let client = ScramClient::with_nonce("a=b,c", "pw", "n0nce".to_string());
        assert_eq!(client.client_first(), "n,,n=a=3Db=2Cc,r=n0nce");
    }
}
