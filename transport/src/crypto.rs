use std::sync::Arc;

use crate::TransportError;

/// Optional crypto hook set, attached to a [`crate::Transport`] at the
/// client/server core level rather than inside a transport backend. When
/// present, every server-sent reply body is wrapped with [`CryptoHooks::encrypt_framed`]
/// before it goes out, `decrypt_framed` on the receiving client unwraps it
/// back to plaintext, `on_accept`/`on_close` track accepted-socket
/// lifecycle, and `on_connect` fires once a client's transport is
/// (re)established. The core never does encryption itself; these are
/// opaque callbacks into an external engine.
#[derive(Clone)]
pub struct CryptoHooks {
    pub encrypt: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub decrypt: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub on_accept: Arc<dyn Fn() + Send + Sync>,
    pub on_close: Arc<dyn Fn() + Send + Sync>,
    pub on_connect: Arc<dyn Fn() + Send + Sync>,
}

/// Magic/length preamble prepended ahead of each server-sent ciphertext
/// payload when crypto hooks are configured.
pub const CRYPTO_PREAMBLE_MAGIC: u32 = 0xa5a5_0001;

impl CryptoHooks {
    /// Allocates a fresh `plaintext.len() + 64` byte buffer, matching the
    /// transport memory note for crypto encrypt.
    pub fn encrypt_framed(&self, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = (self.encrypt)(plaintext);
        let mut out = Vec::with_capacity(8 + ciphertext.len());
        out.extend_from_slice(&CRYPTO_PREAMBLE_MAGIC.to_be_bytes());
        out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Inverse of [`CryptoHooks::encrypt_framed`]: strips and validates the
    /// magic/length preamble, then runs `decrypt` over the ciphertext.
    pub fn decrypt_framed(&self, framed: &[u8]) -> Result<Vec<u8>, TransportError> {
        if framed.len() < 8 {
            return Err(TransportError::Crypto("payload shorter than crypto preamble".into()));
        }
        let magic = u32::from_be_bytes(framed[0..4].try_into().unwrap());
        if magic != CRYPTO_PREAMBLE_MAGIC {
            return Err(TransportError::Crypto(format!("bad crypto preamble magic {magic:#x}")));
        }
        let len = u32::from_be_bytes(framed[4..8].try_into().unwrap()) as usize;
        let ciphertext = framed.get(8..8 + len).ok_or_else(|| {
            TransportError::Crypto(format!("crypto preamble claims {len} bytes, only {} present", framed.len() - 8))
        })?;
        Ok((self.decrypt)(ciphertext))
    }
}

impl std::fmt::Debug for CryptoHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoHooks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor_hooks() -> CryptoHooks {
        CryptoHooks {
            encrypt: Arc::new(|p| p.iter().map(|b| b ^ 0xff).collect()),
            decrypt: Arc::new(|c| c.iter().map(|b| b ^ 0xff).collect()),
            on_accept: Arc::new(|| {}),
            on_close: Arc::new(|| {}),
            on_connect: Arc::new(|| {}),
        }
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let hooks = xor_hooks();
        let framed = hooks.encrypt_framed(b"hello world");
        let plain = hooks.decrypt_framed(&framed).unwrap();
        assert_eq!(&plain, b"hello world");
    }

    #[test]
    fn decrypt_rejects_bad_magic() {
        let hooks = xor_hooks();
        let mut framed = hooks.encrypt_framed(b"x");
        framed[0] = 0;
        assert!(hooks.decrypt_framed(&framed).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_payload() {
        let hooks = xor_hooks();
        let framed = hooks.encrypt_framed(b"hello");
        assert!(hooks.decrypt_framed(&framed[..6]).is_err());
    }
}
