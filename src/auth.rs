// Copyright 2025 The rfbd Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC authentication (security type 2): DES challenge-response.
//!
//! The server sends a random 16-byte challenge; the client encrypts it with
//! a DES key derived from the shared password and sends the result back. The
//! key uses at most 7 password bytes (zero-padded, so the effective key is
//! 56 bits) and each key byte has its bits reversed, the historical VNC
//! quirk that every interoperable implementation carries.
//!
//! There is one nonce per connection and no rate limiting; VNC
//! authentication is a legacy scheme and should only face trusted networks.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Number of password bytes that contribute to the DES key.
const KEY_BYTES: usize = 7;

/// Generates the 16-byte random challenge nonce for one connection.
#[must_use]
pub fn generate_challenge() -> [u8; 16] {
    let mut challenge = [0u8; 16];
    rand::thread_rng().fill(&mut challenge);
    challenge
}

/// Computes the response a correctly authenticating client would send: the
/// challenge encrypted as two independent 8-byte DES blocks under the
/// password-derived key.
#[must_use]
pub fn expected_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let cipher =
        Des::new_from_slice(&derive_key(password)).expect("8-byte key is always a valid DES key");

    let mut response = [0u8; 16];
    for (src, dst) in challenge.chunks_exact(8).zip(response.chunks_exact_mut(8)) {
        let mut block = [0u8; 8];
        block.copy_from_slice(src);
        let mut block = block.into();
        cipher.encrypt_block(&mut block);
        dst.copy_from_slice(&block);
    }
    response
}

/// Verifies a client's challenge response, byte-exact.
///
/// Anything other than the 16-byte encrypted nonce fails, including
/// responses of the wrong length.
#[must_use]
pub fn verify_response(password: &str, challenge: &[u8; 16], response: &[u8]) -> bool {
    if response.len() != 16 {
        return false;
    }
    response == expected_response(password, challenge)
}

/// Derives the 8-byte DES key: up to 7 password bytes, zero-padded, each
/// byte bit-reversed. The eighth byte is always zero.
fn derive_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key
        .iter_mut()
        .zip(password.as_bytes().iter().take(KEY_BYTES))
    {
        *slot = reverse_bits(byte);
    }
    key
}

/// Reverses the bits within a byte, e.g. `0b1011_0001` becomes
/// `0b1000_1101`.
fn reverse_bits(byte: u8) -> u8 {
    byte.reverse_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_bits_matches_known_values() {
        assert_eq!(reverse_bits(0x00), 0x00);
        assert_eq!(reverse_bits(0xFF), 0xFF);
        assert_eq!(reverse_bits(0x80), 0x01);
        assert_eq!(reverse_bits(0xB1), 0x8D);
    }

    #[test]
    fn correct_response_is_accepted() {
        let challenge = generate_challenge();
        let response = expected_response("secret", &challenge);
        assert!(verify_response("secret", &challenge, &response));
    }

    #[test]
    fn any_bit_flip_is_rejected() {
        let challenge = [0x42u8; 16];
        let good = expected_response("secret", &challenge);
        for byte in 0..16 {
            for bit in 0..8 {
                let mut flipped = good;
                flipped[byte] ^= 1 << bit;
                assert!(
                    !verify_response("secret", &challenge, &flipped),
                    "bit {bit} of byte {byte} accepted after flip"
                );
            }
        }
    }

    #[test]
    fn wrong_password_is_rejected() {
        let challenge = generate_challenge();
        let response = expected_response("wrong", &challenge);
        assert!(!verify_response("secret", &challenge, &response));
    }

    #[test]
    fn wrong_length_responses_are_rejected() {
        let challenge = generate_challenge();
        assert!(!verify_response("secret", &challenge, &[]));
        assert!(!verify_response("secret", &challenge, &[0u8; 8]));
        assert!(!verify_response("secret", &challenge, &[0u8; 32]));
    }

    #[test]
    fn only_seven_password_bytes_matter() {
        let challenge = [0x5Au8; 16];
        assert_eq!(
            expected_response("passwords", &challenge),
            expected_response("passwordX", &challenge)
        );
        assert_ne!(
            expected_response("passwor", &challenge),
            expected_response("passwoX", &challenge)
        );
    }

    #[test]
    fn short_passwords_are_zero_padded() {
        let challenge = [0xA5u8; 16];
        let response = expected_response("abc", &challenge);
        assert!(verify_response("abc", &challenge, &response));
    }

    #[test]
    fn challenges_are_fresh() {
        assert_ne!(generate_challenge(), generate_challenge());
    }
}
