//! AES-256-GCM field encryption.
//!
//! [`cipher`] holds the key-agnostic primitives and is free of AWS and HTTP
//! dependencies. [`CipherEngine`] adds the managed key ring, and the
//! field-level record helpers live in [`fields`].
//!
//! # Envelope format
//!
//! ```text
//! base64_standard( nonce[12] ‖ ciphertext ‖ tag[16] )
//! ```
//!
//! Associated data is authenticated but never stored; decryption must be
//! given the same string that encryption was.

pub mod cipher;
pub mod engine;
pub mod fields;

pub use cipher::{
    generate_key, hash_identifier, is_identifier_hash, CipherError, Envelope, KEY_LEN, NONCE_LEN,
    TAG_LEN,
};
pub use engine::{CipherEngine, DEFAULT_MAX_PLAINTEXT_BYTES};
