//! Core library for nixmirror.
//!
//! Everything that both the resigning gateway and the batch CLI need lives
//! here: the narinfo codec, named Ed25519 keys and signatures, the key
//! store, the conditional resigning policy, and the object-storage
//! backends.

pub mod error;
pub mod hash;
pub mod keystore;
pub mod mime;
pub mod narinfo;
pub mod nix_base32;
pub mod policy;
pub mod signing;
pub mod storage;

pub use error::{Error, Result};
pub use hash::TypedHash;
pub use keystore::KeyStore;
pub use narinfo::NarInfo;
pub use policy::{PolicyRule, ResignOutcome, Resigner};
pub use signing::{NamedPrivateKey, NamedPublicKey, Signature};
