// Security primitives: digests, CSPRNG tokens, anti-forgery sessions, secret-at-rest encryption.

pub mod crypto;
pub mod csrf;
pub mod secret_protector;
