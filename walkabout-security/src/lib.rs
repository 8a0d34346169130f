//! Authentication primitives: HS256 JWTs with a revocation cache, Argon2
//! password hashing, and digest-stored API keys.

pub mod api_key;
mod error;
mod identity;
mod jwt;
pub mod password;

pub use error::SecurityError;
pub use identity::{AuthMethod, Identity};
pub use jwt::{Claims, IssuedToken, JwtCodec, RevocationCache};
