//! Token handling.

pub mod jwt;

pub use jwt::{JwtError, JwtService, TokenClaims};
