//! Authentication for the Bitable API
//!
//! - Tenant access tokens issued from app credentials
//! - Single-flight refresh with a safety buffer before expiry

pub mod provider;
pub mod token_store;

pub use provider::{IssuedToken, LarkTokenProvider, TokenProvider};
pub use token_store::{Credential, TokenStore};
