//! Access credential handling
//!
//! - `inspector`: reads the unverified expiry and role claims of a token
//! - `store`: where the current credential lives between calls and restarts

mod inspector;
mod store;

pub use inspector::{
    decode_claims, is_expired, is_expired_at, Claims, Credential, InspectError, Session,
};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, CREDENTIAL_KEY};

#[cfg(test)]
pub(crate) use inspector::tests::token_with_claims;
#[cfg(test)]
pub(crate) use store::tests::ReadOnlyStore;
