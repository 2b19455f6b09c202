//! OAuth 2.0 and OpenID Connect support
//!
//! Outbound, a [`manager::TokenManager`] keeps a client-credentials access
//! token fresh. Inbound, a [`validator::BearerTokenValidator`] checks bearer
//! tokens against the issuer's signing keys. Both read the issuer's metadata
//! through a shared [`discovery::DiscoveryCache`].

pub mod discovery;
pub mod grant;
pub mod manager;
pub mod token_store;
pub mod validator;
pub mod verdict;
