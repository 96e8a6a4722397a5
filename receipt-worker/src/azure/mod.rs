//! Thin REST clients for the Azure services the handlers call.
//!
//! Each client implements one of the collaborator traits in
//! [`crate::backend`], so handlers never depend on them directly.

pub mod blob;
pub mod credential;
pub mod docint;
pub mod keyvault;

pub use blob::{BlobClient, StorageConnection};
pub use credential::ManagedIdentityCredential;
pub use docint::DocumentIntelligenceClient;
pub use keyvault::KeyVaultClient;
