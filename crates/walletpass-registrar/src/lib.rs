//! Wallet Registrar
//!
//! Registers passes with a remote wallet service instead of shipping a
//! signed bundle. Each pass becomes an object under a shared class, and the
//! holder receives a signed save link that adds the object to their wallet.
//!
//! ## Flow
//!
//! 1. `ensure_class`: register the branding class (existing class is fine)
//! 2. `create_object`: register the per-serial object (exactly once)
//! 3. `SaveLinkSigner::sign`: issue a short-lived save link for the object
//!
//! ## Usage
//!
//! ```ignore
//! use walletpass_registrar::{RestWalletApi, SaveLinkSigner, ServiceAccountKey, WalletRegistrar};
//!
//! let key = ServiceAccountKey::from_file("service-account.json").await?;
//! let registrar = WalletRegistrar::new(Arc::new(RestWalletApi::new(key.clone())?), "3388000000022");
//! let signer = SaveLinkSigner::from_service_account(&key)?;
//!
//! let class_id = registrar.ensure_class(&definition, "tags").await?;
//! let object_id = registrar.create_object(&definition, &serial, &class_id).await?;
//! let link = signer.sign(&[object_id])?;
//! println!("Save: {}", link.url);
//! ```

pub mod api;
pub mod auth;
pub mod error;
pub mod registrar;
pub mod save_link;

pub use api::{InMemoryWalletApi, RestWalletApi, WalletApi};
pub use auth::{ServiceAccountKey, TokenSource};
pub use error::{RegistrarError, Result};
pub use registrar::{default_discriminator, RegistrationState, WalletRegistrar};
pub use save_link::{SaveClaims, SaveLink, SaveLinkSigner, DEFAULT_SAVE_LINK_TTL};
