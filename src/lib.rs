//! ACME (RFC 8555) client for obtaining domain-validated TLS certificates
//! from Let's Encrypt by answering http-01 challenges, plus installation of
//! the result into a cPanel host.
//!
//! The pipeline is blocking and strictly sequential: discover the CA's
//! directory, establish (or reuse) the account, create an order, publish the
//! proof files under the webroot, let the CA validate, finalize with a fresh
//! certificate key, and download the chain. Staging runs exercise the whole
//! pipeline without persisting the result.
//!
//! # Example
//!
//! ```no_run
//! use certsmith::{
//!     account::Environment,
//!     order::{acquire_certificate, AcquireOptions},
//!     storage::FileStorage,
//!     transport::Transport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = FileStorage::open("/home/user/certsmith")?;
//!     let mut transport = Transport::with_reqwest()?;
//!
//!     let options = AcquireOptions::new(Environment::Production, "/home/user/public_html");
//!     let issued = acquire_certificate(
//!         &["example.com", "www.example.com"],
//!         &options,
//!         &storage,
//!         &mut transport,
//!     )?;
//!
//!     println!("issued:\n{}", issued.certificate_pem);
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod directory;
pub mod installer;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod protection;
pub mod signature;
pub mod storage;
pub mod transport;

pub use account::{update_contact, Account, Environment};
pub use certificate::Certificate;
pub use installer::{install_stored, Installer, UapiInstaller};
pub use order::{acquire_certificate, AcquireOptions, Issued, Pacing, PollPolicy};
pub use storage::{FileStorage, Storage};
pub use transport::Transport;
