//! DTLS 1.2 handshake engine for many concurrent peers.
//!
//! The [`Connector`] runs client and server handshakes authenticated with a
//! pre-shared key, a raw public key or an X.509 chain, routes server
//! handshakes to virtual hosts by Server Name Indication and hands out a
//! [`SessionContext`] for every established session. Record protection and
//! the datagram transport live outside the crate: the transport exchanges
//! structured [`message::Message`] values with the connector.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use dtls_connector::{Config, ConnectOptions, Connector, LocalCredentials, Output, PskIdentity};
//!
//! let config = Config::builder()
//!     .local_credentials(LocalCredentials::new().with_psk(PskIdentity::new("sensor-1", b"secret".to_vec())))
//!     .build()
//!     .unwrap();
//! let connector = Connector::new(Arc::new(config)).unwrap();
//!
//! let peer = "192.0.2.1:5684".parse().unwrap();
//! let establishment = connector.connect(peer, ConnectOptions::new(), Instant::now()).unwrap();
//!
//! loop {
//!     match connector.poll_output(Instant::now()) {
//!         Output::Message { .. } => { /* hand to the transport */ }
//!         Output::Timeout(_) => break,
//!         _ => {}
//!     }
//! }
//! # let _ = establishment;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

pub mod certificate;
pub mod crypto;
pub mod identity;
pub mod message;

mod config;
pub use config::{Config, ConfigBuilder, RehandshakePolicy};

mod connector;
pub use connector::{ConnectOptions, Connector, Output};

mod credential;
pub use credential::{CredentialRecord, CredentialResolver, CredentialScheme, KeyMaterial};
pub use credential::{CredentialSet, CredentialStore, CredentialStoreBuilder};
pub use credential::{LocalCertificate, LocalCredentials, LocalKey, PskIdentity};

mod error;
pub use error::{Error, FailureKind};

mod establish;
pub use establish::Establishment;

mod handshake;
pub use handshake::HandshakeState;

mod session;
pub use session::{Role, SessionContext, SessionContextBuilder};

mod sni;
pub use sni::{ServerName, SniRouter};

mod verifier;
pub use verifier::{IdentityVerifier, Proof, VerifyScope};
pub use verifier::{PskVerifier, RawPublicKeyVerifier, X509Verifier};

pub use identity::VerifiedIdentity;

mod connection;
mod cookie;
mod store;
mod timer;
