use std::sync::Arc;
use std::time::Duration;

use crate::credential::{CredentialResolver, CredentialStore, LocalCredentials};
use crate::crypto::{rust_crypto, CryptoProvider};
use crate::Error;

/// Longest connection id RFC 9146 allows.
const MAX_CONNECTION_ID_LENGTH: usize = 20;

/// What to do with a new ClientHello from a peer that already has an
/// established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehandshakePolicy {
    /// Answer with a `no_renegotiation` alert and keep the existing session.
    Reject,
    /// Run the new handshake next to the existing session and replace the
    /// session only once the new one has been verified.
    ReplaceAfterVerify,
}

/// Connector configuration
#[derive(Clone)]
pub struct Config {
    use_server_name_indication: bool,
    client_auth_required: bool,
    client_auth_wanted: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    max_connections: usize,
    use_hello_verify_request: bool,
    rehandshake_policy: RehandshakePolicy,
    client_only: bool,
    server_only: bool,
    connection_id_length: usize,
    max_queue_rx: usize,
    max_violations: usize,
    receiver_threads: usize,
    connection_threads: usize,
    credentials: Arc<dyn CredentialResolver>,
    local_credentials: LocalCredentials,
    crypto_provider: CryptoProvider,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        ConfigBuilder {
            use_server_name_indication: false,
            client_auth_required: true,
            client_auth_wanted: false,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            max_connections: 150_000,
            use_hello_verify_request: true,
            rehandshake_policy: RehandshakePolicy::ReplaceAfterVerify,
            client_only: false,
            server_only: false,
            connection_id_length: 0,
            max_queue_rx: 30,
            max_violations: 10,
            receiver_threads: threads,
            connection_threads: threads,
            credentials: None,
            local_credentials: LocalCredentials::default(),
            crypto_provider: None,
        }
    }

    /// Whether Server Name Indication is honored.
    ///
    /// As server, a received host name selects the virtual host. As client, the
    /// host name scopes the own PSK identity and is recorded in the session.
    /// A host name passed to `connect` is sent either way.
    #[inline(always)]
    pub fn use_server_name_indication(&self) -> bool {
        self.use_server_name_indication
    }

    /// For a server, require client authentication.
    ///
    /// Makes the server fail handshakes where the client does not prove an
    /// identity. When false, clients complete as anonymous.
    #[inline(always)]
    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    /// For a server, request client authentication but accept a client that declines.
    #[inline(always)]
    pub fn client_auth_wanted(&self) -> bool {
        self.client_auth_wanted
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value. Doubled for every retry.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Max number of connections kept in the connection store.
    #[inline(always)]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Whether a server answers a ClientHello without cookie with a
    /// HelloVerifyRequest before keeping any state.
    #[inline(always)]
    pub fn use_hello_verify_request(&self) -> bool {
        self.use_hello_verify_request
    }

    /// Policy for handshakes arriving for an established session.
    #[inline(always)]
    pub fn rehandshake_policy(&self) -> RehandshakePolicy {
        self.rehandshake_policy
    }

    /// Whether inbound handshakes from new peers are accepted.
    #[inline(always)]
    pub fn accepts_handshakes(&self) -> bool {
        !self.client_only
    }

    /// Whether `connect` may start outbound handshakes.
    #[inline(always)]
    pub fn initiates_handshakes(&self) -> bool {
        !self.server_only
    }

    /// Length of the connection ids assigned by a server. Zero disables them.
    #[inline(always)]
    pub fn connection_id_length(&self) -> usize {
        self.connection_id_length
    }

    /// Max amount of out-of-order handshake messages to buffer per handshake.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Number of discarded protocol violations a handshake tolerates before failing.
    #[inline(always)]
    pub fn max_violations(&self) -> usize {
        self.max_violations
    }

    /// Number of threads the transport should use to receive datagrams.
    ///
    /// Advisory. The connector spawns no threads, the caller sizes its
    /// receive pool from this.
    #[inline(always)]
    pub fn receiver_threads(&self) -> usize {
        self.receiver_threads
    }

    /// Number of threads the transport should use to process connections.
    ///
    /// Advisory, like [`Config::receiver_threads`]. Any number of threads
    /// may drive one [`crate::Connector`] at once.
    #[inline(always)]
    pub fn connection_threads(&self) -> usize {
        self.connection_threads
    }

    /// Resolver for the credentials of peers.
    #[inline(always)]
    pub fn credentials(&self) -> &dyn CredentialResolver {
        &*self.credentials
    }

    /// Credentials this endpoint presents.
    #[inline(always)]
    pub fn local_credentials(&self) -> &LocalCredentials {
        &self.local_credentials
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }
}

/// Builder for connector configuration.
pub struct ConfigBuilder {
    use_server_name_indication: bool,
    client_auth_required: bool,
    client_auth_wanted: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    max_connections: usize,
    use_hello_verify_request: bool,
    rehandshake_policy: RehandshakePolicy,
    client_only: bool,
    server_only: bool,
    connection_id_length: usize,
    max_queue_rx: usize,
    max_violations: usize,
    receiver_threads: usize,
    connection_threads: usize,
    credentials: Option<Arc<dyn CredentialResolver>>,
    local_credentials: LocalCredentials,
    crypto_provider: Option<CryptoProvider>,
}

impl ConfigBuilder {
    /// Set whether Server Name Indication is honored.
    ///
    /// Defaults to false.
    pub fn use_server_name_indication(mut self, enabled: bool) -> Self {
        self.use_server_name_indication = enabled;
        self
    }

    /// Set whether a server requires client authentication.
    ///
    /// Defaults to true.
    pub fn client_auth_required(mut self, required: bool) -> Self {
        self.client_auth_required = required;
        self
    }

    /// Set whether a server requests, without requiring, client authentication.
    ///
    /// Only has an effect when client authentication is not required.
    /// Defaults to false.
    pub fn client_auth_wanted(mut self, wanted: bool) -> Self {
        self.client_auth_wanted = wanted;
        self
    }

    /// Set the time of first retry.
    ///
    /// Every flight restarts with this value. Doubled for every retry.
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the max number of connections kept in the connection store.
    ///
    /// Defaults to 150 000.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set whether a server verifies the peer address with a stateless cookie.
    ///
    /// Defaults to true.
    pub fn use_hello_verify_request(mut self, enabled: bool) -> Self {
        self.use_hello_verify_request = enabled;
        self
    }

    /// Set the policy for handshakes arriving for an established session.
    ///
    /// Defaults to [`RehandshakePolicy::ReplaceAfterVerify`].
    pub fn rehandshake_policy(mut self, policy: RehandshakePolicy) -> Self {
        self.rehandshake_policy = policy;
        self
    }

    /// Only initiate handshakes, never accept them.
    ///
    /// Defaults to false.
    pub fn client_only(mut self, client_only: bool) -> Self {
        self.client_only = client_only;
        self
    }

    /// Only accept handshakes, never initiate them.
    ///
    /// Defaults to false.
    pub fn server_only(mut self, server_only: bool) -> Self {
        self.server_only = server_only;
        self
    }

    /// Set the length of the connection ids a server assigns.
    ///
    /// Zero disables connection ids. Defaults to 0.
    pub fn connection_id_length(mut self, length: usize) -> Self {
        self.connection_id_length = length;
        self
    }

    /// Set the max amount of out-of-order handshake messages buffered per handshake.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the number of discarded protocol violations tolerated per handshake.
    ///
    /// Defaults to 10.
    pub fn max_violations(mut self, max: usize) -> Self {
        self.max_violations = max;
        self
    }

    /// Set the number of receiver threads of the transport.
    ///
    /// Defaults to the available parallelism.
    pub fn receiver_threads(mut self, threads: usize) -> Self {
        self.receiver_threads = threads;
        self
    }

    /// Set the number of connection processing threads of the transport.
    ///
    /// Defaults to the available parallelism.
    pub fn connection_threads(mut self, threads: usize) -> Self {
        self.connection_threads = threads;
        self
    }

    /// Set the resolver for peer credentials.
    ///
    /// Defaults to an empty [`CredentialStore`], which knows no peer.
    pub fn credentials(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.credentials = Some(Arc::new(resolver));
        self
    }

    /// Set a shared resolver for peer credentials.
    pub fn shared_credentials(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(resolver);
        self
    }

    /// Set the credentials this endpoint presents.
    ///
    /// Defaults to none, i.e. an anonymous endpoint.
    pub fn local_credentials(mut self, local: LocalCredentials) -> Self {
        self.local_credentials = local;
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the installed default is used, or else the RustCrypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` for contradicting or out-of-range settings,
    /// or if the crypto provider fails its self-check.
    ///
    /// The crypto provider is selected in the following priority order:
    /// 1. Explicit provider set via `with_crypto_provider()`
    /// 2. Default provider installed via `CryptoProvider::install_default()`
    /// 3. The RustCrypto provider
    pub fn build(self) -> Result<Config, Error> {
        if self.max_connections == 0 {
            return Err(Error::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.flight_start_rto.is_zero() {
            return Err(Error::ConfigError(
                "flight_start_rto must be positive".to_string(),
            ));
        }
        if self.connection_id_length > MAX_CONNECTION_ID_LENGTH {
            return Err(Error::ConfigError(format!(
                "connection_id_length must be at most {}",
                MAX_CONNECTION_ID_LENGTH
            )));
        }
        if self.client_only && self.server_only {
            return Err(Error::ConfigError(
                "client_only and server_only are mutually exclusive".to_string(),
            ));
        }
        if self.receiver_threads == 0 || self.connection_threads == 0 {
            return Err(Error::ConfigError(
                "thread counts must be at least 1".to_string(),
            ));
        }

        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .unwrap_or_else(rust_crypto::default_provider);

        // Always validate the crypto provider
        crypto_provider.validate()?;

        let credentials: Arc<dyn CredentialResolver> = match self.credentials {
            Some(resolver) => resolver,
            None => Arc::new(CredentialStore::builder().build()),
        };

        Ok(Config {
            use_server_name_indication: self.use_server_name_indication,
            client_auth_required: self.client_auth_required,
            client_auth_wanted: self.client_auth_wanted,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            max_connections: self.max_connections,
            use_hello_verify_request: self.use_hello_verify_request,
            rehandshake_policy: self.rehandshake_policy,
            client_only: self.client_only,
            server_only: self.server_only,
            connection_id_length: self.connection_id_length,
            max_queue_rx: self.max_queue_rx,
            max_violations: self.max_violations,
            receiver_threads: self.receiver_threads,
            connection_threads: self.connection_threads,
            credentials,
            local_credentials: self.local_credentials,
            crypto_provider,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        // The RustCrypto provider always passes its self-check and the
        // default settings are in range.
        match Config::builder().build() {
            Ok(config) => config,
            Err(e) => panic!("Default config should always validate: {}", e),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("use_server_name_indication", &self.use_server_name_indication)
            .field("client_auth_required", &self.client_auth_required)
            .field("client_auth_wanted", &self.client_auth_wanted)
            .field("flight_start_rto", &self.flight_start_rto)
            .field("flight_retries", &self.flight_retries)
            .field("max_connections", &self.max_connections)
            .field("rehandshake_policy", &self.rehandshake_policy)
            .finish_non_exhaustive()
    }
}
