use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use zeroize::Zeroizing;

use crate::message::{AlertDescription, Body, Message, MessageType, Random};
use crate::timer::ExponentialBackoff;
use crate::{Config, Error};

const MASTER_SECRET_LEN: usize = 48;
const VERIFY_DATA_LEN: usize = 12;

/// State shared by client and server side of one handshake attempt.
///
/// Owns message sequencing, the reorder queue, the transcript and the
/// current flight with its retransmission timer.
pub(crate) struct Engine {
    config: Arc<Config>,

    /// Epoch every message of this attempt is sent and expected in.
    epoch: u16,

    /// Expected peer handshake sequence number
    peer_handshake_seq_no: u16,

    /// Next handshake message sequence number for sending
    next_handshake_seq_no: u16,

    /// Peer messages ahead of sequence, by message_seq.
    queue_rx: BTreeMap<u16, Message>,

    /// Messages ready to go out.
    queue_tx: VecDeque<Message>,

    /// Encoded handshake messages for Finished and CertificateVerify.
    transcript: Vec<u8>,

    /// The messages sent in the current flight.
    flight_saved: Vec<Message>,

    /// Peer message whose retransmission means our current flight was lost.
    flight_answers: Option<MessageType>,

    /// Flight backoff
    flight_backoff: ExponentialBackoff,

    /// Timeout for the current flight
    flight_timeout: Timeout,

    /// Discarded unexpected messages.
    violations: usize,

    /// Alert to send the peer if the attempt fails.
    fail_alert: Option<AlertDescription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

impl Engine {
    pub fn new(config: Arc<Config>, epoch: u16) -> Self {
        let flight_backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries());

        Engine {
            config,
            epoch,
            peer_handshake_seq_no: 0,
            next_handshake_seq_no: 0,
            queue_rx: BTreeMap::new(),
            queue_tx: VecDeque::new(),
            transcript: Vec::new(),
            flight_saved: Vec::new(),
            flight_answers: None,
            flight_backoff,
            flight_timeout: Timeout::Disabled,
            violations: 0,
            fail_alert: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Continue in the epoch the server chose.
    pub fn set_epoch(&mut self, epoch: u16) {
        if epoch != self.epoch {
            debug!("Adopting epoch {} (was {})", epoch, self.epoch);
            self.epoch = epoch;
        }
    }

    /// Align sequence numbers with a ClientHello that starts a server attempt.
    pub fn set_sequence(&mut self, hello_seq: u16) {
        self.peer_handshake_seq_no = hello_seq;
        self.next_handshake_seq_no = hello_seq;
    }

    /// Queue an inbound handshake message.
    ///
    /// Old duplicates never reach the queue. A duplicate of the message that
    /// our current flight answers means that flight got lost, so it is resent.
    pub fn insert_incoming(&mut self, message: Message) {
        let seq = message.message_seq;

        if seq < self.peer_handshake_seq_no {
            if message.body.message_type().is_some()
                && message.body.message_type() == self.flight_answers
            {
                self.flight_resend("dupe triggers resend");
            } else {
                trace!("Drop duplicate {:?} seq {}", message.body.message_type(), seq);
            }
            return;
        }

        if self.queue_rx.len() >= self.config.max_queue_rx() && !self.queue_rx.contains_key(&seq) {
            warn!(
                "Receive queue full (max {}), drop seq {}",
                self.config.max_queue_rx(),
                seq
            );
            return;
        }

        // First copy wins, retransmissions carry the same content.
        self.queue_rx.entry(seq).or_insert(message);
    }

    /// Take the next in-sequence handshake if it is one of `wanted`.
    ///
    /// A message of another type at the expected sequence number is discarded
    /// as a protocol violation without consuming the number, so the correct
    /// retransmission can still fill the slot.
    pub fn next_handshake(&mut self, wanted: &[MessageType]) -> Result<Option<Message>, Error> {
        let Some(message) = self.queue_rx.remove(&self.peer_handshake_seq_no) else {
            return Ok(None);
        };

        let Some(message_type) = message.body.message_type() else {
            return Ok(None);
        };

        if !wanted.contains(&message_type) {
            self.violation(format!(
                "Unexpected {:?} seq {}, wanted {:?}",
                message_type, message.message_seq, wanted
            ))?;
            return Ok(None);
        }

        // A HelloVerifyRequest restarts the exchange and is not part of it.
        if message_type != MessageType::HelloVerifyRequest {
            message.body.serialize(message.message_seq, &mut self.transcript);
        }

        // Move the expected seq_no along
        self.peer_handshake_seq_no = message.message_seq.wrapping_add(1);

        Ok(Some(message))
    }

    /// Whether the next in-sequence message is waiting.
    pub fn has_next_handshake(&self) -> bool {
        self.queue_rx.contains_key(&self.peer_handshake_seq_no)
    }

    /// Count a tolerated protocol violation, failing once there were too many.
    pub fn violation(&mut self, reason: String) -> Result<(), Error> {
        self.violations += 1;
        warn!("Discarding: {} ({} so far)", reason, self.violations);

        if self.violations > self.config.max_violations() {
            return Err(self.fail(
                AlertDescription::UnexpectedMessage,
                Error::ProtocolViolation(format!("Too many protocol violations: {}", reason)),
            ));
        }
        Ok(())
    }

    /// Record the alert for a fatal error and pass the error on.
    pub fn fail(&mut self, alert: AlertDescription, error: Error) -> Error {
        self.fail_alert = Some(alert);
        error
    }

    pub fn fail_alert(&self) -> Option<AlertDescription> {
        self.fail_alert
    }

    /// Create the next handshake message of the current flight.
    pub fn create_handshake(&mut self, body: Body) {
        let seq = self.next_handshake_seq_no;
        self.next_handshake_seq_no = seq.wrapping_add(1);

        body.serialize(seq, &mut self.transcript);

        let message = Message::new(self.epoch, seq, body);
        trace!("Send {:?} seq {}", message.body.message_type(), seq);
        self.flight_saved.push(message.clone());
        self.queue_tx.push_back(message);
    }

    pub fn poll_transmit(&mut self) -> Option<Message> {
        self.queue_tx.pop_front()
    }

    pub fn flight_begin(&mut self, answers: Option<MessageType>) {
        debug!("Begin flight answering {:?}", answers);
        self.flight_backoff.reset();
        self.flight_saved.clear();
        self.flight_answers = answers;
        self.flight_timeout = Timeout::Unarmed;
    }

    pub fn flight_stop_resend_timers(&mut self) {
        if self.flight_timeout != Timeout::Disabled {
            debug!("Stop flight timeout");
        }
        self.flight_timeout = Timeout::Disabled;
    }

    fn flight_resend(&mut self, reason: &str) {
        debug!("Resending flight due to {}", reason);
        for message in &self.flight_saved {
            self.queue_tx.push_back(message.clone());
        }
    }

    /// Arm the timer of a freshly begun flight. Returns the new deadline.
    pub fn arm_timer(&mut self, now: Instant) -> Option<Instant> {
        if self.flight_timeout != Timeout::Unarmed {
            return None;
        }
        debug!(
            "Flight timeout in: {:.03}s",
            self.flight_backoff.rto().as_secs_f32()
        );
        let timeout = now + self.flight_backoff.rto();
        self.flight_timeout = Timeout::Armed(timeout);
        Some(timeout)
    }

    /// Deadline of the armed flight timer.
    pub fn flight_deadline(&self) -> Option<Instant> {
        match self.flight_timeout {
            Timeout::Armed(deadline) => Some(deadline),
            _ => None,
        }
    }

    /// Resend the flight if its deadline passed. Returns the re-armed deadline.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<Option<Instant>, Error> {
        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(None);
        };

        if now < flight_timeout {
            return Ok(None);
        }

        if !self.flight_backoff.can_retry() {
            self.flight_timeout = Timeout::Disabled;
            return Err(Error::Timeout("handshake"));
        }

        self.flight_backoff.attempt();
        debug!(
            "Re-arm flight timeout due to resend in {}",
            self.flight_backoff.rto().as_secs_f32()
        );
        let timeout = now + self.flight_backoff.rto();
        self.flight_timeout = Timeout::Armed(timeout);
        self.flight_resend("flight timeout");

        Ok(Some(timeout))
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Forget the exchange before a HelloVerifyRequest.
    pub fn reset_client_for_hello_verify_request(&mut self) {
        self.transcript.clear();
    }

    /// `master = PRF(pre_master, "master secret", client_random || server_random)`.
    pub fn derive_master_secret(
        &self,
        pre_master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&client_random.0);
        seed.extend_from_slice(&server_random.0);

        let mut out = Zeroizing::new(Vec::with_capacity(MASTER_SECRET_LEN));
        self.config
            .crypto_provider()
            .prf_provider
            .prf_tls12(pre_master_secret, "master secret", &seed, &mut out, MASTER_SECRET_LEN)
            .map_err(|e| Error::CryptoError(format!("Failed to derive master secret: {}", e)))?;

        Ok(out)
    }

    /// Finished verify_data over the first `transcript_len` bytes of the transcript.
    pub fn generate_verify_data(
        &self,
        master_secret: &[u8],
        is_client: bool,
        transcript_len: usize,
    ) -> Result<Vec<u8>, Error> {
        let provider = self.config.crypto_provider();
        let handshake_hash = provider
            .hash_provider
            .sha256(&self.transcript[..transcript_len.min(self.transcript.len())]);

        let label = if is_client {
            "client finished"
        } else {
            "server finished"
        };

        let mut out = Vec::with_capacity(VERIFY_DATA_LEN);
        provider
            .prf_provider
            .prf_tls12(master_secret, label, &handshake_hash, &mut out, VERIFY_DATA_LEN)
            .map_err(|e| Error::CryptoError(format!("Failed to generate verify data: {}", e)))?;

        Ok(out)
    }
}

/// RFC 4279 pre-master secret: `len(psk) || zeros || len(psk) || psk`.
pub(crate) fn psk_pre_master_secret(psk: &[u8]) -> Zeroizing<Vec<u8>> {
    let len = (psk.len().min(u16::MAX as usize) as u16).to_be_bytes();
    let mut out = Zeroizing::new(Vec::with_capacity(4 + 2 * psk.len()));
    out.extend_from_slice(&len);
    out.resize(2 + psk.len(), 0);
    out.extend_from_slice(&len);
    out.extend_from_slice(psk);
    out
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("epoch", &self.epoch)
            .field("peer_handshake_seq_no", &self.peer_handshake_seq_no)
            .field("next_handshake_seq_no", &self.next_handshake_seq_no)
            .field("queue_rx", &self.queue_rx.len())
            .field("flight_timeout", &self.flight_timeout)
            .finish_non_exhaustive()
    }
}

/// Move all queued outbound messages out of the engine.
pub(crate) fn drain_transmit(engine: &mut Engine) -> Vec<Message> {
    let mut out = Vec::new();
    while let Some(m) = engine.poll_transmit() {
        out.push(m);
    }
    out
}
