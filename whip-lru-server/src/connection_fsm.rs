//! Per-connection state machine: `Accepted -> Challenged -> Ready ->
//! (Ready | Closed)` (spec.md §4.8).

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use whip_lru_proto::AUTH_CHALLENGE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Challenged,
    Ready,
    Closed,
}

/// Decides the auth outcome without touching a socket, so it's testable
/// without an in-memory duplex stream. `server::handle_connection` drives
/// the actual frame I/O around this.
pub struct ConnectionFsm {
    state: ConnectionState,
    challenge: Vec<u8>,
    password: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    Failure,
}

impl ConnectionFsm {
    pub fn new(password: String) -> Self {
        ConnectionFsm {
            state: ConnectionState::Accepted,
            challenge: Vec::new(),
            password,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generates a fresh 7-byte ASCII challenge, moves to `Challenged`,
    /// and returns the 8-byte `AuthChallenge` frame (leading `0x00` +
    /// challenge) to send to the client.
    pub fn begin_challenge(&mut self) -> [u8; AUTH_CHALLENGE_LEN] {
        let challenge: Vec<u8> = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(AUTH_CHALLENGE_LEN - 1)
            .collect();
        self.challenge = challenge.clone();
        self.state = ConnectionState::Challenged;

        let mut frame = [0u8; AUTH_CHALLENGE_LEN];
        frame[1..].copy_from_slice(&challenge);
        frame
    }

    /// Verifies a client's 40-hex-digit SHA-1 response against
    /// `SHA1(challenge || password)`. Transitions to `Ready` on success,
    /// `Closed` on failure (spec.md §4.8).
    pub fn verify_response(&mut self, response_hex: &[u8; 40]) -> AuthOutcome {
        let mut hasher = Sha1::new();
        hasher.update(&self.challenge);
        hasher.update(self.password.as_bytes());
        let expected = hasher.digest().to_string();

        let actual = match std::str::from_utf8(response_hex) {
            Ok(s) => s,
            Err(_) => {
                self.state = ConnectionState::Closed;
                return AuthOutcome::Failure;
            }
        };

        if actual.eq_ignore_ascii_case(&expected) {
            self.state = ConnectionState::Ready;
            AuthOutcome::Success
        } else {
            self.state = ConnectionState::Closed;
            AuthOutcome::Failure
        }
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
