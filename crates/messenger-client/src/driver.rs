//! Mirror of the server's stage machine, driven from the client side: three
//! handshake round-trips establish a session key, after which
//! [`ClientDriver::send_message`] and [`ClientDriver::receive_messages`]
//! exchange AES-encrypted commands over the same connection.

use std::time::Duration;

use messenger_common::codec::{self, framing, RecvOutcome};
use messenger_common::{crypto, Code, CommandTag};
use rsa::RsaPublicKey;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default cadence for [`ClientDriver::spawn_poller`], matching spec.md
/// §9's 100 ms note. Exposed as a parameter rather than hardcoded, per the
/// same note's suggestion to make it configurable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no receiver registered under that name")]
    NoReceiver,
    #[error("no sender registered under that name")]
    NoSender,
    #[error("handshake rejected by server: {0:?}")]
    HandshakeFailed(Code),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("driver has not been started")]
    NotStarted,
    #[error("received a reply that did not decode to a recognized code or command")]
    MalformedReply,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

/// Session state established once the handshake completes: the live socket
/// plus the AES key/IV negotiated during the `rsa` stage. Held behind one
/// mutex so every request/reply exchange is serialized, matching spec.md
/// §4.5's ordering guarantee.
struct Session {
    stream: TcpStream,
    key: [u8; 32],
    iv: [u8; 16],
}

/// Client-side counterpart to `messenger_server::Connection`. Constructing
/// a driver does no networking; call [`ClientDriver::start`] to connect and
/// run the handshake.
pub struct ClientDriver {
    host: String,
    port: u16,
    name: Vec<u8>,
    session: Mutex<Option<Session>>,
}

impl ClientDriver {
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<Vec<u8>>) -> Self {
        Self {
            host: host.into(),
            port,
            name: name.into(),
            session: Mutex::new(None),
        }
    }

    /// Connect and run the full handshake transcript from spec.md §6:
    /// receive the public key, receive a plaintext `ok`, send the
    /// RSA-wrapped `iv ‖ key`, receive a plaintext `ok`, send the
    /// AES-encrypted name, and receive the AES-encrypted admission code.
    pub async fn start(&self) -> Result<(), DriverError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let public_key = self.receive_public_key(&mut stream).await?;
        self.expect_plaintext_ok(&mut stream).await?;

        let iv = crypto::generate_iv();
        let key = crypto::generate_symmetric_key();
        let secret = crypto::encode_session_secret(&iv, &key);
        let wrapped = crypto::rsa_encrypt(&public_key, &secret)?;
        framing::send_frame(&mut stream, &wrapped).await?;
        self.expect_plaintext_ok(&mut stream).await?;

        let encrypted_name = crypto::aes_cfb_encrypt(&key, &iv, &self.name);
        framing::send_frame(&mut stream, &encrypted_name).await?;

        let reply = match framing::recv_frame(&mut stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let decrypted = crypto::aes_cfb_decrypt(&key, &iv, &reply);
        let code = decode_code(&decrypted)?;
        if code != Code::Ok {
            return Err(DriverError::HandshakeFailed(code));
        }

        debug!(host = %self.host, port = self.port, "handshake complete");
        *self.session.lock().await = Some(Session { stream, key, iv });
        Ok(())
    }

    async fn receive_public_key(&self, stream: &mut TcpStream) -> Result<RsaPublicKey, DriverError> {
        match framing::recv_frame(stream).await? {
            RecvOutcome::Frame(der) => Ok(crypto::public_key_from_der(&der)?),
            RecvOutcome::CloseConnection => Err(DriverError::ConnectionClosed),
        }
    }

    /// The two handshake steps that reply with a raw, unencrypted `ok`
    /// byte (the `rsa`-stage acknowledgements — see spec.md §4.3's note
    /// that these are the sole plaintext replies past `connection`).
    async fn expect_plaintext_ok(&self, stream: &mut TcpStream) -> Result<(), DriverError> {
        let frame = match framing::recv_frame(stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let code = decode_code(&frame)?;
        if code != Code::Ok {
            return Err(DriverError::HandshakeFailed(code));
        }
        Ok(())
    }

    /// Send one message addressed to `receiver`. Raises [`DriverError::NoReceiver`]
    /// if the server reports no such peer; any other non-`Ok` code surfaces
    /// as [`DriverError::MalformedReply`] (the protocol defines no other
    /// code for this exchange).
    pub async fn send_message(&self, receiver: &[u8], message: &[u8]) -> Result<(), DriverError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DriverError::NotStarted)?;

        let payload = codec::pack_command(
            CommandTag::SendMessage,
            &[(receiver, 1), (message, 2)],
        )?;
        let encrypted = crypto::aes_cfb_encrypt(&session.key, &session.iv, &payload);
        framing::send_frame(&mut session.stream, &encrypted).await?;

        let reply = match framing::recv_frame(&mut session.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let decrypted = crypto::aes_cfb_decrypt(&session.key, &session.iv, &reply);
        match decode_code(&decrypted)? {
            Code::Ok => Ok(()),
            Code::NoReceiver => Err(DriverError::NoReceiver),
            _ => Err(DriverError::MalformedReply),
        }
    }

    /// Poll once for every message `sender` has queued addressed to this
    /// client, returning them in FIFO order. Raises [`DriverError::NoSender`]
    /// if no client is registered under that name.
    pub async fn receive_messages(&self, sender: &[u8]) -> Result<Vec<Vec<u8>>, DriverError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DriverError::NotStarted)?;

        let payload = codec::pack_command(CommandTag::ReceiveMessages, &[(sender, 1)])?;
        let encrypted = crypto::aes_cfb_encrypt(&session.key, &session.iv, &payload);
        framing::send_frame(&mut session.stream, &encrypted).await?;

        let header = match framing::recv_frame(&mut session.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let decrypted = crypto::aes_cfb_decrypt(&session.key, &session.iv, &header);

        // A `no_sender` reply is a bare Code byte, not a tagged command -
        // try that decoding first before treating it as a header.
        if let Ok(Code::NoSender) = decode_code(&decrypted) {
            return Err(DriverError::NoSender);
        }

        let (tag, args) = codec::parse_tag(&decrypted)?;
        if tag != CommandTag::ReceiveMessages {
            return Err(DriverError::MalformedReply);
        }
        let (count_bytes, _rest) = codec::parse_part(1, args)?;
        let count = *count_bytes.first().ok_or(DriverError::MalformedReply)?;

        let mut messages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let frame = match framing::recv_frame(&mut session.stream).await? {
                RecvOutcome::Frame(data) => data,
                RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
            };
            messages.push(crypto::aes_cfb_decrypt(&session.key, &session.iv, &frame));
        }

        let terminator = match framing::recv_frame(&mut session.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let decrypted_terminator = crypto::aes_cfb_decrypt(&session.key, &session.iv, &terminator);
        if decode_code(&decrypted_terminator)? != Code::Ok {
            return Err(DriverError::MalformedReply);
        }

        Ok(messages)
    }

    /// Send a `ping` and expect an AES-encrypted `ok` in reply.
    ///
    /// The original protocol sent this one reply in plaintext, which the
    /// client had no way to decrypt as a code - a bug spec.md §9 flags.
    /// This driver always expects the AES-encrypted reply, matching
    /// `messenger-server`'s corrected dispatch.
    pub async fn ping(&self) -> Result<(), DriverError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DriverError::NotStarted)?;

        let payload = codec::pack_command(CommandTag::Ping, &[])?;
        let encrypted = crypto::aes_cfb_encrypt(&session.key, &session.iv, &payload);
        framing::send_frame(&mut session.stream, &encrypted).await?;

        let reply = match framing::recv_frame(&mut session.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return Err(DriverError::ConnectionClosed),
        };
        let decrypted = crypto::aes_cfb_decrypt(&session.key, &session.iv, &reply);
        if decode_code(&decrypted)? != Code::Ok {
            return Err(DriverError::MalformedReply);
        }
        Ok(())
    }

    /// Close the underlying socket. A stopped driver can be restarted with
    /// another call to [`ClientDriver::start`].
    pub async fn stop(&self) {
        *self.session.lock().await = None;
    }
}

fn decode_code(bytes: &[u8]) -> Result<Code, DriverError> {
    let byte = *bytes.first().ok_or(DriverError::MalformedReply)?;
    Code::decode(byte).ok_or(DriverError::MalformedReply)
}

/// A message delivered by the background poller, tagged with the peer it
/// came from so a caller draining the channel can tell senders apart.
pub struct PolledMessage {
    pub sender: Vec<u8>,
    pub message: Vec<u8>,
}

impl ClientDriver {
    /// Spawn a task that calls [`ClientDriver::receive_messages`] for
    /// `peer` on a fixed cadence, pushing each delivered message onto the
    /// returned channel. This is ambient convenience the original protocol
    /// left to the UI's own blocking poll loop; it has no UI attached here.
    ///
    /// The task exits silently once the channel's receiver is dropped or
    /// the driver is stopped and a poll comes back [`DriverError::NotStarted`].
    pub fn spawn_poller(
        self: std::sync::Arc<Self>,
        peer: Vec<u8>,
        interval: Duration,
    ) -> (JoinHandle<()>, mpsc::UnboundedReceiver<PolledMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.receive_messages(&peer).await {
                    Ok(messages) => {
                        for message in messages {
                            if tx
                                .send(PolledMessage {
                                    sender: peer.clone(),
                                    message,
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    Err(DriverError::NotStarted) => return,
                    Err(e) => {
                        warn!(error = %e, "background poll failed");
                    }
                }
            }
        });

        (handle, rx)
    }
}
