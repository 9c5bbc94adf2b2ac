//! Per-connection handler: advances a client through the stage machine and,
//! once `Online`, dispatches its commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use messenger_common::codec::{self, framing, PollOutcome, RecvOutcome};
use messenger_common::{crypto, Code, CommandTag, Stage};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client_record::ClientRecord;
use crate::state::ServerState;

/// Idle delay between `Online`-stage polls when nothing arrived. Keeps the
/// loop from busy-spinning while still reacting quickly to new frames.
const POLL_IDLE_DELAY: Duration = Duration::from_millis(10);

pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    record: Arc<Mutex<ClientRecord>>,
    state: Arc<ServerState>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        record: Arc<Mutex<ClientRecord>>,
        state: Arc<ServerState>,
    ) -> Self {
        Self {
            stream,
            addr,
            record,
            state,
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "connection error, closing");
                    self.state.remove(&self.addr).await;
                    break;
                }
            }
            tokio::time::sleep(POLL_IDLE_DELAY).await;
        }
    }

    /// Advance the connection by one step. Returns `Ok(true)` to keep
    /// going, `Ok(false)` once the connection has been cleanly closed.
    async fn tick(&mut self) -> Result<bool> {
        let stage = self.record.lock().await.stage;
        match stage {
            Stage::Connection => self.handle_connection_stage().await,
            Stage::Rsa => self.handle_rsa_stage().await,
            Stage::Aes => self.handle_aes_stage().await,
            Stage::Online => self.handle_online_stage().await,
        }
    }

    async fn close(&self) -> Result<bool> {
        self.state.remove(&self.addr).await;
        info!(addr = %self.addr, "client disconnected");
        Ok(false)
    }

    /// `Connection` stage: generate a keypair, send the public key, then an
    /// `Ok` code. No frame is expected from the client here.
    async fn handle_connection_stage(&mut self) -> Result<bool> {
        let (private_key, public_key) =
            crypto::generate_rsa_keypair().context("generating RSA keypair")?;
        let der = crypto::public_key_to_der(&public_key).context("serializing public key")?;
        framing::send_frame(&mut self.stream, &der).await?;

        {
            let mut record = self.record.lock().await;
            record.credentials.private_key = Some(private_key);
            record.stage = Stage::Rsa;
        }

        framing::send_frame(&mut self.stream, &Code::Ok.encode()).await?;
        Ok(true)
    }

    /// `Rsa` stage: decrypt the RSA-wrapped `iv ‖ key`. A connection that
    /// already has a name (re-keying) skips straight to `Online`; a fresh
    /// connection proceeds to `Aes` to register a name.
    async fn handle_rsa_stage(&mut self) -> Result<bool> {
        let frame = match framing::recv_frame(&mut self.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return self.close().await,
        };

        let plaintext = {
            let record = self.record.lock().await;
            let private_key = record
                .credentials
                .private_key
                .as_ref()
                .context("rsa stage reached without a private key")?;
            crypto::rsa_decrypt(private_key, &frame).context("decrypting session secret")?
        };
        let (iv, key) =
            crypto::decode_session_secret(&plaintext).context("decoding session secret")?;

        {
            let mut record = self.record.lock().await;
            record.credentials.symmetric_iv = Some(iv);
            record.credentials.symmetric_key = Some(key);
            record.stage = if record.name.is_some() {
                Stage::Online
            } else {
                Stage::Aes
            };
        }

        framing::send_frame(&mut self.stream, &Code::Ok.encode()).await?;
        Ok(true)
    }

    /// `Aes` stage: decrypt the client's name. Names of 256 bytes or more
    /// are rejected with `NameTooLong`, and the connection stays in `Aes`
    /// so the client can retry with a shorter name.
    async fn handle_aes_stage(&mut self) -> Result<bool> {
        let frame = match framing::recv_frame(&mut self.stream).await? {
            RecvOutcome::Frame(data) => data,
            RecvOutcome::CloseConnection => return self.close().await,
        };

        let (key, iv) = self.session_key().await?;
        let name = crypto::aes_cfb_decrypt(&key, &iv, &frame);

        if name.len() >= 256 {
            let reply = crypto::aes_cfb_encrypt(&key, &iv, &Code::NameTooLong.encode());
            framing::send_frame(&mut self.stream, &reply).await?;
            return Ok(true);
        }

        debug!(addr = %self.addr, name = %hex::encode(&name), "registering client name");
        {
            let mut record = self.record.lock().await;
            record.name = Some(name);
            record.stage = Stage::Online;
        }

        let reply = crypto::aes_cfb_encrypt(&key, &iv, &Code::Ok.encode());
        framing::send_frame(&mut self.stream, &reply).await?;
        Ok(true)
    }

    /// `Online` stage: poll for a command without blocking, decrypt it, and
    /// dispatch on its tag. An unrecognized tag gets no reply at all,
    /// matching the original's silent-drop behavior.
    async fn handle_online_stage(&mut self) -> Result<bool> {
        let frame = match framing::poll_frame(&mut self.stream).await? {
            PollOutcome::Frame(data) => data,
            PollOutcome::NoMessage => return Ok(true),
            PollOutcome::CloseConnection => return self.close().await,
        };

        let (key, iv) = self.session_key().await?;
        let payload = crypto::aes_cfb_decrypt(&key, &iv, &frame);

        let (tag, args) = match codec::parse_tag(&payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "dropping frame with unrecognized command tag");
                return Ok(true);
            }
        };

        match tag {
            CommandTag::Ping => {
                let reply = crypto::aes_cfb_encrypt(&key, &iv, &Code::Ok.encode());
                framing::send_frame(&mut self.stream, &reply).await?;
            }
            CommandTag::SendMessage => self.handle_send_message(args, &key, &iv).await?,
            CommandTag::ReceiveMessages => self.handle_receive_messages(args, &key, &iv).await?,
            CommandTag::GetStage | CommandTag::ResetKeys => {
                debug!(addr = %self.addr, tag = ?tag, "reserved command received, ignoring");
            }
        }

        Ok(true)
    }

    async fn handle_send_message(
        &mut self,
        args: &[u8],
        key: &[u8; 32],
        iv: &[u8; 16],
    ) -> Result<()> {
        let (receiver_name, rest) = codec::parse_part(1, args)?;
        let (message, _rest) = codec::parse_part(2, rest)?;
        let receiver_name = receiver_name.to_vec();
        let message = message.to_vec();

        if self.state.find_by_name(&receiver_name).await.is_none() {
            debug!(
                addr = %self.addr,
                receiver = %hex::encode(&receiver_name),
                "send_message addressed to an unknown receiver"
            );
            let reply = crypto::aes_cfb_encrypt(key, iv, &Code::NoReceiver.encode());
            framing::send_frame(&mut self.stream, &reply).await?;
            return Ok(());
        }

        {
            let mut record = self.record.lock().await;
            record
                .messages
                .entry(receiver_name)
                .or_default()
                .push_back(message);
        }

        let reply = crypto::aes_cfb_encrypt(key, iv, &Code::Ok.encode());
        framing::send_frame(&mut self.stream, &reply).await?;
        Ok(())
    }

    async fn handle_receive_messages(
        &mut self,
        args: &[u8],
        key: &[u8; 32],
        iv: &[u8; 16],
    ) -> Result<()> {
        let (sender_name, _rest) = codec::parse_part(1, args)?;
        let sender_name = sender_name.to_vec();

        let sender_record = match self.state.find_by_name(&sender_name).await {
            Some(record) => record,
            None => {
                let reply = crypto::aes_cfb_encrypt(key, iv, &Code::NoSender.encode());
                framing::send_frame(&mut self.stream, &reply).await?;
                return Ok(());
            }
        };

        let my_name = self
            .record
            .lock()
            .await
            .name
            .clone()
            .context("online stage reached without a registered name")?;

        // Snapshot the count before draining: messages appended by the
        // sender after this point land in the next poll's batch, not this
        // one.
        let available = {
            let record = sender_record.lock().await;
            record.messages.get(&my_name).map(|q| q.len()).unwrap_or(0)
        };
        let count = available.min(u8::MAX as usize) as u8;
        if available > u8::MAX as usize {
            debug!(
                addr = %self.addr,
                available,
                delivered = count,
                "receive_messages batch capped at 255, remainder held for the next poll"
            );
        }

        let header = codec::pack_command(CommandTag::ReceiveMessages, &[(&[count], 1)])?;
        let reply = crypto::aes_cfb_encrypt(key, iv, &header);
        framing::send_frame(&mut self.stream, &reply).await?;

        for _ in 0..count {
            let message = {
                let mut record = sender_record.lock().await;
                record.messages.get_mut(&my_name).and_then(|q| q.pop_front())
            };
            if let Some(message) = message {
                let reply = crypto::aes_cfb_encrypt(key, iv, &message);
                framing::send_frame(&mut self.stream, &reply).await?;
            }
        }

        let reply = crypto::aes_cfb_encrypt(key, iv, &Code::Ok.encode());
        framing::send_frame(&mut self.stream, &reply).await?;
        Ok(())
    }

    async fn session_key(&self) -> Result<([u8; 32], [u8; 16])> {
        let record = self.record.lock().await;
        let key = record
            .credentials
            .symmetric_key
            .context("session key requested before the aes stage completed")?;
        let iv = record
            .credentials
            .symmetric_iv
            .context("session iv requested before the aes stage completed")?;
        Ok((key, iv))
    }
}
