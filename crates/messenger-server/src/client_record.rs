//! Per-client state shared between a connection's own handler task and any
//! other connection's handler task that needs to read its mailbox.

use std::collections::{HashMap, VecDeque};

use messenger_common::Stage;
use rsa::RsaPrivateKey;

/// Key material a connection accumulates as it advances through the stage
/// machine. Present fields depend on the current [`Stage`].
#[derive(Default)]
pub struct Credentials {
    pub private_key: Option<RsaPrivateKey>,
    pub symmetric_key: Option<[u8; 32]>,
    pub symmetric_iv: Option<[u8; 16]>,
}

/// Everything about a client that another connection's handler may need to
/// observe: its name (for `find_client`) and its mailbox (messages it has
/// queued for delivery, keyed by the receiver's name).
///
/// The mailbox lives on the *sender's* record, not the receiver's: a
/// message is appended here by the sender's `send_message` handler and
/// drained by the receiver's `receive_messages` handler reaching into this
/// same record.
pub struct ClientRecord {
    pub credentials: Credentials,
    pub stage: Stage,
    pub name: Option<Vec<u8>>,
    pub messages: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
}

impl ClientRecord {
    pub fn new() -> Self {
        Self {
            credentials: Credentials::default(),
            stage: Stage::Connection,
            name: None,
            messages: HashMap::new(),
        }
    }
}

impl Default for ClientRecord {
    fn default() -> Self {
        Self::new()
    }
}
