use serde::{Deserialize, Serialize};

/// Control channel identifier reserved for session-level messages.
pub const CONTROL_CHANNEL_ID: u32 = 0;

/// SSH-style session messages exchanged over the relay's duplex stream.
///
/// Channel `0` is reserved for session control (handshake, port
/// notifications); every forwarded port gets its own channel id for data,
/// the same separation of concerns the teacher's `Multiplexer` enforces
/// with stream ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionMessage {
    /// Client -> host: open the session.
    Connect {
        session_id: String,
        session_token: String,
    },
    /// Host -> client: handshake result.
    ConnectAck { accepted: bool, reason: Option<String> },

    /// Client -> host: the local port topology changed, please refresh.
    RefreshPorts,
    RefreshPortsAck,

    /// Client -> host: is `remote_port` published yet?
    QueryForwardedPort { remote_port: u16 },
    /// Host -> client: `remote_port` is published and ready to accept
    /// channel opens.
    PortForwarded { remote_port: u16 },

    /// Client -> host: open a data channel to `remote_port`.
    ChannelOpen { channel_id: u32, remote_port: u16 },
    /// Host -> client: channel accepted.
    ChannelOpenConfirmation { channel_id: u32 },
    /// Host -> client: channel rejected (e.g. nothing listening).
    ChannelOpenFailure { channel_id: u32, reason: String },

    /// Either direction: raw bytes for an open channel.
    ChannelData {
        channel_id: u32,
        #[serde(with = "serde_bytes_base64")]
        data: Vec<u8>,
    },
    /// Either direction: half-close of a channel.
    ChannelClose { channel_id: u32 },
}

/// `serde_json` has no native `Vec<u8>` efficiency story; base64-encode so
/// the wire format stays human-inspectable JSON without bloating to a
/// per-byte array (same approach as the teacher's HTTP auth/cert crates,
/// which lean on the `base64` crate for this rather than a raw byte array).
mod serde_bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
