//! Wire messages: framing envelope, payload codecs, and the closed
//! dispatch enum.

pub mod address;
pub mod alert;
pub mod codec;
pub mod heading;
pub mod inventory;
pub mod ping;
pub mod reject;
pub mod version;

pub use address::{Address, AddressItem, GetAddress};
pub use alert::Alert;
pub use heading::Heading;
pub use inventory::{InvItem, InvType, Inventory};
pub use ping::{Ping, Pong};
pub use reject::{Reject, RejectCode};
pub use version::{SendAddressV2, Verack, Version, WitnessTxIdRelay};

use crate::error::Error;
use codec::Reader;

/// Protocol levels at which wire features appear.
pub mod level {
    /// Address records gain timestamps; ping/alert protocols.
    pub const ADDRESS_TIME: u32 = 31402;
    /// Version payload gains the relay flag.
    pub const RELAY: u32 = 70001;
    /// Reject messages.
    pub const REJECT: u32 = 70002;
    /// sendaddrv2 / wtxidrelay capability announcements.
    pub const CAPABILITIES: u32 = 70016;
}

/// Distributor bucket for a message type. Unknown commands share one
/// bucket, raw payload attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Identifier {
    Version,
    Verack,
    SendAddressV2,
    WitnessTxIdRelay,
    Ping,
    Pong,
    Address,
    GetAddress,
    Inventory,
    GetData,
    Reject,
    Alert,
    Unknown,
}

impl Identifier {
    pub fn from_command(command: &str) -> Self {
        match command {
            Version::COMMAND => Self::Version,
            Verack::COMMAND => Self::Verack,
            SendAddressV2::COMMAND => Self::SendAddressV2,
            WitnessTxIdRelay::COMMAND => Self::WitnessTxIdRelay,
            Ping::COMMAND => Self::Ping,
            Pong::COMMAND => Self::Pong,
            Address::COMMAND => Self::Address,
            GetAddress::COMMAND => Self::GetAddress,
            Inventory::INV_COMMAND => Self::Inventory,
            Inventory::GET_DATA_COMMAND => Self::GetData,
            Reject::COMMAND => Self::Reject,
            Alert::COMMAND => Self::Alert,
            _ => Self::Unknown,
        }
    }
}

/// Every message the runtime decodes, plus `Unknown` carrying the raw
/// payload of any command it has no codec for. Relay traffic (blocks,
/// transactions, headers) rides the rails as `Unknown` for higher layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    Verack(Verack),
    SendAddressV2(SendAddressV2),
    WitnessTxIdRelay(WitnessTxIdRelay),
    Ping(Ping),
    Pong(Pong),
    Address(Address),
    GetAddress(GetAddress),
    Inventory(Inventory),
    GetData(Inventory),
    Reject(Reject),
    Alert(Alert),
    Unknown { command: String, payload: Vec<u8> },
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => Version::COMMAND,
            Message::Verack(_) => Verack::COMMAND,
            Message::SendAddressV2(_) => SendAddressV2::COMMAND,
            Message::WitnessTxIdRelay(_) => WitnessTxIdRelay::COMMAND,
            Message::Ping(_) => Ping::COMMAND,
            Message::Pong(_) => Pong::COMMAND,
            Message::Address(_) => Address::COMMAND,
            Message::GetAddress(_) => GetAddress::COMMAND,
            Message::Inventory(_) => Inventory::INV_COMMAND,
            Message::GetData(_) => Inventory::GET_DATA_COMMAND,
            Message::Reject(_) => Reject::COMMAND,
            Message::Alert(_) => Alert::COMMAND,
            Message::Unknown { command, .. } => command,
        }
    }

    pub fn identifier(&self) -> Identifier {
        match self {
            Message::Version(_) => Identifier::Version,
            Message::Verack(_) => Identifier::Verack,
            Message::SendAddressV2(_) => Identifier::SendAddressV2,
            Message::WitnessTxIdRelay(_) => Identifier::WitnessTxIdRelay,
            Message::Ping(_) => Identifier::Ping,
            Message::Pong(_) => Identifier::Pong,
            Message::Address(_) => Identifier::Address,
            Message::GetAddress(_) => Identifier::GetAddress,
            Message::Inventory(_) => Identifier::Inventory,
            Message::GetData(_) => Identifier::GetData,
            Message::Reject(_) => Identifier::Reject,
            Message::Alert(_) => Identifier::Alert,
            Message::Unknown { .. } => Identifier::Unknown,
        }
    }

    /// Serialize the payload (heading excluded) at the negotiated version.
    pub fn serialize(&self, version: u32) -> Vec<u8> {
        let mut sink = Vec::new();
        match self {
            Message::Version(message) => message.serialize(&mut sink),
            Message::Verack(_)
            | Message::SendAddressV2(_)
            | Message::WitnessTxIdRelay(_)
            | Message::GetAddress(_) => {}
            Message::Ping(message) => message.serialize(&mut sink),
            Message::Pong(message) => message.serialize(&mut sink),
            Message::Address(message) => message.serialize(&mut sink, version),
            Message::Inventory(message) | Message::GetData(message) => {
                message.serialize(&mut sink)
            }
            Message::Reject(message) => message.serialize(&mut sink),
            Message::Alert(message) => message.serialize(&mut sink),
            Message::Unknown { payload, .. } => sink.extend_from_slice(payload),
        }
        sink
    }

    /// Decode a payload for the given command at the negotiated version.
    /// Unknown commands succeed with the raw payload; a known command with
    /// a malformed payload is `InvalidMessage` and stops the channel.
    pub fn deserialize(command: &str, payload: &[u8], version: u32) -> Result<Self, Error> {
        let mut reader = Reader::new(payload);
        let message = match Identifier::from_command(command) {
            Identifier::Version => Message::Version(Version::deserialize(&mut reader)?),
            Identifier::Verack => Message::Verack(Verack),
            Identifier::SendAddressV2 => Message::SendAddressV2(SendAddressV2),
            Identifier::WitnessTxIdRelay => Message::WitnessTxIdRelay(WitnessTxIdRelay),
            Identifier::Ping => Message::Ping(Ping::deserialize(&mut reader)?),
            Identifier::Pong => Message::Pong(Pong::deserialize(&mut reader)?),
            Identifier::Address => {
                Message::Address(Address::deserialize(&mut reader, version)?)
            }
            Identifier::GetAddress => Message::GetAddress(GetAddress),
            Identifier::Inventory => {
                Message::Inventory(Inventory::deserialize(&mut reader)?)
            }
            Identifier::GetData => Message::GetData(Inventory::deserialize(&mut reader)?),
            Identifier::Reject => Message::Reject(Reject::deserialize(&mut reader)?),
            Identifier::Alert => Message::Alert(Alert::deserialize(&mut reader)?),
            Identifier::Unknown => Message::Unknown {
                command: command.to_owned(),
                payload: payload.to_vec(),
            },
        };
        Ok(message)
    }
}
