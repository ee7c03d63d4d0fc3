//! P2P messages, their framed wire encoding and handshake state

use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::serialization::*;
use crate::types::*;
use std::net::{IpAddr, SocketAddr};

/// Inventory type of a transaction
pub const MSG_TX: u32 = 1;
/// Inventory type of a block
pub const MSG_BLOCK: u32 = 2;

/// Size of the frame header: magic, command, length, checksum
pub const MESSAGE_HEADER_SIZE: usize = 24;

const COMMAND_SIZE: usize = 12;

/// NetworkMessage: the subset of the P2P protocol the redeemer speaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Version(VersionMessage),
    VerAck,
    Inv(InvMessage),
    GetData(InvMessage),
    NotFound(InvMessage),
    GetHeaders(GetHeadersMessage),
    Headers(HeadersMessage),
    Block(Block),
    Tx(Transaction),
    Ping(PingMessage),
    Pong(PongMessage),
    Reject(RejectMessage),
    /// Any command not listed above; its payload is skipped
    Unknown { command: String },
}

/// Version message for initial handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    /// The version announced when dialing `peer`; no services, no relay of unrelated transactions
    pub fn outbound(peer: SocketAddr, nonce: u64, timestamp: i64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: 0,
            timestamp,
            addr_recv: NetworkAddress::from_socket_addr(0, peer),
            addr_from: NetworkAddress {
                services: 0,
                ip: [0; 16],
                port: 0,
            },
            nonce,
            user_agent: USER_AGENT.to_string(),
            start_height: 0,
            relay: false,
        }
    }
}

/// Inventory list shared by inv, getdata and notfound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvMessage {
    pub inventory: Vec<InventoryVector>,
}

/// GetHeaders message requesting block headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    pub block_locator_hashes: Vec<Hash>,
    pub hash_stop: Hash,
}

/// Headers message containing block headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingMessage {
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongMessage {
    pub nonce: u64,
}

/// Reject message (BIP61)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectMessage {
    pub message: String,
    pub ccode: u8,
    pub reason: String,
    /// Hash of the rejected object for tx and block rejects
    pub data: Vec<u8>,
}

impl RejectMessage {
    /// Whether this rejects the transaction with the given txid
    pub fn rejects_tx(&self, txid: &Hash) -> bool {
        self.message == "tx" && self.data.as_slice() == txid.as_slice()
    }
}

/// Network address structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16], // IPv6, IPv4 mapped
    pub port: u16,
}

impl NetworkAddress {
    pub fn from_socket_addr(services: u64, addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self {
            services,
            ip,
            port: addr.port(),
        }
    }
}

/// Inventory vector identifying objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryVector {
    pub inv_type: u32,
    pub hash: Hash,
}

impl NetworkMessage {
    pub fn command(&self) -> &str {
        match self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::VerAck => "verack",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::NotFound(_) => "notfound",
            NetworkMessage::GetHeaders(_) => "getheaders",
            NetworkMessage::Headers(_) => "headers",
            NetworkMessage::Block(_) => "block",
            NetworkMessage::Tx(_) => "tx",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::Reject(_) => "reject",
            NetworkMessage::Unknown { command } => command.as_str(),
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut data = Vec::new();
        match self {
            NetworkMessage::Version(version) => {
                data.extend_from_slice(&version.version.to_le_bytes());
                data.extend_from_slice(&version.services.to_le_bytes());
                data.extend_from_slice(&version.timestamp.to_le_bytes());
                write_network_address(&mut data, &version.addr_recv);
                write_network_address(&mut data, &version.addr_from);
                data.extend_from_slice(&version.nonce.to_le_bytes());
                write_var_bytes(&mut data, version.user_agent.as_bytes());
                data.extend_from_slice(&version.start_height.to_le_bytes());
                data.push(version.relay as u8);
            }
            NetworkMessage::Inv(inv) | NetworkMessage::GetData(inv) | NetworkMessage::NotFound(inv) => {
                data.extend_from_slice(&encode_varint(inv.inventory.len() as u64));
                for item in &inv.inventory {
                    data.extend_from_slice(&item.inv_type.to_le_bytes());
                    data.extend_from_slice(&item.hash);
                }
            }
            NetworkMessage::GetHeaders(getheaders) => {
                data.extend_from_slice(&getheaders.version.to_le_bytes());
                data.extend_from_slice(&encode_varint(getheaders.block_locator_hashes.len() as u64));
                for hash in &getheaders.block_locator_hashes {
                    data.extend_from_slice(hash);
                }
                data.extend_from_slice(&getheaders.hash_stop);
            }
            NetworkMessage::Headers(headers) => {
                data.extend_from_slice(&encode_varint(headers.headers.len() as u64));
                for header in &headers.headers {
                    data.extend_from_slice(&serialize_block_header(header));
                    // Transaction count, always zero in headers
                    data.push(0);
                }
            }
            NetworkMessage::Block(block) => data = serialize_block(block),
            NetworkMessage::Tx(tx) => data = serialize_transaction(tx),
            NetworkMessage::Ping(ping) => data.extend_from_slice(&ping.nonce.to_le_bytes()),
            NetworkMessage::Pong(pong) => data.extend_from_slice(&pong.nonce.to_le_bytes()),
            NetworkMessage::Reject(reject) => {
                write_var_bytes(&mut data, reject.message.as_bytes());
                data.push(reject.ccode);
                write_var_bytes(&mut data, reject.reason.as_bytes());
                data.extend_from_slice(&reject.data);
            }
            NetworkMessage::VerAck | NetworkMessage::Unknown { .. } => {}
        }
        data
    }
}

fn write_network_address(data: &mut Vec<u8>, addr: &NetworkAddress) {
    data.extend_from_slice(&addr.services.to_le_bytes());
    data.extend_from_slice(&addr.ip);
    data.extend_from_slice(&addr.port.to_be_bytes());
}

fn read_network_address(reader: &mut Reader<'_>) -> Result<NetworkAddress> {
    Ok(NetworkAddress {
        services: reader.read_u64()?,
        ip: reader.read_array()?,
        port: reader.read_u16_be()?,
    })
}

fn read_var_string(reader: &mut Reader<'_>) -> Result<String> {
    let bytes = reader.read_var_bytes()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_inventory(reader: &mut Reader<'_>) -> Result<InvMessage> {
    let count = reader.read_count(36)?;
    let mut inventory = Vec::with_capacity(count);
    for _ in 0..count {
        inventory.push(InventoryVector {
            inv_type: reader.read_u32()?,
            hash: reader.read_hash()?,
        });
    }
    Ok(InvMessage { inventory })
}

/// Message checksum: first four bytes of the payload's double SHA-256
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = double_sha256(payload);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Frame a message: magic, NUL-padded command, payload length, checksum, payload
pub fn encode_message(magic: [u8; 4], message: &NetworkMessage) -> Vec<u8> {
    encode_frame(magic, message.command(), &message.encode_payload())
}

/// Frame an already serialized payload
pub fn encode_frame(magic: [u8; 4], command: &str, payload: &[u8]) -> Vec<u8> {
    let mut name = [0u8; COMMAND_SIZE];
    let len = command.len().min(COMMAND_SIZE);
    name[..len].copy_from_slice(&command.as_bytes()[..len]);

    let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&magic);
    frame.extend_from_slice(&name);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(payload));
    frame.extend_from_slice(payload);
    frame
}

/// Decoded frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: String,
    pub length: usize,
    pub checksum: [u8; 4],
}

/// Parse and bound-check a frame header
pub fn parse_header(magic: [u8; 4], bytes: &[u8; MESSAGE_HEADER_SIZE]) -> Result<MessageHeader> {
    if bytes[..4] != magic {
        return Err(RedeemError::Serialization(format!(
            "unexpected network magic {}",
            hex::encode(&bytes[..4])
        )));
    }

    let raw_command = &bytes[4..16];
    let end = raw_command.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
    if raw_command[end..].iter().any(|b| *b != 0) {
        return Err(RedeemError::Serialization("malformed command name".to_string()));
    }
    let command = String::from_utf8_lossy(&raw_command[..end]).into_owned();

    let length = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;
    if length > MAX_PROTOCOL_MESSAGE_LENGTH {
        return Err(RedeemError::Serialization(format!(
            "{} message of {} bytes exceeds limit",
            command, length
        )));
    }

    Ok(MessageHeader {
        command,
        length,
        checksum: [bytes[20], bytes[21], bytes[22], bytes[23]],
    })
}

/// Verify the checksum and decode the payload named by `header`
pub fn decode_payload(header: &MessageHeader, payload: &[u8]) -> Result<NetworkMessage> {
    if payload.len() != header.length {
        return Err(RedeemError::Serialization(format!(
            "{} payload is {} bytes, header says {}",
            header.command,
            payload.len(),
            header.length
        )));
    }
    if checksum(payload) != header.checksum {
        return Err(RedeemError::Serialization(format!(
            "{} message checksum mismatch",
            header.command
        )));
    }

    let mut reader = Reader::new(payload);
    let message = match header.command.as_str() {
        "version" => {
            let version = reader.read_u32()?;
            let services = reader.read_u64()?;
            let timestamp = reader.read_i64()?;
            let addr_recv = read_network_address(&mut reader)?;
            let addr_from = read_network_address(&mut reader)?;
            let nonce = reader.read_u64()?;
            let user_agent = read_var_string(&mut reader)?;
            let start_height = reader.read_i32()?;
            // Relay flag is absent before BIP37
            let relay = if reader.is_empty() {
                true
            } else {
                reader.read_u8()? != 0
            };
            NetworkMessage::Version(VersionMessage {
                version,
                services,
                timestamp,
                addr_recv,
                addr_from,
                nonce,
                user_agent,
                start_height,
                relay,
            })
        }
        "verack" => NetworkMessage::VerAck,
        "inv" => NetworkMessage::Inv(read_inventory(&mut reader)?),
        "getdata" => NetworkMessage::GetData(read_inventory(&mut reader)?),
        "notfound" => NetworkMessage::NotFound(read_inventory(&mut reader)?),
        "getheaders" => {
            let version = reader.read_u32()?;
            let count = reader.read_count(32)?;
            let mut block_locator_hashes = Vec::with_capacity(count);
            for _ in 0..count {
                block_locator_hashes.push(reader.read_hash()?);
            }
            let hash_stop = reader.read_hash()?;
            NetworkMessage::GetHeaders(GetHeadersMessage {
                version,
                block_locator_hashes,
                hash_stop,
            })
        }
        "headers" => {
            let count = reader.read_count(81)?;
            if count > MAX_HEADERS_RESULTS {
                return Err(RedeemError::Serialization(format!(
                    "{} headers exceed the limit of {}",
                    count, MAX_HEADERS_RESULTS
                )));
            }
            let mut headers = Vec::with_capacity(count);
            for _ in 0..count {
                headers.push(read_block_header(&mut reader)?);
                reader.read_varint()?;
            }
            NetworkMessage::Headers(HeadersMessage { headers })
        }
        "block" => return Ok(NetworkMessage::Block(deserialize_block(payload)?)),
        "tx" => NetworkMessage::Tx(read_transaction(&mut reader)?),
        "ping" => NetworkMessage::Ping(PingMessage {
            nonce: reader.read_u64()?,
        }),
        "pong" => NetworkMessage::Pong(PongMessage {
            nonce: reader.read_u64()?,
        }),
        "reject" => {
            let message = read_var_string(&mut reader)?;
            let ccode = reader.read_u8()?;
            let reason = read_var_string(&mut reader)?;
            let data = reader.read_bytes(reader.remaining())?.to_vec();
            NetworkMessage::Reject(RejectMessage {
                message,
                ccode,
                reason,
                data,
            })
        }
        other => {
            return Ok(NetworkMessage::Unknown {
                command: other.to_string(),
            })
        }
    };
    Ok(message)
}

/// Decode one complete frame from the start of `bytes`, returning the message and bytes consumed
pub fn decode_message(magic: [u8; 4], bytes: &[u8]) -> Result<(NetworkMessage, usize)> {
    let header_bytes: &[u8; MESSAGE_HEADER_SIZE] = bytes
        .get(..MESSAGE_HEADER_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| RedeemError::Serialization("incomplete message header".to_string()))?;
    let header = parse_header(magic, header_bytes)?;
    let end = MESSAGE_HEADER_SIZE + header.length;
    let payload = bytes
        .get(MESSAGE_HEADER_SIZE..end)
        .ok_or_else(|| RedeemError::Serialization(format!("incomplete {} payload", header.command)))?;
    Ok((decode_payload(&header, payload)?, end))
}

/// Process incoming network message
pub fn process_network_message(
    message: &NetworkMessage,
    peer_state: &mut PeerState,
) -> Result<NetworkResponse> {
    match message {
        NetworkMessage::Version(version) => process_version_message(version, peer_state),
        NetworkMessage::VerAck => process_verack_message(peer_state),
        NetworkMessage::Ping(ping) => process_ping_message(ping, peer_state),
        NetworkMessage::Pong(pong) => process_pong_message(pong, peer_state),
        NetworkMessage::Reject(reject) => Ok(NetworkResponse::Reject(format!(
            "{} rejected (code 0x{:02x}): {}",
            reject.message, reject.ccode, reject.reason
        ))),
        _ => Ok(NetworkResponse::Ok),
    }
}

/// Process version message
fn process_version_message(
    version: &VersionMessage,
    peer_state: &mut PeerState,
) -> Result<NetworkResponse> {
    if version.version < MIN_PEER_PROTO_VERSION {
        return Ok(NetworkResponse::Reject("Version too old".to_string()));
    }

    peer_state.version = version.version;
    peer_state.services = version.services;
    peer_state.user_agent = version.user_agent.clone();
    peer_state.start_height = version.start_height;
    peer_state.version_received = true;

    Ok(NetworkResponse::SendMessage(NetworkMessage::VerAck))
}

fn process_verack_message(peer_state: &mut PeerState) -> Result<NetworkResponse> {
    peer_state.handshake_complete = true;
    Ok(NetworkResponse::Ok)
}

fn process_ping_message(ping: &PingMessage, _peer_state: &mut PeerState) -> Result<NetworkResponse> {
    Ok(NetworkResponse::SendMessage(NetworkMessage::Pong(PongMessage {
        nonce: ping.nonce,
    })))
}

/// A pong answering our outstanding ping clears it
fn process_pong_message(pong: &PongMessage, peer_state: &mut PeerState) -> Result<NetworkResponse> {
    if peer_state.ping_nonce == Some(pong.nonce) {
        peer_state.ping_nonce = None;
    }
    Ok(NetworkResponse::Ok)
}

/// Network response to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkResponse {
    Ok,
    SendMessage(NetworkMessage),
    Reject(String),
}

/// Peer connection state
#[derive(Debug, Clone, Default)]
pub struct PeerState {
    pub version: u32,
    pub services: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub version_received: bool,
    pub handshake_complete: bool,
    pub ping_nonce: Option<u64>,
}

impl PeerState {
    pub fn new() -> Self {
        Self::default()
    }
}
