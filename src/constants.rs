//! Consensus and policy constants used by the redeemer

use std::time::Duration;

/// Maximum money supply: 21,000,000 coins in base units
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Maximum serialized transaction size: 1MB
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Maximum serialized block size accepted from a peer
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Lock time threshold: lock times below this are block heights, above are Unix timestamps
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Sequence number of the redemption input; anything below final makes nLockTime binding
pub const REDEEM_SEQUENCE: u32 = 0;

/// Version of the redemption transaction
pub const REDEEM_TX_VERSION: i32 = 1;

/// Fixed fee deducted from the premined value
pub const REFERENCE_DEFAULT_MIN_TX_FEE: i64 = 1_000;

/// Outputs below this value are dust and not relayed
pub const MIN_NONDUST_OUTPUT: i64 = 546;

/// Signature hash types
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Script verification flags
pub const SCRIPT_VERIFY_NONE: u32 = 0;
pub const SCRIPT_VERIFY_P2SH: u32 = 1 << 0;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;

/// Flags the redemption is verified with before broadcast
pub const STANDARD_SCRIPT_VERIFY_FLAGS: u32 =
    SCRIPT_VERIFY_P2SH | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;

/// Peers that must acknowledge the transaction before the broadcast counts as done
pub const DEFAULT_MIN_BROADCAST_PEERS: usize = 2;

/// Bound on every network wait (block download, header walk, broadcast)
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on establishing a single peer connection
pub const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// P2P protocol version announced in the handshake
pub const PROTOCOL_VERSION: u32 = 70015;

/// Oldest peer protocol version accepted
pub const MIN_PEER_PROTO_VERSION: u32 = 70001;

/// Maximum headers returned by one getheaders request
pub const MAX_HEADERS_RESULTS: usize = 2000;

/// Maximum payload of a single P2P message
pub const MAX_PROTOCOL_MESSAGE_LENGTH: usize = 4 * 1000 * 1000;

/// User agent announced to peers
pub const USER_AGENT: &str = "/premine-redeemer:0.1.0/";
