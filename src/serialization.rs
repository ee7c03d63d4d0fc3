//! Consensus wire encoding of transactions, headers and blocks

use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as _};

/// Double SHA-256 of `data`
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Encode a number as a Bitcoin varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

/// Append a length-prefixed byte string
pub fn write_var_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend_from_slice(&encode_varint(bytes.len() as u64));
    data.extend_from_slice(bytes);
}

/// Serialize a transaction in the legacy (non-witness) format
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::new();
    write_transaction(&mut data, tx);
    data
}

fn write_transaction(data: &mut Vec<u8>, tx: &Transaction) {
    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_var_bytes(data, &input.script_sig);
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_var_bytes(data, &output.script_pubkey);
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
}

/// Serialize an 80-byte block header
pub fn serialize_block_header(header: &BlockHeader) -> Vec<u8> {
    let mut data = Vec::with_capacity(80);
    write_block_header(&mut data, header);
    data
}

fn write_block_header(data: &mut Vec<u8>, header: &BlockHeader) {
    data.extend_from_slice(&header.version.to_le_bytes());
    data.extend_from_slice(&header.prev_block_hash);
    data.extend_from_slice(&header.merkle_root);
    data.extend_from_slice(&header.timestamp.to_le_bytes());
    data.extend_from_slice(&header.bits.to_le_bytes());
    data.extend_from_slice(&header.nonce.to_le_bytes());
}

pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut data = serialize_block_header(&block.header);
    data.extend_from_slice(&encode_varint(block.transactions.len() as u64));
    for tx in &block.transactions {
        write_transaction(&mut data, tx);
    }
    data
}

/// Block hash: double SHA-256 of the header
pub fn block_hash(header: &BlockHeader) -> Hash {
    double_sha256(&serialize_block_header(header))
}

/// Render a hash in display order (byte-reversed), as block explorers and RPC do
pub fn hash_to_hex(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a display-order hash into internal byte order
pub fn hash_from_hex(s: &str) -> Result<Hash> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| RedeemError::InvalidInput(format!("hash {} is not hex: {}", s, e)))?;
    let mut hash: Hash = bytes.as_slice().try_into().map_err(|_| {
        RedeemError::InvalidInput(format!("hash {} must be 32 bytes, got {}", s, bytes.len()))
    })?;
    hash.reverse();
    Ok(hash)
}

/// Cursor over consensus-encoded bytes
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(RedeemError::Serialization(format!(
                "unexpected end of data: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        self.read_array()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xfd => Ok(self.read_u16_le()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    /// Read a varint used as an element count, bounded by what the remaining bytes could hold
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.read_varint()?;
        if count.saturating_mul(min_element_size.max(1) as u64) > self.remaining() as u64 {
            return Err(RedeemError::Serialization(format!(
                "element count {} exceeds remaining {} bytes",
                count,
                self.remaining()
            )));
        }
        Ok(count as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<ByteString> {
        let len = self.read_count(1)?;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Parse a transaction, accepting the witness serialization but discarding witness data
pub fn read_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let version = reader.read_i32()?;

    let mut input_count = reader.read_count(41)?;
    let mut has_witness = false;
    if input_count == 0 {
        // Marker 0x00 followed by flag 0x01 introduces witness data
        let flag = reader.read_u8()?;
        if flag != 0x01 {
            return Err(RedeemError::Serialization(format!(
                "unsupported transaction flag 0x{:02x}",
                flag
            )));
        }
        has_witness = true;
        input_count = reader.read_count(41)?;
    }

    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let hash = reader.read_hash()?;
        let index = reader.read_u32()?;
        let script_sig = reader.read_var_bytes()?;
        let sequence = reader.read_u32()?;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
        });
    }

    let output_count = reader.read_count(9)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = reader.read_i64()?;
        let script_pubkey = reader.read_var_bytes()?;
        outputs.push(TransactionOutput {
            value,
            script_pubkey,
        });
    }

    if has_witness {
        for _ in 0..inputs.len() {
            let items = reader.read_count(1)?;
            for _ in 0..items {
                reader.read_var_bytes()?;
            }
        }
    }

    let lock_time = reader.read_u32()?;

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Parse a standalone transaction; trailing bytes are an error
pub fn deserialize_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(bytes);
    let tx = read_transaction(&mut reader)?;
    if !reader.is_empty() {
        return Err(RedeemError::Serialization(format!(
            "{} trailing bytes after transaction",
            reader.remaining()
        )));
    }
    Ok(tx)
}

pub fn read_block_header(reader: &mut Reader<'_>) -> Result<BlockHeader> {
    Ok(BlockHeader {
        version: reader.read_i32()?,
        prev_block_hash: reader.read_hash()?,
        merkle_root: reader.read_hash()?,
        timestamp: reader.read_u32()?,
        bits: reader.read_u32()?,
        nonce: reader.read_u32()?,
    })
}

pub fn deserialize_block(bytes: &[u8]) -> Result<Block> {
    if bytes.len() > MAX_BLOCK_SIZE {
        return Err(RedeemError::Serialization(format!(
            "block of {} bytes exceeds limit",
            bytes.len()
        )));
    }
    let mut reader = Reader::new(bytes);
    let header = read_block_header(&mut reader)?;
    let tx_count = reader.read_count(60)?;
    let mut transactions = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        transactions.push(read_transaction(&mut reader)?);
    }
    Ok(Block {
        header,
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint { hash: [7; 32], index: 3 },
                script_sig: vec![0x51, 0x52],
                sequence: 0,
            }],
            outputs: vec![TransactionOutput {
                value: 99_000,
                script_pubkey: vec![0x76, 0xa9],
            }],
            lock_time: 1_700_000_000,
        }
    }

    #[test]
    fn test_encode_varint_boundaries() {
        assert_eq!(encode_varint(0xfc), vec![0xfc]);
        assert_eq!(encode_varint(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(encode_varint(0x10000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(encode_varint(0x1_0000_0000).len(), 9);
    }

    #[test]
    fn test_transaction_layout() {
        let bytes = serialize_transaction(&sample_transaction());
        // version
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        // one input
        assert_eq!(bytes[4], 1);
        // lock time at the tail, little-endian
        assert_eq!(&bytes[bytes.len() - 4..], &1_700_000_000u32.to_le_bytes());
        assert_eq!(deserialize_transaction(&bytes).unwrap(), sample_transaction());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize_transaction(&sample_transaction());
        bytes.push(0);
        assert!(matches!(
            deserialize_transaction(&bytes),
            Err(RedeemError::Serialization(_))
        ));
    }

    #[test]
    fn test_truncated_transaction_rejected() {
        let bytes = serialize_transaction(&sample_transaction());
        assert!(deserialize_transaction(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_witness_transaction_parses_without_witness() {
        let tx = sample_transaction();
        let legacy = serialize_transaction(&tx);
        let mut witness = Vec::new();
        witness.extend_from_slice(&legacy[..4]);
        witness.extend_from_slice(&[0x00, 0x01]);
        witness.extend_from_slice(&legacy[4..legacy.len() - 4]);
        // one witness stack with a single 2-byte item
        witness.extend_from_slice(&[0x01, 0x02, 0xaa, 0xbb]);
        witness.extend_from_slice(&legacy[legacy.len() - 4..]);

        assert_eq!(deserialize_transaction(&witness).unwrap(), tx);
    }

    #[test]
    fn test_hash_hex_is_display_order() {
        let mut hash = [0u8; 32];
        hash[0] = 0xab;
        let hex = hash_to_hex(&hash);
        assert!(hex.ends_with("ab"));
        assert_eq!(hash_from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_hash_from_hex_rejects_bad_input() {
        assert!(matches!(hash_from_hex("zz"), Err(RedeemError::InvalidInput(_))));
        assert!(matches!(hash_from_hex("abcd"), Err(RedeemError::InvalidInput(_))));
    }

    #[test]
    fn test_genesis_block_hash() {
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: hash_from_hex(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .unwrap(),
            timestamp: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        };
        assert_eq!(
            hash_to_hex(&block_hash(&header)),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_block_round_trip() {
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [1; 32],
                merkle_root: [2; 32],
                timestamp: 1_600_000_000,
                bits: 0x207fffff,
                nonce: 42,
            },
            transactions: vec![sample_transaction(), sample_transaction()],
        };
        assert_eq!(deserialize_block(&serialize_block(&block)).unwrap(), block);
    }
}
