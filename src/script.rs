//! Script parsing, standard templates and the script interpreter

use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::keys::hash160;
use crate::sighash::signature_hash;
use crate::types::*;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_NOP: u8 = 0x61;
    pub const OP_IF: u8 = 0x63;
    pub const OP_NOTIF: u8 = 0x64;
    pub const OP_ELSE: u8 = 0x67;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CODESEPARATOR: u8 = 0xab;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
}

use opcodes::*;

/// One parsed element of a script: an opcode and, for push opcodes, the pushed bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptChunk {
    pub opcode: u8,
    pub data: Option<ByteString>,
}

impl ScriptChunk {
    /// Push opcodes in the broad sense: data pushes and the small-number constants
    pub fn is_push_data(&self) -> bool {
        self.opcode <= OP_16
    }

    /// Length of this chunk in the serialized script
    pub fn encoded_len(&self) -> usize {
        let data_len = self.data.as_ref().map_or(0, |d| d.len());
        match self.opcode {
            OP_PUSHDATA1 => 2 + data_len,
            OP_PUSHDATA2 => 3 + data_len,
            OP_PUSHDATA4 => 5 + data_len,
            _ => 1 + data_len,
        }
    }

    pub fn to_bytes(&self) -> ByteString {
        let mut out = vec![self.opcode];
        if let Some(data) = &self.data {
            match self.opcode {
                OP_PUSHDATA1 => out.push(data.len() as u8),
                OP_PUSHDATA2 => out.extend_from_slice(&(data.len() as u16).to_le_bytes()),
                OP_PUSHDATA4 => out.extend_from_slice(&(data.len() as u32).to_le_bytes()),
                _ => {}
            }
            out.extend_from_slice(data);
        }
        out
    }
}

/// Split a script into chunks; a push running past the end of the script is an error
pub fn parse_script(script: &[u8]) -> Result<Vec<ScriptChunk>> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;

        let (len_bytes, push_len) = match opcode {
            0x00..=0x4b => (0, Some(opcode as usize)),
            OP_PUSHDATA1 => (1, script.get(pos).map(|b| *b as usize)),
            OP_PUSHDATA2 => (
                2,
                script
                    .get(pos..pos + 2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize),
            ),
            OP_PUSHDATA4 => (
                4,
                script
                    .get(pos..pos + 4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize),
            ),
            _ => {
                chunks.push(ScriptChunk { opcode, data: None });
                continue;
            }
        };

        let push_len = push_len.ok_or_else(|| {
            RedeemError::ScriptExecution(format!("truncated push length at offset {}", pos - 1))
        })?;
        pos += len_bytes;
        let data = script.get(pos..pos + push_len).ok_or_else(|| {
            RedeemError::ScriptExecution(format!(
                "push of {} bytes at offset {} runs past end of script",
                push_len, pos
            ))
        })?;
        pos += push_len;
        chunks.push(ScriptChunk {
            opcode,
            data: Some(data.to_vec()),
        });
    }

    Ok(chunks)
}

/// Append the smallest direct or PUSHDATA encoding of `data`
pub fn push_data(script: &mut ByteString, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Script consisting only of the given pushes, in order
pub fn push_only_script(items: &[&[u8]]) -> ByteString {
    let mut script = Vec::new();
    for item in items {
        push_data(&mut script, item);
    }
    script
}

/// OP_HASH160 <20-byte-hash> OP_EQUAL
pub fn p2sh_script_pubkey(script_hash: &[u8; 20]) -> ByteString {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    push_data(&mut script, script_hash);
    script.push(OP_EQUAL);
    script
}

/// OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> ByteString {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(&mut script, pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Public key hash a P2PKH locking script pays to
pub fn pay_to_pubkey_hash_target(script_pubkey: &[u8]) -> Option<[u8; 20]> {
    match script_pubkey {
        [OP_DUP, OP_HASH160, 0x14, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            let mut out = [0u8; 20];
            out.copy_from_slice(hash);
            Some(out)
        }
        _ => None,
    }
}

/// Script hash a P2SH locking script commits to
pub fn pay_to_script_hash_target(script_pubkey: &[u8]) -> Option<[u8; 20]> {
    if script_pubkey.len() == 23
        && script_pubkey[0] == OP_HASH160
        && script_pubkey[1] == 0x14
        && script_pubkey[22] == OP_EQUAL
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script_pubkey[2..22]);
        Some(hash)
    } else {
        None
    }
}

pub fn is_pay_to_script_hash(script_pubkey: &[u8]) -> bool {
    pay_to_script_hash_target(script_pubkey).is_some()
}

pub fn is_push_only(script: &[u8]) -> bool {
    parse_script(script).map_or(false, |chunks| chunks.iter().all(|c| c.is_push_data()))
}

/// Decode a minimally sized little-endian sign-magnitude script number
pub fn decode_script_num(bytes: &[u8], max_len: usize) -> Option<i64> {
    if bytes.len() > max_len {
        return None;
    }
    let Some(&last) = bytes.last() else {
        return Some(0);
    };

    let mut result = 0i64;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (*byte as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        let sign_bit = 0x80i64 << (8 * (bytes.len() - 1));
        Some(-(result & !sign_bit))
    } else {
        Some(result)
    }
}

pub fn encode_script_num(value: i64) -> ByteString {
    if value == 0 {
        return vec![];
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::new();
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

/// Any non-zero byte is true, except a lone sign bit in the last byte (negative zero)
pub fn cast_to_bool(item: &[u8]) -> bool {
    for (i, byte) in item.iter().enumerate() {
        if *byte != 0 {
            return !(i == item.len() - 1 && *byte == 0x80);
        }
    }
    false
}

/// Transaction input a script is evaluated for
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
}

struct ExecState<'a> {
    script: &'a [u8],
    alt_stack: Vec<ByteString>,
    exec_stack: Vec<bool>,
    /// Byte offset where the script code for signature checks begins
    code_separator: usize,
    ctx: ExecutionContext<'a>,
    flags: u32,
}

/// EvalScript: 𝒮𝒞 × 𝒮𝒯 × ℕ → {true, false}
///
/// Script execution follows a stack-based virtual machine:
/// 1. Parse the script; reject oversized scripts and pushes
/// 2. For each chunk:
///    - If the operation count exceeds L_ops: error
///    - Pushes go on the stack when the current branch executes
///    - Conditionals are always processed, other opcodes only in executed branches
///    - If |S| + |alt| > L_stack: error
/// 3. Return false on any failed operation or an unbalanced conditional
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    ctx: ExecutionContext<'_>,
    flags: u32,
) -> Result<bool> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(RedeemError::ScriptExecution(format!(
            "Script size {} exceeds limit",
            script.len()
        )));
    }

    let chunks = parse_script(script)?;
    let mut state = ExecState {
        script,
        alt_stack: Vec::new(),
        exec_stack: Vec::new(),
        code_separator: 0,
        ctx,
        flags,
    };
    let mut op_count = 0;
    let mut pos = 0;

    for chunk in &chunks {
        let executing = state.exec_stack.iter().all(|branch| *branch);
        pos += chunk.encoded_len();

        if let Some(data) = &chunk.data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(RedeemError::ScriptExecution(format!(
                    "Push of {} bytes exceeds element limit",
                    data.len()
                )));
            }
            if executing {
                stack.push(data.clone());
            }
        } else {
            if chunk.opcode > OP_16 {
                op_count += 1;
                if op_count > MAX_SCRIPT_OPS {
                    return Err(RedeemError::ScriptExecution(
                        "Operation limit exceeded".to_string(),
                    ));
                }
            }

            let is_conditional = (OP_IF..=OP_ENDIF).contains(&chunk.opcode);
            if executing || is_conditional {
                if !execute_opcode(chunk.opcode, stack, &mut state, executing, pos)? {
                    return Ok(false);
                }
            }
        }

        if stack.len() + state.alt_stack.len() > MAX_STACK_SIZE {
            return Err(RedeemError::ScriptExecution("Stack overflow".to_string()));
        }
    }

    Ok(state.exec_stack.is_empty())
}

/// VerifyScript: 𝒮𝒞 × 𝒮𝒞 × ℕ → {true, false}
///
/// For scriptSig ss, scriptPubKey spk and flags f:
/// 1. Execute ss on an empty stack
/// 2. Execute spk on the resulting stack; its top must be true
/// 3. If f has P2SH and spk is P2SH: ss must be push-only, and the last item ss pushed is executed as a
///    script against the items pushed before it; its top must be true
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    ctx: ExecutionContext<'_>,
    flags: u32,
) -> Result<bool> {
    let p2sh = flags & SCRIPT_VERIFY_P2SH != 0 && is_pay_to_script_hash(script_pubkey);
    if p2sh && !is_push_only(script_sig) {
        return Ok(false);
    }

    let mut stack = Vec::new();
    if !eval_script(script_sig, &mut stack, ctx, flags)? {
        return Ok(false);
    }
    let pushed = if p2sh { stack.clone() } else { Vec::new() };

    if !eval_script(script_pubkey, &mut stack, ctx, flags)? {
        return Ok(false);
    }
    if !stack.last().map_or(false, |top| cast_to_bool(top)) {
        return Ok(false);
    }

    if p2sh {
        let mut stack = pushed;
        let Some(redeem_script) = stack.pop() else {
            return Ok(false);
        };
        if !eval_script(&redeem_script, &mut stack, ctx, flags)? {
            return Ok(false);
        }
        if !stack.last().map_or(false, |top| cast_to_bool(top)) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Execute a single non-push opcode
fn execute_opcode(
    opcode: u8,
    stack: &mut Vec<ByteString>,
    state: &mut ExecState<'_>,
    executing: bool,
    pos: usize,
) -> Result<bool> {
    match opcode {
        // OP_1NEGATE
        0x4f => {
            stack.push(encode_script_num(-1));
            Ok(true)
        }

        // OP_1 to OP_16 - push numbers 1-16
        0x51..=0x60 => {
            stack.push(vec![opcode - 0x50]);
            Ok(true)
        }

        // OP_NOP, OP_NOP1, OP_NOP3..OP_NOP10
        0x61 | 0xb0 | 0xb2..=0xb9 => Ok(true),

        // OP_IF / OP_NOTIF
        0x63 | 0x64 => {
            let mut branch = false;
            if executing {
                let Some(condition) = stack.pop() else {
                    return Ok(false);
                };
                branch = cast_to_bool(&condition);
                if opcode == OP_NOTIF {
                    branch = !branch;
                }
            }
            state.exec_stack.push(branch);
            Ok(true)
        }

        // OP_ELSE
        0x67 => match state.exec_stack.last_mut() {
            Some(branch) => {
                *branch = !*branch;
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_ENDIF
        0x68 => Ok(state.exec_stack.pop().is_some()),

        // OP_VERIFY - check if top stack item is non-zero
        0x69 => match stack.pop() {
            Some(item) => Ok(cast_to_bool(&item)),
            None => Ok(false),
        },

        // OP_RETURN - always fail
        0x6a => Ok(false),

        // OP_TOALTSTACK
        0x6b => match stack.pop() {
            Some(item) => {
                state.alt_stack.push(item);
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_FROMALTSTACK
        0x6c => match state.alt_stack.pop() {
            Some(item) => {
                stack.push(item);
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_2DROP - remove top 2 stack items
        0x6d => {
            if stack.len() < 2 {
                return Ok(false);
            }
            stack.truncate(stack.len() - 2);
            Ok(true)
        }

        // OP_2DUP - duplicate top 2 stack items
        0x6e => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let pair = stack[stack.len() - 2..].to_vec();
            stack.extend(pair);
            Ok(true)
        }

        // OP_3DUP - duplicate top 3 stack items
        0x6f => {
            if stack.len() < 3 {
                return Ok(false);
            }
            let triple = stack[stack.len() - 3..].to_vec();
            stack.extend(triple);
            Ok(true)
        }

        // OP_2OVER - copy second pair of stack items to top
        0x70 => {
            if stack.len() < 4 {
                return Ok(false);
            }
            let pair = stack[stack.len() - 4..stack.len() - 2].to_vec();
            stack.extend(pair);
            Ok(true)
        }

        // OP_2ROT - move the third pair of stack items to top
        0x71 => {
            if stack.len() < 6 {
                return Ok(false);
            }
            let start = stack.len() - 6;
            let pair: Vec<ByteString> = stack.drain(start..start + 2).collect();
            stack.extend(pair);
            Ok(true)
        }

        // OP_2SWAP - swap top two pairs of stack items
        0x72 => {
            if stack.len() < 4 {
                return Ok(false);
            }
            let start = stack.len() - 4;
            stack[start..].rotate_left(2);
            Ok(true)
        }

        // OP_IFDUP - duplicate top stack item if it's non-zero
        0x73 => match stack.last().cloned() {
            Some(item) => {
                if cast_to_bool(&item) {
                    stack.push(item);
                }
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_DEPTH - push stack size
        0x74 => {
            stack.push(encode_script_num(stack.len() as i64));
            Ok(true)
        }

        // OP_DROP - remove top stack item
        0x75 => Ok(stack.pop().is_some()),

        // OP_DUP - duplicate top stack item
        0x76 => match stack.last().cloned() {
            Some(item) => {
                stack.push(item);
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_NIP - remove second-to-top stack item
        0x77 => {
            if stack.len() < 2 {
                return Ok(false);
            }
            stack.remove(stack.len() - 2);
            Ok(true)
        }

        // OP_OVER - copy second-to-top stack item to top
        0x78 => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let second = stack[stack.len() - 2].clone();
            stack.push(second);
            Ok(true)
        }

        // OP_PICK / OP_ROLL - copy or move the nth stack item to top
        0x79 | 0x7a => {
            let Some(n_bytes) = stack.pop() else {
                return Ok(false);
            };
            let Some(n) = decode_script_num(&n_bytes, 4) else {
                return Ok(false);
            };
            if n < 0 || n as usize >= stack.len() {
                return Ok(false);
            }
            let index = stack.len() - 1 - n as usize;
            let item = if opcode == 0x79 {
                stack[index].clone()
            } else {
                stack.remove(index)
            };
            stack.push(item);
            Ok(true)
        }

        // OP_ROT - rotate top 3 stack items
        0x7b => {
            if stack.len() < 3 {
                return Ok(false);
            }
            let start = stack.len() - 3;
            stack[start..].rotate_left(1);
            Ok(true)
        }

        // OP_SWAP - swap top 2 stack items
        0x7c => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let len = stack.len();
            stack.swap(len - 1, len - 2);
            Ok(true)
        }

        // OP_TUCK - copy top stack item to before second-to-top
        0x7d => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let top = stack[stack.len() - 1].clone();
            stack.insert(stack.len() - 2, top);
            Ok(true)
        }

        // OP_SIZE - push size of top stack item
        0x82 => match stack.last() {
            Some(item) => {
                let size = encode_script_num(item.len() as i64);
                stack.push(size);
                Ok(true)
            }
            None => Ok(false),
        },

        // OP_EQUAL / OP_EQUALVERIFY
        0x87 | 0x88 => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let a = stack.pop().unwrap_or_default();
            let b = stack.pop().unwrap_or_default();
            if opcode == OP_EQUALVERIFY {
                return Ok(a == b);
            }
            stack.push(if a == b { vec![1] } else { vec![] });
            Ok(true)
        }

        // OP_RIPEMD160, OP_SHA256, OP_HASH160, OP_HASH256
        0xa6 | 0xa8 | 0xa9 | 0xaa => {
            let Some(item) = stack.pop() else {
                return Ok(false);
            };
            let digest = match opcode {
                0xa6 => Ripemd160::digest(&item).to_vec(),
                0xa8 => Sha256::digest(&item).to_vec(),
                0xa9 => hash160(&item).to_vec(),
                _ => Sha256::digest(Sha256::digest(&item)).to_vec(),
            };
            stack.push(digest);
            Ok(true)
        }

        // OP_CODESEPARATOR - signatures commit to the script after this point
        0xab => {
            state.code_separator = pos;
            Ok(true)
        }

        // OP_CHECKSIG / OP_CHECKSIGVERIFY
        0xac | 0xad => {
            if stack.len() < 2 {
                return Ok(false);
            }
            let pubkey_bytes = stack.pop().unwrap_or_default();
            let signature_bytes = stack.pop().unwrap_or_default();

            let script_code = find_and_delete(&state.script[state.code_separator..], &signature_bytes);
            let valid = check_signature(&signature_bytes, &pubkey_bytes, &script_code, state.ctx);

            if opcode == OP_CHECKSIGVERIFY {
                return Ok(valid);
            }
            stack.push(if valid { vec![1] } else { vec![] });
            Ok(true)
        }

        // OP_CHECKLOCKTIMEVERIFY (BIP65), OP_NOP2 when the flag is off
        0xb1 => {
            if state.flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY == 0 {
                return Ok(true);
            }
            let Some(top) = stack.last() else {
                return Ok(false);
            };
            // 5-byte numbers so lock times up to 2^39-1 are expressible
            let Some(required) = decode_script_num(top, 5) else {
                return Ok(false);
            };
            Ok(check_lock_time(required, state.ctx))
        }

        // Unknown or disabled opcode
        _ => Ok(false),
    }
}

/// BIP65: the transaction lock time must be of the same kind as, and at least, the required value,
/// and the input must not opt out with a final sequence
fn check_lock_time(required: i64, ctx: ExecutionContext<'_>) -> bool {
    if required < 0 {
        return false;
    }
    let tx_lock_time = ctx.tx.lock_time as i64;
    let threshold = LOCKTIME_THRESHOLD as i64;
    let same_kind = (tx_lock_time < threshold && required < threshold)
        || (tx_lock_time >= threshold && required >= threshold);
    if !same_kind || required > tx_lock_time {
        return false;
    }
    ctx.tx
        .inputs
        .get(ctx.input_index)
        .map_or(false, |input| input.sequence != SEQUENCE_FINAL)
}

/// Remove every push of exactly `signature` from the script code
fn find_and_delete(script_code: &[u8], signature: &[u8]) -> ByteString {
    if signature.is_empty() {
        return script_code.to_vec();
    }
    let mut pattern = Vec::new();
    push_data(&mut pattern, signature);

    match parse_script(script_code) {
        Ok(chunks) => chunks
            .iter()
            .map(ScriptChunk::to_bytes)
            .filter(|bytes| *bytes != pattern)
            .flatten()
            .collect(),
        Err(_) => script_code.to_vec(),
    }
}

/// Verify an ECDSA signature carrying a trailing sighash type byte
fn check_signature(
    signature_bytes: &[u8],
    pubkey_bytes: &[u8],
    script_code: &[u8],
    ctx: ExecutionContext<'_>,
) -> bool {
    let Some((&hash_type, der)) = signature_bytes.split_last() else {
        return false;
    };

    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let mut signature = match Signature::from_der_lax(der) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    signature.normalize_s();

    let sighash = signature_hash(ctx.tx, ctx.input_index, script_code, hash_type as u32);
    let message = Message::from_digest(sighash);

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}

/// The consensus rule engine the redemption is checked with before broadcast
pub trait ScriptVerifier {
    /// Check that input `input_index` of `tx` unlocks `script_pubkey`
    fn verify_script(&self, tx: &Transaction, input_index: usize, script_pubkey: &[u8]) -> Result<()>;
}

/// Built-in interpreter covering P2SH and CHECKLOCKTIMEVERIFY spends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpreter {
    flags: u32,
}

impl Interpreter {
    pub fn new(flags: u32) -> Self {
        Self { flags }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(STANDARD_SCRIPT_VERIFY_FLAGS)
    }
}

impl ScriptVerifier for Interpreter {
    fn verify_script(&self, tx: &Transaction, input_index: usize, script_pubkey: &[u8]) -> Result<()> {
        let input = tx.inputs.get(input_index).ok_or_else(|| {
            RedeemError::ScriptExecution(format!("Input {} does not exist", input_index))
        })?;
        let ctx = ExecutionContext { tx, input_index };
        if verify_script(&input.script_sig, script_pubkey, ctx, self.flags)? {
            Ok(())
        } else {
            Err(RedeemError::ScriptExecution(format!(
                "Input {} does not satisfy its locking script",
                input_index
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint { hash: [1; 32], index: 0 },
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        }
    }

    fn run(script: &[u8]) -> (Result<bool>, Vec<ByteString>) {
        let tx = empty_tx();
        let ctx = ExecutionContext { tx: &tx, input_index: 0 };
        let mut stack = Vec::new();
        let result = eval_script(script, &mut stack, ctx, STANDARD_SCRIPT_VERIFY_FLAGS);
        (result, stack)
    }

    #[test]
    fn test_parse_direct_and_pushdata() {
        let mut script = vec![0x04, 1, 2, 3, 4, OP_PUSHDATA1, 2, 9, 9, OP_DUP];
        script.extend_from_slice(&[OP_PUSHDATA2, 1, 0, 7]);
        let chunks = parse_script(&script).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].data.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(chunks[1].data.as_deref(), Some(&[9u8, 9][..]));
        assert_eq!(chunks[2], ScriptChunk { opcode: OP_DUP, data: None });
        assert_eq!(chunks[3].data.as_deref(), Some(&[7u8][..]));
        let rebuilt: ByteString = chunks.iter().flat_map(|c| c.to_bytes()).collect();
        assert_eq!(rebuilt, script);
    }

    #[test]
    fn test_parse_truncated_push() {
        assert!(parse_script(&[0x05, 1, 2]).is_err());
        assert!(parse_script(&[OP_PUSHDATA2, 1]).is_err());
    }

    #[test]
    fn test_push_data_picks_smallest_encoding() {
        let mut script = Vec::new();
        push_data(&mut script, &[0xaa; 75]);
        assert_eq!(script[0], 75);
        let mut script = Vec::new();
        push_data(&mut script, &[0xaa; 76]);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 76]);
        let mut script = Vec::new();
        push_data(&mut script, &[0xaa; 256]);
        assert_eq!(&script[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
    }

    #[test]
    fn test_p2sh_template() {
        let script = p2sh_script_pubkey(&[7; 20]);
        assert!(is_pay_to_script_hash(&script));
        assert_eq!(pay_to_script_hash_target(&script), Some([7; 20]));
        assert!(!is_pay_to_script_hash(&p2pkh_script_pubkey(&[7; 20])));
    }

    #[test]
    fn test_p2pkh_template() {
        let script = p2pkh_script_pubkey(&[9; 20]);
        assert_eq!(pay_to_pubkey_hash_target(&script), Some([9; 20]));
        assert_eq!(pay_to_script_hash_target(&script), None);
        assert_eq!(pay_to_pubkey_hash_target(&script[..24]), None);
        assert_eq!(pay_to_pubkey_hash_target(&p2sh_script_pubkey(&[9; 20])), None);
    }

    #[test]
    fn test_script_num_round_trip() {
        for value in [0i64, 1, -1, 127, 128, -128, 255, 256, 1_700_000_000, -1_700_000_000] {
            assert_eq!(decode_script_num(&encode_script_num(value), 5), Some(value));
        }
        assert_eq!(encode_script_num(128), vec![0x80, 0x00]);
        assert_eq!(decode_script_num(&[0x81], 4), Some(-1));
        assert_eq!(decode_script_num(&[0; 6], 5), None);
    }

    #[test]
    fn test_cast_to_bool() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0, 0]));
        assert!(!cast_to_bool(&[0, 0x80]));
        assert!(cast_to_bool(&[0x80, 0]));
        assert!(cast_to_bool(&[1]));
    }

    #[test]
    fn test_eval_script_simple() {
        let (result, stack) = run(&[OP_1]);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![1]]);
    }

    #[test]
    fn test_eval_script_overflow() {
        let script = vec![OP_1; MAX_STACK_SIZE + 1];
        assert!(run(&script).0.is_err());
    }

    #[test]
    fn test_eval_script_op_limit() {
        let script = vec![OP_NOP; MAX_SCRIPT_OPS + 1];
        assert!(run(&script).0.is_err());
    }

    #[test]
    fn test_op_hash160_equal() {
        let mut script = vec![OP_1, OP_HASH160];
        push_data(&mut script, &hash160(&[1]));
        script.push(OP_EQUAL);
        let (result, stack) = run(&script);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![1]]);
    }

    #[test]
    fn test_op_equalverify_false() {
        let (result, _) = run(&[OP_1, 0x52, OP_EQUALVERIFY]);
        assert!(!result.unwrap());
    }

    #[test]
    fn test_if_else_branches() {
        // OP_1 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF
        let (result, stack) = run(&[OP_1, OP_IF, 0x52, OP_ELSE, 0x53, OP_ENDIF]);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![2]]);

        let (result, stack) = run(&[OP_0, OP_IF, 0x52, OP_ELSE, 0x53, OP_ENDIF]);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![3]]);
    }

    #[test]
    fn test_unbalanced_if_fails() {
        assert!(!run(&[OP_1, OP_IF, 0x52]).0.unwrap());
        assert!(!run(&[OP_ENDIF]).0.unwrap());
    }

    #[test]
    fn test_op_return_fails() {
        assert!(!run(&[OP_1, OP_RETURN]).0.unwrap());
    }

    #[test]
    fn test_unexecuted_op_return_is_skipped() {
        let (result, stack) = run(&[OP_0, OP_IF, OP_RETURN, OP_ENDIF, OP_1]);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![1]]);
    }

    #[test]
    fn test_stack_manipulation() {
        // 1 2 3 OP_ROT -> 2 3 1
        let (_, stack) = run(&[OP_1, 0x52, 0x53, 0x7b]);
        assert_eq!(stack, vec![vec![2], vec![3], vec![1]]);
        // 1 2 OP_SWAP -> 2 1
        let (_, stack) = run(&[OP_1, 0x52, 0x7c]);
        assert_eq!(stack, vec![vec![2], vec![1]]);
        // 1 2 OP_TUCK -> 2 1 2
        let (_, stack) = run(&[OP_1, 0x52, 0x7d]);
        assert_eq!(stack, vec![vec![2], vec![1], vec![2]]);
        // 1 2 3 4 OP_2SWAP -> 3 4 1 2
        let (_, stack) = run(&[OP_1, 0x52, 0x53, 0x54, 0x72]);
        assert_eq!(stack, vec![vec![3], vec![4], vec![1], vec![2]]);
        // 1 2 3 4 5 6 OP_2ROT -> 3 4 5 6 1 2
        let (_, stack) = run(&[OP_1, 0x52, 0x53, 0x54, 0x55, 0x56, 0x71]);
        assert_eq!(stack, vec![vec![3], vec![4], vec![5], vec![6], vec![1], vec![2]]);
        // 7 8 9 OP_2 OP_PICK -> 7 8 9 7
        let (_, stack) = run(&[0x57, 0x58, 0x59, 0x52, 0x79]);
        assert_eq!(stack, vec![vec![7], vec![8], vec![9], vec![7]]);
        // 7 8 9 OP_2 OP_ROLL -> 8 9 7
        let (_, stack) = run(&[0x57, 0x58, 0x59, 0x52, 0x7a]);
        assert_eq!(stack, vec![vec![8], vec![9], vec![7]]);
    }

    #[test]
    fn test_altstack() {
        let (result, stack) = run(&[OP_1, 0x52, 0x6b, 0x6c]);
        assert!(result.unwrap());
        assert_eq!(stack, vec![vec![1], vec![2]]);
        assert!(!run(&[0x6c]).0.unwrap());
    }

    #[test]
    fn test_unknown_opcode_fails() {
        assert!(!run(&[OP_1, 0xff]).0.unwrap());
    }

    fn cltv_tx(lock_time: u32, sequence: u32) -> Transaction {
        let mut tx = empty_tx();
        tx.lock_time = lock_time;
        tx.inputs[0].sequence = sequence;
        tx
    }

    fn run_cltv(tx: &Transaction, required: u32) -> bool {
        let mut script = Vec::new();
        push_data(&mut script, &required.to_le_bytes());
        script.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
        let ctx = ExecutionContext { tx, input_index: 0 };
        let mut stack = Vec::new();
        eval_script(&script, &mut stack, ctx, STANDARD_SCRIPT_VERIFY_FLAGS).unwrap()
    }

    #[test]
    fn test_cltv_satisfied() {
        assert!(run_cltv(&cltv_tx(1_700_000_000, 0), 1_700_000_000));
        assert!(run_cltv(&cltv_tx(1_700_000_001, 0), 1_700_000_000));
        assert!(run_cltv(&cltv_tx(150, 0), 100));
    }

    #[test]
    fn test_cltv_lock_time_too_early() {
        assert!(!run_cltv(&cltv_tx(1_699_999_999, 0), 1_700_000_000));
    }

    #[test]
    fn test_cltv_mixed_kinds() {
        assert!(!run_cltv(&cltv_tx(1_700_000_000, 0), 100));
    }

    #[test]
    fn test_cltv_final_sequence() {
        assert!(!run_cltv(&cltv_tx(1_700_000_000, SEQUENCE_FINAL), 1_700_000_000));
    }

    #[test]
    fn test_cltv_is_nop_without_flag() {
        let tx = cltv_tx(0, SEQUENCE_FINAL);
        let mut script = Vec::new();
        push_data(&mut script, &1_700_000_000u32.to_le_bytes());
        script.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
        let ctx = ExecutionContext { tx: &tx, input_index: 0 };
        let mut stack = Vec::new();
        assert!(eval_script(&script, &mut stack, ctx, SCRIPT_VERIFY_P2SH).unwrap());
    }

    #[test]
    fn test_p2sh_requires_push_only_script_sig() {
        let redeem_script = vec![OP_1];
        let script_pubkey = p2sh_script_pubkey(&hash160(&redeem_script));
        let tx = empty_tx();
        let ctx = ExecutionContext { tx: &tx, input_index: 0 };

        let good = push_only_script(&[&redeem_script]);
        assert!(verify_script(&good, &script_pubkey, ctx, SCRIPT_VERIFY_P2SH).unwrap());

        let mut bad = vec![OP_NOP];
        bad.extend_from_slice(&good);
        assert!(!verify_script(&bad, &script_pubkey, ctx, SCRIPT_VERIFY_P2SH).unwrap());
    }

    #[test]
    fn test_p2sh_redeem_script_must_succeed() {
        let redeem_script = vec![OP_0];
        let script_pubkey = p2sh_script_pubkey(&hash160(&redeem_script));
        let tx = empty_tx();
        let ctx = ExecutionContext { tx: &tx, input_index: 0 };
        let script_sig = push_only_script(&[&redeem_script]);

        assert!(!verify_script(&script_sig, &script_pubkey, ctx, SCRIPT_VERIFY_P2SH).unwrap());
        // Without BIP16 only the hash comparison runs
        assert!(verify_script(&script_sig, &script_pubkey, ctx, SCRIPT_VERIFY_NONE).unwrap());
    }

    #[test]
    fn test_find_and_delete_removes_signature_push() {
        let signature = vec![0x30, 0x01, 0x02];
        let mut script = Vec::new();
        push_data(&mut script, &signature);
        script.push(OP_CHECKSIG);
        assert_eq!(find_and_delete(&script, &signature), vec![OP_CHECKSIG]);
    }

    #[test]
    fn test_interpreter_reports_missing_input() {
        let tx = empty_tx();
        let result = Interpreter::default().verify_script(&tx, 3, &[OP_1]);
        assert!(matches!(result, Err(RedeemError::ScriptExecution(_))));
    }
}
