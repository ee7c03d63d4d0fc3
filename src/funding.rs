//! Locating the premined output inside its funding block

use crate::keys::Address;
use crate::params::NetworkParams;
use crate::transaction::calculate_txid;
use crate::types::*;
use tracing::{debug, warn};

/// Select the funding transaction out of a block by txid
pub fn find_transaction<'a>(block: &'a Block, txid: &Hash) -> Option<&'a Transaction> {
    block
        .transactions
        .iter()
        .find(|tx| calculate_txid(tx) == *txid)
}

/// FundingLocator: 𝒯𝒳 × 𝕊 → FundingOutput ∪ {⊥}
///
/// The expected address is the P2SH address of `redeem_script`. Outputs are scanned in order and
/// every P2SH output has its address derived the same way; the first equal address wins.
pub fn find_funding_output(
    funding_tx: &Transaction,
    redeem_script: &[u8],
    params: &NetworkParams,
) -> Option<FundingOutput> {
    let expected = Address::p2sh(params, redeem_script);
    let txid = calculate_txid(funding_tx);

    let mut matches = funding_tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| {
            Address::from_p2sh_script(params, &output.script_pubkey) == Some(expected)
        });

    let (index, output) = matches.next()?;
    let extra = matches.count();
    if extra > 0 {
        warn!(
            "{} outputs pay to {}, redeeming output {}",
            extra + 1,
            expected,
            index
        );
    }
    debug!("Funding output {} pays {} to {}", index, output.value, expected);

    Some(FundingOutput {
        outpoint: OutPoint {
            hash: txid,
            index: index as u32,
        },
        output: output.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::hash160;
    use crate::script::{p2pkh_script_pubkey, p2sh_script_pubkey};

    fn redeem_script() -> Vec<u8> {
        vec![0x04, 0x00, 0xf1, 0x53, 0x65, 0xb1, 0x75, 0x51]
    }

    fn funding_tx(outputs: Vec<TransactionOutput>) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x51, 0x51],
                sequence: 0xffffffff,
            }],
            outputs,
            lock_time: 0,
        }
    }

    fn output(value: i64, script_pubkey: Vec<u8>) -> TransactionOutput {
        TransactionOutput { value, script_pubkey }
    }

    #[test]
    fn test_single_match() {
        let params = NetworkParams::main();
        let redeem = redeem_script();
        let tx = funding_tx(vec![output(100_000, p2sh_script_pubkey(&hash160(&redeem)))]);
        let funding = find_funding_output(&tx, &redeem, &params).unwrap();
        assert_eq!(funding.value(), 100_000);
        assert_eq!(funding.outpoint.index, 0);
        assert_eq!(funding.outpoint.hash, calculate_txid(&tx));
    }

    #[test]
    fn test_second_output_matches() {
        let params = NetworkParams::main();
        let redeem = redeem_script();
        let tx = funding_tx(vec![
            output(5_000, p2pkh_script_pubkey(&[9; 20])),
            output(100_000, p2sh_script_pubkey(&hash160(&redeem))),
        ]);
        let funding = find_funding_output(&tx, &redeem, &params).unwrap();
        assert_eq!(funding.outpoint.index, 1);
        assert_eq!(funding.value(), 100_000);
    }

    #[test]
    fn test_no_match() {
        let params = NetworkParams::main();
        let tx = funding_tx(vec![output(5_000, p2sh_script_pubkey(&[9; 20]))]);
        assert_eq!(find_funding_output(&tx, &redeem_script(), &params), None);
    }

    #[test]
    fn test_perturbed_script_does_not_match() {
        let params = NetworkParams::main();
        let redeem = redeem_script();
        let tx = funding_tx(vec![output(100_000, p2sh_script_pubkey(&hash160(&redeem)))]);
        let mut perturbed = redeem.clone();
        perturbed[2] ^= 0x01;
        assert_eq!(find_funding_output(&tx, &perturbed, &params), None);
    }

    #[test]
    fn test_first_match_wins() {
        let params = NetworkParams::main();
        let redeem = redeem_script();
        let script_pubkey = p2sh_script_pubkey(&hash160(&redeem));
        let tx = funding_tx(vec![
            output(1_000_000, script_pubkey.clone()),
            output(2_000_000, script_pubkey),
        ]);
        let funding = find_funding_output(&tx, &redeem, &params).unwrap();
        assert_eq!(funding.outpoint.index, 0);
        assert_eq!(funding.value(), 1_000_000);
    }

    #[test]
    fn test_find_transaction_by_txid() {
        let first = funding_tx(vec![output(1, vec![0x51])]);
        let second = funding_tx(vec![output(2, vec![0x51])]);
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 0,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions: vec![first, second.clone()],
        };
        assert_eq!(find_transaction(&block, &calculate_txid(&second)), Some(&second));
        assert_eq!(find_transaction(&block, &[7; 32]), None);
    }
}
