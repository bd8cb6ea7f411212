use alloy_primitives::U256;
use tracing::warn;

use crate::types::TokenTransfer;

/// Compute the inclusive block range to scan for a wallet.
///
/// A never-scanned wallet (`last_checked_block == 0`) looks back
/// `initial_range` blocks from the head; otherwise the scan resumes right after
/// the watermark. Returns `None` when the watermark is already at the head.
pub fn scan_range(last_checked_block: u64, latest_block: u64, initial_range: u64) -> Option<(u64, u64)> {
    let from_block = if last_checked_block == 0 {
        latest_block.saturating_sub(initial_range)
    } else {
        last_checked_block + 1
    };

    if from_block > latest_block {
        return None;
    }
    Some((from_block, latest_block))
}

/// Sort transfers oldest-first so alerts are recorded in chronological order.
pub fn sort_chronological(transfers: &mut [TokenTransfer]) {
    transfers.sort_by_key(|t| t.block_number);
}

/// Format a raw token amount as a human-readable decimal string.
///
/// Uses exact integer division by `10^decimals`. Trailing fractional zeros are
/// trimmed and whole amounts carry no decimal point. A value that is not a
/// decimal integer is returned unchanged.
pub fn format_token_amount(value: &str, decimals: u8) -> String {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        warn!("Cannot format token amount {value:?} ({decimals} decimals): not a decimal integer");
        return value.to_string();
    }
    let amount = match U256::from_str_radix(value, 10) {
        Ok(a) => a,
        Err(e) => {
            warn!("Cannot format token amount {value:?} ({decimals} decimals): {e}");
            return value.to_string();
        }
    };

    // 10^decimals overflows U256 past 77 decimals; every amount is then fractional.
    let (quotient, remainder) = match U256::from(10u8).checked_pow(U256::from(decimals)) {
        Some(divisor) => (amount / divisor, amount % divisor),
        None => (U256::ZERO, amount),
    };

    if remainder.is_zero() {
        return quotient.to_string();
    }

    let padded = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
    let fraction = padded.trim_end_matches('0');
    if fraction.is_empty() {
        return quotient.to_string();
    }
    format!("{quotient}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;

    fn make_transfer(hash: &str, block_number: u64) -> TokenTransfer {
        TokenTransfer {
            hash: hash.to_string(),
            from: "0xaa".to_string(),
            to: "0xbb".to_string(),
            token_address: "0xcc".to_string(),
            token_symbol: "TKN".to_string(),
            token_name: "Token".to_string(),
            value: "1".to_string(),
            decimals: 18,
            timestamp_ms: 0,
            block_number,
            chain: Chain::Ethereum,
        }
    }

    // ── scan_range ─────────────────────────────────────────────────

    #[test]
    fn range_first_scan_looks_back() {
        assert_eq!(scan_range(0, 1_000_000, 10_000), Some((990_000, 1_000_000)));
    }

    #[test]
    fn range_first_scan_clamps_at_genesis() {
        assert_eq!(scan_range(0, 4_000, 10_000), Some((0, 4_000)));
    }

    #[test]
    fn range_resumes_after_watermark() {
        assert_eq!(scan_range(999_995, 1_000_000, 10_000), Some((999_996, 1_000_000)));
    }

    #[test]
    fn range_single_new_block() {
        assert_eq!(scan_range(99, 100, 10_000), Some((100, 100)));
    }

    #[test]
    fn range_up_to_date() {
        assert_eq!(scan_range(1_000_000, 1_000_000, 10_000), None);
    }

    #[test]
    fn range_watermark_ahead_of_head() {
        // Lagging explorer node reports an older head than we already scanned.
        assert_eq!(scan_range(1_000_010, 1_000_000, 10_000), None);
    }

    #[test]
    fn initial_range_per_chain() {
        let eth = Chain::Ethereum.config().initial_block_range;
        let avax = Chain::Avalanche.config().initial_block_range;
        assert_eq!(scan_range(0, 1_000_000, eth), Some((990_000, 1_000_000)));
        assert_eq!(scan_range(0, 1_000_000, avax), Some((950_000, 1_000_000)));
    }

    // ── sort_chronological ─────────────────────────────────────────

    #[test]
    fn sort_orders_by_block() {
        let mut transfers = vec![
            make_transfer("c", 30),
            make_transfer("a", 10),
            make_transfer("b", 20),
        ];
        sort_chronological(&mut transfers);
        let hashes: Vec<&str> = transfers.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, ["a", "b", "c"]);
    }

    // ── format_token_amount ────────────────────────────────────────

    #[test]
    fn amount_fractional() {
        assert_eq!(format_token_amount("1500000000000000000", 18), "1.5");
    }

    #[test]
    fn amount_whole_has_no_point() {
        assert_eq!(format_token_amount("3000000000000000000", 18), "3");
    }

    #[test]
    fn amount_smallest_unit() {
        assert_eq!(format_token_amount("1", 18), "0.000000000000000001");
    }

    #[test]
    fn amount_zero_decimals() {
        assert_eq!(format_token_amount("42", 0), "42");
    }

    #[test]
    fn amount_zero() {
        assert_eq!(format_token_amount("0", 6), "0");
    }

    #[test]
    fn amount_beyond_u64() {
        // 123456789012345678901234.5 tokens at 18 decimals
        assert_eq!(
            format_token_amount("123456789012345678901234500000000000000000", 18),
            "123456789012345678901234.5"
        );
    }

    #[test]
    fn amount_max_uint256() {
        let max = U256::MAX.to_string();
        assert_eq!(
            format_token_amount(&max, 18),
            "115792089237316195423570985008687907853269984665640564039457.584007913129639935"
        );
    }

    #[test]
    fn amount_huge_decimals() {
        assert_eq!(format_token_amount("5", 80), format!("0.{}5", "0".repeat(79)));
    }

    #[test]
    fn amount_not_a_number_passthrough() {
        assert_eq!(format_token_amount("0x10", 18), "0x10");
        assert_eq!(format_token_amount("", 18), "");
    }
}
