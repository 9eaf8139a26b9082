//! Difficulty retargeting.
//!
//! The required target at a retarget boundary scales the previous target by
//! the ratio of the observed period timespan to the expected one, clamped to
//! a factor of four in either direction and capped at the proof-of-work
//! limit. The 256-bit scaling is done byte-wise, the same way chain work is
//! accumulated.

use bitcoin::{CompactTarget, Target};

/// Ancestor heights the retarget rule samples to compute the required
/// target at `height`: the first block of the closing period and the last
/// block before `height`.
pub fn retarget_heights(height: u32, interval: u32) -> (u32, u32) {
    (height.saturating_sub(interval), height.saturating_sub(1))
}

/// Required compact target at a retarget boundary.
pub fn retarget(
    previous_bits: CompactTarget,
    first_timestamp: u32,
    last_timestamp: u32,
    target_timespan_secs: u32,
    pow_limit: Target,
) -> CompactTarget {
    let minimum = target_timespan_secs / 4;
    let maximum = target_timespan_secs.saturating_mul(4);
    let timespan = last_timestamp
        .saturating_sub(first_timestamp)
        .clamp(minimum, maximum);

    let previous = Target::from_compact(previous_bits);
    let scaled = mul_div_256(
        &previous.to_be_bytes(),
        timespan as u64,
        target_timespan_secs as u64,
    );

    let limit = pow_limit.to_be_bytes();
    let capped = if scaled > limit { limit } else { scaled };
    Target::from_be_bytes(capped).to_compact_lossy()
}

/// `value * mul / div` over a 256-bit big-endian integer, saturating when
/// the quotient exceeds 256 bits.
fn mul_div_256(value: &[u8; 32], mul: u64, div: u64) -> [u8; 32] {
    debug_assert!(div != 0, "division by zero timespan");

    let mut product = [0u8; 32];
    let mut carry: u128 = 0;
    for i in (0..32).rev() {
        let scaled = value[i] as u128 * mul as u128 + carry;
        product[i] = (scaled & 0xff) as u8;
        carry = scaled >> 8;
    }

    // The quotient no longer fits 256 bits; the caller caps at the limit.
    if carry >= div as u128 {
        return [0xff; 32];
    }

    let mut quotient = [0u8; 32];
    let mut remainder = carry;
    for i in 0..32 {
        let acc = remainder * 256 + product[i] as u128;
        quotient[i] = (acc / div as u128) as u8;
        remainder = acc % div as u128;
    }
    quotient
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMESPAN: u32 = 14 * 24 * 60 * 60;
    const BITS: u32 = 0x1d00ffff;

    #[test]
    fn test_retarget_heights() {
        assert_eq!(retarget_heights(2016, 2016), (0, 2015));
        assert_eq!(retarget_heights(4032, 2016), (2016, 4031));
        assert_eq!(retarget_heights(5, 2016), (0, 4));
    }

    #[test]
    fn test_mul_div_identity_and_scaling() {
        let mut value = [0u8; 32];
        value[30] = 0x12;
        value[31] = 0x34;

        assert_eq!(mul_div_256(&value, 7, 7), value);

        let doubled = mul_div_256(&value, 2, 1);
        assert_eq!(doubled[30], 0x24);
        assert_eq!(doubled[31], 0x68);

        let halved = mul_div_256(&value, 1, 2);
        assert_eq!(halved[30], 0x09);
        assert_eq!(halved[31], 0x1a);
    }

    #[test]
    fn test_mul_div_carries_across_bytes() {
        let mut value = [0u8; 32];
        value[31] = 0xff;
        let tripled = mul_div_256(&value, 3, 1);
        assert_eq!(tripled[31], 0xfd);
        assert_eq!(tripled[30], 0x02);
    }

    #[test]
    fn test_mul_div_saturates_on_overflow() {
        let all_ones = [0xff_u8; 32];
        assert_eq!(mul_div_256(&all_ones, 4, 1), [0xff; 32]);
    }

    #[test]
    fn test_on_schedule_keeps_target() {
        let bits = CompactTarget::from_consensus(BITS);
        let result = retarget(bits, 1000, 1000 + TIMESPAN, TIMESPAN, Target::MAX);
        assert_eq!(result, bits);
    }

    #[test]
    fn test_fast_period_hardens_slow_period_eases() {
        let bits = CompactTarget::from_consensus(BITS);
        let previous = Target::from_compact(bits);

        let fast = retarget(bits, 1000, 1000 + TIMESPAN / 2, TIMESPAN, Target::MAX);
        assert!(Target::from_compact(fast) < previous);

        let slow = retarget(bits, 1000, 1000 + TIMESPAN * 2, TIMESPAN, Target::MAX);
        assert!(Target::from_compact(slow) > previous);
    }

    #[test]
    fn test_timespan_clamped_to_factor_four() {
        let bits = CompactTarget::from_consensus(BITS);

        // A degenerate timespan behaves exactly like the clamp boundary.
        let instant = retarget(bits, 1000, 1000, TIMESPAN, Target::MAX);
        let quarter = retarget(bits, 1000, 1000 + TIMESPAN / 4, TIMESPAN, Target::MAX);
        assert_eq!(instant, quarter);

        let forever = retarget(bits, 1000, u32::MAX, TIMESPAN, Target::MAX);
        let quadruple = retarget(bits, 1000, 1000 + TIMESPAN * 4, TIMESPAN, Target::MAX);
        assert_eq!(forever, quadruple);
    }

    #[test]
    fn test_capped_at_pow_limit() {
        let limit = Target::from_compact(CompactTarget::from_consensus(BITS));
        let eased = retarget(
            CompactTarget::from_consensus(BITS),
            1000,
            1000 + TIMESPAN * 4,
            TIMESPAN,
            limit,
        );
        assert_eq!(eased, limit.to_compact_lossy());
    }
}
