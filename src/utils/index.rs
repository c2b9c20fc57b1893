/// Decimals of one ether expressed in wei.
pub const ETHER_DECIMALS: u32 = 18;

/// Format a base-unit `amount` with `decimals` places, without floating point loss.
///
/// Trailing zeros of the fraction are dropped: `1_500_000_000_000_000_000` wei with 18
/// decimals formats as `1.5`.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    let Some(scale) = 10u128.checked_pow(decimals) else {
        return format!("0.{:0>width$}", amount, width = decimals as usize)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string();
    };

    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }

    let fraction = format!("{:0>width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
