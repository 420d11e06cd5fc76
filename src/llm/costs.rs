//! Per-token pricing for known models (USD).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fallback pricing for unknown models.
const DEFAULT_COST: (Decimal, Decimal) = (dec!(0.000003), dec!(0.000015));

/// Look up (input, output) per-token cost for a model name.
///
/// Matches on prefix so dated snapshots share their family's pricing.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.to_ascii_lowercase();
    let table: &[(&str, (Decimal, Decimal))] = &[
        ("gpt-4o-mini", (dec!(0.00000015), dec!(0.0000006))),
        ("gpt-4o", (dec!(0.0000025), dec!(0.00001))),
        ("gpt-4.1-mini", (dec!(0.0000004), dec!(0.0000016))),
        ("gpt-4.1", (dec!(0.000002), dec!(0.000008))),
        ("gpt-4", (dec!(0.00003), dec!(0.00006))),
        ("claude-3-5-haiku", (dec!(0.0000008), dec!(0.000004))),
        ("claude-sonnet-4", (dec!(0.000003), dec!(0.000015))),
        ("claude-3-5-sonnet", (dec!(0.000003), dec!(0.000015))),
    ];
    table
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, cost)| *cost)
        .unwrap_or(DEFAULT_COST)
}

/// Estimated USD cost of a call.
pub fn estimate(cost: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    cost.0 * Decimal::from(input_tokens) + cost.1 * Decimal::from(output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_not_shadowed_by_family_prefix() {
        assert_eq!(model_cost("gpt-4o-mini-2024-07-18").0, dec!(0.00000015));
        assert_eq!(model_cost("gpt-4o-2024-08-06").0, dec!(0.0000025));
    }

    #[test]
    fn unknown_model_uses_default() {
        assert_eq!(model_cost("some-local-model"), DEFAULT_COST);
    }

    #[test]
    fn estimate_sums_both_directions() {
        let cost = (dec!(0.001), dec!(0.002));
        assert_eq!(estimate(cost, 10, 5), dec!(0.020));
    }
}
