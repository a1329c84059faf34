//! Bundle Construction
//!
//! Builds the ordered transaction sequence for one cross-venue cycle:
//! buy tokenB with the wrapped native token on the buy venue, approve
//! the sell router, sell tokenB back on the sell venue. Amounts are
//! integers; the sell-leg input is estimated offline from the buy-side
//! mid-price, which is approximate and a known source of bundle
//! failures.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::config::PipelineConfig;
use crate::contracts::{IJoeRouter, IERC20};
use crate::types::{ArbitrageOpportunity, BundleTx, PipelineError, TransactionBundle};

/// Swap deadline horizon.
const DEADLINE_SECS: u64 = 300;

/// Convert a human-unit amount to raw token units.
fn to_raw(amount: f64, decimals: u8) -> U256 {
    U256::from((amount * 10_f64.powi(decimals as i32)).round() as u128)
}

fn deadline_from_now() -> U256 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    U256::from(now + DEADLINE_SECS)
}

/// Build the replay bundle for one opportunity at `trade_amount` human
/// units of tokenA.
///
/// When tokenA is the wrapped native token the cycle is complete:
/// native -> tokenB -> native. Otherwise an initial
/// native -> tokenA acquisition swap is prepended and the cycle ends
/// holding tokenA.
/// TODO: unwind tokenA back to AVAX after the sell leg so the
/// prepended variant settles in native units too.
pub fn build_cross_venue_bundle(
    config: &PipelineConfig,
    opportunity: &ArbitrageOpportunity,
    trade_amount: f64,
    wallet: Address,
) -> Result<TransactionBundle, PipelineError> {
    let buy_venue = config
        .venue(&opportunity.buy_venue)
        .ok_or_else(|| PipelineError::Config(format!("unknown venue {}", opportunity.buy_venue)))?;
    let sell_venue = config
        .venue(&opportunity.sell_venue)
        .ok_or_else(|| PipelineError::Config(format!("unknown venue {}", opportunity.sell_venue)))?;

    let token_a = opportunity.token_a;
    let token_b = opportunity.token_b;
    let decimals_b = config.decimals_of(token_b)?;
    let gas_limit = config.mev.default_gas_limit;
    let deadline = deadline_from_now();

    // Offline estimate of the buy leg's output, used as the sell leg's
    // input. Approximate by construction: mid-price ignores fees and
    // slippage.
    let estimated_token_b = to_raw(trade_amount * opportunity.buy_price, decimals_b);

    let mut transactions = Vec::new();
    let native_cycle = config.is_wrapped_native(token_a);

    if !native_cycle {
        // Acquire exactly trade_amount of tokenA with native funds; the
        // router refunds unspent value.
        let decimals_a = config.decimals_of(token_a)?;
        let amount_a = to_raw(trade_amount, decimals_a);
        transactions.push(BundleTx {
            to: buy_venue.router,
            value: acquisition_budget_wei(config),
            input: Bytes::from(
                IJoeRouter::swapAVAXForExactTokensCall {
                    amountOut: amount_a,
                    path: vec![config.wrapped_native, token_a],
                    to: wallet,
                    deadline,
                }
                .abi_encode(),
            ),
            gas_limit,
        });
        transactions.push(approve_tx(token_a, buy_venue.router, gas_limit));
    }

    // Buy leg.
    if native_cycle {
        transactions.push(BundleTx {
            to: buy_venue.router,
            value: to_raw(trade_amount, 18),
            input: Bytes::from(
                IJoeRouter::swapExactAVAXForTokensCall {
                    amountOutMin: U256::ZERO,
                    path: vec![token_a, token_b],
                    to: wallet,
                    deadline,
                }
                .abi_encode(),
            ),
            gas_limit,
        });
    } else {
        let decimals_a = config.decimals_of(token_a)?;
        transactions.push(BundleTx {
            to: buy_venue.router,
            value: U256::ZERO,
            input: Bytes::from(
                IJoeRouter::swapExactTokensForTokensCall {
                    amountIn: to_raw(trade_amount, decimals_a),
                    amountOutMin: U256::ZERO,
                    path: vec![token_a, token_b],
                    to: wallet,
                    deadline,
                }
                .abi_encode(),
            ),
            gas_limit,
        });
    }

    // Unlimited approval for the sell router on tokenB.
    transactions.push(approve_tx(token_b, sell_venue.router, gas_limit));

    // Sell leg.
    let sell_input = if native_cycle {
        IJoeRouter::swapExactTokensForAVAXCall {
            amountIn: estimated_token_b,
            amountOutMin: U256::ZERO,
            path: vec![token_b, token_a],
            to: wallet,
            deadline,
        }
        .abi_encode()
    } else {
        IJoeRouter::swapExactTokensForTokensCall {
            amountIn: estimated_token_b,
            amountOutMin: U256::ZERO,
            path: vec![token_b, token_a],
            to: wallet,
            deadline,
        }
        .abi_encode()
    };
    transactions.push(BundleTx {
        to: sell_venue.router,
        value: U256::ZERO,
        input: Bytes::from(sell_input),
        gas_limit,
    });

    // Expected profit in native wei, available only for the native
    // cycle where tokenA units are AVAX.
    let profit_margin = opportunity.price_gap / opportunity.buy_price;
    let expected_profit_wei = if native_cycle {
        (trade_amount * profit_margin * 1e18) as i128
    } else {
        0
    };

    Ok(TransactionBundle {
        transactions,
        expected_profit_wei,
        description: format!(
            "{} {} {}/{}: buy {} @ {:.6}, sell {} @ {:.6}",
            if native_cycle { "cycle" } else { "prepended cycle" },
            trade_amount,
            config.symbol_of(token_a),
            config.symbol_of(token_b),
            opportunity.buy_venue,
            opportunity.buy_price,
            opportunity.sell_venue,
            opportunity.sell_price,
        ),
    })
}

fn approve_tx(token: Address, spender: Address, gas_limit: u64) -> BundleTx {
    BundleTx {
        to: token,
        value: U256::ZERO,
        input: Bytes::from(
            IERC20::approveCall {
                spender,
                amount: U256::MAX,
            }
            .abi_encode(),
        ),
        gas_limit,
    }
}

/// Native value attached to the acquisition swap in the prepended
/// variant. Half the funded test balance leaves gas headroom; the exact
/// router refunds the unspent remainder.
fn acquisition_budget_wei(config: &PipelineConfig) -> U256 {
    U256::from(config.sandbox.balance_avax / 2) * U256::from(10).pow(U256::from(18))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::decoder;
    use crate::types::VenueKind;

    fn opportunity(config: &PipelineConfig) -> ArbitrageOpportunity {
        let (wavax, usdc) = config.pairs[0];
        ArbitrageOpportunity {
            token_a: wavax,
            token_b: usdc,
            buy_venue: "TraderJoe".to_string(),
            sell_venue: "Pangolin".to_string(),
            buy_price: 42.0,
            sell_price: 42.3,
            price_gap: 0.3,
            profit_percent: 0.714,
            estimated_gas: 300_000,
            min_trade: 1.0,
            max_trade: 10.0,
            detected_at: 0,
        }
    }

    #[test]
    fn test_native_cycle_shape() {
        let config = PipelineConfig::default_mainnet();
        let wallet = Address::repeat_byte(0x22);
        let bundle = build_cross_venue_bundle(&config, &opportunity(&config), 1.0, wallet).unwrap();

        assert_eq!(bundle.transactions.len(), 3);

        // Buy leg: 1 WAVAX of value to the buy router, decodable by our
        // own decoder with the WAVAX->USDC path.
        let buy = &bundle.transactions[0];
        assert_eq!(buy.to, config.venue("TraderJoe").unwrap().router);
        assert_eq!(buy.value, U256::from(10).pow(U256::from(18)));
        let decoded = decoder::decode_calldata(VenueKind::ConstantProductV2, buy.to, &buy.input)
            .expect("buy leg decodes");
        assert_eq!(decoded.function_name, "swapExactAVAXForTokens");
        assert_eq!(decoded.path, vec![config.pairs[0].0, config.pairs[0].1]);

        // Approval: unlimited allowance for the sell router on USDC.
        let approve = &bundle.transactions[1];
        assert_eq!(approve.to, config.pairs[0].1);
        let call = IERC20::approveCall::abi_decode(&approve.input).expect("approve decodes");
        assert_eq!(call.spender, config.venue("Pangolin").unwrap().router);
        assert_eq!(call.amount, U256::MAX);

        // Sell leg: estimated USDC input = 1.0 * 42.0 at 6 decimals.
        let sell = &bundle.transactions[2];
        assert_eq!(sell.to, config.venue("Pangolin").unwrap().router);
        let call = IJoeRouter::swapExactTokensForAVAXCall::abi_decode(&sell.input)
            .expect("sell leg decodes");
        assert_eq!(call.amountIn, U256::from(42_000_000u64));
        assert_eq!(call.path, vec![config.pairs[0].1, config.pairs[0].0]);
    }

    #[test]
    fn test_deadline_horizon() {
        let config = PipelineConfig::default_mainnet();
        let wallet = Address::repeat_byte(0x22);
        let bundle = build_cross_venue_bundle(&config, &opportunity(&config), 1.0, wallet).unwrap();
        let call = IJoeRouter::swapExactAVAXForTokensCall::abi_decode(
            &bundle.transactions[0].input,
        )
        .unwrap();

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let deadline: u64 = call.deadline.to::<u64>();
        assert!(deadline >= now + DEADLINE_SECS - 2 && deadline <= now + DEADLINE_SECS + 2);
    }

    #[test]
    fn test_native_cycle_expected_profit() {
        let config = PipelineConfig::default_mainnet();
        let bundle = build_cross_venue_bundle(
            &config,
            &opportunity(&config),
            1.0,
            Address::repeat_byte(0x22),
        )
        .unwrap();
        // 1 WAVAX at a 0.3/42.0 margin
        let expected = (0.3 / 42.0 * 1e18) as i128;
        assert_eq!(bundle.expected_profit_wei, expected);
    }

    #[test]
    fn test_prepended_cycle_shape() {
        let config = PipelineConfig::default_mainnet();
        let (_, usdc) = config.pairs[0];
        let usdt = config.token_by_symbol("USDT").unwrap().address;
        let mut opp = opportunity(&config);
        // USDT/USDC route: tokenA is not the wrapped native token
        opp.token_a = usdt;
        opp.token_b = usdc;
        opp.buy_price = 1.0;
        opp.sell_price = 1.01;
        opp.price_gap = 0.01;

        let bundle =
            build_cross_venue_bundle(&config, &opp, 100.0, Address::repeat_byte(0x22)).unwrap();
        assert_eq!(bundle.transactions.len(), 5);

        let acquire = &bundle.transactions[0];
        let call =
            IJoeRouter::swapAVAXForExactTokensCall::abi_decode(&acquire.input).expect("decodes");
        assert_eq!(call.path, vec![config.wrapped_native, usdt]);
        assert_eq!(call.amountOut, U256::from(100_000_000u64)); // 100 USDT, 6 dec
        assert!(acquire.value > U256::ZERO);

        // Cycle without a native leg carries no native profit estimate.
        assert_eq!(bundle.expected_profit_wei, 0);
    }

    #[test]
    fn test_unknown_venue_is_config_error() {
        let config = PipelineConfig::default_mainnet();
        let mut opp = opportunity(&config);
        opp.buy_venue = "Mystery".to_string();
        let err = build_cross_venue_bundle(&config, &opp, 1.0, Address::repeat_byte(0x22))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
