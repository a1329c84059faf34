//! Mempool Calldata Decoder
//!
//! Decodes swap calldata from pending-transaction input bytes against
//! the V2 router dialect used on Avalanche (TraderJoe JoeRouter02,
//! Pangolin — AVAX naming where Uniswap uses ETH).
//!
//! The handler is selected by the venue's protocol family tag, not by
//! trait dispatch; constant-product V2 is currently the only family.
//! Selectors come from the `sol!`-generated call types, so the decode
//! path and the bundle-encode path share one ABI definition.
//!
//! Decode failures are non-fatal: the ingestor stores the transaction
//! without a decoded swap.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tracing::trace;

use crate::contracts::IJoeRouter::{
    swapAVAXForExactTokensCall, swapExactAVAXForTokensCall, swapExactTokensForAVAXCall,
    swapExactTokensForTokensCall, swapTokensForExactAVAXCall, swapTokensForExactTokensCall,
};
use crate::types::{DecodedSwap, VenueKind};

/// Decode swap calldata addressed to `router`. Returns None when the
/// selector is unknown for the venue family or decoding fails.
pub fn decode_calldata(kind: VenueKind, router: Address, input: &[u8]) -> Option<DecodedSwap> {
    match kind {
        VenueKind::ConstantProductV2 => decode_v2(router, input),
    }
}

/// Return the 4-byte selector as a hex string for logging.
pub fn selector_hex(input: &[u8]) -> String {
    if input.len() < 4 {
        return "0x????".to_string();
    }
    format!(
        "0x{:02x}{:02x}{:02x}{:02x}",
        input[0], input[1], input[2], input[3]
    )
}

fn decode_v2(router: Address, input: &[u8]) -> Option<DecodedSwap> {
    if input.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = input[..4].try_into().ok()?;

    if selector == swapExactTokensForTokensCall::SELECTOR {
        let call = swapExactTokensForTokensCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapExactTokensForTokens",
            vec![
                call.amountIn.to_string(),
                call.amountOutMin.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            Some(call.amountIn),
            Some(call.amountOutMin),
            call.path,
        ))
    } else if selector == swapTokensForExactTokensCall::SELECTOR {
        let call = swapTokensForExactTokensCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapTokensForExactTokens",
            vec![
                call.amountOut.to_string(),
                call.amountInMax.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            // Exact-out: the realized input is unknown from calldata.
            None,
            Some(call.amountOut),
            call.path,
        ))
    } else if selector == swapExactAVAXForTokensCall::SELECTOR {
        let call = swapExactAVAXForTokensCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapExactAVAXForTokens",
            vec![
                call.amountOutMin.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            // amountIn is msg.value, not in calldata.
            None,
            Some(call.amountOutMin),
            call.path,
        ))
    } else if selector == swapAVAXForExactTokensCall::SELECTOR {
        let call = swapAVAXForExactTokensCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapAVAXForExactTokens",
            vec![
                call.amountOut.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            None,
            Some(call.amountOut),
            call.path,
        ))
    } else if selector == swapExactTokensForAVAXCall::SELECTOR {
        let call = swapExactTokensForAVAXCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapExactTokensForAVAX",
            vec![
                call.amountIn.to_string(),
                call.amountOutMin.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            Some(call.amountIn),
            Some(call.amountOutMin),
            call.path,
        ))
    } else if selector == swapTokensForExactAVAXCall::SELECTOR {
        let call = swapTokensForExactAVAXCall::abi_decode(input).ok()?;
        Some(from_path(
            router,
            "swapTokensForExactAVAX",
            vec![
                call.amountOut.to_string(),
                call.amountInMax.to_string(),
                render_path(&call.path),
                format!("{:?}", call.to),
                call.deadline.to_string(),
            ],
            None,
            Some(call.amountOut),
            call.path,
        ))
    } else {
        trace!("Unknown selector: {}", selector_hex(input));
        None
    }
}

fn from_path(
    router: Address,
    function_name: &str,
    args: Vec<String>,
    amount_in: Option<U256>,
    amount_out_min: Option<U256>,
    path: Vec<Address>,
) -> DecodedSwap {
    DecodedSwap {
        router,
        function_name: function_name.to_string(),
        args,
        is_swap: function_name.to_lowercase().contains("swap"),
        token_in: path.first().copied(),
        token_out: path.last().copied(),
        amount_in,
        amount_out_min,
        path,
    }
}

fn render_path(path: &[Address]) -> String {
    let joined: Vec<String> = path.iter().map(|a| format!("{:?}", a)).collect();
    format!("[{}]", joined.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavax() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn usdc() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn router() -> Address {
        Address::repeat_byte(0x11)
    }

    #[test]
    fn test_canonical_selector() {
        // swapExactTokensForTokens(uint256,uint256,address[],address,uint256)
        assert_eq!(swapExactTokensForTokensCall::SELECTOR, [0x38, 0xed, 0x17, 0x39]);
    }

    #[test]
    fn test_selector_hex() {
        let data = vec![0x38, 0xed, 0x17, 0x39, 0x00];
        assert_eq!(selector_hex(&data), "0x38ed1739");
        assert_eq!(selector_hex(&data[..2]), "0x????");
    }

    #[test]
    fn test_decode_round_trip_exact_in() {
        let amount_in = U256::from(10).pow(U256::from(18));
        let input = swapExactTokensForTokensCall {
            amountIn: amount_in,
            amountOutMin: U256::ZERO,
            path: vec![wavax(), usdc()],
            to: Address::repeat_byte(0x22),
            deadline: U256::from(1_900_000_000u64),
        }
        .abi_encode();

        let decoded =
            decode_calldata(VenueKind::ConstantProductV2, router(), &input).expect("decodes");
        assert_eq!(decoded.function_name, "swapExactTokensForTokens");
        assert!(decoded.is_swap);
        assert_eq!(decoded.router, router());
        assert_eq!(decoded.token_in, Some(wavax()));
        assert_eq!(decoded.token_out, Some(usdc()));
        assert_eq!(decoded.amount_in, Some(amount_in));
        assert_eq!(decoded.amount_out_min, Some(U256::ZERO));
        assert_eq!(decoded.path, vec![wavax(), usdc()]);
        assert_eq!(decoded.args.len(), 5);
    }

    #[test]
    fn test_decode_avax_in_leg() {
        let input = swapExactAVAXForTokensCall {
            amountOutMin: U256::from(5u64),
            path: vec![wavax(), usdc()],
            to: Address::repeat_byte(0x22),
            deadline: U256::from(1_900_000_000u64),
        }
        .abi_encode();

        let decoded =
            decode_calldata(VenueKind::ConstantProductV2, router(), &input).expect("decodes");
        assert_eq!(decoded.function_name, "swapExactAVAXForTokens");
        // amountIn rides on msg.value, so the decoder leaves it unset
        assert_eq!(decoded.amount_in, None);
        assert_eq!(decoded.amount_out_min, Some(U256::from(5u64)));
        assert_eq!(decoded.token_in, Some(wavax()));
        assert_eq!(decoded.token_out, Some(usdc()));
    }

    #[test]
    fn test_decode_exact_out_leaves_input_unknown() {
        let input = swapTokensForExactAVAXCall {
            amountOut: U256::from(7u64),
            amountInMax: U256::from(100u64),
            path: vec![usdc(), wavax()],
            to: Address::repeat_byte(0x22),
            deadline: U256::from(1_900_000_000u64),
        }
        .abi_encode();

        let decoded =
            decode_calldata(VenueKind::ConstantProductV2, router(), &input).expect("decodes");
        assert_eq!(decoded.amount_in, None);
        assert_eq!(decoded.amount_out_min, Some(U256::from(7u64)));
    }

    #[test]
    fn test_unknown_selector_is_none() {
        let input = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x00];
        assert!(decode_calldata(VenueKind::ConstantProductV2, router(), &input).is_none());
    }

    #[test]
    fn test_short_calldata_is_none() {
        assert!(decode_calldata(VenueKind::ConstantProductV2, router(), &[0x38]).is_none());
    }

    #[test]
    fn test_corrupt_body_is_none() {
        let mut input = swapExactTokensForTokensCall {
            amountIn: U256::from(1u64),
            amountOutMin: U256::ZERO,
            path: vec![wavax(), usdc()],
            to: Address::repeat_byte(0x22),
            deadline: U256::from(1u64),
        }
        .abi_encode();
        input.truncate(20);
        assert!(decode_calldata(VenueKind::ConstantProductV2, router(), &input).is_none());
    }
}
