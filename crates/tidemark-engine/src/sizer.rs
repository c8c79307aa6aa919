//! Order sizer.
//!
//! Converts a requested size in quote/base/contract units into an
//! exchange-accepted whole-contract count. Rounding is always toward zero:
//! a truncated order never exceeds the margin the operator intended.

use crate::error::{EngineError, EngineResult};
use rust_decimal::Decimal;
use tidemark_core::{ContractSpec, Price, UnitType};

/// Compute the contract count for a requested size.
///
/// `reference_price` is the limit price when given, otherwise the current
/// mark. The result respects `min_size`: too-small orders either round up to
/// the minimum (when `round_up_to_min` is set) or fail with `SizeTooSmall`.
pub fn contracts_for(
    spec: &ContractSpec,
    requested: Decimal,
    unit: UnitType,
    reference_price: Price,
    round_up_to_min: bool,
) -> EngineResult<Decimal> {
    if requested <= Decimal::ZERO {
        return Err(EngineError::SizeTooSmall(format!(
            "requested size {requested} must be positive"
        )));
    }

    let contracts = match unit {
        UnitType::Quote => {
            if !reference_price.is_positive() {
                return Err(EngineError::PriceUnavailable(spec.symbol.clone()));
            }
            let per_contract = spec.contract_value(reference_price.inner());
            (requested / per_contract).floor()
        }
        UnitType::Base => (requested / spec.contract_size).floor(),
        UnitType::Contract => requested.floor(),
    };

    if contracts < spec.min_size {
        if round_up_to_min {
            return Ok(spec.min_size);
        }
        return Err(EngineError::SizeTooSmall(format!(
            "{contracts} contracts is below the {} minimum for {}",
            spec.min_size, spec.symbol
        )));
    }

    Ok(contracts)
}
