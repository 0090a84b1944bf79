//! USSD dial-string derivation.
//!
//! The platform never calls the provider to collect: the payer dials a
//! provider-specific code that pushes funds to the platform's collection
//! account. The string is derived deterministically from the provider's
//! configured template, its business number and the amount, so replaying an
//! idempotent request reproduces the exact same code.

use crate::config::ProviderDialConfig;
use bigdecimal::BigDecimal;

/// Render the dial code for an amount, e.g. `*126*9*624488*300#`.
///
/// Templates carry `{business}` and `{amount}` placeholders. XAF has no
/// minor unit, so the amount is rendered without a fractional part.
pub fn dial_code(provider: &ProviderDialConfig, amount: &BigDecimal) -> String {
    provider
        .dial_template
        .replace("{business}", &provider.business_number)
        .replace("{amount}", &amount.with_scale(0).to_string())
}
