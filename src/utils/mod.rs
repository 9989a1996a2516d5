// Small shared helpers: tokens and money arithmetic.

use rand::RngCore;

/// Generate an unguessable identifier with the given prefix, e.g.
/// `ps_3f9a...` for session tokens. 24 random bytes, hex-encoded.
pub fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}_{}", prefix, hex::encode(bytes))
}

/// Normalize a USD amount to micro-dollar precision.
///
/// Every balance mutation goes through this so that ledger invariants
/// (`spent + remaining == authorized`, `purchased - spent == balance`)
/// hold exactly instead of drifting by float epsilons.
pub fn round_usd(amount: f64) -> f64 {
    (amount * 1_000_000.0).round() / 1_000_000.0
}
