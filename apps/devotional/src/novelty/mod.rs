// Novelty enforcement: normalization, fingerprints, the rolling ledger and the gate.
// Everything in here is pure and synchronous; storage access is limited to Ledger::load.

pub mod fingerprint;
pub mod gate;
pub mod ledger;
pub mod normalize;
