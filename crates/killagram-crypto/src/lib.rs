/// Killagram crypto helpers
///
/// Stateless primitives shared by the session core and the API layer:
/// HS256 capability tokens, keyed request signatures and random material.
/// Nothing in here knows about accounts or revocation; that lives in
/// `killagram-state`.
pub mod keys;
pub mod signature;
pub mod token;
