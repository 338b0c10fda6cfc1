//! Per-run secret material: the CSRF token and the random endpoint path.

use rand::TryRngCore;
use rand::rngs::OsRng;

/// Mint the per-run CSRF token: 16 random bytes, lowercase hex.
pub(crate) fn csrf_token() -> String {
    random_hex(16)
}

/// Mint the per-run endpoint path: `/readform_` plus 8 random bytes in
/// lowercase hex. The unpredictable path is a soft defence; the CSRF token
/// is the real authorisation for POST.
pub(crate) fn endpoint_path() -> String {
    format!("/readform_{}", random_hex(8))
}

fn random_hex(len: usize) -> String {
    let mut raw = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut raw)
        .expect("OsRng.try_fill_bytes failed");
    hex::encode(raw)
}
