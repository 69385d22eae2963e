//! Contiguous share splitting.
//!
//! The share data is cut into `n` near-equal slices. Reassembly is plain
//! concatenation, so the order shares are handed to [`join`] is part of the
//! protocol.

/// Split `data` into `n` contiguous shares of `ceil(len / n)` bytes each.
///
/// The last non-empty share may be shorter, and trailing shares are empty
/// when `n` exceeds the input length. `n == 0` is treated as 1.
pub fn split(data: &[u8], n: usize) -> Vec<Vec<u8>> {
    let n = n.max(1);
    let share_len = data.len().div_ceil(n);

    (0..n)
        .map(|i| {
            let start = (i * share_len).min(data.len());
            let end = ((i + 1) * share_len).min(data.len());
            data[start..end].to_vec()
        })
        .collect()
}

/// Concatenate shares in the given order.
pub fn join<S: AsRef<[u8]>>(shares: &[S]) -> Vec<u8> {
    let total = shares.iter().map(|s| s.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for share in shares {
        out.extend_from_slice(share.as_ref());
    }
    out
}
