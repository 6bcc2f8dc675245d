/// 2^64 divided by the golden ratio.
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

/// [Szudzik pairing function][szudzik-pairing], wrapping on overflow.
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing_szudzik(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Order-sensitive combination of two hashes.
pub fn mix(a: u64, b: u64) -> u64 {
    fib_hash_u64(pairing_szudzik(a, b))
}

/// [Fibonacci hashing][fib-hash] of an integer.
///
/// [fib-hash]: https://probablydance.com/2018/06/16/fibonacci-hashing-the-optimization-that-you-forgot-or-the-best-hash-table-trick/
pub fn fib_hash_u64(x: u64) -> u64 {
    let h = x.wrapping_mul(GOLDEN);
    h ^ (h >> 29)
}

/// Fibonacci hashing of a float. `0.0` and `-0.0` hash equally.
pub fn fib_hash(x: f64) -> u64 {
    let x = if x == 0.0 { 0.0 } else { x };
    fib_hash_u64(x.to_bits())
}

/// FNV-1a hash of a handler name.
pub fn hash_name(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
