//! Shannon entropy over raw bytes (DGA detection pre-filter)

/// Entropy above which a domain is always escalated
pub const HIGH_ENTROPY: f64 = 4.0;

/// Entropy above which a long domain is escalated
pub const LONG_DOMAIN_ENTROPY: f64 = 3.5;

/// Length beyond which a domain counts as long
pub const LONG_DOMAIN_LEN: usize = 20;

/// Shannon entropy in bits per symbol. Empty input has entropy 0.
pub fn shannon_entropy(s: &str) -> f64 {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }

    let size = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / size;
            -p * p.log2()
        })
        .sum()
}

/// Whether a domain looks random enough to be worth a model call
pub fn is_dga_candidate(domain: &str, entropy: f64) -> bool {
    entropy > HIGH_ENTROPY || (domain.len() > LONG_DOMAIN_LEN && entropy > LONG_DOMAIN_ENTROPY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_repeated() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("a"), 0.0);
        assert_eq!(shannon_entropy("aaaaaaaaaaaa"), 0.0);
    }

    #[test]
    fn test_uniform_is_log2_of_alphabet() {
        // Every symbol appears exactly once -> log2(n)
        let s = "abcdefghijklmnop";
        assert!((shannon_entropy(s) - 4.0).abs() < 1e-9);

        let s = "abcdabcdabcdabcd";
        assert!((shannon_entropy(s) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounded_by_distinct_symbols() {
        let s = "xk2j9qpz7vwm4tr8bn5c";
        let distinct = {
            let mut v: Vec<u8> = s.bytes().collect();
            v.sort();
            v.dedup();
            v.len() as f64
        };
        assert!(shannon_entropy(s) <= distinct.log2() + 1e-9);
    }

    #[test]
    fn test_dga_candidate_thresholds() {
        assert!(!is_dga_candidate("example.com", shannon_entropy("example.com")));

        // 17 distinct symbols -> entropy just above 4.0
        let random = "a1b2c3d4e5f6g7h8i.com";
        assert!(shannon_entropy(random) > 4.0);
        assert!(is_dga_candidate(random, shannon_entropy(random)));

        // Long label with moderate entropy
        assert!(is_dga_candidate("abcdefghijabcdefghijxyz", 3.6));
        assert!(!is_dga_candidate("short.io", 3.6));
    }
}
