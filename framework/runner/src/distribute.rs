/// Split `m` into `n` whole shares that differ by at most one and sum to exactly `m`.
///
/// Larger shares come first. When `m < n` the first `m` shares are `1` and the rest are `0`, which
/// falls out of the same rule with a base share of zero.
///
/// Splitting over zero shares gives an empty result.
pub fn distribute(m: u64, n: usize) -> Vec<u64> {
    if n == 0 {
        return Vec::new();
    }

    let base = m / n as u64;
    let remainder = (m % n as u64) as usize;

    let shares: Vec<u64> = (0..n)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();

    debug_assert_eq!(m, shares.iter().sum::<u64>());

    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fewer_than_buckets() {
        assert_eq!(vec![1, 0, 0, 0], distribute(1, 4));
        assert_eq!(vec![0, 0, 0], distribute(0, 3));
    }

    #[test]
    fn even_split() {
        assert_eq!(vec![1, 1, 1, 1], distribute(4, 4));
        assert_eq!(vec![5, 5, 5, 5], distribute(20, 4));
    }

    #[test]
    fn remainder_goes_first() {
        assert_eq!(vec![7, 7, 6], distribute(20, 3));
        assert_eq!(vec![16, 15, 15, 15], distribute(61, 4));
    }

    #[test]
    fn zero_buckets() {
        assert!(distribute(10, 0).is_empty());
    }

    #[test]
    fn always_sums_to_input() {
        for m in 0..200 {
            for n in 1..25 {
                let shares = distribute(m, n);
                assert_eq!(n, shares.len());
                assert_eq!(m, shares.iter().sum::<u64>(), "distribute({m}, {n})");

                let max = shares.iter().max().copied().unwrap_or_default();
                let min = shares.iter().min().copied().unwrap_or_default();
                assert!(max - min <= 1);
            }
        }
    }
}
