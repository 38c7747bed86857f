//! Shamir sharing and Feldman verification over any prime-order group
//!
//! Shared by the Ed25519 primitives and the BLS12-381 generation variant.

use crate::{Error, Result};
use elliptic_curve::ff::{Field, PrimeField};
use elliptic_curve::group::Group;
use rand_core::{CryptoRng, RngCore};

/// Field element for a party position
pub fn index_scalar<F: PrimeField>(index: u8) -> F {
    F::from(index as u64)
}

/// Evaluate polynomial at a point
pub fn evaluate_polynomial<F: PrimeField>(coefficients: &[F], x: u8) -> F {
    let x_scalar = index_scalar::<F>(x);
    let mut result = F::ZERO;
    let mut x_power = F::ONE;

    for coef in coefficients {
        result += *coef * x_power;
        x_power *= x_scalar;
    }

    result
}

/// Split `secret` with a fresh polynomial of degree `threshold - 1`,
/// returning one share per index in the order given
pub fn split<F, R>(secret: F, threshold: usize, indices: &[u8], rng: &mut R) -> Result<Vec<F>>
where
    F: PrimeField,
    R: RngCore + CryptoRng,
{
    if threshold == 0 || threshold > indices.len() {
        return Err(Error::InvalidConfig(format!(
            "Cannot split into {} shares with threshold {}",
            indices.len(),
            threshold
        )));
    }
    check_indices(indices)?;

    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(secret);
    for _ in 1..threshold {
        coefficients.push(F::random(&mut *rng));
    }

    Ok(indices
        .iter()
        .map(|index| evaluate_polynomial(&coefficients, *index))
        .collect())
}

/// Lagrange coefficient at zero for `index` within `indices`
pub fn lagrange_coefficient<F: PrimeField>(index: u8, indices: &[u8]) -> Result<F> {
    check_indices(indices)?;
    if !indices.contains(&index) {
        return Err(Error::InvalidShareIndex(index));
    }

    let i = index_scalar::<F>(index);
    let mut numerator = F::ONE;
    let mut denominator = F::ONE;

    for &other in indices {
        if other != index {
            let j = index_scalar::<F>(other);
            numerator *= j;
            denominator *= j - i;
        }
    }

    Option::<F>::from(denominator.invert())
        .map(|inverse| numerator * inverse)
        .ok_or_else(|| Error::Crypto("Lagrange denominator is not invertible".into()))
}

/// Recombine the secret from `(index, share)` pairs
pub fn combine<F: PrimeField>(shares: &[(u8, F)]) -> Result<F> {
    let indices: Vec<u8> = shares.iter().map(|(index, _)| *index).collect();
    let mut secret = F::ZERO;
    for (index, share) in shares {
        secret += lagrange_coefficient::<F>(*index, &indices)? * share;
    }
    Ok(secret)
}

/// Commit to polynomial coefficients
pub fn commit<G: Group>(coefficients: &[G::Scalar]) -> Vec<G> {
    coefficients
        .iter()
        .map(|coef| G::generator() * *coef)
        .collect()
}

/// Feldman check: `share * G == Σ commitments[k] * index^k`
pub fn verify_share<G: Group>(share: &G::Scalar, index: u8, commitments: &[G]) -> bool {
    let x = index_scalar::<G::Scalar>(index);
    let mut expected = G::identity();
    let mut x_power = <G::Scalar as Field>::ONE;

    for commitment in commitments {
        expected += *commitment * x_power;
        x_power *= x;
    }

    G::generator() * *share == expected
}

fn check_indices(indices: &[u8]) -> Result<()> {
    for (position, index) in indices.iter().enumerate() {
        if *index == 0 {
            return Err(Error::InvalidShareIndex(*index));
        }
        if indices[..position].contains(index) {
            return Err(Error::InvalidShareIndex(*index));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::{EdwardsPoint, Scalar};
    use rand::rngs::OsRng;

    #[test]
    fn test_split_and_combine() {
        let secret = Scalar::random(&mut OsRng);
        let shares = split(secret, 2, &[1, 2, 3], &mut OsRng).unwrap();

        for pair in [[0usize, 1], [0, 2], [1, 2]] {
            let subset: Vec<(u8, Scalar)> = pair
                .iter()
                .map(|&k| ((k + 1) as u8, shares[k]))
                .collect();
            assert_eq!(combine(&subset).unwrap(), secret);
        }
    }

    #[test]
    fn test_lagrange_sums_to_one() {
        let indices = [1u8, 3];
        let sum: Scalar = indices
            .iter()
            .map(|i| lagrange_coefficient::<Scalar>(*i, &indices).unwrap())
            .sum();
        assert_eq!(sum, Scalar::ONE);
    }

    #[test]
    fn test_rejects_bad_indices() {
        assert!(lagrange_coefficient::<Scalar>(2, &[1, 3]).is_err());
        assert!(lagrange_coefficient::<Scalar>(1, &[1, 1]).is_err());
        assert!(split(Scalar::ONE, 2, &[0, 1], &mut OsRng).is_err());
        assert!(split(Scalar::ONE, 3, &[1, 2], &mut OsRng).is_err());
    }

    #[test]
    fn test_feldman_verification() {
        let coefficients = vec![Scalar::random(&mut OsRng), Scalar::random(&mut OsRng)];
        let commitments = commit::<EdwardsPoint>(&coefficients);

        let share = evaluate_polynomial(&coefficients, 2);
        assert!(verify_share(&share, 2, &commitments));
        assert!(!verify_share(&share, 3, &commitments));
        assert!(!verify_share(&(share + Scalar::ONE), 2, &commitments));
    }
}
