//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use num_bigint::BigUint;
use num_bigint::RandBigInt;
use num_integer::Integer;
use num_traits::One;
use num_traits::Zero;

/// Odd primes below 256, used to reject most candidates before Miller-Rabin
const SMALL_PRIMES: [u32; 53] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Miller-Rabin rounds, error probability at most 4^-40
const MILLER_RABIN_ROUNDS: usize = 40;

/// Candidates tried per bit of the requested size before giving up
const ATTEMPTS_PER_BIT: u64 = 64;

/// Probabilistic primality test
pub fn is_probable_prime(candidate: &BigUint) -> bool {
    let two = BigUint::from(2_u32);
    if candidate < &two {
        return false;
    }
    if candidate == &two {
        return true;
    }

    for p in SMALL_PRIMES.iter() {
        let p = BigUint::from(*p);
        if candidate == &p {
            return true;
        }
        if (candidate % &p).is_zero() {
            return false;
        }
    }
    if candidate.is_even() {
        return false;
    }

    // candidate - 1 = d * 2^s
    let n_1 = candidate - BigUint::one();
    let s = n_1.trailing_zeros().unwrap_or(0);
    let d = &n_1 >> s;

    let mut rng = rand::thread_rng();
    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_1);
        let mut x = a.modpow(&d, candidate);
        if x.is_one() || x == n_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, candidate);
            if x == n_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Samples a random prime of exactly `bit_size` bits.
///
/// The two most significant bits are forced so that the product of two such
/// primes has exactly `2 * bit_size` bits. Returns `None` when no prime was
/// found within the attempt budget.
pub fn sample_prime(bit_size: u64) -> Option<BigUint> {
    if bit_size < 8 {
        return None;
    }
    let mut rng = rand::thread_rng();
    let top = (BigUint::one() << (bit_size - 1)) | (BigUint::one() << (bit_size - 2));

    for _ in 0..bit_size.saturating_mul(ATTEMPTS_PER_BIT) {
        let candidate = rng.gen_biguint(bit_size) | &top | BigUint::one();
        if is_probable_prime(&candidate) {
            return Some(candidate);
        }
    }
    None
}
