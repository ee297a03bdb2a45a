//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::fmt::Error;
use std::fmt::Formatter;

use num_bigint::BigInt;
use num_bigint::BigUint;
use num_bigint::RandBigInt;
use num_integer::Integer;
use num_traits::identities::Zero;
use num_traits::One;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::prime::sample_prime;

/// Smallest modulus size accepted by key generation
pub const MIN_KEY_BITS: u64 = 256;

/// Distinct primes drawn before key generation gives up
const MAX_PRIME_DRAWS: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("plaintext does not fit the message space")]
    PlaintextOutOfRange,
}

/// Paillier public key, `g` is fixed to `n + 1`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub n: BigUint,
    pub nn: BigUint,
}

impl PublicKey {
    pub fn new(n: BigUint) -> PublicKey {
        let nn = &n * &n;
        PublicKey { n, nn }
    }

    /// Bit length of the modulus
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Largest magnitude that survives the signed interpretation of `decrypt_signed`
    pub fn half_n(&self) -> BigUint {
        &self.n >> 1_u32
    }
}

/// CRT form of the Paillier private key. Not `Clone`: it is owned by one key holder.
pub struct PrivateKey {
    p: BigUint,
    q: BigUint,
    p_1: BigUint,
    q_1: BigUint,
    pp: BigUint,
    qq: BigUint,
    // p^-1 mod q
    p_inv: BigUint,
    h_p: BigUint,
    h_q: BigUint,
    n: BigUint,
    nn: BigUint,
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "Paillier private key ({} bits)", self.n.bits())
    }
}

/// A ciphertext in `Z*_{n^2}`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ciphertext(BigUint);

impl Ciphertext {
    pub fn from_raw(raw: BigUint) -> Ciphertext {
        Ciphertext(raw)
    }

    pub fn raw(&self) -> &BigUint {
        &self.0
    }
}

fn l(x: &BigUint, n: &BigUint) -> BigUint {
    (x - BigUint::one()) / n
}

fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let m = BigInt::from(modulus.clone());
    let egcd = BigInt::from(a.clone()).extended_gcd(&m);
    if !egcd.gcd.is_one() {
        return None;
    }
    egcd.x.mod_floor(&m).to_biguint()
}

impl PrivateKey {
    fn new(p: BigUint, q: BigUint) -> Result<PrivateKey, CryptoError> {
        let n = &p * &q;
        let nn = &n * &n;
        let pp = &p * &p;
        let qq = &q * &q;
        let p_1 = &p - BigUint::one();
        let q_1 = &q - BigUint::one();
        let g = &n + BigUint::one();

        let missing = |what: &str| CryptoError::KeyGeneration(format!("no inverse for {}", what));
        let p_inv = mod_inverse(&p, &q).ok_or_else(|| missing("p mod q"))?;
        let h_p = mod_inverse(&l(&g.modpow(&p_1, &pp), &p), &p).ok_or_else(|| missing("h_p"))?;
        let h_q = mod_inverse(&l(&g.modpow(&q_1, &qq), &q), &q).ok_or_else(|| missing("h_q"))?;

        Ok(PrivateKey {
            p,
            q,
            p_1,
            q_1,
            pp,
            qq,
            p_inv,
            h_p,
            h_q,
            n,
            nn,
        })
    }
}

/// Generates a key pair whose modulus has exactly `bit_length` bits
pub fn generate_keypair(bit_length: u64) -> Result<(PublicKey, PrivateKey), CryptoError> {
    if bit_length < MIN_KEY_BITS {
        return Err(CryptoError::KeyGeneration(format!(
            "modulus of {} bits is below the minimum of {} bits",
            bit_length, MIN_KEY_BITS
        )));
    }
    if bit_length % 2 != 0 {
        return Err(CryptoError::KeyGeneration(format!(
            "modulus size must be even, got {} bits",
            bit_length
        )));
    }

    let draw = || {
        sample_prime(bit_length / 2).ok_or_else(|| {
            CryptoError::KeyGeneration(format!("unable to find a {} bit prime", bit_length / 2))
        })
    };

    let p = draw()?;
    let mut q = draw()?;
    let mut draws = 1;
    while q == p {
        if draws >= MAX_PRIME_DRAWS {
            return Err(CryptoError::KeyGeneration(
                "unable to draw two distinct primes".to_string(),
            ));
        }
        q = draw()?;
        draws += 1;
    }

    let n = &p * &q;
    let phi = (&p - BigUint::one()) * (&q - BigUint::one());
    if n.bits() != bit_length || !n.gcd(&phi).is_one() {
        return Err(CryptoError::KeyGeneration(
            "sampled primes do not form a valid modulus".to_string(),
        ));
    }

    let private = PrivateKey::new(p, q)?;
    Ok((PublicKey::new(n), private))
}

fn random_r_n(key: &PublicKey) -> BigUint {
    let mut rng = rand::thread_rng();
    // Random sample from [1, n)
    let r = rng.gen_biguint_range(&BigUint::one(), &key.n);
    r.modpow(&key.n, &key.nn)
}

/// Randomised encryption of `msg < n`
pub fn encrypt(key: &PublicKey, msg: &BigUint) -> Result<Ciphertext, CryptoError> {
    if msg >= &key.n {
        return Err(CryptoError::PlaintextOutOfRange);
    }
    // For us g = n + 1. Hence g^m is (n + 1)^m mod n^2 which is (1 + m * n)
    let g_m = BigUint::one() + msg * &key.n;
    Ok(Ciphertext((g_m * random_r_n(key)) % &key.nn))
}

pub fn encrypt_u64(key: &PublicKey, msg: u64) -> Result<Ciphertext, CryptoError> {
    encrypt(key, &BigUint::from(msg))
}

/// Encrypts a vector of counts in parallel
pub fn encrypt_many(key: &PublicKey, msgs: &[u64]) -> Result<Vec<Ciphertext>, CryptoError> {
    msgs.par_iter()
        .map(|m| encrypt_u64(key, *m))
        .collect::<Result<Vec<Ciphertext>, CryptoError>>()
}

/// Algorithm from section 7 of Paillier's paper, combined via CRT
pub fn decrypt(key: &PrivateKey, cipher: &Ciphertext) -> Result<BigUint, CryptoError> {
    let c = &cipher.0;
    if c.is_zero() || c >= &key.nn {
        return Err(CryptoError::Decryption(format!(
            "ciphertext of {} bits is outside Z_n^2 for a {} bit key",
            c.bits(),
            key.n.bits()
        )));
    }
    if !c.gcd(&key.n).is_one() {
        return Err(CryptoError::Decryption(
            "ciphertext is not a unit modulo n".to_string(),
        ));
    }

    let m_p = (l(&c.modpow(&key.p_1, &key.pp), &key.p) * &key.h_p) % &key.p;
    let m_q = (l(&c.modpow(&key.q_1, &key.qq), &key.q) * &key.h_q) % &key.q;

    let diff = (&m_q + &key.q - (&m_p % &key.q)) % &key.q;
    let t = (diff * &key.p_inv) % &key.q;
    Ok(m_p + t * &key.p)
}

/// Decrypts and maps the upper half of `Z_n` to negative numbers
pub fn decrypt_signed(key: &PrivateKey, cipher: &Ciphertext) -> Result<BigInt, CryptoError> {
    let m = decrypt(key, cipher)?;
    if m > (&key.n >> 1_u32) {
        Ok(BigInt::from(m) - BigInt::from(key.n.clone()))
    } else {
        Ok(BigInt::from(m))
    }
}

/// Enc(a) * Enc(b) = Enc(a + b)
pub fn add(key: &PublicKey, lhs: &Ciphertext, rhs: &Ciphertext) -> Ciphertext {
    Ciphertext((&lhs.0 * &rhs.0) % &key.nn)
}

/// Enc(a) * g^m = Enc(a + m)
pub fn add_plain(key: &PublicKey, cipher: &Ciphertext, msg: &BigUint) -> Ciphertext {
    let g_m = BigUint::one() + (msg % &key.n) * &key.n;
    Ciphertext((&cipher.0 * g_m) % &key.nn)
}

/// Enc(a - m mod n)
pub fn sub_plain(key: &PublicKey, cipher: &Ciphertext, msg: &BigUint) -> Ciphertext {
    let neg = (&key.n - (msg % &key.n)) % &key.n;
    add_plain(key, cipher, &neg)
}

/// Enc(a)^k = Enc(k * a)
pub fn scalar_mul(key: &PublicKey, cipher: &Ciphertext, scalar: &BigUint) -> Ciphertext {
    Ciphertext(cipher.0.modpow(&(scalar % &key.n), &key.nn))
}

/// Enc(-a mod n)
pub fn negate(key: &PublicKey, cipher: &Ciphertext) -> Ciphertext {
    scalar_mul(key, cipher, &(&key.n - BigUint::one()))
}

/// Enc(a - b mod n)
pub fn sub(key: &PublicKey, lhs: &Ciphertext, rhs: &Ciphertext) -> Ciphertext {
    add(key, lhs, &negate(key, rhs))
}

/// Multiplies by a fresh encryption of zero
pub fn rerandomize(key: &PublicKey, cipher: &Ciphertext) -> Ciphertext {
    Ciphertext((&cipher.0 * random_r_n(key)) % &key.nn)
}

/// Homomorphic sum of all ciphertexts, `Enc(0)` for an empty slice
pub fn sum(key: &PublicKey, ciphers: &[Ciphertext]) -> Ciphertext {
    ciphers
        .iter()
        .fold(Ciphertext(BigUint::one()), |acc, c| add(key, &acc, c))
}

/// Key material of the key holder. The private half never leaves this struct.
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    pub fn generate(bit_length: u64) -> Result<KeyPair, CryptoError> {
        let (public, private) = generate_keypair(bit_length)?;
        Ok(KeyPair { public, private })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn decrypt(&self, cipher: &Ciphertext) -> Result<BigUint, CryptoError> {
        decrypt(&self.private, cipher)
    }

    pub fn decrypt_signed(&self, cipher: &Ciphertext) -> Result<BigInt, CryptoError> {
        decrypt_signed(&self.private, cipher)
    }

    pub fn decrypt_many(&self, ciphers: &[Ciphertext]) -> Result<Vec<BigUint>, CryptoError> {
        ciphers
            .par_iter()
            .map(|c| decrypt(&self.private, c))
            .collect::<Result<Vec<BigUint>, CryptoError>>()
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "Paillier key pair ({} bits)", self.public.bits())
    }
}
