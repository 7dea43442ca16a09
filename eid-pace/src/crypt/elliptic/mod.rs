//! Elliptic-curve arithmetic over prime fields.
//!
//! Points are handled in homogeneous projective coordinates in Montgomery form internally and only
//! converted back to affine coordinates at the edges.


pub mod curves;


use std::fmt;
use std::ops::{Add, Mul};

use crypto_bigint::BoxedUint;
use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, CtOption};
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{limb_precision, uint_from_be_slice, uint_to_be_bytes, CryptoError};


/// A point in affine coordinates.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub struct AffinePoint {
    x: BoxedUint,
    y: BoxedUint,
}
impl AffinePoint {
    pub const fn new(x: BoxedUint, y: BoxedUint) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> &BoxedUint { &self.x }
    pub fn y(&self) -> &BoxedUint { &self.y }

    /// Serializes the point as `0x04 || x || y`, each coordinate left-padded to the given width.
    pub fn to_be_bytes(&self, bytes_per_component: usize) -> Zeroizing<Vec<u8>> {
        let mut ret = Zeroizing::new(Vec::with_capacity(1 + 2*bytes_per_component));
        ret.push(0x04); // uncompressed coordinates
        ret.extend(uint_to_be_bytes(&self.x, bytes_per_component).iter());
        ret.extend(uint_to_be_bytes(&self.y, bytes_per_component).iter());
        ret
    }
}


/// A point in projective coordinates in Montgomery form.
#[derive(Clone, Debug)]
struct MontyProjectivePoint {
    x: BoxedMontyForm,
    y: BoxedMontyForm,
    z: BoxedMontyForm,
}


/// Curve parameters in Montgomery form, shared by every point on the curve.
#[derive(Clone, Debug)]
struct MontyKnowledge {
    params: BoxedMontyParams,
    a: BoxedMontyForm,
    b: BoxedMontyForm,
    b3: BoxedMontyForm,
}
impl MontyKnowledge {
    fn new(prime: &BoxedUint, a: &BoxedUint, b: &BoxedUint) -> Option<Self> {
        let odd_prime = Option::from(prime.to_odd())?;
        let params = BoxedMontyParams::new(odd_prime);
        let a = BoxedMontyForm::new(a.clone(), params.clone());
        let b = BoxedMontyForm::new(b.clone(), params.clone());
        let b3 = (&b).add(&b).add(&b);
        Some(Self { params, a, b, b3 })
    }

    fn projective(&self, point: &AffinePoint) -> MontyProjectivePoint {
        MontyProjectivePoint {
            x: BoxedMontyForm::new(point.x.clone(), self.params.clone()),
            y: BoxedMontyForm::new(point.y.clone(), self.params.clone()),
            z: BoxedMontyForm::one(self.params.clone()),
        }
    }

    /// Converts back to affine coordinates; fails for the point at infinity.
    fn affine(&self, point: &MontyProjectivePoint) -> CtOption<AffinePoint> {
        let inverse_option = point.z.invert();
        let is_finite = inverse_option.is_some();
        let inverse = Option::from(inverse_option)
            .unwrap_or_else(|| BoxedMontyForm::one(self.params.clone()));

        let x = (&point.x).mul(&inverse).retrieve();
        let y = (&point.y).mul(&inverse).retrieve();
        CtOption::new(AffinePoint { x, y }, is_finite)
    }

    fn infinity(&self) -> MontyProjectivePoint {
        MontyProjectivePoint {
            x: BoxedMontyForm::zero(self.params.clone()),
            y: BoxedMontyForm::one(self.params.clone()),
            z: BoxedMontyForm::zero(self.params.clone()),
        }
    }

    fn is_on_curve(&self, point: &MontyProjectivePoint) -> Choice {
        let inverse_option = point.z.invert();
        let is_finite = inverse_option.is_some();
        let inverse = Option::from(inverse_option)
            .unwrap_or_else(|| point.z.clone());

        let x = (&point.x).mul(&inverse);
        let y = (&point.y).mul(&inverse);

        // y² = x³ + ax + b
        let lhs = (&y).mul(&y);
        let rhs = (&x).mul(&x).mul(&x)
            .add(&(&x).mul(&self.a))
            .add(&self.b);
        let are_equal = lhs.retrieve().ct_eq(&rhs.retrieve());
        Choice::conditional_select(&Choice::from(0), &are_equal, is_finite)
    }

    /// Point doubling using Algorithm 3 of Renes/Costello/Batina 2015
    /// (<https://eprint.iacr.org/2015/1060>).
    fn double(&self, point: &MontyProjectivePoint) -> MontyProjectivePoint {
        let (a, b3) = (&self.a, &self.b3);
        let (x, y, z) = (&point.x, &point.y, &point.z);

        let mut t0 = x.mul(x);
        let t1 = y.mul(y);
        let mut t2 = z.mul(z);
        let mut t3 = x.mul(y);
        t3 = (&t3).add(&t3);
        let mut z3 = x.mul(z);
        z3 = (&z3).add(&z3);
        let mut x3 = a.mul(&z3);
        let mut y3 = b3.mul(&t2);
        y3 = (&x3).add(&y3);
        x3 = (&t1).sub(&y3);
        y3 = (&t1).add(&y3);
        y3 = (&x3).mul(&y3);
        x3 = (&t3).mul(&x3);
        z3 = b3.mul(&z3);
        t2 = a.mul(&t2);
        t3 = (&t0).sub(&t2);
        t3 = a.mul(&t3);
        t3 = (&t3).add(&z3);
        z3 = (&t0).add(&t0);
        t0 = (&z3).add(&t0);
        t0 = (&t0).add(&t2);
        t0 = (&t0).mul(&t3);
        y3 = (&y3).add(&t0);
        t2 = y.mul(z);
        t2 = (&t2).add(&t2);
        t0 = (&t2).mul(&t3);
        x3 = (&x3).sub(&t0);
        z3 = (&t2).mul(&t1);
        z3 = (&z3).add(&z3);
        z3 = (&z3).add(&z3);
        MontyProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Complete point addition using Algorithm 1 of Renes/Costello/Batina 2015.
    fn add(&self, lhs: &MontyProjectivePoint, rhs: &MontyProjectivePoint) -> MontyProjectivePoint {
        let (a, b3) = (&self.a, &self.b3);

        let mut t0 = (&lhs.x).mul(&rhs.x);
        let mut t1 = (&lhs.y).mul(&rhs.y);
        let mut t2 = (&lhs.z).mul(&rhs.z);
        let mut t3 = (&lhs.x).add(&lhs.y);
        let mut t4 = (&rhs.x).add(&rhs.y);
        t3 = (&t3).mul(&t4);
        t4 = (&t0).add(&t1);
        t3 = (&t3).sub(&t4);
        t4 = (&lhs.x).add(&lhs.z);
        let mut t5 = (&rhs.x).add(&rhs.z);
        t4 = (&t4).mul(&t5);
        t5 = (&t0).add(&t2);
        t4 = (&t4).sub(&t5);
        t5 = (&lhs.y).add(&lhs.z);
        let mut x3 = (&rhs.y).add(&rhs.z);
        t5 = (&t5).mul(&x3);
        x3 = (&t1).add(&t2);
        t5 = (&t5).sub(&x3);
        let mut z3 = a.mul(&t4);
        x3 = b3.mul(&t2);
        z3 = (&x3).add(&z3);
        x3 = (&t1).sub(&z3);
        z3 = (&t1).add(&z3);
        let mut y3 = (&x3).mul(&z3);
        t1 = (&t0).add(&t0);
        t1 = (&t1).add(&t0);
        t2 = a.mul(&t2);
        t4 = b3.mul(&t4);
        t1 = (&t1).add(&t2);
        t2 = (&t0).sub(&t2);
        t2 = a.mul(&t2);
        t4 = (&t4).add(&t2);
        t0 = (&t1).mul(&t4);
        y3 = (&y3).add(&t0);
        t0 = (&t5).mul(&t4);
        x3 = (&t3).mul(&x3);
        x3 = (&x3).sub(&t0);
        t0 = (&t3).mul(&t1);
        z3 = (&t5).mul(&z3);
        z3 = (&z3).add(&t0);
        MontyProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Double-and-add over every bit of the scalar.
    fn multiply(&self, scalar: &BoxedUint, point: &MontyProjectivePoint) -> MontyProjectivePoint {
        let mut result = self.infinity();
        let mut addend = point.clone();
        for i in 0..scalar.bits() {
            let sum = self.add(&result, &addend);
            if bool::from(scalar.bit(i)) {
                result = sum;
            }
            addend = self.double(&addend);
        }
        result
    }
}


/// An elliptic curve of the form `y² ≡ x³ + ax + b` modulo a prime number.
///
/// All coordinates and coefficients are kept at the limb-aligned precision of the prime.
#[derive(Clone)]
pub struct PrimeWeierstrassCurve {
    prime: BoxedUint,
    coefficient_a: BoxedUint,
    coefficient_b: BoxedUint,
    generator: AffinePoint,
    cofactor: u8,
    monty: MontyKnowledge,
}
impl PrimeWeierstrassCurve {
    /// Assembles a curve, returning `None` if the prime is even or the generator is not on the
    /// curve.
    pub fn new(
        prime: BoxedUint,
        coefficient_a: BoxedUint,
        coefficient_b: BoxedUint,
        generator: AffinePoint,
        cofactor: u8,
    ) -> Option<Self> {
        let precision = limb_precision(prime.bits());
        let resize = |value: &BoxedUint| uint_from_be_slice(&value.to_be_bytes(), precision);

        let prime = resize(&prime)?;
        let coefficient_a = resize(&coefficient_a)?;
        let coefficient_b = resize(&coefficient_b)?;
        let generator = AffinePoint::new(resize(&generator.x)?, resize(&generator.y)?);
        let monty = MontyKnowledge::new(&prime, &coefficient_a, &coefficient_b)?;

        let curve = Self {
            prime,
            coefficient_a,
            coefficient_b,
            generator,
            cofactor,
            monty,
        };
        if !bool::from(curve.is_on_curve_affine(&curve.generator)) {
            return None;
        }
        Some(curve)
    }

    /// Assembles a curve from big-endian byte strings.
    pub fn from_be_slices(
        prime: &[u8],
        coefficient_a: &[u8],
        coefficient_b: &[u8],
        generator_x: &[u8],
        generator_y: &[u8],
        cofactor: u8,
    ) -> Option<Self> {
        let precision = limb_precision(u32::try_from(8 * prime.len()).ok()?);
        Self::new(
            uint_from_be_slice(prime, precision)?,
            uint_from_be_slice(coefficient_a, precision)?,
            uint_from_be_slice(coefficient_b, precision)?,
            AffinePoint::new(
                uint_from_be_slice(generator_x, precision)?,
                uint_from_be_slice(generator_y, precision)?,
            ),
            cofactor,
        )
    }

    pub fn prime(&self) -> &BoxedUint { &self.prime }
    pub fn coefficient_a(&self) -> &BoxedUint { &self.coefficient_a }
    pub fn coefficient_b(&self) -> &BoxedUint { &self.coefficient_b }
    pub fn generator(&self) -> &AffinePoint { &self.generator }
    pub fn cofactor(&self) -> u8 { self.cofactor }

    /// The number of bytes of a field element; also the length of a private key.
    pub fn field_size_bytes(&self) -> usize {
        self.prime.bits().div_ceil(8) as usize
    }

    fn precision(&self) -> u32 {
        self.prime.bits_precision()
    }

    /// Serializes a point in the uncompressed representation with fixed-width coordinates.
    pub fn encode_point(&self, point: &AffinePoint) -> Zeroizing<Vec<u8>> {
        point.to_be_bytes(self.field_size_bytes())
    }

    /// Parses an uncompressed point and checks that it lies on this curve.
    pub fn decode_point(&self, bytes: &[u8]) -> Result<AffinePoint, CryptoError> {
        let field_size = self.field_size_bytes();
        if bytes.len() != 1 + 2*field_size || bytes[0] != 0x04 {
            return Err(CryptoError::InvalidPoint);
        }
        let x = uint_from_be_slice(&bytes[1..1+field_size], self.precision())
            .ok_or(CryptoError::InvalidPoint)?;
        let y = uint_from_be_slice(&bytes[1+field_size..], self.precision())
            .ok_or(CryptoError::InvalidPoint)?;
        if x >= self.prime || y >= self.prime {
            return Err(CryptoError::InvalidPoint);
        }
        let point = AffinePoint::new(x, y);
        if !bool::from(self.is_on_curve_affine(&point)) {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(point)
    }

    pub fn is_on_curve_affine(&self, point: &AffinePoint) -> Choice {
        let projective = self.monty.projective(point);
        self.monty.is_on_curve(&projective)
    }

    fn affine_result(&self, point: &MontyProjectivePoint) -> Result<AffinePoint, CryptoError> {
        Option::from(self.monty.affine(point))
            .ok_or(CryptoError::PointAtInfinity)
    }

    /// Calculates a public key (`private_key × generator`) from a private key.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> Result<AffinePoint, CryptoError> {
        if bool::from(private_key.is_zero()) {
            return Err(CryptoError::InvalidScalar);
        }
        let generator = self.monty.projective(&self.generator);
        let product = self.monty.multiply(private_key, &generator);
        self.affine_result(&product)
    }

    /// Multiplies the other party's public point with our private key.
    pub fn diffie_hellman(&self, private_key: &BoxedUint, other_public_key: &AffinePoint) -> Result<AffinePoint, CryptoError> {
        let other_public = self.monty.projective(other_public_key);
        if !bool::from(self.monty.is_on_curve(&other_public)) {
            return Err(CryptoError::InvalidPoint);
        }
        let product = self.monty.multiply(private_key, &other_public);
        self.affine_result(&product)
    }

    /// Derives the curve used for the second key agreement of Generic Mapping.
    ///
    /// The new generator is `nonce × generator + shared_point`.
    pub fn derive_generic_mapping_session_curve(&self, nonce: &BoxedUint, shared_point: &AffinePoint) -> Result<Self, CryptoError> {
        let generator = self.monty.projective(&self.generator);
        let shared = self.monty.projective(shared_point);
        if !bool::from(self.monty.is_on_curve(&shared)) {
            return Err(CryptoError::InvalidPoint);
        }

        let product = self.monty.multiply(nonce, &generator);
        let sum = self.monty.add(&product, &shared);
        let new_generator = self.affine_result(&sum)?;

        Ok(Self {
            prime: self.prime.clone(),
            coefficient_a: self.coefficient_a.clone(),
            coefficient_b: self.coefficient_b.clone(),
            generator: new_generator,
            cofactor: self.cofactor,
            monty: self.monty.clone(),
        })
    }
}
impl PartialEq for PrimeWeierstrassCurve {
    fn eq(&self, other: &Self) -> bool {
        self.prime == other.prime
            && self.coefficient_a == other.coefficient_a
            && self.coefficient_b == other.coefficient_b
            && self.generator == other.generator
            && self.cofactor == other.cofactor
    }
}
impl Eq for PrimeWeierstrassCurve {}
impl fmt::Debug for PrimeWeierstrassCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimeWeierstrassCurve")
            .field("prime", &self.prime)
            .field("coefficient_a", &self.coefficient_a)
            .field("coefficient_b", &self.coefficient_b)
            .field("generator", &self.generator)
            .field("cofactor", &self.cofactor)
            .finish()
    }
}
