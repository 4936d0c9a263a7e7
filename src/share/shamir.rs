//! Shamir secret sharing over the prime field `2^61 - 1`.
//!
//! A [`Value`] is flattened into field elements together with its [`Shape`]. Each element is
//! shared with an independent random polynomial of degree `threshold - 1`; the node with index
//! `i` receives the evaluations at `x = i + 1`. Because the scheme is linear, nodes can add
//! shares and combine them with public values (see [`ShamirShare`]) without interaction.
use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ReconstructionError, ShareError},
    msg::{self, EncodingError},
    share::{Share, ShareEngine, ShareSet},
    value::Value,
};

/// The field modulus, the Mersenne prime `2^61 - 1`.
pub const MODULUS: u64 = (1 << 61) - 1;

/// Largest magnitude of an [`Value::Int`] that can be shared.
pub const MAX_INT_MAGNITUDE: u64 = (MODULUS - 1) / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct Fp(u64);

impl Fp {
    const ZERO: Fp = Fp(0);
    const ONE: Fp = Fp(1);

    fn new(v: u64) -> Self {
        Fp(v % MODULUS)
    }

    fn add(self, rhs: Fp) -> Fp {
        // both operands are < 2^61, the sum fits into u64
        Fp::new(self.0 + rhs.0)
    }

    fn sub(self, rhs: Fp) -> Fp {
        Fp::new(self.0 + MODULUS - rhs.0)
    }

    fn mul(self, rhs: Fp) -> Fp {
        Fp(((self.0 as u128 * rhs.0 as u128) % MODULUS as u128) as u64)
    }

    fn pow(self, mut exp: u64) -> Fp {
        let mut base = self;
        let mut acc = Fp::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(base);
            }
            base = base.mul(base);
            exp >>= 1;
        }
        acc
    }

    /// Multiplicative inverse, `self` must not be zero.
    fn inv(self) -> Fp {
        self.pow(MODULUS - 2)
    }

    /// Map an integer into the field, returns the integer back if it is out of range.
    fn from_i64(v: i64) -> Result<Fp, i64> {
        if v.unsigned_abs() > MAX_INT_MAGNITUDE {
            return Err(v);
        }
        if v >= 0 {
            Ok(Fp(v as u64))
        } else {
            Ok(Fp(MODULUS - v.unsigned_abs()))
        }
    }

    fn to_i64(self) -> i64 {
        if self.0 <= MAX_INT_MAGNITUDE {
            self.0 as i64
        } else {
            -((MODULUS - self.0) as i64)
        }
    }
}

/// Lists in a shared [`Value`] may be nested at most this many levels deep.
pub const MAX_SHAPE_DEPTH: usize = 32;

/// Type and arity of a shared [`Value`].
///
/// Partial results can only be combined if they agree on their shape. Shapes are encoded as a
/// flat pre-order list of nodes and are rebuilt without recursion, nested at most
/// [`MAX_SHAPE_DEPTH`] levels deep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FlatShape", try_from = "FlatShape")]
pub enum Shape {
    /// A [`Value::Bool`], one element.
    Bool,
    /// A [`Value::Int`], one element.
    Int,
    /// A [`Value::Bytes`] of the given length, one element per byte.
    Bytes(usize),
    /// A [`Value::Str`] of the given length in bytes, one element per byte.
    Str(usize),
    /// A [`Value::List`] of the given element shapes.
    List(Vec<Shape>),
}

impl Shape {
    /// The shape of `value`.
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::Bool(_) => Shape::Bool,
            Value::Int(_) => Shape::Int,
            Value::Bytes(b) => Shape::Bytes(b.len()),
            Value::Str(s) => Shape::Str(s.len()),
            Value::List(values) => Shape::List(values.iter().map(Shape::of).collect()),
        }
    }

    /// Number of field elements of a value with this shape.
    pub fn len(&self) -> usize {
        match self {
            Shape::Bool | Shape::Int => 1,
            Shape::Bytes(len) | Shape::Str(len) => *len,
            Shape::List(shapes) => shapes
                .iter()
                .fold(0, |acc: usize, shape| acc.saturating_add(shape.len())),
        }
    }

    /// Whether a value of this shape has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nesting depth of lists, `0` for scalars.
    pub fn depth(&self) -> usize {
        match self {
            Shape::List(shapes) => 1 + shapes.iter().map(Shape::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum ShapeNode {
    Bool,
    Int,
    Bytes(usize),
    Str(usize),
    /// A list, followed by its elements.
    List(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct FlatShape(Vec<ShapeNode>);

/// A flat shape does not describe exactly one [`Shape`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum ShapeDecodeError {
    /// Lists are nested deeper than [`MAX_SHAPE_DEPTH`].
    #[error("shape is nested too deeply")]
    TooDeep,
    /// A list has fewer elements than it declares.
    #[error("shape ends inside of a list")]
    Truncated,
    /// Nodes follow the complete shape.
    #[error("shape is followed by trailing nodes")]
    Trailing,
}

impl From<Shape> for FlatShape {
    fn from(shape: Shape) -> Self {
        let mut nodes = Vec::new();
        let mut pending = vec![shape];
        while let Some(shape) = pending.pop() {
            nodes.push(match shape {
                Shape::Bool => ShapeNode::Bool,
                Shape::Int => ShapeNode::Int,
                Shape::Bytes(len) => ShapeNode::Bytes(len),
                Shape::Str(len) => ShapeNode::Str(len),
                Shape::List(shapes) => {
                    let len = shapes.len();
                    pending.extend(shapes.into_iter().rev());
                    ShapeNode::List(len)
                }
            });
        }
        FlatShape(nodes)
    }
}

impl TryFrom<FlatShape> for Shape {
    type Error = ShapeDecodeError;

    fn try_from(flat: FlatShape) -> Result<Self, Self::Error> {
        // lists that are still missing elements, with the number of missing elements
        let mut open: Vec<(Vec<Shape>, usize)> = Vec::new();
        let mut nodes = flat.0.into_iter();
        'nodes: loop {
            let mut complete = match nodes.next().ok_or(ShapeDecodeError::Truncated)? {
                ShapeNode::Bool => Shape::Bool,
                ShapeNode::Int => Shape::Int,
                ShapeNode::Bytes(len) => Shape::Bytes(len),
                ShapeNode::Str(len) => Shape::Str(len),
                ShapeNode::List(0) => Shape::List(Vec::new()),
                ShapeNode::List(len) => {
                    if open.len() >= MAX_SHAPE_DEPTH {
                        return Err(ShapeDecodeError::TooDeep);
                    }
                    open.push((Vec::new(), len));
                    continue;
                }
            };
            while let Some((mut elements, missing)) = open.pop() {
                elements.push(complete);
                if missing > 1 {
                    open.push((elements, missing - 1));
                    continue 'nodes;
                }
                complete = Shape::List(elements);
            }
            return match nodes.next() {
                None => Ok(complete),
                Some(_) => Err(ShapeDecodeError::Trailing),
            };
        }
    }
}

fn flatten(value: &Value, out: &mut Vec<Fp>) -> Result<(), i64> {
    match value {
        Value::Bool(b) => out.push(Fp(*b as u64)),
        Value::Int(i) => out.push(Fp::from_i64(*i)?),
        Value::Bytes(bytes) => out.extend(bytes.iter().map(|b| Fp(*b as u64))),
        Value::Str(s) => out.extend(s.bytes().map(|b| Fp(b as u64))),
        Value::List(values) => {
            for v in values {
                flatten(v, out)?;
            }
        }
    }
    Ok(())
}

fn next_element(elements: &mut impl Iterator<Item = Fp>) -> Result<Fp, ReconstructionError> {
    elements.next().ok_or_else(|| ReconstructionError::Inconsistent {
        reason: "too few elements for shape".to_string(),
    })
}

fn next_bytes(
    len: usize,
    elements: &mut impl Iterator<Item = Fp>,
) -> Result<Vec<u8>, ReconstructionError> {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        let el = next_element(elements)?;
        let byte = u8::try_from(el.0).map_err(|_| ReconstructionError::Inconsistent {
            reason: "reconstructed byte is larger than 255".to_string(),
        })?;
        bytes.push(byte);
    }
    Ok(bytes)
}

fn unflatten(
    shape: &Shape,
    elements: &mut impl Iterator<Item = Fp>,
) -> Result<Value, ReconstructionError> {
    match shape {
        Shape::Bool => match next_element(elements)? {
            Fp::ZERO => Ok(Value::Bool(false)),
            Fp::ONE => Ok(Value::Bool(true)),
            _ => Err(ReconstructionError::Inconsistent {
                reason: "reconstructed boolean is neither 0 nor 1".to_string(),
            }),
        },
        Shape::Int => Ok(Value::Int(next_element(elements)?.to_i64())),
        Shape::Bytes(len) => next_bytes(*len, elements).map(Value::Bytes),
        Shape::Str(len) => String::from_utf8(next_bytes(*len, elements)?)
            .map(Value::Str)
            .map_err(|_| ReconstructionError::Inconsistent {
                reason: "reconstructed string is not valid UTF-8".to_string(),
            }),
        Shape::List(shapes) => shapes
            .iter()
            .map(|shape| unflatten(shape, elements))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
    }
}

/// Errors of the linear operations on a [`ShamirShare`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShareOpError {
    /// The shares belong to different nodes.
    #[error("shares of node {left} and node {right} cannot be combined")]
    IndexMismatch {
        /// Node index of the left operand.
        left: usize,
        /// Node index of the right operand.
        right: usize,
    },
    /// The operands have different shapes.
    #[error("operands have different shapes: {left:?} and {right:?}")]
    ShapeMismatch {
        /// Shape of the left operand.
        left: Shape,
        /// Shape of the right operand.
        right: Shape,
    },
    /// A public integer is outside of the field's integer range.
    #[error("integer {value} is outside of the shareable range")]
    ValueOutOfRange {
        /// The offending integer.
        value: i64,
    },
}

/// A decoded share of the [`ShamirShareEngine`].
///
/// Node implementations use this to compute on their shares: the sum of two shares is a share
/// of the sum of the secrets, and so on for public additions and multiplications.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirShare {
    x: u64,
    shape: Shape,
    elements: Vec<Fp>,
}

/// A payload could not be decoded into a [`ShamirShare`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ShareDecodeError {
    /// The bytes are not a share.
    #[error("payload is not a share")]
    Encoding(#[from] EncodingError),
    /// The share's elements do not match its shape.
    #[error("share has {actual} elements but its shape requires {expected}")]
    LengthMismatch {
        /// Elements required by the shape.
        expected: usize,
        /// Elements in the share.
        actual: usize,
    },
    /// An element is not a field element.
    #[error("share contains an element outside of the field")]
    OutOfField,
    /// The evaluation point does not belong to any node.
    #[error("share has invalid evaluation point 0")]
    InvalidPoint,
}

impl ShamirShare {
    /// Decode and validate a share payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShareDecodeError> {
        let share: ShamirShare = msg::from_bytes(bytes)?;
        if share.x == 0 {
            return Err(ShareDecodeError::InvalidPoint);
        }
        if share.elements.len() != share.shape.len() {
            return Err(ShareDecodeError::LengthMismatch {
                expected: share.shape.len(),
                actual: share.elements.len(),
            });
        }
        if share.elements.iter().any(|el| el.0 >= MODULUS) {
            return Err(ShareDecodeError::OutOfField);
        }
        Ok(share)
    }

    /// Encode the share as an opaque payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        msg::to_bytes(self)
    }

    /// Index of the node this share belongs to.
    pub fn node_index(&self) -> usize {
        (self.x - 1) as usize
    }

    /// The shape of the shared value.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// A share of the sum of both secrets.
    pub fn add(&self, other: &ShamirShare) -> Result<ShamirShare, ShareOpError> {
        if self.x != other.x {
            return Err(ShareOpError::IndexMismatch {
                left: self.node_index(),
                right: other.node_index(),
            });
        }
        self.check_shape(&other.shape)?;
        Ok(self.zip_with(&other.elements, Fp::add))
    }

    /// A share of the secret plus the public `value`, which must have the same shape.
    pub fn add_public(&self, value: &Value) -> Result<ShamirShare, ShareOpError> {
        self.check_shape(&Shape::of(value))?;
        let mut elements = Vec::with_capacity(self.elements.len());
        flatten(value, &mut elements).map_err(|value| ShareOpError::ValueOutOfRange { value })?;
        Ok(self.zip_with(&elements, Fp::add))
    }

    /// A share of the secret multiplied with the public `scalar`.
    pub fn mul_public(&self, scalar: i64) -> Result<ShamirShare, ShareOpError> {
        let scalar = Fp::from_i64(scalar).map_err(|value| ShareOpError::ValueOutOfRange { value })?;
        Ok(ShamirShare {
            x: self.x,
            shape: self.shape.clone(),
            elements: self.elements.iter().map(|el| el.mul(scalar)).collect(),
        })
    }

    fn check_shape(&self, other: &Shape) -> Result<(), ShareOpError> {
        if &self.shape != other {
            return Err(ShareOpError::ShapeMismatch {
                left: self.shape.clone(),
                right: other.clone(),
            });
        }
        Ok(())
    }

    fn zip_with(&self, other: &[Fp], op: impl Fn(Fp, Fp) -> Fp) -> ShamirShare {
        ShamirShare {
            x: self.x,
            shape: self.shape.clone(),
            elements: self
                .elements
                .iter()
                .zip(other)
                .map(|(a, b)| op(*a, *b))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ShamirShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShamirShare")
            .field("node_index", &self.node_index())
            .field("shape", &self.shape)
            .field("elements", &"<REDACTED>")
            .finish()
    }
}

/// The default [`ShareEngine`], Shamir secret sharing over `2^61 - 1`.
pub struct ShamirShareEngine {
    rng: Mutex<ChaCha20Rng>,
}

impl ShamirShareEngine {
    /// An engine seeded from the thread-local random number generator.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_rng(&mut rand::rng())),
        }
    }

    /// A deterministic engine, only useful for tests and benchmarks.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl Default for ShamirShareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareEngine for ShamirShareEngine {
    fn share(&self, value: &Value, n: usize, threshold: usize) -> Result<ShareSet, ShareError> {
        if n == 0 || threshold == 0 || threshold > n || n as u64 >= MODULUS {
            return Err(ShareError::InvalidParameters { n, threshold });
        }
        let shape = Shape::of(value);
        if shape.depth() > MAX_SHAPE_DEPTH {
            return Err(ShareError::TooDeep {
                max: MAX_SHAPE_DEPTH,
            });
        }
        let mut secrets = Vec::with_capacity(shape.len());
        flatten(value, &mut secrets).map_err(|value| ShareError::ValueOutOfRange { value })?;

        let mut elements = vec![Vec::with_capacity(secrets.len()); n];
        {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            for secret in secrets {
                // coefficients a_1..a_{t-1}, a_0 is the secret
                let coeffs: Vec<Fp> = (1..threshold)
                    .map(|_| Fp(rng.random_range(0..MODULUS)))
                    .collect();
                for (i, node_elements) in elements.iter_mut().enumerate() {
                    let x = Fp::new(i as u64 + 1);
                    // Horner's method
                    let mut y = Fp::ZERO;
                    for c in coeffs.iter().rev() {
                        y = y.add(*c).mul(x);
                    }
                    node_elements.push(y.add(secret));
                }
            }
        }

        let shares = elements
            .into_iter()
            .enumerate()
            .map(|(i, elements)| {
                ShamirShare {
                    x: i as u64 + 1,
                    shape: shape.clone(),
                    elements,
                }
                .to_bytes()
                .map(Share::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ShareSet::new(shares))
    }

    fn reconstruct(
        &self,
        partials: &[(usize, &[u8])],
        threshold: usize,
    ) -> Result<Value, ReconstructionError> {
        if threshold == 0 || partials.len() < threshold {
            return Err(ReconstructionError::NotEnoughPartials {
                got: partials.len(),
                threshold,
            });
        }
        let mut shares = Vec::with_capacity(partials.len());
        for (index, payload) in partials {
            let share =
                ShamirShare::from_bytes(payload).map_err(|err| ReconstructionError::Malformed {
                    index: *index,
                    reason: err.to_string(),
                })?;
            if share.node_index() != *index {
                return Err(ReconstructionError::Malformed {
                    index: *index,
                    reason: format!("share belongs to node {}", share.node_index()),
                });
            }
            shares.push(share);
        }
        shares.sort_by_key(|s| s.x);
        if shares.windows(2).any(|w| w[0].x == w[1].x) {
            return Err(ReconstructionError::Inconsistent {
                reason: "more than one partial for the same node".to_string(),
            });
        }
        let shape = shares[0].shape.clone();
        if let Some(other) = shares.iter().find(|s| s.shape != shape) {
            return Err(ReconstructionError::Inconsistent {
                reason: format!(
                    "node {} returned shape {:?} but node {} returned {:?}",
                    shares[0].node_index(),
                    shape,
                    other.node_index(),
                    other.shape
                ),
            });
        }

        let (basis, extra) = shares.split_at(threshold);
        let xs: Vec<Fp> = basis.iter().map(|s| Fp::new(s.x)).collect();
        let at_zero = lagrange_coefficients(&xs, Fp::ZERO);
        let secrets: Vec<Fp> = (0..shape.len())
            .map(|el| interpolate(basis, &at_zero, el))
            .collect();

        // every additional partial has to lie on the same polynomials
        for share in extra {
            let coeffs = lagrange_coefficients(&xs, Fp::new(share.x));
            for (el, actual) in share.elements.iter().enumerate() {
                if interpolate(basis, &coeffs, el) != *actual {
                    return Err(ReconstructionError::Inconsistent {
                        reason: format!(
                            "partial of node {} does not agree with the others",
                            share.node_index()
                        ),
                    });
                }
            }
        }

        unflatten(&shape, &mut secrets.into_iter())
    }
}

/// Lagrange basis polynomials for the points `xs`, evaluated at `at`.
fn lagrange_coefficients(xs: &[Fp], at: Fp) -> Vec<Fp> {
    xs.iter()
        .enumerate()
        .map(|(j, xj)| {
            let mut num = Fp::ONE;
            let mut den = Fp::ONE;
            for (m, xm) in xs.iter().enumerate() {
                if m != j {
                    num = num.mul(at.sub(*xm));
                    den = den.mul(xj.sub(*xm));
                }
            }
            num.mul(den.inv())
        })
        .collect()
}

fn interpolate(shares: &[ShamirShare], coeffs: &[Fp], element: usize) -> Fp {
    shares
        .iter()
        .zip(coeffs)
        .fold(Fp::ZERO, |acc, (s, c)| acc.add(s.elements[element].mul(*c)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn partials(shares: &ShareSet, indices: &[usize]) -> Vec<(usize, Vec<u8>)> {
        indices
            .iter()
            .map(|i| (*i, shares.get(*i).unwrap().as_bytes().to_vec()))
            .collect()
    }

    fn borrowed(partials: &[(usize, Vec<u8>)]) -> Vec<(usize, &[u8])> {
        partials.iter().map(|(i, p)| (*i, p.as_slice())).collect()
    }

    fn subsets(n: usize, min: usize) -> Vec<Vec<usize>> {
        (0u32..(1 << n))
            .map(|mask| (0..n).filter(|i| mask & (1 << i) != 0).collect::<Vec<_>>())
            .filter(|s| s.len() >= min)
            .collect()
    }

    fn arbitrary_value() -> impl Strategy<Value = Value> {
        let magnitude = MAX_INT_MAGNITUDE as i64;
        let leaf = prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            (-magnitude..=magnitude).prop_map(Value::Int),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            "[a-zäöü ]{0,6}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(2, 12, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Value::List)
        })
    }

    proptest! {
        #[test]
        fn reconstruct_from_every_quorum(value in arbitrary_value(), n in 1usize..6, t_offset in 0usize..5) {
            let t = 1 + t_offset % n;
            let engine = ShamirShareEngine::seeded(7);
            let shares = engine.share(&value, n, t).unwrap();
            prop_assert_eq!(shares.len(), n);
            for subset in subsets(n, t) {
                let partials = partials(&shares, &subset);
                let reconstructed = engine.reconstruct(&borrowed(&partials), t).unwrap();
                prop_assert_eq!(&reconstructed, &value);
            }
        }
    }

    #[test]
    fn too_few_partials() {
        let engine = ShamirShareEngine::seeded(1);
        let shares = engine.share(&Value::Int(42), 3, 2).unwrap();
        let partials = partials(&shares, &[1]);
        assert_eq!(
            engine.reconstruct(&borrowed(&partials), 2),
            Err(ReconstructionError::NotEnoughPartials {
                got: 1,
                threshold: 2
            })
        );
    }

    #[test]
    fn shares_are_randomized() {
        let engine = ShamirShareEngine::seeded(3);
        let a = engine.share(&Value::Int(42), 3, 2).unwrap();
        let b = engine.share(&Value::Int(42), 3, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn negative_and_out_of_range_integers() {
        let engine = ShamirShareEngine::seeded(2);
        let min = -(MAX_INT_MAGNITUDE as i64);
        let shares = engine.share(&Value::Int(min), 2, 2).unwrap();
        let partials = partials(&shares, &[0, 1]);
        assert_eq!(
            engine.reconstruct(&borrowed(&partials), 2),
            Ok(Value::Int(min))
        );
        assert!(matches!(
            engine.share(&Value::Int(i64::MIN), 2, 2),
            Err(ShareError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            engine.share(&Value::Int(1), 2, 3),
            Err(ShareError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn shape_mismatch_is_inconsistent() {
        let engine = ShamirShareEngine::seeded(4);
        let ints = engine.share(&Value::Int(25), 3, 2).unwrap();
        let bools = engine.share(&Value::Bool(true), 3, 2).unwrap();
        let partials = vec![
            (0, ints.get(0).unwrap().as_bytes().to_vec()),
            (1, bools.get(1).unwrap().as_bytes().to_vec()),
        ];
        assert!(matches!(
            engine.reconstruct(&borrowed(&partials), 2),
            Err(ReconstructionError::Inconsistent { .. })
        ));
    }

    #[test]
    fn extra_partial_off_the_polynomial_is_inconsistent() {
        let engine = ShamirShareEngine::seeded(5);
        let honest = engine.share(&Value::Int(42), 3, 2).unwrap();
        let other = engine.share(&Value::Int(41), 3, 2).unwrap();
        let partials = vec![
            (0, honest.get(0).unwrap().as_bytes().to_vec()),
            (1, honest.get(1).unwrap().as_bytes().to_vec()),
            (2, other.get(2).unwrap().as_bytes().to_vec()),
        ];
        assert!(matches!(
            engine.reconstruct(&borrowed(&partials), 2),
            Err(ReconstructionError::Inconsistent { .. })
        ));
    }

    #[test]
    fn garbage_and_misplaced_partials_are_malformed() {
        let engine = ShamirShareEngine::seeded(6);
        let shares = engine.share(&Value::Int(1), 3, 2).unwrap();
        let good = shares.get(0).unwrap().as_bytes().to_vec();
        let garbage = vec![(0, good.clone()), (1, vec![1, 2, 3])];
        assert!(matches!(
            engine.reconstruct(&borrowed(&garbage), 2),
            Err(ReconstructionError::Malformed { index: 1, .. })
        ));
        // node 1 reporting the share of node 0
        let misplaced = vec![(0, good.clone()), (1, good)];
        assert!(matches!(
            engine.reconstruct(&borrowed(&misplaced), 2),
            Err(ReconstructionError::Malformed { index: 1, .. })
        ));
    }

    fn nested(depth: usize) -> Value {
        (0..depth).fold(Value::Int(7), |inner, _| Value::List(vec![inner]))
    }

    #[test]
    fn deeply_nested_partials_are_malformed() {
        let engine = ShamirShareEngine::seeded(9);
        // x = 1 followed by 20 000 repetitions of a one-element list
        let mut payload = 1u64.to_le_bytes().to_vec();
        for _ in 0..20_000 {
            payload.extend(3u32.to_le_bytes());
            payload.extend(1u64.to_le_bytes());
        }
        assert!(matches!(
            engine.reconstruct(&[(0, payload.as_slice())], 1),
            Err(ReconstructionError::Malformed { index: 0, .. })
        ));

        // the same nesting in the shape encoding of a valid share
        let mut payload = 1u64.to_le_bytes().to_vec();
        payload.extend(20_001u64.to_le_bytes());
        for _ in 0..20_000 {
            payload.extend(4u32.to_le_bytes());
            payload.extend(1u64.to_le_bytes());
        }
        payload.extend(1u32.to_le_bytes());
        payload.extend(1u64.to_le_bytes());
        payload.extend(7u64.to_le_bytes());
        assert!(matches!(
            engine.reconstruct(&[(0, payload.as_slice())], 1),
            Err(ReconstructionError::Malformed { index: 0, .. })
        ));
    }

    #[test]
    fn nesting_up_to_the_maximum_depth() {
        let engine = ShamirShareEngine::seeded(10);
        let deepest = nested(MAX_SHAPE_DEPTH);
        let shares = engine.share(&deepest, 2, 2).unwrap();
        let partials = partials(&shares, &[0, 1]);
        assert_eq!(engine.reconstruct(&borrowed(&partials), 2), Ok(deepest));
        assert!(matches!(
            engine.share(&nested(MAX_SHAPE_DEPTH + 1), 2, 2),
            Err(ShareError::TooDeep { max: MAX_SHAPE_DEPTH })
        ));
    }

    #[test]
    fn huge_element_counts_are_malformed() {
        let engine = ShamirShareEngine::seeded(11);
        let shares = engine.share(&Value::Int(1), 2, 1).unwrap();
        let mut payload = shares.get(0).unwrap().as_bytes().to_vec();
        // an Int share ends with one element and its length prefix before it
        let len_at = payload.len() - 16;
        assert_eq!(payload[len_at..len_at + 8], 1u64.to_le_bytes());
        for declared in [u64::MAX, 1 << 40] {
            payload[len_at..len_at + 8].copy_from_slice(&declared.to_le_bytes());
            assert!(matches!(
                engine.reconstruct(&[(0, payload.as_slice())], 1),
                Err(ReconstructionError::Malformed { index: 0, .. })
            ));
        }

        // a shape declaring more bytes than any payload could hold
        let mut payload = 1u64.to_le_bytes().to_vec();
        payload.extend(1u64.to_le_bytes());
        payload.extend(2u32.to_le_bytes());
        payload.extend(u64::MAX.to_le_bytes());
        payload.extend(0u64.to_le_bytes());
        assert!(matches!(
            engine.reconstruct(&[(0, payload.as_slice())], 1),
            Err(ReconstructionError::Malformed { index: 0, .. })
        ));
    }

    #[test]
    fn strings_are_shared_as_bytes() {
        let engine = ShamirShareEngine::seeded(12);
        let value = Value::List(vec![Value::Str("grüße".into()), Value::Int(3)]);
        let shares = engine.share(&value, 3, 2).unwrap();
        let share = ShamirShare::from_bytes(shares.get(2).unwrap().as_bytes()).unwrap();
        assert_eq!(
            share.shape(),
            &Shape::List(vec![Shape::Str("grüße".len()), Shape::Int])
        );
        let partials = partials(&shares, &[0, 2]);
        assert_eq!(engine.reconstruct(&borrowed(&partials), 2), Ok(value));

        // bytes that are not UTF-8 do not reconstruct into a string
        let bytes = engine.share(&Value::Bytes(vec![0xff, 0xfe]), 2, 2).unwrap();
        let as_str: Vec<(usize, Vec<u8>)> = (0..2)
            .map(|i| {
                let share = ShamirShare::from_bytes(bytes.get(i).unwrap().as_bytes()).unwrap();
                let share = ShamirShare {
                    shape: Shape::Str(2),
                    ..share
                };
                (i, share.to_bytes().unwrap())
            })
            .collect();
        assert!(matches!(
            engine.reconstruct(&borrowed(&as_str), 2),
            Err(ReconstructionError::Inconsistent { .. })
        ));
    }

    #[test]
    fn flat_shapes_must_describe_one_shape() {
        let shape = Shape::List(vec![
            Shape::Bool,
            Shape::List(vec![]),
            Shape::List(vec![Shape::Bytes(2), Shape::Str(1)]),
        ]);
        let FlatShape(nodes) = FlatShape::from(shape.clone());
        assert_eq!(nodes.len(), 6);
        assert_eq!(Shape::try_from(FlatShape(nodes)), Ok(shape));

        let truncated = FlatShape(vec![ShapeNode::List(2), ShapeNode::Int]);
        assert_eq!(
            Shape::try_from(truncated),
            Err(ShapeDecodeError::Truncated)
        );
        let trailing = FlatShape(vec![ShapeNode::Int, ShapeNode::Int]);
        assert_eq!(Shape::try_from(trailing), Err(ShapeDecodeError::Trailing));
        let too_deep = FlatShape(
            std::iter::repeat_with(|| ShapeNode::List(1))
                .take(MAX_SHAPE_DEPTH + 1)
                .chain([ShapeNode::Int])
                .collect(),
        );
        assert_eq!(Shape::try_from(too_deep), Err(ShapeDecodeError::TooDeep));
    }

    #[test]
    fn linear_operations() {
        let engine = ShamirShareEngine::seeded(8);
        let a = engine.share(&Value::Int(25), 3, 2).unwrap();
        let b = engine.share(&Value::Int(17), 3, 2).unwrap();
        let sums: Vec<(usize, Vec<u8>)> = (0..3)
            .map(|i| {
                let a = ShamirShare::from_bytes(a.get(i).unwrap().as_bytes()).unwrap();
                let b = ShamirShare::from_bytes(b.get(i).unwrap().as_bytes()).unwrap();
                let sum = a
                    .add(&b)
                    .unwrap()
                    .mul_public(2)
                    .unwrap()
                    .add_public(&Value::Int(-50))
                    .unwrap();
                (i, sum.to_bytes().unwrap())
            })
            .collect();
        assert_eq!(
            engine.reconstruct(&borrowed(&sums[1..]), 2),
            Ok(Value::Int(34))
        );

        let s0 = ShamirShare::from_bytes(a.get(0).unwrap().as_bytes()).unwrap();
        let s1 = ShamirShare::from_bytes(a.get(1).unwrap().as_bytes()).unwrap();
        assert_eq!(
            s0.add(&s1),
            Err(ShareOpError::IndexMismatch { left: 0, right: 1 })
        );
        assert!(matches!(
            s0.add_public(&Value::Bool(true)),
            Err(ShareOpError::ShapeMismatch { .. })
        ));
    }
}
