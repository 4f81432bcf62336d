//! Transform pipelines that turn raw register integers into physical values.
//!
//! A [`Pipeline`] is an ordered list of [`TransformStep`]s applied strictly
//! left to right. Steps are validated once when the pipeline is built, so a
//! degenerate step (zero scale, empty clamp range, oversized shift) can never
//! reach decode time.
//!
//! ## Value kinds
//!
//! - `Scale` always produces a float.
//! - `Minus` keeps integers integral when the offset is integral.
//! - `Bitmask`, `Shift`, `EnumMap` and `ExpandBits` need an integer input.
//! - `Abs` and `Clamp` preserve the input kind, except that an integer
//!   clamped into a range holding no integer becomes the float bound.
//!
//! # Example
//!
//! ```
//! use essblock::transform::{Pipeline, TransformStep};
//! use essblock::value::Value;
//!
//! let celsius = Pipeline::new([TransformStep::Scale(0.1), TransformStep::Minus(40.0)]).unwrap();
//! assert_eq!(celsius.apply(Value::Int(650)).unwrap(), Value::Float(25.0));
//! ```

use crate::{
    errors::{ConstructionError, DecodeError},
    primitive::EnumTable,
    value::Value,
};

/// A single pure operation on a decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    Abs,
    /// Multiply by a non-zero factor.
    Scale(f64),
    /// Subtract a constant bias.
    Minus(f64),
    /// Bitwise AND.
    Bitmask(u64),
    /// Positive shifts left, negative shifts right (arithmetic).
    Shift(i32),
    /// Saturate into `[min, max]`.
    Clamp { min: f64, max: f64 },
    EnumMap(EnumTable),
    /// Expand the low `n` bits into a list of booleans, bit 0 first.
    ExpandBits(u32),
}

impl TransformStep {
    fn validate(&self) -> Result<(), ConstructionError> {
        match self {
            TransformStep::Scale(f) if *f == 0.0 || !f.is_finite() => {
                Err(ConstructionError::InvalidScale(*f))
            }
            TransformStep::Minus(c) if !c.is_finite() => Err(ConstructionError::InvalidOffset(*c)),
            TransformStep::Clamp { min, max }
                if !min.is_finite() || !max.is_finite() || min >= max =>
            {
                Err(ConstructionError::InvalidClamp {
                    min: *min,
                    max: *max,
                })
            }
            TransformStep::Shift(n) if n.unsigned_abs() >= 64 => {
                Err(ConstructionError::InvalidShift(*n))
            }
            TransformStep::ExpandBits(n) if *n == 0 || *n > 64 => {
                Err(ConstructionError::InvalidBitListWidth(*n))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TransformStep::Abs => "abs",
            TransformStep::Scale(_) => "scale",
            TransformStep::Minus(_) => "minus",
            TransformStep::Bitmask(_) => "bitmask",
            TransformStep::Shift(_) => "shift",
            TransformStep::Clamp { .. } => "clamp",
            TransformStep::EnumMap(_) => "enum_map",
            TransformStep::ExpandBits(_) => "expand_bits",
        }
    }

    fn mismatch(&self, found: &Value) -> DecodeError {
        DecodeError::Transform {
            field: String::new(),
            step: self.name(),
            found: found.kind(),
        }
    }

    /// Applies this step to `value`.
    pub fn apply(&self, value: Value) -> Result<Value, DecodeError> {
        match (self, value) {
            (TransformStep::Abs, Value::Int(x)) => {
                Ok(Value::Int(x.checked_abs().unwrap_or(i64::MAX)))
            }
            (TransformStep::Abs, Value::Float(x)) => Ok(Value::Float(x.abs())),

            (TransformStep::Scale(f), Value::Int(x)) => Ok(Value::Float(x as f64 * f)),
            (TransformStep::Scale(f), Value::Float(x)) => Ok(Value::Float(x * f)),

            (TransformStep::Minus(c), Value::Int(x)) => Ok(integral(*c)
                .and_then(|c| x.checked_sub(c))
                .map_or(Value::Float(x as f64 - c), Value::Int)),
            (TransformStep::Minus(c), Value::Float(x)) => Ok(Value::Float(x - c)),

            (TransformStep::Bitmask(m), Value::Int(x)) => Ok(Value::Int(x & *m as i64)),

            (TransformStep::Shift(n), Value::Int(x)) => Ok(Value::Int(if *n >= 0 {
                x.wrapping_shl(*n as u32)
            } else {
                x >> n.unsigned_abs()
            })),

            (TransformStep::Clamp { min, max }, Value::Int(x)) => {
                let xf = x as f64;
                let (whole, edge) = if xf < *min {
                    (min.ceil(), *min)
                } else if xf > *max {
                    (max.floor(), *max)
                } else {
                    return Ok(Value::Int(x));
                };
                // no integer inside the range: saturate to the exact bound
                Ok(if whole >= *min && whole <= *max {
                    Value::Int(whole as i64)
                } else {
                    Value::Float(edge)
                })
            }
            (TransformStep::Clamp { min, max }, Value::Float(x)) => {
                Ok(Value::Float(x.clamp(*min, *max)))
            }

            (TransformStep::EnumMap(table), Value::Int(x)) => table.map(x),

            (TransformStep::ExpandBits(n), Value::Int(x)) => Ok(Value::List(
                (0..*n)
                    .map(|i| Value::Bool((x as u64 >> i) & 1 == 1))
                    .collect(),
            )),

            (step, other) => Err(step.mismatch(&other)),
        }
    }
}

fn integral(c: f64) -> Option<i64> {
    if c.fract() == 0.0 && c.abs() < i64::MAX as f64 {
        Some(c as i64)
    } else {
        None
    }
}

/// An ordered, validated sequence of [TransformStep]s.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    steps: Vec<TransformStep>,
}

impl Pipeline {
    /// Builds a pipeline, rejecting degenerate steps.
    pub fn new<I>(steps: I) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = TransformStep>,
    {
        let steps: Vec<TransformStep> = steps.into_iter().collect();
        for step in &steps {
            step.validate()?;
        }

        Ok(Pipeline { steps })
    }

    /// The empty pipeline: values pass through unchanged.
    pub fn identity() -> Self {
        Pipeline::default()
    }

    pub fn scale(factor: f64) -> Result<Self, ConstructionError> {
        Pipeline::new([TransformStep::Scale(factor)])
    }

    pub fn enum_map(table: EnumTable) -> Self {
        Pipeline {
            steps: vec![TransformStep::EnumMap(table)],
        }
    }

    /// Appends one step.
    pub fn with(mut self, step: TransformStep) -> Result<Self, ConstructionError> {
        step.validate()?;
        self.steps.push(step);
        Ok(self)
    }

    /// `self` followed by `next`, as one pipeline.
    pub fn then(&self, next: &Pipeline) -> Pipeline {
        let mut steps = Vec::with_capacity(self.steps.len() + next.steps.len());
        steps.extend(self.steps.iter().cloned());
        steps.extend(next.steps.iter().cloned());
        Pipeline { steps }
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in declaration order.
    pub fn apply(&self, value: Value) -> Result<Value, DecodeError> {
        self.steps.iter().try_fold(value, |v, step| step.apply(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scale_zero_rejected() {
        assert_eq!(
            Pipeline::scale(0.0).unwrap_err(),
            ConstructionError::InvalidScale(0.0)
        );
        assert!(Pipeline::scale(f64::NAN).is_err());
    }

    #[test]
    fn test_clamp_inverted_rejected() {
        let err = Pipeline::new([TransformStep::Clamp { min: 5.0, max: 5.0 }]).unwrap_err();
        assert_eq!(err, ConstructionError::InvalidClamp { min: 5.0, max: 5.0 });
    }

    #[test]
    fn test_shift_and_bit_list_bounds() {
        assert!(Pipeline::new([TransformStep::Shift(-64)]).is_err());
        assert!(Pipeline::new([TransformStep::Shift(63)]).is_ok());
        assert!(Pipeline::new([TransformStep::ExpandBits(0)]).is_err());
        assert!(Pipeline::identity().with(TransformStep::ExpandBits(65)).is_err());
    }

    #[test]
    fn test_scale_frequency() {
        let p = Pipeline::scale(0.1).unwrap();
        let hz = p.apply(Value::Int(500)).unwrap().as_f64().unwrap();
        assert!((hz - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_minus_keeps_integers() {
        let p = Pipeline::new([TransformStep::Minus(40.0)]).unwrap();
        assert_eq!(p.apply(Value::Int(65)).unwrap(), Value::Int(25));

        let p = Pipeline::new([TransformStep::Minus(0.5)]).unwrap();
        assert_eq!(p.apply(Value::Int(1)).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_bitwise_steps() {
        let p = Pipeline::new([TransformStep::Shift(-8), TransformStep::Bitmask(0x0F)]).unwrap();
        assert_eq!(p.apply(Value::Int(0x0A5F)).unwrap(), Value::Int(0x0A));

        let p = Pipeline::new([TransformStep::Shift(4)]).unwrap();
        assert_eq!(p.apply(Value::Int(0x3)).unwrap(), Value::Int(0x30));
    }

    #[test]
    fn test_abs_and_clamp() {
        let p = Pipeline::new([
            TransformStep::Abs,
            TransformStep::Clamp {
                min: 0.0,
                max: 100.0,
            },
        ])
        .unwrap();
        assert_eq!(p.apply(Value::Int(-250)).unwrap(), Value::Int(100));
        assert_eq!(p.apply(Value::Float(-12.5)).unwrap(), Value::Float(12.5));
    }

    #[test]
    fn test_clamp_int_without_integer_in_range() {
        let p = Pipeline::new([TransformStep::Clamp { min: 0.5, max: 0.7 }]).unwrap();
        assert_eq!(p.apply(Value::Int(0)).unwrap(), Value::Float(0.5));
        assert_eq!(p.apply(Value::Int(3)).unwrap(), Value::Float(0.7));

        let p = Pipeline::new([TransformStep::Clamp { min: 0.5, max: 9.5 }]).unwrap();
        assert_eq!(p.apply(Value::Int(0)).unwrap(), Value::Int(1));
        assert_eq!(p.apply(Value::Int(12)).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_enum_map_step() {
        let table = EnumTable::new([(1, "on"), (0, "off")]).unwrap();
        let p = Pipeline::enum_map(table.clone());
        assert_eq!(p.apply(Value::Int(1)).unwrap(), Value::Tag("on".to_string()));
        assert!(p.apply(Value::Int(2)).is_err());
        assert_eq!(
            Pipeline::enum_map(table.tolerant()).apply(Value::Int(2)).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_expand_bits() {
        let p = Pipeline::new([TransformStep::ExpandBits(4)]).unwrap();
        assert_eq!(
            p.apply(Value::Int(0b0101)).unwrap(),
            Value::List(vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true),
                Value::Bool(false),
            ])
        );
    }

    #[test]
    fn test_type_mismatch() {
        let p = Pipeline::new([TransformStep::Scale(2.0), TransformStep::Bitmask(1)]).unwrap();
        assert_eq!(
            p.apply(Value::Int(3)).unwrap_err(),
            DecodeError::Transform {
                field: String::new(),
                step: "bitmask",
                found: "float",
            }
        );
    }

    #[test]
    fn test_then_concatenates_in_order() {
        let a = Pipeline::scale(0.1).unwrap();
        let b = Pipeline::new([TransformStep::Minus(40.0)]).unwrap();
        let ab = a.then(&b);
        assert_eq!(ab.steps().len(), 2);
        assert_eq!(ab.steps()[0], TransformStep::Scale(0.1));
        assert!(Pipeline::identity().then(&Pipeline::identity()).is_identity());
    }

    fn arb_step() -> impl Strategy<Value = TransformStep> {
        prop_oneof![
            Just(TransformStep::Abs),
            (-1000i32..1000)
                .prop_filter("non-zero", |f| *f != 0)
                .prop_map(|f| TransformStep::Scale(f64::from(f) / 10.0)),
            (-500i32..500).prop_map(|c| TransformStep::Minus(f64::from(c))),
            any::<u16>().prop_map(|m| TransformStep::Bitmask(u64::from(m))),
            (-16i32..16).prop_map(TransformStep::Shift),
            (-1000i32..0, 1i32..1000).prop_map(|(lo, hi)| TransformStep::Clamp {
                min: f64::from(lo),
                max: f64::from(hi),
            }),
        ]
    }

    fn arb_pipeline() -> impl Strategy<Value = Pipeline> {
        prop::collection::vec(arb_step(), 0..5).prop_map(|steps| Pipeline::new(steps).unwrap())
    }

    proptest! {
        #[test]
        fn prop_apply_is_deterministic(p in arb_pipeline(), x in -100_000i64..100_000) {
            prop_assert_eq!(p.apply(Value::Int(x)), p.apply(Value::Int(x)));
        }

        #[test]
        fn prop_then_composes(a in arb_pipeline(), b in arb_pipeline(), x in -100_000i64..100_000) {
            let composed = a.then(&b).apply(Value::Int(x));
            let stepwise = a.apply(Value::Int(x)).and_then(|v| b.apply(v));
            prop_assert_eq!(composed, stepwise);
        }
    }
}
