//! Schema tags and the implicit-casting lattice.

use std::fmt;
use std::sync::OnceLock;

use kdata_common::{Result, error::Error};

/// A primitive or special schema tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    Int32 = 0,
    Int64 = 1,
    Float32 = 2,
    Float64 = 3,
    Boolean = 4,
    Mask = 5,
    Bytes = 6,
    Text = 7,
    Expr = 8,
    ItemId = 9,
    Schema = 10,
    /// Dynamic per-item schema stored alongside every object.
    Object = 11,
    /// Untyped data; disables schema checks.
    Any = 12,
    /// The schema of data where every item is missing.
    None = 13,
}

impl DType {
    pub const COUNT: usize = 14;

    pub const ALL: [DType; DType::COUNT] = [
        DType::Int32,
        DType::Int64,
        DType::Float32,
        DType::Float64,
        DType::Boolean,
        DType::Mask,
        DType::Bytes,
        DType::Text,
        DType::Expr,
        DType::ItemId,
        DType::Schema,
        DType::Object,
        DType::Any,
        DType::None,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns `true` for tags whose items are plain values (numbers, text, masks…).
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            DType::Int32
                | DType::Int64
                | DType::Float32
                | DType::Float64
                | DType::Boolean
                | DType::Mask
                | DType::Bytes
                | DType::Text
                | DType::Expr
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DType::Int32 | DType::Int64 | DType::Float32 | DType::Float64
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Int32 => "INT32",
            DType::Int64 => "INT64",
            DType::Float32 => "FLOAT32",
            DType::Float64 => "FLOAT64",
            DType::Boolean => "BOOLEAN",
            DType::Mask => "MASK",
            DType::Bytes => "BYTES",
            DType::Text => "TEXT",
            DType::Expr => "EXPR",
            DType::ItemId => "ITEMID",
            DType::Schema => "SCHEMA",
            DType::Object => "OBJECT",
            DType::Any => "ANY",
            DType::None => "NONE",
        }
    }

    pub fn from_name(name: &str) -> Option<DType> {
        DType::ALL.into_iter().find(|d| d.name() == name)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The dtype promotion lattice used by implicit casting.
///
/// The lattice is given as an adjacency list (each dtype with its directly greater
/// dtypes); the least-upper-bound of every pair is precomputed from its transitive
/// closure. A pair without a unique least upper bound has no common dtype.
#[derive(Debug, Clone)]
pub struct CastingPolicy {
    reachable: [[bool; DType::COUNT]; DType::COUNT],
    common: [[Option<DType>; DType::COUNT]; DType::COUNT],
}

impl CastingPolicy {
    /// Builds a policy from `(dtype, directly greater dtypes)` pairs.
    pub fn from_lattice(lattice: &[(DType, &[DType])]) -> Result<CastingPolicy> {
        let mut reachable = [[false; DType::COUNT]; DType::COUNT];
        for (i, row) in reachable.iter_mut().enumerate() {
            row[i] = true;
        }
        for (from, greater) in lattice {
            for to in greater.iter() {
                reachable[from.index()][to.index()] = true;
            }
        }
        // Floyd-Warshall closure.
        for k in 0..DType::COUNT {
            for i in 0..DType::COUNT {
                if reachable[i][k] {
                    for j in 0..DType::COUNT {
                        if reachable[k][j] {
                            reachable[i][j] = true;
                        }
                    }
                }
            }
        }

        let mut common = [[None; DType::COUNT]; DType::COUNT];
        for a in 0..DType::COUNT {
            for b in 0..DType::COUNT {
                let upper: Vec<usize> = (0..DType::COUNT)
                    .filter(|&c| reachable[a][c] && reachable[b][c])
                    .collect();
                if upper.is_empty() {
                    continue;
                }
                let least = upper
                    .iter()
                    .copied()
                    .find(|&c| upper.iter().all(|&u| reachable[c][u]));
                match least {
                    Some(c) => common[a][b] = Some(DType::ALL[c]),
                    None => {
                        return Err(Error::invalid_arg(
                            "lattice",
                            format!(
                                "{} and {} do not have a unique upper bound",
                                DType::ALL[a],
                                DType::ALL[b]
                            ),
                        ));
                    }
                }
            }
        }
        Ok(CastingPolicy { reachable, common })
    }

    /// The standard lattice:
    ///
    /// ```text
    /// NONE -> ITEMID, SCHEMA, INT32, MASK, BOOLEAN, BYTES, TEXT, EXPR
    /// INT32 -> INT64 -> FLOAT32 -> FLOAT64 -> OBJECT
    /// MASK, BOOLEAN, BYTES, TEXT, EXPR -> OBJECT
    /// OBJECT -> ANY
    /// ```
    pub fn standard() -> &'static CastingPolicy {
        static STANDARD: OnceLock<CastingPolicy> = OnceLock::new();
        STANDARD.get_or_init(|| {
            use DType::*;
            CastingPolicy::from_lattice(&[
                (
                    None,
                    &[ItemId, Schema, Int32, Mask, Boolean, Bytes, Text, Expr],
                ),
                (Int32, &[Int64]),
                (Int64, &[Float32]),
                (Float32, &[Float64]),
                (Float64, &[Object]),
                (Mask, &[Object]),
                (Boolean, &[Object]),
                (Bytes, &[Object]),
                (Text, &[Object]),
                (Expr, &[Object]),
                (Object, &[Any]),
            ])
            .unwrap_or_else(|e| panic!("malformed standard lattice: {e}"))
        })
    }

    /// Returns the least common dtype of `a` and `b`, if one exists.
    #[inline]
    pub fn common_dtype(&self, a: DType, b: DType) -> Option<DType> {
        self.common[a.index()][b.index()]
    }

    /// Returns `true` if `from` implicitly casts to `to`.
    #[inline]
    pub fn can_cast_implicitly(&self, from: DType, to: DType) -> bool {
        self.reachable[from.index()][to.index()]
    }
}

impl Default for CastingPolicy {
    fn default() -> Self {
        CastingPolicy::standard().clone()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DType::Int32, DType::Float32, Some(DType::Float32))]
    #[case(DType::Int32, DType::Int64, Some(DType::Int64))]
    #[case(DType::Int64, DType::Float64, Some(DType::Float64))]
    #[case(DType::Text, DType::Bytes, Some(DType::Object))]
    #[case(DType::Text, DType::Int32, Some(DType::Object))]
    #[case(DType::Any, DType::Float64, Some(DType::Any))]
    #[case(DType::None, DType::Text, Some(DType::Text))]
    #[case(DType::None, DType::None, Some(DType::None))]
    #[case(DType::ItemId, DType::Int32, None)]
    #[case(DType::Schema, DType::Object, None)]
    #[case(DType::Schema, DType::ItemId, None)]
    fn test_common_dtype(#[case] a: DType, #[case] b: DType, #[case] expected: Option<DType>) {
        let policy = CastingPolicy::standard();
        assert_eq!(policy.common_dtype(a, b), expected);
        assert_eq!(policy.common_dtype(b, a), expected);
    }

    #[test]
    fn test_implicit_reachability() {
        let policy = CastingPolicy::standard();
        assert!(policy.can_cast_implicitly(DType::Int32, DType::Float64));
        assert!(policy.can_cast_implicitly(DType::Mask, DType::Any));
        assert!(!policy.can_cast_implicitly(DType::Float32, DType::Int32));
        assert!(!policy.can_cast_implicitly(DType::Object, DType::Int32));
    }

    #[test]
    fn test_custom_lattice() {
        let policy =
            CastingPolicy::from_lattice(&[(DType::Int32, &[DType::Float64])]).unwrap();
        assert_eq!(
            policy.common_dtype(DType::Int32, DType::Float64),
            Some(DType::Float64)
        );
        assert_eq!(policy.common_dtype(DType::Int32, DType::Text), None);
    }

    #[test]
    fn test_malformed_lattice() {
        let err = CastingPolicy::from_lattice(&[
            (DType::Int32, &[DType::Text, DType::Bytes]),
            (DType::Int64, &[DType::Text, DType::Bytes]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unique upper bound"));
    }

    #[test]
    fn test_names_round_trip() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_name(dtype.name()), Some(dtype));
        }
    }
}
