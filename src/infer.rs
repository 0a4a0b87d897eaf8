// src/infer.rs

//! The closed tagged-variant cell representation and the type inferencer
//! that maps a column of [`CellValue`]s to a single [`SqlType`] from the
//! widening ladder.
//!
//! Every value that enters the chunk loader is converted into a
//! [`CellValue`] at the Row Source boundary. Nothing downstream ever
//! touches a library-specific cell type or an opaque dynamic value.

use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::fmt;

/// A single spreadsheet cell, normalized into one of a fixed set of kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
    Null,
}

/// The fixed ladder of SQL types the inferencer may assign to a column.
///
/// The ladder is a partial order, not a total one, so `derive(PartialOrd)`
/// on the enum can't express it directly; [`SqlType::join`] implements the
/// actual widening rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Date,
    Timestamp,
    Boolean,
    Text,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        };
        f.write_str(s)
    }
}

impl SqlType {
    /// The widening ladder, encoded as "permissible next step(s)".
    /// `TEXT` is terminal: nothing widens from it.
    fn widens_to(self) -> &'static [SqlType] {
        match self {
            SqlType::Integer => &[SqlType::BigInt, SqlType::Double, SqlType::Text],
            SqlType::BigInt => &[SqlType::Double, SqlType::Text],
            SqlType::Double => &[SqlType::Text],
            SqlType::Date => &[SqlType::Timestamp, SqlType::Text],
            SqlType::Timestamp => &[SqlType::Text],
            SqlType::Boolean => &[SqlType::Text],
            SqlType::Text => &[],
        }
    }

    /// True if `self` can widen to `other` along zero or more ladder steps
    /// (reflexive: a type is always "assignable" to itself).
    pub fn widens_into(self, other: SqlType) -> bool {
        if self == other {
            return true;
        }
        self.widens_to()
            .iter()
            .any(|&next| next == other || next.widens_into(other))
    }

    /// The join of two types along the widening ladder: the narrowest type
    /// both widen into. Any incompatible pairing joins to `TEXT`, since
    /// `TEXT` is reachable from every type in the ladder.
    ///
    /// This is the operation `reconcile` uses to decide whether a column
    /// needs to widen, and it never takes a lateral move: the result is
    /// always `self`, `other`, or a type strictly above both on the ladder.
    pub fn join(self, other: SqlType) -> SqlType {
        if self == other {
            return self;
        }
        if self.widens_into(other) {
            return other;
        }
        if other.widens_into(self) {
            return self;
        }
        SqlType::Text
    }

}

impl PartialOrd for SqlType {
    /// Comparable only along the ladder; types on unrelated branches (e.g.
    /// `Boolean` vs `Date`) are incomparable.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        if self.widens_into(*other) {
            return Some(Ordering::Less);
        }
        if other.widens_into(*self) {
            return Some(Ordering::Greater);
        }
        None
    }
}

/// Infer the [`SqlType`] of a column given every non-null value observed
/// across the chunk, in this rule order: all-null -> TEXT; all-bool ->
/// BOOLEAN; all-integer (narrowest fit) -> INTEGER/BIGINT; mixed numeric ->
/// DOUBLE PRECISION; all-date -> DATE; all-date-with-time -> TIMESTAMP;
/// otherwise -> TEXT.
pub fn infer_column_type(values: &[CellValue]) -> SqlType {
    let non_null: Vec<&CellValue> = values.iter().filter(|v| !matches!(v, CellValue::Null)).collect();

    if non_null.is_empty() {
        return SqlType::Text;
    }

    if non_null.iter().all(|v| matches!(v, CellValue::Bool(_))) {
        return SqlType::Boolean;
    }

    if non_null.iter().all(|v| matches!(v, CellValue::Int(_))) {
        let fits_i32 = non_null.iter().all(|v| match v {
            CellValue::Int(n) => i32::try_from(*n).is_ok(),
            _ => unreachable!(),
        });
        return if fits_i32 { SqlType::Integer } else { SqlType::BigInt };
    }

    if non_null
        .iter()
        .all(|v| matches!(v, CellValue::Int(_) | CellValue::Float(_)))
    {
        return SqlType::Double;
    }

    if non_null.iter().all(|v| matches!(v, CellValue::Date(_))) {
        return SqlType::Date;
    }

    if non_null
        .iter()
        .all(|v| matches!(v, CellValue::Date(_) | CellValue::DateTime(_)))
    {
        return SqlType::Timestamp;
    }

    SqlType::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_null_is_text() {
        let col = vec![CellValue::Null, CellValue::Null];
        assert_eq!(infer_column_type(&col), SqlType::Text);
    }

    #[test]
    fn mixed_integer_and_float_is_double() {
        let col = vec![CellValue::Int(1), CellValue::Float(2.5), CellValue::Int(3)];
        assert_eq!(infer_column_type(&col), SqlType::Double);
    }

    #[test]
    fn large_integers_are_bigint() {
        let col = vec![CellValue::Int(i64::from(i32::MAX) + 1)];
        assert_eq!(infer_column_type(&col), SqlType::BigInt);
    }

    #[test]
    fn mixed_integer_and_string_is_text() {
        let col = vec![CellValue::Int(1), CellValue::Text("N/A".into())];
        assert_eq!(infer_column_type(&col), SqlType::Text);
    }

    #[test]
    fn widening_ladder_never_regresses() {
        assert_eq!(SqlType::Integer.join(SqlType::BigInt), SqlType::BigInt);
        assert_eq!(SqlType::BigInt.join(SqlType::Integer), SqlType::BigInt);
        assert_eq!(SqlType::Integer.join(SqlType::Text), SqlType::Text);
        assert_eq!(SqlType::Date.join(SqlType::Timestamp), SqlType::Timestamp);
        assert_eq!(SqlType::Boolean.join(SqlType::Date), SqlType::Text);
        assert_eq!(SqlType::Text.join(SqlType::Integer), SqlType::Text);
    }

    #[test]
    fn join_is_commutative() {
        let types = [
            SqlType::Integer,
            SqlType::BigInt,
            SqlType::Double,
            SqlType::Date,
            SqlType::Timestamp,
            SqlType::Boolean,
            SqlType::Text,
        ];
        for &a in &types {
            for &b in &types {
                assert_eq!(a.join(b), b.join(a));
            }
        }
    }
}
