//! Operator semantics for `Variant`
//!
//! Arithmetic always coerces both operands through `to_number` and
//! produces a number. Concatenation coerces through `to_string`.
//! Bitwise operators truncate to 32-bit integers first.

use super::Variant;
use std::ops::{Add, Div, Mul, Neg, Not, Rem, Sub};

impl Add for &Variant {
    type Output = Variant;

    fn add(self, rhs: &Variant) -> Variant {
        Variant::from_number(self.to_number() + rhs.to_number())
    }
}

impl Sub for &Variant {
    type Output = Variant;

    fn sub(self, rhs: &Variant) -> Variant {
        Variant::from_number(self.to_number() - rhs.to_number())
    }
}

impl Mul for &Variant {
    type Output = Variant;

    fn mul(self, rhs: &Variant) -> Variant {
        Variant::from_number(self.to_number() * rhs.to_number())
    }
}

impl Div for &Variant {
    type Output = Variant;

    fn div(self, rhs: &Variant) -> Variant {
        Variant::from_number(self.to_number() / rhs.to_number())
    }
}

impl Rem for &Variant {
    type Output = Variant;

    fn rem(self, rhs: &Variant) -> Variant {
        Variant::from_number(self.to_number() % rhs.to_number())
    }
}

impl Neg for &Variant {
    type Output = Variant;

    /// Negating `Null` or `Default` keeps the sentinel.
    fn neg(self) -> Variant {
        if self.is_null() || self.is_default() {
            self.clone()
        } else {
            Variant::from_number(-self.to_number())
        }
    }
}

impl Not for &Variant {
    type Output = Variant;

    /// Logical not over the boolean coercion.
    fn not(self) -> Variant {
        Variant::from_boolean(!self.to_boolean())
    }
}

fn to_i32(value: &Variant) -> i32 {
    value.to_number() as i32
}

impl Variant {
    /// String concatenation: the `&` operator of the language. This is
    /// not bitwise AND.
    pub fn concat(&self, other: &Variant) -> Variant {
        Variant::from_string(format!("{self}{other}"))
    }

    /// The mathematical power operator (`^` in the language).
    pub fn pow(&self, other: &Variant) -> Variant {
        Variant::from_number(self.to_number().powf(other.to_number()))
    }

    pub fn bitwise_and(&self, other: &Variant) -> Variant {
        Variant::from_number((to_i32(self) & to_i32(other)) as f64)
    }

    pub fn bitwise_or(&self, other: &Variant) -> Variant {
        Variant::from_number((to_i32(self) | to_i32(other)) as f64)
    }

    pub fn bitwise_xor(&self, other: &Variant) -> Variant {
        Variant::from_number((to_i32(self) ^ to_i32(other)) as f64)
    }

    pub fn bitwise_not(&self) -> Variant {
        Variant::from_number(!to_i32(self) as f64)
    }

    /// Shift left; a negative amount shifts in the opposite direction.
    pub fn shift_left(&self, amount: &Variant) -> Variant {
        let offs = amount.to_number() as i64;
        if offs < 0 {
            return self.shift_right(&Variant::from_number(-offs as f64));
        }
        Variant::from_number((to_i32(self) << (offs as u32 & 31)) as f64)
    }

    /// Shift right; a negative amount shifts in the opposite direction.
    pub fn shift_right(&self, amount: &Variant) -> Variant {
        let offs = amount.to_number() as i64;
        if offs < 0 {
            return self.shift_left(&Variant::from_number(-offs as f64));
        }
        Variant::from_number((to_i32(self) >> (offs as u32 & 31)) as f64)
    }
}
