//! Prime-field arithmetic with a runtime modulus.
//!
//! The circuit description supplies the prime as a decimal string; every
//! element is kept in canonical form (fully reduced, 0 <= value < P).
//! Operations are value-in/value-out with no interior mutability, so one
//! shared `Field` serves any number of component threads.

use std::fmt;

use crate::uint::Uint256;

/// A canonical (fully reduced) element of the field.
pub type FieldElement = Uint256;

// ============================================================================
// FieldError
// ============================================================================

/// Errors from field construction and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Malformed or out-of-range numeric input.
    Parse(String),
    /// Inversion or division hit an element with no inverse.
    NotInvertible,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Parse(input) => write!(f, "cannot parse field value: {input:?}"),
            FieldError::NotInvertible => write!(f, "element has no modular inverse"),
        }
    }
}

impl std::error::Error for FieldError {}

// ============================================================================
// Field
// ============================================================================

/// Prime field Z/PZ for a modulus fixed at construction.
#[derive(Debug, Clone)]
pub struct Field {
    modulus: Uint256,
    /// P - 2, the Fermat inversion exponent.
    inv_exponent: Uint256,
}

impl Field {
    /// Build a field from a decimal modulus string.
    ///
    /// ```
    /// use field::Field;
    ///
    /// let f = Field::new("101").unwrap();
    /// let sum = f.add(&f.element_from_u64(50), &f.element_from_u64(60));
    /// assert_eq!(sum, f.element_from_u64(9));
    /// ```
    pub fn new(decimal: &str) -> Result<Self, FieldError> {
        let modulus = Uint256::from_decimal_str(decimal)
            .ok_or_else(|| FieldError::Parse(decimal.to_string()))?;
        Self::from_modulus(modulus)
    }

    /// Build a field from an already-parsed modulus.
    ///
    /// The modulus must be odd, at least 3 and below 2^255; the headroom bit
    /// keeps the addition and reduction loops carry-free.
    pub fn from_modulus(modulus: Uint256) -> Result<Self, FieldError> {
        if modulus < Uint256::from_u64(3) {
            return Err(FieldError::Parse("modulus must be at least 3".to_string()));
        }
        if !modulus.bit(0) {
            return Err(FieldError::Parse("modulus must be odd".to_string()));
        }
        if modulus.bit(255) {
            return Err(FieldError::Parse(
                "modulus must be below 2^255".to_string(),
            ));
        }
        let inv_exponent = modulus.wrapping_sub(&Uint256::from_u64(2));
        Ok(Self {
            modulus,
            inv_exponent,
        })
    }

    #[inline]
    pub fn modulus(&self) -> &Uint256 {
        &self.modulus
    }

    #[inline]
    pub fn zero(&self) -> FieldElement {
        Uint256::ZERO
    }

    #[inline]
    pub fn one(&self) -> FieldElement {
        Uint256::ONE
    }

    // ========================================================================
    // Construction of elements
    // ========================================================================

    /// Reduce an arbitrary 256-bit value into canonical form.
    pub fn reduce(&self, value: &Uint256) -> FieldElement {
        if *value < self.modulus {
            *value
        } else {
            value.divmod(&self.modulus).1
        }
    }

    pub fn element_from_u64(&self, value: u64) -> FieldElement {
        self.reduce(&Uint256::from_u64(value))
    }

    /// Parse a decimal literal, reduced mod P.
    pub fn parse_decimal(&self, s: &str) -> Result<FieldElement, FieldError> {
        let raw = Uint256::from_decimal_str(s).ok_or_else(|| FieldError::Parse(s.to_string()))?;
        Ok(self.reduce(&raw))
    }

    /// Parse a hex literal (with or without "0x" prefix), reduced mod P.
    pub fn parse_hex(&self, s: &str) -> Result<FieldElement, FieldError> {
        let raw = Uint256::from_hex_str(s).ok_or_else(|| FieldError::Parse(s.to_string()))?;
        Ok(self.reduce(&raw))
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    /// Modular addition: (a + b) mod P.
    pub fn add(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        let (sum, carry) = a.overflowing_add(b);
        if carry || sum >= self.modulus {
            sum.wrapping_sub(&self.modulus)
        } else {
            sum
        }
    }

    /// Modular subtraction: (a - b) mod P.
    pub fn sub(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        let (diff, borrow) = a.borrowing_sub(b);
        if borrow {
            diff.wrapping_add(&self.modulus)
        } else {
            diff
        }
    }

    /// Modular multiplication: (a * b) mod P.
    pub fn mul(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        Uint256::rem_wide(&a.mul_wide(b), &self.modulus)
    }

    /// Modular negation: (-a) mod P.
    pub fn neg(&self, a: &FieldElement) -> FieldElement {
        if a.is_zero() {
            Uint256::ZERO
        } else {
            self.modulus.wrapping_sub(a)
        }
    }

    /// Modular exponentiation: a^exp mod P (square-and-multiply, MSB first).
    pub fn pow(&self, base: &FieldElement, exp: &Uint256) -> FieldElement {
        let mut result = Uint256::ONE;
        for i in (0..256).rev() {
            result = self.mul(&result, &result);
            if exp.bit(i) {
                result = self.mul(&result, base);
            }
        }
        result
    }

    /// Modular inverse via Fermat's little theorem (a^(P-2) mod P).
    ///
    /// The candidate is multiplied back against `a`; anything that does not
    /// produce 1 (zero, or a zero divisor under a composite modulus) fails
    /// with `FieldError::NotInvertible`.
    pub fn inv(&self, a: &FieldElement) -> Result<FieldElement, FieldError> {
        if a.is_zero() {
            return Err(FieldError::NotInvertible);
        }
        let candidate = self.pow(a, &self.inv_exponent);
        if self.mul(&candidate, a) != Uint256::ONE {
            return Err(FieldError::NotInvertible);
        }
        Ok(candidate)
    }

    /// Modular division: (a / b) mod P.
    pub fn div(&self, a: &FieldElement, b: &FieldElement) -> Result<FieldElement, FieldError> {
        Ok(self.mul(a, &self.inv(b)?))
    }
}

// ============================================================================
// Tests
// ============================================================================
