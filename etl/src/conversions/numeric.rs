use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bigdecimal::{
    BigDecimal, ParseBigDecimalError,
    num_bigint::{BigInt, BigUint, Sign},
};
use byteorder::{BigEndian, ReadBytesExt};
use tokio_postgres::types::{FromSql, Type};

/// Error returned when a string is not a valid Postgres `numeric` literal.
#[derive(Debug)]
pub struct ParseNumericError(ParseBigDecimalError);

impl fmt::Display for ParseNumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid numeric value: {}", self.0)
    }
}

impl std::error::Error for ParseNumericError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// A Postgres `numeric` value, covering the special values as well as arbitrary precision.
///
/// Values are written back to Postgres in their text form, which the server parses losslessly.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum PgNumeric {
    NaN,
    PositiveInf,
    NegativeInf,
    Value(BigDecimal),
}

impl FromStr for PgNumeric {
    type Err = ParseNumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nan" => Ok(PgNumeric::NaN),
            "infinity" | "+infinity" => Ok(PgNumeric::PositiveInf),
            "-infinity" => Ok(PgNumeric::NegativeInf),
            other => BigDecimal::from_str(other)
                .map(PgNumeric::Value)
                .map_err(ParseNumericError),
        }
    }
}

/// Decodes the binary `numeric` representation.
///
/// The wire layout is a header of four 16-bit fields (digit count, weight, sign, display scale)
/// followed by base-10000 digits, most significant first.
impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + 'static + Sync + Send>> {
        let mut rdr = Cursor::new(raw);

        let n_digits = rdr.read_u16::<BigEndian>()?;
        let weight = rdr.read_i16::<BigEndian>()?;
        let sign = match rdr.read_u16::<BigEndian>()? {
            0x0000 => Sign::Plus,
            0x4000 => Sign::Minus,
            0xC000 => return Ok(PgNumeric::NaN),
            0xD000 => return Ok(PgNumeric::PositiveInf),
            0xF000 => return Ok(PgNumeric::NegativeInf),
            v => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid numeric sign {v:#06x}"),
                )
                .into());
            }
        };
        let scale = rdr.read_u16::<BigEndian>()?;

        let mut magnitude = BigUint::from(0u32);
        for _ in 0..n_digits {
            let digit = rdr.read_u16::<BigEndian>()?;
            magnitude = magnitude * BigUint::from(10_000u32) + BigUint::from(digit);
        }

        // The last digit read has factor 10_000^(weight - n_digits + 1).
        let exponent = 4 * (i64::from(weight) - i64::from(n_digits) + 1);
        let value = BigDecimal::new(BigInt::from_biguint(sign, magnitude), -exponent)
            .with_scale(i64::from(scale));

        Ok(PgNumeric::Value(value))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::NUMERIC)
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgNumeric::NaN => f.write_str("NaN"),
            PgNumeric::PositiveInf => f.write_str("Infinity"),
            PgNumeric::NegativeInf => f.write_str("-Infinity"),
            PgNumeric::Value(n) => write!(f, "{n}"),
        }
    }
}

impl Default for PgNumeric {
    fn default() -> Self {
        PgNumeric::Value(BigDecimal::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(n_digits: u16, weight: i16, sign: u16, scale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for field in [n_digits, weight as u16, sign, scale] {
            raw.extend_from_slice(&field.to_be_bytes());
        }
        for digit in digits {
            raw.extend_from_slice(&digit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn decodes_fractional_values() {
        // 12345.678 = 1|2345|6780 with weight 1.
        let raw = encode(3, 1, 0x0000, 3, &[1, 2345, 6780]);
        let value = PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap();

        assert_eq!(value.to_string(), "12345.678");
    }

    #[test]
    fn decodes_negative_values_and_zero() {
        let raw = encode(1, 0, 0x4000, 2, &[42]);
        assert_eq!(
            PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap().to_string(),
            "-42.00"
        );

        let raw = encode(0, 0, 0x0000, 0, &[]);
        assert_eq!(
            PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap(),
            PgNumeric::Value(BigDecimal::from(0))
        );
    }

    #[test]
    fn decodes_special_values() {
        let raw = encode(0, 0, 0xC000, 0, &[]);
        assert_eq!(PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap(), PgNumeric::NaN);

        let raw = encode(0, 0, 0xF000, 0, &[]);
        assert_eq!(
            PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap(),
            PgNumeric::NegativeInf
        );
    }

    #[test]
    fn parses_text_representation() {
        assert_eq!("Infinity".parse::<PgNumeric>().unwrap(), PgNumeric::PositiveInf);
        assert_eq!("nan".parse::<PgNumeric>().unwrap(), PgNumeric::NaN);
        assert_eq!("19.99".parse::<PgNumeric>().unwrap().to_string(), "19.99");
        assert!("nineteen".parse::<PgNumeric>().is_err());
    }
}
