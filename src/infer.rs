//! Maps a dictionary's declared type and size onto a concrete column type.

use std::fmt;

use log::warn;
use serde::Serialize;

use crate::schema::{ColumnType, DecimalSpec};

/// Integers with more declared digits than this no longer fit in 64 bits.
pub const MAX_INTEGER_DIGITS: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    Numeric,
    Char,
    Other,
}

impl DeclaredType {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "num" | "numeric" => DeclaredType::Numeric,
            "char" | "character" => DeclaredType::Char,
            _ => DeclaredType::Other,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeclaredType::Numeric => "num",
            DeclaredType::Char => "char",
            DeclaredType::Other => "other",
        };
        f.write_str(label)
    }
}

/// Infers a column type from raw dictionary tokens. Never fails.
///
/// A `precision,scale` size whose halves are not both digit strings (`"5,x"`)
/// yields `DOUBLE` with a warning rather than an unusable `DECIMAL`.
pub fn infer(declared_type: &str, declared_size: &str) -> ColumnType {
    infer_declared(DeclaredType::parse(declared_type), declared_size)
}

pub fn infer_declared(declared_type: DeclaredType, declared_size: &str) -> ColumnType {
    let size = declared_size.trim();
    match declared_type {
        DeclaredType::Numeric => infer_numeric(size),
        DeclaredType::Char => match parse_length(size) {
            Some(length) => ColumnType::FixedText(length),
            None => ColumnType::Text,
        },
        DeclaredType::Other => ColumnType::Text,
    }
}

fn infer_numeric(size: &str) -> ColumnType {
    if let Some((precision, scale)) = size.split_once(',') {
        let (precision, scale) = (precision.trim(), scale.trim());
        return match (parse_length(precision), parse_length(scale)) {
            (Some(precision), Some(scale)) => ColumnType::Decimal(DecimalSpec::new(precision, scale)),
            _ => {
                warn!("Declared size '{size}' is not a numeric precision,scale pair; using DOUBLE");
                ColumnType::Double
            }
        };
    }
    if !is_digits(size) {
        return ColumnType::Double;
    }
    // An overlong digit string still names a width, just one past any integer type.
    match size.parse::<u32>() {
        Ok(digits) if digits <= MAX_INTEGER_DIGITS => ColumnType::bigint(),
        _ => ColumnType::Double,
    }
}

fn parse_length(token: &str) -> Option<u32> {
    if is_digits(token) {
        token.parse().ok()
    } else {
        None
    }
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}
