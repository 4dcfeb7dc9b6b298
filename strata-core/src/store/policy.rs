use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How writes to a store key combine with the existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Last write wins.
    Set,
    /// First write wins.
    SetIfNotExists,
    /// Values are concatenated.
    Append,
    /// Values are summed.
    Add,
    /// The smallest value is kept.
    Min,
    /// The largest value is kept.
    Max,
    /// `"set:N"` replaces, `"sum:N"` adds.
    SetSum,
}

impl UpdatePolicy {
    /// Stable name used in hashes and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::SetIfNotExists => "set_if_not_exists",
            Self::Append => "append",
            Self::Add => "add",
            Self::Min => "min",
            Self::Max => "max",
            Self::SetSum => "set_sum",
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric flavours a store value can be interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    /// Decimal `i64`.
    Int64,
    /// Decimal `f64`.
    Float64,
    /// Arbitrary precision base-10 integer.
    BigInt,
    /// Arbitrary precision decimal.
    BigDecimal,
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::BigInt => "bigint",
            Self::BigDecimal => "bigdecimal",
        };
        f.write_str(s)
    }
}

/// Declared type of the values held by a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    /// Decimal `i64`.
    Int64,
    /// Decimal `f64`.
    Float64,
    /// Arbitrary precision integer.
    BigInt,
    /// Arbitrary precision decimal (also accepted as `bigfloat`).
    BigDecimal,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
    /// Serialized protobuf message of the given type.
    Proto(String),
}

impl ValueType {
    /// Numeric interpretation, if any.
    pub fn numeric(&self) -> Option<NumericType> {
        match self {
            Self::Int64 => Some(NumericType::Int64),
            Self::Float64 => Some(NumericType::Float64),
            Self::BigInt => Some(NumericType::BigInt),
            Self::BigDecimal => Some(NumericType::BigDecimal),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => f.write_str("int64"),
            Self::Float64 => f.write_str("float64"),
            Self::BigInt => f.write_str("bigint"),
            Self::BigDecimal => f.write_str("bigdecimal"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Proto(t) => write!(f, "proto:{t}"),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "int64" => Ok(Self::Int64),
            "float64" => Ok(Self::Float64),
            "bigint" => Ok(Self::BigInt),
            "bigdecimal" | "bigfloat" => Ok(Self::BigDecimal),
            "string" => Ok(Self::String),
            "bytes" => Ok(Self::Bytes),
            _ => match s.strip_prefix("proto:") {
                Some(t) if !t.is_empty() => Ok(Self::Proto(t.to_string())),
                _ => Err(format!("unknown value type '{s}'")),
            },
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_parsing() {
        assert_eq!("int64".parse::<ValueType>().unwrap(), ValueType::Int64);
        assert_eq!("bigfloat".parse::<ValueType>().unwrap(), ValueType::BigDecimal);
        assert_eq!("BigDecimal".parse::<ValueType>().unwrap(), ValueType::BigDecimal);
        assert_eq!(
            "proto:eth.Pool".parse::<ValueType>().unwrap(),
            ValueType::Proto("eth.Pool".to_string())
        );
        assert!("proto:".parse::<ValueType>().is_err());
        assert!("uint8".parse::<ValueType>().is_err());
    }

    #[test]
    fn value_type_serde() {
        let json = serde_json::to_string(&ValueType::Proto("a.B".to_string())).unwrap();
        assert_eq!(json, "\"proto:a.B\"");
        let back: ValueType = serde_json::from_str("\"bigint\"").unwrap();
        assert_eq!(back, ValueType::BigInt);
        let policy: UpdatePolicy = serde_json::from_str("\"set_if_not_exists\"").unwrap();
        assert_eq!(policy, UpdatePolicy::SetIfNotExists);
    }

    #[test]
    fn numeric_mapping() {
        assert_eq!(ValueType::Float64.numeric(), Some(NumericType::Float64));
        assert_eq!(ValueType::String.numeric(), None);
    }
}
