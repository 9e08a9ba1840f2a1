//! 静态类型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 表达式中的静态类型
///
/// 变量只能声明为标量类型；列表类型只出现在字面量与其运算结果中。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Uint,
    Double,
    Bool,
    String,
    Bytes,
    List(Box<Type>),
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Uint | Type::Double)
    }

    /// 可声明为变量类型
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Type::List(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Uint => f.write_str("uint"),
            Type::Double => f.write_str("double"),
            Type::Bool => f.write_str("bool"),
            Type::String => f.write_str("string"),
            Type::Bytes => f.write_str("bytes"),
            Type::List(elem) => write!(f, "list({})", elem),
        }
    }
}

/// 未知类型名
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variable type '{0}'")]
pub struct UnknownTypeError(pub String);

impl FromStr for Type {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(Type::Int),
            "uint" => Ok(Type::Uint),
            "double" | "float" => Ok(Type::Double),
            "bool" => Ok(Type::Bool),
            "string" => Ok(Type::String),
            "bytes" => Ok(Type::Bytes),
            _ => Err(UnknownTypeError(s.to_string())),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
