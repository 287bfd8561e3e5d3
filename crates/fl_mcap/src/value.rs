use std::collections::BTreeMap;

/// A single decoded value of any type that can appear in a message
/// payload, regardless of which encoding produced it.
///
/// Decoders create one `Value` per message; values are yielded to the
/// caller and never cached.
#[derive(Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),

    /// Fixed- or variable-size array of values.
    Array(Vec<Self>),

    /// Nested message or JSON object.
    Message(BTreeMap<String, Self>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view of the value, widening to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::U8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::I64(v) => Some(v as f64),
            Self::U64(v) => Some(v as f64),
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Field lookup on [`Self::Message`] values.
    pub fn get(&self, field: &str) -> Option<&Self> {
        match self {
            Self::Message(fields) => fields.get(field),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::I8(v) => write!(f, "I8({v})"),
            Self::U8(v) => write!(f, "U8({v})"),
            Self::I16(v) => write!(f, "I16({v})"),
            Self::U16(v) => write!(f, "U16({v})"),
            Self::I32(v) => write!(f, "I32({v})"),
            Self::U32(v) => write!(f, "U32({v})"),
            Self::I64(v) => write!(f, "I64({v})"),
            Self::U64(v) => write!(f, "U64({v})"),
            Self::F32(v) => write!(f, "F32({v})"),
            Self::F64(v) => write!(f, "F64({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Bytes(v) => write!(f, "Bytes({})", v.len()),
            Self::Array(v) => write!(f, "Array({})", v.len()),
            Self::Message(v) => {
                write!(f, "Message({{")?;
                for (i, (key, value)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value:?}")?;
                }
                write!(f, "}})")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::I64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::U64(u)
                } else {
                    Self::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Message(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}
