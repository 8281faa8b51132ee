use ndarray::ArrayD;
use strum_macros::{Display, EnumIter};

/// Element type of a [`NumericArray`], named after numpy typestrs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ElementKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ElementKind {
    /// Parses the kind/size part of a numpy typestr such as `f4` or `<i8`.
    pub fn from_typestr(typestr: &str) -> Option<ElementKind> {
        let code = typestr.trim_start_matches(['<', '>', '|', '=']);
        let kind = match code {
            "b1" | "?" => ElementKind::Bool,
            "u1" | "B" => ElementKind::U8,
            "i1" | "b" => ElementKind::I8,
            "u2" | "H" => ElementKind::U16,
            "i2" | "h" => ElementKind::I16,
            "u4" | "I" => ElementKind::U32,
            "i4" | "i" => ElementKind::I32,
            "u8" | "L" | "Q" => ElementKind::U64,
            "i8" | "l" | "q" => ElementKind::I64,
            "f4" | "f" => ElementKind::F32,
            "f8" | "d" => ElementKind::F64,
            _ => return None,
        };
        Some(kind)
    }

    pub fn size(&self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::U64 | ElementKind::I64 | ElementKind::F64 => 8,
        }
    }
}

/// A homogeneous numeric array of any rank. Rank 0 holds a numpy scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum NumericArray {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    U16(ArrayD<u16>),
    I16(ArrayD<i16>),
    U32(ArrayD<u32>),
    I32(ArrayD<i32>),
    U64(ArrayD<u64>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Runs `$body` with `$a` bound to the inner `ArrayD` of whichever variant.
macro_rules! with_array {
    ($array:expr, $a:ident => $body:expr) => {
        match $array {
            $crate::value::NumericArray::Bool($a) => $body,
            $crate::value::NumericArray::U8($a) => $body,
            $crate::value::NumericArray::I8($a) => $body,
            $crate::value::NumericArray::U16($a) => $body,
            $crate::value::NumericArray::I16($a) => $body,
            $crate::value::NumericArray::U32($a) => $body,
            $crate::value::NumericArray::I32($a) => $body,
            $crate::value::NumericArray::U64($a) => $body,
            $crate::value::NumericArray::I64($a) => $body,
            $crate::value::NumericArray::F32($a) => $body,
            $crate::value::NumericArray::F64($a) => $body,
        }
    };
}
pub(crate) use with_array;

impl NumericArray {
    pub fn kind(&self) -> ElementKind {
        match self {
            NumericArray::Bool(_) => ElementKind::Bool,
            NumericArray::U8(_) => ElementKind::U8,
            NumericArray::I8(_) => ElementKind::I8,
            NumericArray::U16(_) => ElementKind::U16,
            NumericArray::I16(_) => ElementKind::I16,
            NumericArray::U32(_) => ElementKind::U32,
            NumericArray::I32(_) => ElementKind::I32,
            NumericArray::U64(_) => ElementKind::U64,
            NumericArray::I64(_) => ElementKind::I64,
            NumericArray::F32(_) => ElementKind::F32,
            NumericArray::F64(_) => ElementKind::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Length of the outermost axis, `None` for a rank-0 array.
    pub fn len(&self) -> Option<usize> {
        self.shape().first().copied()
    }
}

macro_rules! impl_from_array {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$ty>> for NumericArray {
                fn from(array: ArrayD<$ty>) -> Self {
                    NumericArray::$variant(array)
                }
            }

            impl From<ArrayD<$ty>> for Value {
                fn from(array: ArrayD<$ty>) -> Self {
                    Value::Array(NumericArray::$variant(array))
                }
            }
        )*
    };
}

impl_from_array!(
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Array(NumericArray),
    Scalar(Scalar),
    Sequence(Vec<Value>),
    /// Key/value pairs in insertion order.
    Mapping(Vec<(Value, Value)>),
    /// Something the source held that has no structural meaning here,
    /// described by its type name.
    Opaque(String),
}

impl Value {
    /// Number of entries along the outermost level, if the value has one.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(array) => array.len(),
            Value::Sequence(items) => Some(items.len()),
            Value::Mapping(entries) => Some(entries.len()),
            Value::Scalar(_) | Value::Opaque(_) => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Array(array) => format!("{}-d {} array", array.ndim(), array.kind()),
            Value::Scalar(Scalar::Null) => "null".to_string(),
            Value::Scalar(Scalar::Bool(_)) => "bool".to_string(),
            Value::Scalar(Scalar::Int(_)) => "int".to_string(),
            Value::Scalar(Scalar::Float(_)) => "float".to_string(),
            Value::Scalar(Scalar::Text(_)) => "text".to_string(),
            Value::Sequence(_) => "sequence".to_string(),
            Value::Mapping(_) => "mapping".to_string(),
            Value::Opaque(name) => name.clone(),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::Text(v.to_string()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}
