use std::{fmt, io};

use itertools::Itertools;
use ndarray::{ArrayViewD, Dimension};
use serde::{
    ser::{Error as _, SerializeMap},
    Serialize, Serializer,
};
use serde_json::ser::Formatter;
use thiserror::Error;

use crate::{
    loader::Partition,
    value::{with_array, NumericArray, Scalar, Value},
};

pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, "{name}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
            PathSegment::Key(key) => write!(f, "[{key:?}]"),
        }
    }
}

/// Location of a value inside a partition, e.g. `features[12][3]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
    pub fn field(name: &str) -> Self {
        Self(vec![PathSegment::Field(name.to_string())])
    }

    fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    fn with_index(&self, index: &[usize]) -> Self {
        let mut path = self.clone();
        path.0.extend(index.iter().map(|i| PathSegment::Index(*i)));
        path
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        write!(f, "{}", self.0.iter().format(""))
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{path}: unsupported value of type {type_name}")]
    Unsupported { path: ValuePath, type_name: String },

    #[error("{path}: nesting deeper than {max_depth} levels")]
    DepthExceeded { path: ValuePath, max_depth: usize },

    #[error("{path}: non-finite float {value} has no JSON literal")]
    NonFinite { path: ValuePath, value: f64 },

    #[error("{path}: mapping key of type {type_name} cannot be a JSON key")]
    InvalidKey { path: ValuePath, type_name: String },

    #[error("failed to render document: {0}")]
    Render(#[from] serde_json::Error),
}

impl EncodeError {
    pub fn path(&self) -> Option<&ValuePath> {
        match self {
            EncodeError::Unsupported { path, .. }
            | EncodeError::DepthExceeded { path, .. }
            | EncodeError::NonFinite { path, .. }
            | EncodeError::InvalidKey { path, .. } => Some(path),
            EncodeError::Render(_) => None,
        }
    }
}

/// Top-level shape of a partition document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DocumentLayout {
    /// `[features, labels]`
    #[default]
    Pair,
    /// `{"features": ..., "labels": ...}`
    Keyed,
}

/// Whitespace of the rendered text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DocumentStyle {
    /// `", "` and `": "` separators on one line, like Python's `json`.
    /// Floats keep the shortest round-trip form, so exponents read `1e-7`
    /// and `1e16` where Python writes `1e-07` and `1e+16`.
    #[default]
    Python,
    Compact,
    Pretty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeOptions {
    pub max_depth: usize,
    pub layout: DocumentLayout,
    pub style: DocumentStyle,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            layout: DocumentLayout::default(),
            style: DocumentStyle::default(),
        }
    }
}

/// Rendered JSON text of one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextDocument(String);

impl TextDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TextDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes a single value as a standalone document.
pub fn encode(value: &Value, options: &EncodeOptions) -> Result<TextDocument, EncodeError> {
    validate(value, &mut ValuePath::default(), 0, options.max_depth)?;
    render(&Node(value), options.style)
}

/// Encodes a partition as `[features, labels]` or a keyed object.
pub fn encode_partition(
    partition: &Partition,
    options: &EncodeOptions,
) -> Result<TextDocument, EncodeError> {
    validate(
        &partition.features,
        &mut ValuePath::field("features"),
        1,
        options.max_depth,
    )?;
    validate(
        &partition.labels,
        &mut ValuePath::field("labels"),
        1,
        options.max_depth,
    )?;

    let features = Node(&partition.features);
    let labels = Node(&partition.labels);
    match options.layout {
        DocumentLayout::Pair => render(&(features, labels), options.style),
        DocumentLayout::Keyed => render(&Keyed { features, labels }, options.style),
    }
}

fn render<T: Serialize>(node: &T, style: DocumentStyle) -> Result<TextDocument, EncodeError> {
    let mut buf = Vec::new();
    match style {
        DocumentStyle::Python => {
            node.serialize(&mut serde_json::Serializer::with_formatter(&mut buf, PythonFormatter))?
        }
        DocumentStyle::Compact => node.serialize(&mut serde_json::Serializer::new(&mut buf))?,
        DocumentStyle::Pretty => node.serialize(&mut serde_json::Serializer::pretty(&mut buf))?,
    }
    let text = String::from_utf8(buf).map_err(serde_json::Error::custom)?;
    Ok(TextDocument(text))
}

fn key_text(key: &Value) -> Option<String> {
    match key {
        Value::Scalar(Scalar::Text(s)) => Some(s.clone()),
        Value::Scalar(Scalar::Int(i)) => Some(i.to_string()),
        Value::Scalar(Scalar::Float(f)) if f.is_finite() => Some(format!("{f:?}")),
        Value::Scalar(Scalar::Bool(b)) => Some(b.to_string()),
        Value::Scalar(Scalar::Null) => Some("null".to_string()),
        _ => None,
    }
}

fn validate(
    value: &Value,
    path: &mut ValuePath,
    depth: usize,
    max_depth: usize,
) -> Result<(), EncodeError> {
    let exceeded = |path: &ValuePath| EncodeError::DepthExceeded {
        path: path.clone(),
        max_depth,
    };

    match value {
        Value::Array(array) => {
            if depth + array.ndim() > max_depth {
                return Err(exceeded(path));
            }
            check_finite(array, path)
        }
        Value::Scalar(Scalar::Float(f)) if !f.is_finite() => Err(EncodeError::NonFinite {
            path: path.clone(),
            value: *f,
        }),
        Value::Scalar(_) => Ok(()),
        Value::Sequence(items) => {
            if depth + 1 > max_depth {
                return Err(exceeded(path));
            }
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                validate(item, path, depth + 1, max_depth)?;
                path.pop();
            }
            Ok(())
        }
        Value::Mapping(entries) => {
            if depth + 1 > max_depth {
                return Err(exceeded(path));
            }
            for (key, item) in entries {
                let key = key_text(key).ok_or_else(|| EncodeError::InvalidKey {
                    path: path.clone(),
                    type_name: key.type_name(),
                })?;
                path.push(PathSegment::Key(key));
                validate(item, path, depth + 1, max_depth)?;
                path.pop();
            }
            Ok(())
        }
        Value::Opaque(name) => Err(EncodeError::Unsupported {
            path: path.clone(),
            type_name: name.clone(),
        }),
    }
}

fn check_finite(array: &NumericArray, path: &ValuePath) -> Result<(), EncodeError> {
    let bad = match array {
        NumericArray::F32(a) => a
            .indexed_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(ix, v)| (ix, *v as f64)),
        NumericArray::F64(a) => a
            .indexed_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(ix, v)| (ix, *v)),
        _ => None,
    };
    match bad {
        Some((ix, value)) => Err(EncodeError::NonFinite {
            path: path.with_index(ix.slice()),
            value,
        }),
        None => Ok(()),
    }
}

/// Array element written as a JSON number or boolean.
trait JsonElement: Copy {
    fn write<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error>;
}

macro_rules! json_element {
    ($method:ident as $wide:ty: $($ty:ty),*) => {
        $(
            impl JsonElement for $ty {
                fn write<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.$method(self as $wide)
                }
            }
        )*
    };
}

json_element!(serialize_u64 as u64: u8, u16, u32, u64);
json_element!(serialize_i64 as i64: i8, i16, i32, i64);
// f32 widens to f64 exactly; shortest round-trip digits of the f64 follow
json_element!(serialize_f64 as f64: f32, f64);

impl JsonElement for bool {
    fn write<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(self)
    }
}

struct Element<T>(T);

impl<T: JsonElement> Serialize for Element<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.write(serializer)
    }
}

/// One level of an array, serialized as a list of its sub-arrays.
struct Axis<'a, T>(ArrayViewD<'a, T>);

impl<T: JsonElement> Serialize for Axis<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.ndim() {
            0 => match self.0.iter().next() {
                Some(v) => v.write(serializer),
                None => serializer.serialize_unit(),
            },
            1 => serializer.collect_seq(self.0.iter().map(|v| Element(*v))),
            _ => serializer.collect_seq(self.0.outer_iter().map(Axis)),
        }
    }
}

struct Node<'a>(&'a Value);

impl Serialize for Node<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(array) => with_array!(array, a => Axis(a.view()).serialize(serializer)),
            Value::Scalar(Scalar::Null) => serializer.serialize_unit(),
            Value::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Value::Scalar(Scalar::Int(i)) => serializer.serialize_i64(*i),
            Value::Scalar(Scalar::Float(f)) => serializer.serialize_f64(*f),
            Value::Scalar(Scalar::Text(s)) => serializer.serialize_str(s),
            Value::Sequence(items) => serializer.collect_seq(items.iter().map(Node)),
            Value::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, item) in entries {
                    let key = key_text(key)
                        .ok_or_else(|| S::Error::custom("mapping key is not a scalar"))?;
                    map.serialize_entry(&key, &Node(item))?;
                }
                map.end()
            }
            Value::Opaque(name) => Err(S::Error::custom(format!("unsupported value {name}"))),
        }
    }
}

#[derive(Serialize)]
struct Keyed<'a> {
    features: Node<'a>,
    labels: Node<'a>,
}

/// serde_json formatter writing `", "` between items and `": "` after keys.
/// Numbers are left to the default formatting.
struct PythonFormatter;

impl Formatter for PythonFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}
