use std::collections::HashMap;

use thiserror::Error;

use crate::value::{NumericArray, Scalar, Value};

pub mod numpy;
pub mod opcode;

use numpy::Dtype;

/// Nesting limit while materializing; deeper graphs are treated as cyclic.
pub const MAX_OBJECT_DEPTH: usize = 64;

/// Node count limit of the materialized tree, shared references counted
/// once per reference.
pub const MAX_EXPANDED_NODES: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("pickle stream ended unexpectedly")]
    UnexpectedEof,

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("unsupported opcode {name} at offset {offset}")]
    UnsupportedOpcode { name: &'static str, offset: usize },

    #[error("unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("no mark on the stack at offset {offset}")]
    MissingMark { offset: usize },

    #[error("memo key {0} was never stored")]
    MissingMemo(u32),

    #[error("invalid {what} literal at offset {offset}")]
    InvalidLiteral { what: &'static str, offset: usize },

    #[error("expected {expected} at offset {offset}")]
    TypeMismatch {
        expected: &'static str,
        offset: usize,
    },

    #[error("numpy: {0}")]
    Numpy(String),

    #[error("object graph deeper than {0} levels or cyclic")]
    TooDeep(usize),

    #[error("object graph expands to more than {0} nodes")]
    TooLarge(u64),
}

type ObjRef = usize;

#[derive(Clone, Debug)]
enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Python 2 `str`: bytes that read as text.
    Str(Vec<u8>),
    Text(String),
    Bytes(Vec<u8>),
    Tuple(Vec<ObjRef>),
    List(Vec<ObjRef>),
    Dict(Vec<(ObjRef, ObjRef)>),
    Set(Vec<ObjRef>),
    Global { module: String, name: String },
    Dtype(Dtype),
    /// `_reconstruct` result waiting for its `BUILD` state.
    ArrayShell,
    Array(NumericArray),
    Opaque(String),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_u8(&mut self) -> Result<u8, PickleError> {
        let b = *self.data.get(self.pos).ok_or(PickleError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], PickleError> {
        let end = self.pos.checked_add(n).ok_or(PickleError::UnexpectedEof)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(PickleError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, PickleError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_len_u64(&mut self) -> Result<usize, PickleError> {
        usize::try_from(u64::from_le_bytes(self.read_array()?))
            .map_err(|_| PickleError::UnexpectedEof)
    }

    /// Reads up to (not including) the next newline.
    fn read_line(&mut self) -> Result<&'a [u8], PickleError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(PickleError::UnexpectedEof)?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }
}

/// Stack machine over an object arena; memoized handles see later
/// `APPEND`, `SETITEM` and `BUILD` mutations.
struct Unpickler<'a> {
    reader: Reader<'a>,
    arena: Vec<Object>,
    stack: Vec<ObjRef>,
    metastack: Vec<Vec<ObjRef>>,
    memo: HashMap<u32, ObjRef>,
    offset: usize,
}

/// Unpickles a complete stream and materializes its root object.
pub fn from_slice(data: &[u8]) -> Result<Value, PickleError> {
    let mut unpickler = Unpickler {
        reader: Reader { data, pos: 0 },
        arena: Vec::new(),
        stack: Vec::new(),
        metastack: Vec::new(),
        memo: HashMap::new(),
        offset: 0,
    };
    let root = unpickler.run()?;
    tracing::trace!(objects = unpickler.arena.len(), "pickle stream decoded");
    Materializer::new(unpickler.arena, root)?.materialize(root, 0)
}

fn line_str(line: &[u8], what: &'static str, offset: usize) -> Result<String, PickleError> {
    String::from_utf8(line.to_vec()).map_err(|_| PickleError::InvalidLiteral { what, offset })
}

fn parse_decimal(line: &[u8], offset: usize) -> Result<Object, PickleError> {
    let text = line_str(line, "int", offset)?;
    let text = text.trim().trim_end_matches('L');
    match text.parse::<i64>() {
        Ok(v) => Ok(Object::Int(v)),
        Err(_) if !text.is_empty() && text.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) => {
            Ok(Object::Opaque(format!("int {text} outside 64-bit range")))
        }
        Err(_) => Err(PickleError::InvalidLiteral { what: "int", offset }),
    }
}

/// Two's complement little-endian integer, as written by `LONG1`/`LONG4`.
fn decode_long(bytes: &[u8]) -> Object {
    if bytes.is_empty() {
        return Object::Int(0);
    }
    if bytes.len() > 8 {
        let negative = bytes[bytes.len() - 1] & 0x80 != 0;
        let fill = if negative { 0xff } else { 0x00 };
        // still fits if every byte past the eighth is sign extension
        let fits = bytes[8..].iter().all(|b| *b == fill) && ((bytes[7] & 0x80 != 0) == negative);
        if !fits {
            return Object::Opaque("int outside 64-bit range".to_string());
        }
        return decode_long(&bytes[..8]);
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Object::Int(i64::from_le_bytes(buf))
}

/// Undoes Python's `repr` quoting of a protocol 0 `STRING` argument.
fn unquote_string(line: &[u8], offset: usize) -> Result<Vec<u8>, PickleError> {
    let invalid = PickleError::InvalidLiteral {
        what: "string",
        offset,
    };
    let (first, last) = match (line.first(), line.last()) {
        (Some(f), Some(l)) if line.len() >= 2 => (*f, *l),
        _ => return Err(invalid),
    };
    if first != last || (first != b'\'' && first != b'"') {
        return Err(invalid);
    }
    let body = &line[1..line.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *body.get(i).ok_or(PickleError::InvalidLiteral {
            what: "string",
            offset,
        })?;
        i += 1;
        match esc {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0' => out.push(0),
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'x' => {
                let hex = body.get(i..i + 2).ok_or(PickleError::InvalidLiteral {
                    what: "string",
                    offset,
                })?;
                let hex = std::str::from_utf8(hex).ok().and_then(|h| u8::from_str_radix(h, 16).ok());
                out.push(hex.ok_or(PickleError::InvalidLiteral {
                    what: "string",
                    offset,
                })?);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decodes the `raw-unicode-escape` argument of protocol 0 `UNICODE`.
fn decode_raw_unicode(line: &[u8], offset: usize) -> Result<String, PickleError> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        let width = match (b, line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => 0,
        };
        if width == 0 {
            out.push(char::from(b));
            i += 1;
            continue;
        }
        let c = line
            .get(i + 2..i + 2 + width)
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32)
            .ok_or(PickleError::InvalidLiteral {
                what: "unicode",
                offset,
            })?;
        out.push(c);
        i += 2 + width;
    }
    Ok(out)
}

fn utf8_text(bytes: &[u8], offset: usize) -> Result<Object, PickleError> {
    String::from_utf8(bytes.to_vec())
        .map(Object::Text)
        .map_err(|_| PickleError::InvalidLiteral {
            what: "unicode",
            offset,
        })
}

impl<'a> Unpickler<'a> {
    fn alloc(&mut self, object: Object) -> ObjRef {
        self.arena.push(object);
        self.arena.len() - 1
    }

    fn push(&mut self, object: Object) {
        let r = self.alloc(object);
        self.stack.push(r);
    }

    fn pop(&mut self) -> Result<ObjRef, PickleError> {
        self.stack.pop().ok_or(PickleError::StackUnderflow {
            offset: self.offset,
        })
    }

    fn top(&self) -> Result<ObjRef, PickleError> {
        self.stack.last().copied().ok_or(PickleError::StackUnderflow {
            offset: self.offset,
        })
    }

    fn pop_mark(&mut self) -> Result<Vec<ObjRef>, PickleError> {
        let below = self.metastack.pop().ok_or(PickleError::MissingMark {
            offset: self.offset,
        })?;
        Ok(std::mem::replace(&mut self.stack, below))
    }

    fn memo_get(&mut self, key: u32) -> Result<(), PickleError> {
        let r = *self.memo.get(&key).ok_or(PickleError::MissingMemo(key))?;
        self.stack.push(r);
        Ok(())
    }

    fn memo_put(&mut self, key: u32) -> Result<(), PickleError> {
        let r = self.top()?;
        self.memo.insert(key, r);
        Ok(())
    }

    fn mismatch(&self, expected: &'static str) -> PickleError {
        PickleError::TypeMismatch {
            expected,
            offset: self.offset,
        }
    }

    fn run(&mut self) -> Result<ObjRef, PickleError> {
        use opcode::*;

        loop {
            self.offset = self.reader.pos;
            let op = self.reader.read_u8()?;
            match op {
                PROTO => {
                    let proto = self.reader.read_u8()?;
                    if proto > HIGHEST_PROTOCOL {
                        return Err(PickleError::UnsupportedProtocol(proto));
                    }
                }
                FRAME => {
                    self.reader.read_len_u64()?;
                }
                STOP => return self.pop(),
                MARK => {
                    let below = std::mem::take(&mut self.stack);
                    self.metastack.push(below);
                }
                POP => {
                    if self.stack.is_empty() {
                        self.pop_mark()?;
                    } else {
                        self.pop()?;
                    }
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let r = self.top()?;
                    self.stack.push(r);
                }

                NONE => self.push(Object::None),
                NEWTRUE => self.push(Object::Bool(true)),
                NEWFALSE => self.push(Object::Bool(false)),
                INT => {
                    let line = self.reader.read_line()?;
                    let object = match line {
                        b"00" => Object::Bool(false),
                        b"01" => Object::Bool(true),
                        _ => parse_decimal(line, self.offset)?,
                    };
                    self.push(object);
                }
                LONG => {
                    let line = self.reader.read_line()?;
                    let object = parse_decimal(line, self.offset)?;
                    self.push(object);
                }
                BININT => {
                    let v = i32::from_le_bytes(self.reader.read_array()?);
                    self.push(Object::Int(v as i64));
                }
                BININT1 => {
                    let v = self.reader.read_u8()?;
                    self.push(Object::Int(v as i64));
                }
                BININT2 => {
                    let v = u16::from_le_bytes(self.reader.read_array()?);
                    self.push(Object::Int(v as i64));
                }
                LONG1 => {
                    let n = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_exact(n)?;
                    self.push(decode_long(bytes));
                }
                LONG4 => {
                    let n = i32::from_le_bytes(self.reader.read_array()?);
                    let n = usize::try_from(n).map_err(|_| PickleError::InvalidLiteral {
                        what: "long",
                        offset: self.offset,
                    })?;
                    let bytes = self.reader.read_exact(n)?;
                    self.push(decode_long(bytes));
                }
                FLOAT => {
                    let line = self.reader.read_line()?;
                    let v = line_str(line, "float", self.offset)?
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| PickleError::InvalidLiteral {
                            what: "float",
                            offset: self.offset,
                        })?;
                    self.push(Object::Float(v));
                }
                BINFLOAT => {
                    let v = f64::from_be_bytes(self.reader.read_array()?);
                    self.push(Object::Float(v));
                }

                STRING => {
                    let line = self.reader.read_line()?;
                    let bytes = unquote_string(line, self.offset)?;
                    self.push(Object::Str(bytes));
                }
                BINSTRING => {
                    let n = i32::from_le_bytes(self.reader.read_array()?);
                    let n = usize::try_from(n).map_err(|_| PickleError::InvalidLiteral {
                        what: "string",
                        offset: self.offset,
                    })?;
                    let bytes = self.reader.read_exact(n)?.to_vec();
                    self.push(Object::Str(bytes));
                }
                SHORT_BINSTRING => {
                    let n = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_exact(n)?.to_vec();
                    self.push(Object::Str(bytes));
                }
                UNICODE => {
                    let line = self.reader.read_line()?;
                    let text = decode_raw_unicode(line, self.offset)?;
                    self.push(Object::Text(text));
                }
                BINUNICODE => {
                    let n = self.reader.read_u32()? as usize;
                    let object = utf8_text(self.reader.read_exact(n)?, self.offset)?;
                    self.push(object);
                }
                SHORT_BINUNICODE => {
                    let n = self.reader.read_u8()? as usize;
                    let object = utf8_text(self.reader.read_exact(n)?, self.offset)?;
                    self.push(object);
                }
                BINUNICODE8 => {
                    let n = self.reader.read_len_u64()?;
                    let object = utf8_text(self.reader.read_exact(n)?, self.offset)?;
                    self.push(object);
                }
                BINBYTES => {
                    let n = self.reader.read_u32()? as usize;
                    let bytes = self.reader.read_exact(n)?.to_vec();
                    self.push(Object::Bytes(bytes));
                }
                SHORT_BINBYTES => {
                    let n = self.reader.read_u8()? as usize;
                    let bytes = self.reader.read_exact(n)?.to_vec();
                    self.push(Object::Bytes(bytes));
                }
                BINBYTES8 | BYTEARRAY8 => {
                    let n = self.reader.read_len_u64()?;
                    let bytes = self.reader.read_exact(n)?.to_vec();
                    self.push(Object::Bytes(bytes));
                }

                EMPTY_TUPLE => self.push(Object::Tuple(Vec::new())),
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Object::Tuple(items));
                }
                TUPLE1 => {
                    let a = self.pop()?;
                    self.push(Object::Tuple(vec![a]));
                }
                TUPLE2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Object::Tuple(vec![a, b]));
                }
                TUPLE3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Object::Tuple(vec![a, b, c]));
                }
                EMPTY_LIST => self.push(Object::List(Vec::new())),
                LIST => {
                    let items = self.pop_mark()?;
                    self.push(Object::List(items));
                }
                APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                APPENDS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                EMPTY_DICT => self.push(Object::Dict(Vec::new())),
                DICT => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    self.push(Object::Dict(pairs));
                }
                SETITEM => {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    self.extend_dict(vec![(k, v)])?;
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    self.extend_dict(pairs)?;
                }
                EMPTY_SET => self.push(Object::Set(Vec::new())),
                ADDITEMS => {
                    let items = self.pop_mark()?;
                    let target = self.top()?;
                    match &mut self.arena[target] {
                        Object::Set(set) => set.extend(items),
                        _ => return Err(self.mismatch("set")),
                    }
                }
                FROZENSET => {
                    let items = self.pop_mark()?;
                    self.push(Object::Set(items));
                }

                GLOBAL => {
                    let module = line_str(self.reader.read_line()?, "global", self.offset)?;
                    let name = line_str(self.reader.read_line()?, "global", self.offset)?;
                    self.push(Object::Global { module, name });
                }
                STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (module, name) = match (&self.arena[module], &self.arena[name]) {
                        (Object::Text(m), Object::Text(n)) => (m.clone(), n.clone()),
                        _ => return Err(self.mismatch("module and name strings")),
                    };
                    self.push(Object::Global { module, name });
                }
                REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let object = self.reduce(callable, args)?;
                    self.push(object);
                }
                NEWOBJ => {
                    self.pop()?;
                    let cls = self.pop()?;
                    let object = Object::Opaque(self.describe(cls));
                    self.push(object);
                }
                NEWOBJ_EX => {
                    self.pop()?;
                    self.pop()?;
                    let cls = self.pop()?;
                    let object = Object::Opaque(self.describe(cls));
                    self.push(object);
                }
                BUILD => {
                    let state = self.pop()?;
                    let target = self.top()?;
                    self.build(target, state)?;
                }

                PUT => {
                    let line = self.reader.read_line()?;
                    let key = line_str(line, "memo key", self.offset)?
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| PickleError::InvalidLiteral {
                            what: "memo key",
                            offset: self.offset,
                        })?;
                    self.memo_put(key)?;
                }
                BINPUT => {
                    let key = self.reader.read_u8()? as u32;
                    self.memo_put(key)?;
                }
                LONG_BINPUT => {
                    let key = self.reader.read_u32()?;
                    self.memo_put(key)?;
                }
                MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memo_put(key)?;
                }
                GET => {
                    let line = self.reader.read_line()?;
                    let key = line_str(line, "memo key", self.offset)?
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| PickleError::InvalidLiteral {
                            what: "memo key",
                            offset: self.offset,
                        })?;
                    self.memo_get(key)?;
                }
                BINGET => {
                    let key = self.reader.read_u8()? as u32;
                    self.memo_get(key)?;
                }
                LONG_BINGET => {
                    let key = self.reader.read_u32()?;
                    self.memo_get(key)?;
                }

                other => {
                    return Err(match unsupported_name(other) {
                        Some(name) => PickleError::UnsupportedOpcode {
                            name,
                            offset: self.offset,
                        },
                        None => PickleError::UnknownOpcode {
                            opcode: other,
                            offset: self.offset,
                        },
                    })
                }
            }
        }
    }

    fn pairs(&self, items: Vec<ObjRef>) -> Result<Vec<(ObjRef, ObjRef)>, PickleError> {
        if items.len() % 2 != 0 {
            return Err(self.mismatch("key/value pairs"));
        }
        Ok(items.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect())
    }

    fn extend_list(&mut self, items: Vec<ObjRef>) -> Result<(), PickleError> {
        let target = self.top()?;
        match &mut self.arena[target] {
            Object::List(list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(self.mismatch("list")),
        }
    }

    fn extend_dict(&mut self, pairs: Vec<(ObjRef, ObjRef)>) -> Result<(), PickleError> {
        let target = self.top()?;
        match &mut self.arena[target] {
            Object::Dict(dict) => {
                dict.extend(pairs);
                Ok(())
            }
            _ => Err(self.mismatch("dict")),
        }
    }

    fn describe(&self, r: ObjRef) -> String {
        match &self.arena[r] {
            Object::Global { module, name } => format!("{module}.{name}"),
            _ => "unnamed callable".to_string(),
        }
    }

    fn tuple_items(&self, r: ObjRef) -> Result<&[ObjRef], PickleError> {
        match &self.arena[r] {
            Object::Tuple(items) => Ok(items),
            _ => Err(self.mismatch("argument tuple")),
        }
    }

    fn text_arg(&self, r: ObjRef) -> Option<String> {
        match &self.arena[r] {
            Object::Text(s) => Some(s.clone()),
            Object::Str(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    fn bytes_arg(&self, r: ObjRef) -> Option<&[u8]> {
        match &self.arena[r] {
            Object::Str(b) | Object::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn reduce(&mut self, callable: ObjRef, args: ObjRef) -> Result<Object, PickleError> {
        let (module, name) = match &self.arena[callable] {
            Object::Global { module, name } => (module.clone(), name.clone()),
            _ => return Ok(Object::Opaque(self.describe(callable))),
        };
        let args = self.tuple_items(args)?.to_vec();

        if numpy::is_reconstruct(&module, &name) {
            return Ok(Object::ArrayShell);
        }
        if numpy::is_dtype(&module, &name) {
            let typestr = args
                .first()
                .and_then(|r| self.text_arg(*r))
                .ok_or_else(|| self.mismatch("dtype typestr"))?;
            return Ok(Object::Dtype(Dtype::new(&typestr)));
        }
        if numpy::is_scalar(&module, &name) {
            let dtype = match args.first().map(|r| &self.arena[*r]) {
                Some(Object::Dtype(dtype)) => dtype.clone(),
                _ => return Err(self.mismatch("scalar dtype")),
            };
            let raw = args
                .get(1)
                .and_then(|r| self.bytes_arg(*r))
                .ok_or_else(|| self.mismatch("scalar bytes"))?;
            return Ok(match dtype.kind {
                Some(kind) => Object::Array(numpy::decode_array(kind, dtype.big_endian, &[], false, raw)?),
                None => Object::Opaque(format!("numpy scalar of dtype {}", dtype.typestr)),
            });
        }

        if numpy::is_frombuffer(&module, &name) {
            return self.frombuffer(&args);
        }

        let builtin = module == "__builtin__" || module == "builtins";
        match (module.as_str(), name.as_str()) {
            // Python 3 writes `bytes` as `_codecs.encode(text, 'latin1')` below protocol 3.
            ("_codecs", "encode") => {
                let text = args
                    .first()
                    .and_then(|r| self.text_arg(*r))
                    .ok_or_else(|| self.mismatch("text to encode"))?;
                let encoding = args.get(1).and_then(|r| self.text_arg(*r));
                let bytes = encode_text(&text, encoding.as_deref()).ok_or(
                    PickleError::InvalidLiteral {
                        what: "latin-1 text",
                        offset: self.offset,
                    },
                )?;
                Ok(Object::Bytes(bytes))
            }
            (_, "set" | "frozenset") if builtin => match args.first().map(|r| &self.arena[*r]) {
                None => Ok(Object::Set(Vec::new())),
                Some(Object::List(items) | Object::Tuple(items) | Object::Set(items)) => {
                    Ok(Object::Set(items.clone()))
                }
                Some(_) => Err(self.mismatch("iterable")),
            },
            (_, "bytes" | "bytearray") if builtin => match args.first() {
                None => Ok(Object::Bytes(Vec::new())),
                Some(r) => {
                    if let Some(raw) = self.bytes_arg(*r) {
                        return Ok(Object::Bytes(raw.to_vec()));
                    }
                    let text = self.text_arg(*r).ok_or_else(|| self.mismatch("bytes source"))?;
                    let encoding = args.get(1).and_then(|r| self.text_arg(*r));
                    let bytes = encode_text(&text, encoding.as_deref()).ok_or(
                        PickleError::InvalidLiteral {
                            what: "latin-1 text",
                            offset: self.offset,
                        },
                    )?;
                    Ok(Object::Bytes(bytes))
                }
            },
            _ => Ok(Object::Opaque(format!("{module}.{name}"))),
        }
    }

    fn frombuffer(&self, args: &[ObjRef]) -> Result<Object, PickleError> {
        let [buffer, dtype, shape, order] = args else {
            return Err(PickleError::Numpy("_frombuffer expects 4 arguments".to_string()));
        };
        let dtype = match &self.arena[*dtype] {
            Object::Dtype(dtype) => dtype,
            _ => return Err(PickleError::Numpy("_frombuffer without dtype".to_string())),
        };
        let shape = self.shape(*shape)?;
        let fortran = match self.text_arg(*order).as_deref() {
            Some("C") => false,
            Some("F") => true,
            _ => return Err(PickleError::Numpy("invalid _frombuffer order".to_string())),
        };
        let raw = self
            .bytes_arg(*buffer)
            .ok_or_else(|| PickleError::Numpy("_frombuffer without a buffer".to_string()))?;
        Ok(match dtype.kind {
            Some(kind) => Object::Array(numpy::decode_array(
                kind,
                dtype.big_endian,
                &shape,
                fortran,
                raw,
            )?),
            None => Object::Opaque(format!("numpy array of dtype {}", dtype.typestr)),
        })
    }

    fn shape(&self, r: ObjRef) -> Result<Vec<usize>, PickleError> {
        self.tuple_items(r)?
            .iter()
            .map(|r| match &self.arena[*r] {
                Object::Int(d) => usize::try_from(*d).ok(),
                _ => None,
            })
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| PickleError::Numpy("invalid ndarray shape".to_string()))
    }

    fn build(&mut self, target: ObjRef, state: ObjRef) -> Result<(), PickleError> {
        match &self.arena[target] {
            Object::ArrayShell => {
                let built = self.build_array(state)?;
                self.arena[target] = built;
            }
            Object::Dtype(_) => {
                let order = match &self.arena[state] {
                    Object::Tuple(fields) => fields.get(1).and_then(|r| self.text_arg(*r)),
                    _ => None,
                };
                if let (Some(order), Object::Dtype(dtype)) = (order, &mut self.arena[target]) {
                    dtype.set_byteorder(&order);
                }
            }
            // instance state of anything else is irrelevant; the object stays opaque
            _ => {}
        }
        Ok(())
    }

    fn build_array(&self, state: ObjRef) -> Result<Object, PickleError> {
        let fields = self.tuple_items(state)?;
        // (version, shape, dtype, is_fortran, raw), or without version before numpy 1.0
        let fields = match fields.len() {
            5 => &fields[1..],
            4 => fields,
            _ => return Err(PickleError::Numpy("unexpected ndarray state".to_string())),
        };

        let shape = self.shape(fields[0])?;
        let dtype = match &self.arena[fields[1]] {
            Object::Dtype(dtype) => dtype,
            _ => return Err(PickleError::Numpy("ndarray state without dtype".to_string())),
        };
        let fortran = match &self.arena[fields[2]] {
            Object::Bool(b) => *b,
            Object::Int(i) => *i != 0,
            _ => return Err(PickleError::Numpy("invalid ndarray order flag".to_string())),
        };

        let kind = match dtype.kind {
            Some(kind) => kind,
            None => return Ok(Object::Opaque(format!("numpy array of dtype {}", dtype.typestr))),
        };
        match self.bytes_arg(fields[3]) {
            Some(raw) => Ok(Object::Array(numpy::decode_array(
                kind,
                dtype.big_endian,
                &shape,
                fortran,
                raw,
            )?)),
            // object arrays carry a list of Python objects instead of a buffer
            None => Ok(Object::Opaque("numpy object array".to_string())),
        }
    }
}

/// `None` when a character has no latin-1 code point.
fn encode_text(text: &str, encoding: Option<&str>) -> Option<Vec<u8>> {
    match encoding.map(|e| e.to_ascii_lowercase()) {
        Some(e) if e == "latin1" || e == "latin-1" || e == "iso-8859-1" => {
            text.chars().map(|c| u8::try_from(c).ok()).collect()
        }
        _ => Some(text.as_bytes().to_vec()),
    }
}

/// Turns the arena graph into an owned [`Value`] tree, moving arrays out
/// instead of copying them when they are referenced once.
struct Materializer {
    arena: Vec<Object>,
    array_uses: HashMap<ObjRef, usize>,
}

impl Materializer {
    fn new(arena: Vec<Object>, root: ObjRef) -> Result<Self, PickleError> {
        let expanded = expanded_size(&arena, root, 0, &mut HashMap::new())?;
        if expanded > MAX_EXPANDED_NODES {
            return Err(PickleError::TooLarge(MAX_EXPANDED_NODES));
        }
        let mut array_uses = HashMap::new();
        count_array_uses(&arena, root, 0, &mut array_uses)?;
        Ok(Self { arena, array_uses })
    }

    fn materialize(&mut self, r: ObjRef, depth: usize) -> Result<Value, PickleError> {
        if depth > MAX_OBJECT_DEPTH {
            return Err(PickleError::TooDeep(MAX_OBJECT_DEPTH));
        }
        let value = match &self.arena[r] {
            Object::None => Value::Scalar(Scalar::Null),
            Object::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
            Object::Int(i) => Value::Scalar(Scalar::Int(*i)),
            Object::Float(f) => Value::Scalar(Scalar::Float(*f)),
            Object::Str(bytes) => Value::Scalar(Scalar::Text(match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                Err(_) => bytes.iter().map(|b| char::from(*b)).collect(),
            })),
            Object::Text(s) => Value::Scalar(Scalar::Text(s.clone())),
            Object::Bytes(_) => Value::Opaque("bytes".to_string()),
            Object::Tuple(items) | Object::List(items) | Object::Set(items) => {
                let items = items.clone();
                Value::Sequence(
                    items
                        .into_iter()
                        .map(|item| self.materialize(item, depth + 1))
                        .collect::<Result<_, _>>()?,
                )
            }
            Object::Dict(pairs) => {
                let pairs = pairs.clone();
                let mut entries = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.materialize(k, depth + 1)?;
                    let value = self.materialize(v, depth + 1)?;
                    entries.push((key, value));
                }
                Value::Mapping(entries)
            }
            Object::Global { module, name } => Value::Opaque(format!("{module}.{name}")),
            Object::Dtype(dtype) => Value::Opaque(format!("numpy.dtype[{}]", dtype.typestr)),
            Object::ArrayShell => Value::Opaque("numpy.ndarray".to_string()),
            Object::Opaque(name) => Value::Opaque(name.clone()),
            Object::Array(_) => {
                let remaining = self.array_uses.get_mut(&r).map(|n| {
                    *n = n.saturating_sub(1);
                    *n
                });
                let object = if remaining == Some(0) {
                    std::mem::replace(&mut self.arena[r], Object::None)
                } else {
                    self.arena[r].clone()
                };
                match object {
                    Object::Array(array) => Value::Array(array),
                    _ => Value::Opaque("numpy.ndarray".to_string()),
                }
            }
        };
        Ok(value)
    }
}

/// Size of the tree `r` unfolds into, computed once per arena node.
fn expanded_size(
    arena: &[Object],
    r: ObjRef,
    depth: usize,
    sizes: &mut HashMap<ObjRef, u64>,
) -> Result<u64, PickleError> {
    if depth > MAX_OBJECT_DEPTH {
        return Err(PickleError::TooDeep(MAX_OBJECT_DEPTH));
    }
    if let Some(size) = sizes.get(&r) {
        return Ok(*size);
    }
    let mut size = 1u64;
    match &arena[r] {
        Object::Tuple(items) | Object::List(items) | Object::Set(items) => {
            for item in items {
                size = size.saturating_add(expanded_size(arena, *item, depth + 1, sizes)?);
            }
        }
        Object::Dict(pairs) => {
            for (k, v) in pairs {
                size = size.saturating_add(expanded_size(arena, *k, depth + 1, sizes)?);
                size = size.saturating_add(expanded_size(arena, *v, depth + 1, sizes)?);
            }
        }
        _ => {}
    }
    sizes.insert(r, size);
    Ok(size)
}

fn count_array_uses(
    arena: &[Object],
    r: ObjRef,
    depth: usize,
    uses: &mut HashMap<ObjRef, usize>,
) -> Result<(), PickleError> {
    if depth > MAX_OBJECT_DEPTH {
        return Err(PickleError::TooDeep(MAX_OBJECT_DEPTH));
    }
    match &arena[r] {
        Object::Array(_) => *uses.entry(r).or_insert(0) += 1,
        Object::Tuple(items) | Object::List(items) | Object::Set(items) => {
            for item in items {
                count_array_uses(arena, *item, depth + 1, uses)?;
            }
        }
        Object::Dict(pairs) => {
            for (k, v) in pairs {
                count_array_uses(arena, *k, depth + 1, uses)?;
                count_array_uses(arena, *v, depth + 1, uses)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn push_global(out: &mut Vec<u8>, module: &str, name: &str) {
        out.push(opcode::GLOBAL);
        out.extend_from_slice(module.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
    }

    fn push_short_str(out: &mut Vec<u8>, s: &[u8]) {
        out.push(opcode::SHORT_BINSTRING);
        out.push(s.len() as u8);
        out.extend_from_slice(s);
    }

    /// Writes `numpy.dtype(typestr, 0, 1)` with its BUILD state, the way
    /// numpy 1.x pickles it under protocol 2.
    fn push_dtype(out: &mut Vec<u8>, typestr: &str, order: &str) {
        push_global(out, "numpy", "dtype");
        push_short_str(out, typestr.as_bytes());
        out.extend_from_slice(&[opcode::BININT1, 0, opcode::BININT1, 1, opcode::TUPLE3, opcode::REDUCE]);
        out.push(opcode::MARK);
        out.extend_from_slice(&[opcode::BININT1, 3]);
        push_short_str(out, order.as_bytes());
        out.extend_from_slice(&[opcode::NONE, opcode::NONE, opcode::NONE]);
        out.extend_from_slice(&[opcode::BININT, 0xff, 0xff, 0xff, 0xff]);
        out.extend_from_slice(&[opcode::BININT, 0xff, 0xff, 0xff, 0xff]);
        out.extend_from_slice(&[opcode::BININT1, 0]);
        out.extend_from_slice(&[opcode::TUPLE, opcode::BUILD]);
    }

    fn push_ndarray(out: &mut Vec<u8>, shape: &[u8], typestr: &str, raw: &[u8]) {
        push_global(out, "numpy.core.multiarray", "_reconstruct");
        push_global(out, "numpy", "ndarray");
        out.extend_from_slice(&[opcode::BININT1, 0, opcode::TUPLE1]);
        push_short_str(out, b"b");
        out.extend_from_slice(&[opcode::TUPLE3, opcode::REDUCE]);
        out.push(opcode::MARK);
        out.extend_from_slice(&[opcode::BININT1, 1]);
        out.push(opcode::MARK);
        for d in shape {
            out.extend_from_slice(&[opcode::BININT1, *d]);
        }
        out.push(opcode::TUPLE);
        push_dtype(out, typestr, "<");
        out.push(opcode::NEWFALSE);
        out.push(opcode::BINSTRING);
        out.extend_from_slice(&(raw.len() as i32).to_le_bytes());
        out.extend_from_slice(raw);
        out.extend_from_slice(&[opcode::TUPLE, opcode::BUILD]);
    }

    #[test]
    fn plain_protocol_two_containers() {
        // {'a': [1, 2.5, None], 'b': (True, u'x')}
        let mut data = vec![opcode::PROTO, 2, opcode::EMPTY_DICT, opcode::BINPUT, 0, opcode::MARK];
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 1, b'a']);
        data.extend_from_slice(&[opcode::EMPTY_LIST, opcode::BINPUT, 1, opcode::MARK]);
        data.extend_from_slice(&[opcode::BININT1, 1, opcode::BINFLOAT]);
        data.extend_from_slice(&2.5f64.to_be_bytes());
        data.extend_from_slice(&[opcode::NONE, opcode::APPENDS]);
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 1, b'b']);
        data.extend_from_slice(&[opcode::NEWTRUE, opcode::BINUNICODE, 1, 0, 0, 0, b'x', opcode::TUPLE2]);
        data.extend_from_slice(&[opcode::SETITEMS, opcode::STOP]);

        let value = from_slice(&data).unwrap();
        assert_eq!(
            value,
            Value::Mapping(vec![
                (
                    "a".into(),
                    Value::Sequence(vec![1i64.into(), 2.5f64.into(), Value::Scalar(Scalar::Null)])
                ),
                ("b".into(), Value::Sequence(vec![true.into(), "x".into()])),
            ])
        );
    }

    #[test]
    fn protocol_zero_text_opcodes() {
        // (lp0\nI1\naL5L\naF0.25\naS'it\'s'\naVcafé\na.
        let data = b"(lp0\nI1\naL5L\naF0.25\naS'it\\'s'\naVcaf\\u00e9\naI01\na.";
        let value = from_slice(data).unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![
                1i64.into(),
                5i64.into(),
                0.25f64.into(),
                "it's".into(),
                "café".into(),
                true.into(),
            ])
        );
    }

    #[test]
    fn memo_references_see_later_appends() {
        // l = []; (l, l) with the append happening after the memo put
        let data = [
            opcode::PROTO, 2,
            opcode::EMPTY_LIST, opcode::BINPUT, 0,
            opcode::BINGET, 0,
            opcode::TUPLE2,
            opcode::BINGET, 0,
            opcode::BININT1, 9,
            opcode::APPEND,
            opcode::POP,
            opcode::STOP,
        ];
        let value = from_slice(&data).unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![
                Value::Sequence(vec![9i64.into()]),
                Value::Sequence(vec![9i64.into()]),
            ])
        );
    }

    #[test]
    fn long_opcodes_decode_twos_complement() {
        assert!(matches!(decode_long(&[]), Object::Int(0)));
        assert!(matches!(decode_long(&[0xff]), Object::Int(-1)));
        assert!(matches!(decode_long(&[0x00, 0x01]), Object::Int(256)));
        assert!(matches!(decode_long(&[0xff, 0x00]), Object::Int(255)));
        assert!(matches!(decode_long(&[0x01; 9]), Object::Opaque(_)));
        assert!(matches!(
            decode_long(&[0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Object::Int(-2)
        ));
    }

    #[test]
    fn numpy_arrays_become_typed_arrays() {
        let pixels: Vec<u8> = [0.0f32, 0.5, 1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let labels: Vec<u8> = 7i64.to_le_bytes().to_vec();

        let mut data = vec![opcode::PROTO, 2];
        push_ndarray(&mut data, &[1, 3], "f4", &pixels);
        push_ndarray(&mut data, &[1], "i8", &labels);
        data.extend_from_slice(&[opcode::TUPLE2, opcode::STOP]);

        let value = from_slice(&data).unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![
                arr2(&[[0.0f32, 0.5, 1.0]]).into_dyn().into(),
                arr1(&[7i64]).into_dyn().into(),
            ])
        );
    }

    #[test]
    fn memoized_dtype_keeps_its_build_state() {
        // dtype('>i4') built once, then reused through the memo for a scalar
        let mut data = vec![opcode::PROTO, 2];
        push_global(&mut data, "numpy.core.multiarray", "scalar");
        push_global(&mut data, "numpy", "dtype");
        push_short_str(&mut data, b"i4");
        data.extend_from_slice(&[opcode::BININT1, 0, opcode::BININT1, 1, opcode::TUPLE3, opcode::REDUCE]);
        data.extend_from_slice(&[opcode::BINPUT, 4]);
        data.push(opcode::MARK);
        data.extend_from_slice(&[opcode::BININT1, 3]);
        push_short_str(&mut data, b">");
        data.extend_from_slice(&[opcode::TUPLE, opcode::BUILD, opcode::POP, opcode::BINGET, 4]);
        push_short_str(&mut data, &(-2i32).to_be_bytes());
        data.extend_from_slice(&[opcode::TUPLE2, opcode::REDUCE, opcode::STOP]);

        let value = from_slice(&data).unwrap();
        assert_eq!(
            value,
            Value::from(ndarray::ArrayD::from_elem(ndarray::IxDyn(&[]), -2i32))
        );
    }

    #[test]
    fn codecs_encoded_bytes_feed_arrays() {
        // Python 3, protocol 2: raw buffer written as _codecs.encode(u'\x01\x02', 'latin1')
        let mut data = vec![opcode::PROTO, 2];
        push_global(&mut data, "numpy.core.multiarray", "_reconstruct");
        push_global(&mut data, "numpy", "ndarray");
        data.extend_from_slice(&[opcode::BININT1, 0, opcode::TUPLE1]);
        push_global(&mut data, "_codecs", "encode");
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 1, b'b']);
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 6]);
        data.extend_from_slice(b"latin1");
        data.extend_from_slice(&[opcode::TUPLE2, opcode::REDUCE, opcode::TUPLE3, opcode::REDUCE]);
        data.push(opcode::MARK);
        data.extend_from_slice(&[opcode::BININT1, 1, opcode::BININT1, 2, opcode::TUPLE1]);
        push_dtype(&mut data, "u1", "|");
        data.push(opcode::NEWFALSE);
        push_global(&mut data, "_codecs", "encode");
        // u'\x01\xff' in UTF-8
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 3, 0x01, 0xc3, 0xbf]);
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 6]);
        data.extend_from_slice(b"latin1");
        data.extend_from_slice(&[opcode::TUPLE2, opcode::REDUCE]);
        data.extend_from_slice(&[opcode::TUPLE, opcode::BUILD, opcode::STOP]);

        let value = from_slice(&data).unwrap();
        assert_eq!(value, Value::from(arr1(&[1u8, 255]).into_dyn()));
    }

    fn push_unicode(out: &mut Vec<u8>, s: &str) {
        out.push(opcode::SHORT_BINUNICODE);
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn protocol_five_buffers_become_arrays() {
        // _frombuffer(bytearray(<3 x f4>), dtype('f4'), (3,), 'C')
        let pixels: Vec<u8> = [0.0f32, 0.5, 1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut data = vec![opcode::PROTO, 5];
        push_unicode(&mut data, "numpy.core.numeric");
        push_unicode(&mut data, "_frombuffer");
        data.extend_from_slice(&[opcode::STACK_GLOBAL, opcode::MARK, opcode::BYTEARRAY8]);
        data.extend_from_slice(&(pixels.len() as u64).to_le_bytes());
        data.extend_from_slice(&pixels);
        push_dtype(&mut data, "f4", "<");
        data.extend_from_slice(&[opcode::BININT1, 3, opcode::TUPLE1]);
        push_unicode(&mut data, "C");
        data.extend_from_slice(&[opcode::TUPLE, opcode::REDUCE, opcode::STOP]);

        let value = from_slice(&data).unwrap();
        assert_eq!(value, Value::from(arr1(&[0.0f32, 0.5, 1.0]).into_dyn()));
    }

    fn frombuffer_u8(order: &str) -> Vec<u8> {
        // numpy 2 module path, read-only buffer, logical [[1, 2, 3], [4, 5, 6]] in F order
        let mut data = vec![opcode::PROTO, 5];
        push_unicode(&mut data, "numpy._core.numeric");
        push_unicode(&mut data, "_frombuffer");
        data.extend_from_slice(&[opcode::STACK_GLOBAL, opcode::MARK]);
        data.extend_from_slice(&[opcode::SHORT_BINBYTES, 6, 1, 4, 2, 5, 3, 6]);
        push_dtype(&mut data, "u1", "|");
        data.extend_from_slice(&[opcode::BININT1, 2, opcode::BININT1, 3, opcode::TUPLE2]);
        push_unicode(&mut data, order);
        data.extend_from_slice(&[opcode::TUPLE, opcode::REDUCE, opcode::STOP]);
        data
    }

    #[test]
    fn fortran_buffers_are_column_major() {
        let value = from_slice(&frombuffer_u8("F")).unwrap();
        assert_eq!(value, Value::from(arr2(&[[1u8, 2, 3], [4, 5, 6]]).into_dyn()));

        let value = from_slice(&frombuffer_u8("C")).unwrap();
        assert_eq!(value, Value::from(arr2(&[[1u8, 4, 2], [5, 3, 6]]).into_dyn()));

        assert!(matches!(
            from_slice(&frombuffer_u8("K")),
            Err(PickleError::Numpy(_))
        ));
    }

    #[test]
    fn latin1_rejects_wide_characters() {
        let mut data = vec![opcode::PROTO, 2];
        push_global(&mut data, "_codecs", "encode");
        // u'\u0100' in UTF-8
        data.extend_from_slice(&[opcode::SHORT_BINUNICODE, 2, 0xc4, 0x80]);
        push_unicode(&mut data, "latin1");
        data.extend_from_slice(&[opcode::TUPLE2, opcode::REDUCE, opcode::STOP]);

        assert!(matches!(
            from_slice(&data),
            Err(PickleError::InvalidLiteral { what: "latin-1 text", .. })
        ));
    }

    #[test]
    fn shared_subgraphs_are_bounded() {
        // t0 = []; t[i] = (t[i-1], t[i-1]), so 40 levels unfold into 2^41 nodes
        let mut data = vec![opcode::PROTO, 2, opcode::EMPTY_LIST, opcode::BINPUT, 0];
        for i in 1..=40u8 {
            data.extend_from_slice(&[opcode::BINGET, i - 1, opcode::BINGET, i - 1]);
            data.extend_from_slice(&[opcode::TUPLE2, opcode::BINPUT, i]);
        }
        data.push(opcode::STOP);

        assert!(matches!(from_slice(&data), Err(PickleError::TooLarge(_))));
    }

    #[test]
    fn unknown_classes_stay_opaque() {
        let mut data = vec![opcode::PROTO, 2];
        push_global(&mut data, "copy_reg", "_reconstructor");
        data.extend_from_slice(&[opcode::EMPTY_TUPLE, opcode::REDUCE, opcode::STOP]);
        assert_eq!(
            from_slice(&data).unwrap(),
            Value::Opaque("copy_reg._reconstructor".to_string())
        );
    }

    #[test]
    fn truncated_and_unknown_streams_fail() {
        assert!(matches!(
            from_slice(&[opcode::PROTO, 2, opcode::EMPTY_LIST]),
            Err(PickleError::UnexpectedEof)
        ));
        assert!(matches!(
            from_slice(&[opcode::PROTO, 2, 0xff]),
            Err(PickleError::UnknownOpcode { opcode: 0xff, offset: 2 })
        ));
        assert!(matches!(
            from_slice(&[opcode::PROTO, 9]),
            Err(PickleError::UnsupportedProtocol(9))
        ));
        assert!(matches!(
            from_slice(b"P1\n."),
            Err(PickleError::UnsupportedOpcode { name: "PERSID", .. })
        ));
        assert!(matches!(
            from_slice(&[opcode::PROTO, 2, opcode::APPENDS]),
            Err(PickleError::MissingMark { .. })
        ));
    }

    #[test]
    fn self_referencing_lists_are_rejected() {
        let data = [
            opcode::PROTO, 2,
            opcode::EMPTY_LIST, opcode::BINPUT, 0,
            opcode::BINGET, 0,
            opcode::APPEND,
            opcode::STOP,
        ];
        assert!(matches!(from_slice(&data), Err(PickleError::TooDeep(_))));
    }
}
