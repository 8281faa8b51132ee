use bytemuck::Pod;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use super::PickleError;
use crate::value::{ElementKind, NumericArray};

const MULTIARRAY_MODULES: [&str; 2] = ["numpy.core.multiarray", "numpy._core.multiarray"];
const NUMERIC_MODULES: [&str; 2] = ["numpy.core.numeric", "numpy._core.numeric"];

/// `_reconstruct(ndarray, (0,), b'b')`, filled in by a `BUILD` carrying
/// `(version, shape, dtype, is_fortran, raw)`.
pub fn is_reconstruct(module: &str, name: &str) -> bool {
    name == "_reconstruct" && MULTIARRAY_MODULES.contains(&module)
}

pub fn is_scalar(module: &str, name: &str) -> bool {
    name == "scalar" && MULTIARRAY_MODULES.contains(&module)
}

/// `_frombuffer(buffer, dtype, shape, order)`, written for contiguous
/// arrays from protocol 5 on.
pub fn is_frombuffer(module: &str, name: &str) -> bool {
    name == "_frombuffer" && NUMERIC_MODULES.contains(&module)
}

pub fn is_dtype(module: &str, name: &str) -> bool {
    module == "numpy" && name == "dtype"
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dtype {
    pub typestr: String,
    pub kind: Option<ElementKind>,
    pub big_endian: bool,
}

impl Dtype {
    pub fn new(typestr: &str) -> Self {
        Self {
            typestr: typestr.to_string(),
            kind: ElementKind::from_typestr(typestr),
            big_endian: typestr.starts_with('>'),
        }
    }

    pub fn set_byteorder(&mut self, order: &str) {
        match order {
            ">" => self.big_endian = true,
            "<" => self.big_endian = false,
            "=" => self.big_endian = cfg!(target_endian = "big"),
            // "|": byte order does not apply
            _ => {}
        }
    }
}

fn read_elements<T: Pod>(
    shape: &[usize],
    fortran: bool,
    raw: &[u8],
    swap: bool,
) -> Result<ArrayD<T>, PickleError> {
    let data: Vec<T> = raw
        .chunks_exact(std::mem::size_of::<T>())
        .map(|chunk| {
            let mut v: T = bytemuck::pod_read_unaligned(chunk);
            if swap {
                bytemuck::bytes_of_mut(&mut v).reverse();
            }
            v
        })
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape).set_f(fortran), data)
        .map_err(|err| PickleError::Numpy(format!("cannot shape array as {shape:?}: {err}")))
}

/// Decodes the raw buffer of an array with a known element kind.
pub fn decode_array(
    kind: ElementKind,
    big_endian: bool,
    shape: &[usize],
    fortran: bool,
    raw: &[u8],
) -> Result<NumericArray, PickleError> {
    let count = shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| PickleError::Numpy(format!("array shape {shape:?} overflows")))?;
    let expected = count
        .checked_mul(kind.size())
        .ok_or_else(|| PickleError::Numpy(format!("array shape {shape:?} overflows")))?;
    if raw.len() != expected {
        return Err(PickleError::Numpy(format!(
            "{} bytes of {kind} data for shape {shape:?}, expected {expected}",
            raw.len()
        )));
    }

    let swap = kind.size() > 1 && big_endian != cfg!(target_endian = "big");
    let array = match kind {
        ElementKind::Bool => {
            NumericArray::Bool(read_elements::<u8>(shape, fortran, raw, false)?.mapv(|b| b != 0))
        }
        ElementKind::U8 => NumericArray::U8(read_elements(shape, fortran, raw, swap)?),
        ElementKind::I8 => NumericArray::I8(read_elements(shape, fortran, raw, swap)?),
        ElementKind::U16 => NumericArray::U16(read_elements(shape, fortran, raw, swap)?),
        ElementKind::I16 => NumericArray::I16(read_elements(shape, fortran, raw, swap)?),
        ElementKind::U32 => NumericArray::U32(read_elements(shape, fortran, raw, swap)?),
        ElementKind::I32 => NumericArray::I32(read_elements(shape, fortran, raw, swap)?),
        ElementKind::U64 => NumericArray::U64(read_elements(shape, fortran, raw, swap)?),
        ElementKind::I64 => NumericArray::I64(read_elements(shape, fortran, raw, swap)?),
        ElementKind::F32 => NumericArray::F32(read_elements(shape, fortran, raw, swap)?),
        ElementKind::F64 => NumericArray::F64(read_elements(shape, fortran, raw, swap)?),
    };
    Ok(array)
}
