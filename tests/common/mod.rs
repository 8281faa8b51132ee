//! Writes small protocol-2 pickles shaped like the MNIST archive: a tuple of
//! three `(features, labels)` pairs of numpy arrays.

#![allow(dead_code)]

use std::{io::Write, path::Path};

use flate2::{write::GzEncoder, Compression as GzLevel};
use mnist_dump::pickle::opcode::*;

pub trait Element: Copy {
    const TYPESTR: &'static str;
    fn put_le(self, out: &mut Vec<u8>);
}

impl Element for f32 {
    const TYPESTR: &'static str = "f4";
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Element for i64 {
    const TYPESTR: &'static str = "i8";
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Element for u8 {
    const TYPESTR: &'static str = "u1";
    fn put_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }
}

pub struct PickleWriter {
    buf: Vec<u8>,
}

impl Default for PickleWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PickleWriter {
    pub fn new() -> Self {
        Self {
            buf: vec![PROTO, 2],
        }
    }

    pub fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.buf.push(GLOBAL);
        self.buf.extend_from_slice(module.as_bytes());
        self.buf.push(b'\n');
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(b'\n');
        self
    }

    pub fn short_str(&mut self, s: &str) -> &mut Self {
        self.buf.push(SHORT_BINSTRING);
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn int(&mut self, v: i32) -> &mut Self {
        self.buf.push(BININT);
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.buf.push(opcode);
        self
    }

    /// `numpy.dtype(typestr, 0, 1)` followed by its BUILD state.
    pub fn dtype(&mut self, typestr: &str) -> &mut Self {
        self.global("numpy", "dtype")
            .short_str(typestr)
            .int(0)
            .int(1)
            .op(TUPLE3)
            .op(REDUCE)
            .op(MARK)
            .int(3)
            .short_str("<")
            .op(NONE)
            .op(NONE)
            .op(NONE)
            .int(-1)
            .int(-1)
            .int(0)
            .op(TUPLE)
            .op(BUILD)
    }

    pub fn ndarray<T: Element>(&mut self, shape: &[usize], data: &[T]) -> &mut Self {
        assert_eq!(shape.iter().product::<usize>(), data.len());
        let mut raw = Vec::with_capacity(data.len() * 8);
        for v in data {
            v.put_le(&mut raw);
        }

        self.global("numpy.core.multiarray", "_reconstruct")
            .global("numpy", "ndarray")
            .int(0)
            .op(TUPLE1)
            .short_str("b")
            .op(TUPLE3)
            .op(REDUCE)
            .op(MARK)
            .int(1)
            .op(MARK);
        for d in shape {
            self.int(*d as i32);
        }
        self.op(TUPLE).dtype(T::TYPESTR).op(NEWFALSE);
        self.buf.push(BINSTRING);
        self.buf.extend_from_slice(&(raw.len() as i32).to_le_bytes());
        self.buf.extend_from_slice(&raw);
        self.op(TUPLE).op(BUILD)
    }

    /// An instance of a class the dumper has no encoding for.
    pub fn opaque(&mut self, module: &str, name: &str) -> &mut Self {
        self.global(module, name).op(EMPTY_TUPLE).op(REDUCE)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.buf.push(STOP);
        std::mem::take(&mut self.buf)
    }
}

/// One partition of `rows` feature vectors of `cols` pixels each.
pub struct Fixture {
    pub cols: usize,
    pub features: Vec<f32>,
    pub labels: Vec<i64>,
}

impl Fixture {
    pub fn new(cols: usize, features: Vec<f32>, labels: Vec<i64>) -> Self {
        assert_eq!(features.len(), cols * labels.len());
        Self {
            cols,
            features,
            labels,
        }
    }

    /// Deterministic pixels in `[0, 1)` with labels cycling through the digits.
    pub fn synthetic(rows: usize, cols: usize) -> Self {
        let features = (0..rows * cols).map(|i| (i % 256) as f32 / 256.0).collect();
        let labels = (0..rows as i64).map(|i| i % 10).collect();
        Self::new(cols, features, labels)
    }

    pub fn rows(&self) -> usize {
        self.labels.len()
    }

    pub fn write(&self, out: &mut PickleWriter) {
        out.ndarray(&[self.rows(), self.cols], &self.features)
            .ndarray(&[self.rows()], &self.labels)
            .op(TUPLE2);
    }
}

pub fn mnist_pickle(training: &Fixture, validation: &Fixture, test: &Fixture) -> Vec<u8> {
    let mut out = PickleWriter::new();
    training.write(&mut out);
    validation.write(&mut out);
    test.write(&mut out);
    out.op(TUPLE3).finish()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

pub fn write_gz(path: &Path, pickle: &[u8]) {
    std::fs::write(path, gzip(pickle)).expect("write source");
}
