//! Influx line protocol:
//! `<measurement>[,tag=value...] <field=value>[,field=value...] <timestamp-ns>`.

use std::io::{self, Write};

use anyhow::{Result, bail};
use tsload_core::{FieldValue, LineDecoder, Point, PointSerializer, Record};

#[derive(Debug, Default, Clone, Copy)]
pub struct InfluxSerializer;

impl PointSerializer for InfluxSerializer {
    fn serialize(&self, point: &Point, out: &mut dyn Write) -> io::Result<()> {
        if point.fields.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("point `{}` has no fields", point.measurement),
            ));
        }

        write_escaped(out, &point.measurement, b", ")?;
        for (key, value) in &point.tags {
            out.write_all(b",")?;
            write_escaped(out, key, b", =")?;
            out.write_all(b"=")?;
            write_escaped(out, value, b", =")?;
        }

        for (i, (key, value)) in point.fields.iter().enumerate() {
            out.write_all(if i == 0 { b" " } else { b"," })?;
            write_escaped(out, key, b", =")?;
            out.write_all(b"=")?;
            write_field(out, value)?;
        }

        writeln!(out, " {}", point.timestamp_ns)
    }
}

fn write_escaped(out: &mut dyn Write, s: &str, special: &[u8]) -> io::Result<()> {
    let bytes = s.as_bytes();
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if special.contains(b) {
            out.write_all(&bytes[start..i])?;
            out.write_all(&[b'\\', *b])?;
            start = i + 1;
        }
    }
    out.write_all(&bytes[start..])
}

fn write_field(out: &mut dyn Write, value: &FieldValue) -> io::Result<()> {
    match value {
        FieldValue::Float(v) => write!(out, "{v}"),
        FieldValue::Int(v) => write!(out, "{v}i"),
        FieldValue::Bool(v) => write!(out, "{v}"),
        FieldValue::Str(v) => {
            out.write_all(b"\"")?;
            write_escaped(out, v, b"\"\\")?;
            out.write_all(b"\"")
        }
    }
}

/// Counts one metric per field and keys records by their series
/// (measurement plus tags).
#[derive(Debug, Default, Clone, Copy)]
pub struct InfluxLineDecoder;

impl LineDecoder for InfluxLineDecoder {
    fn decode(&self, line: Vec<u8>) -> Result<Record> {
        let parts = split_unescaped(&line, b' ');
        if parts.len() != 3 {
            bail!(
                "expected 3 space-separated parts in influx line, found {}",
                parts.len()
            );
        }
        if parts.iter().any(|(start, end)| start == end) {
            bail!("empty section in influx line");
        }

        let (fields_start, fields_end) = parts[1];
        let metrics = split_unescaped(&line[fields_start..fields_end], b',').len() as u64;
        let key_len = parts[0].1;

        Ok(Record::new(line, metrics).with_key_len(key_len))
    }
}

/// Ranges between unescaped `sep` bytes. Backslash escapes the next byte and
/// separators inside double-quoted strings are ignored.
fn split_unescaped(s: &[u8], sep: u8) -> Vec<(usize, usize)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;

    for (i, &b) in s.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => quoted = !quoted,
            _ if b == sep && !quoted => {
                parts.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((start, s.len()));

    parts
}

#[cfg(test)]
#[path = "influx_tests.rs"]
mod tests;
