use serde_json::Value;

use crate::compression::vbyte::VByte;
use crate::core::error::{Error, Result};

/// Packed JSON node tags. Scalars group into width classes: one byte
/// (null/bool), four bytes (int32), eight bytes (int64/double) — only
/// same-class retags are legal for in-place updates.
pub const TAG_NULL: u8 = 0;
pub const TAG_FALSE: u8 = 1;
pub const TAG_TRUE: u8 = 2;
pub const TAG_INT32: u8 = 3;
pub const TAG_INT64: u8 = 4;
pub const TAG_DOUBLE: u8 = 5;
pub const TAG_STRING: u8 = 6;
pub const TAG_ARRAY: u8 = 7;
pub const TAG_OBJECT: u8 = 8;

/// Serialize a parsed JSON document into the compact tagged form
/// stored in the string heap.
pub fn pack_json(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                if int >= i32::MIN as i64 && int <= i32::MAX as i64 {
                    out.push(TAG_INT32);
                    out.extend_from_slice(&(int as i32).to_le_bytes());
                } else {
                    out.push(TAG_INT64);
                    out.extend_from_slice(&int.to_le_bytes());
                }
            } else {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&number.as_f64().unwrap_or(0.0).to_le_bytes());
            }
        }
        Value::String(text) => {
            out.push(TAG_STRING);
            VByte::encode_u64(out, text.len() as u64);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            VByte::encode_u64(out, items.len() as u64);
            for item in items {
                pack_json(item, out);
            }
        }
        Value::Object(map) => {
            out.push(TAG_OBJECT);
            VByte::encode_u64(out, map.len() as u64);
            for (key, item) in map {
                VByte::encode_u64(out, key.len() as u64);
                out.extend_from_slice(key.as_bytes());
                pack_json(item, out);
            }
        }
    }
}

pub fn pack_json_str(raw: &str) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_str(raw)?;
    let mut out = Vec::new();
    pack_json(&value, &mut out);
    Ok(out)
}

/// Byte length of the node starting at `at`.
fn node_len(blob: &[u8], at: usize) -> Result<usize> {
    let tag = *blob.get(at).ok_or_else(|| Error::corrupt("json node past end"))?;
    Ok(match tag {
        TAG_NULL | TAG_FALSE | TAG_TRUE => 1,
        TAG_INT32 => 5,
        TAG_INT64 | TAG_DOUBLE => 9,
        TAG_STRING => {
            let (len, consumed) = VByte::decode_u64(&blob[at + 1..])?;
            1 + consumed + len as usize
        }
        TAG_ARRAY => {
            let (count, consumed) = VByte::decode_u64(&blob[at + 1..])?;
            let mut cursor = at + 1 + consumed;
            for _ in 0..count {
                cursor += node_len(blob, cursor)?;
            }
            cursor - at
        }
        TAG_OBJECT => {
            let (count, consumed) = VByte::decode_u64(&blob[at + 1..])?;
            let mut cursor = at + 1 + consumed;
            for _ in 0..count {
                let (key_len, key_consumed) = VByte::decode_u64(&blob[cursor..])?;
                cursor += key_consumed + key_len as usize;
                cursor += node_len(blob, cursor)?;
            }
            cursor - at
        }
        other => return Err(Error::corrupt(format!("unknown json tag {}", other))),
    })
}

/// Resolve a dotted key path ("a.b.c") to the byte offset of its node.
pub fn locate(blob: &[u8], path: &str) -> Result<Option<usize>> {
    let mut at = 0usize;
    for segment in path.split('.') {
        let tag = *blob.get(at).ok_or_else(|| Error::corrupt("json node past end"))?;
        if tag != TAG_OBJECT {
            return Ok(None);
        }
        let (count, consumed) = VByte::decode_u64(&blob[at + 1..])?;
        let mut cursor = at + 1 + consumed;
        let mut found = None;
        for _ in 0..count {
            let (key_len, key_consumed) = VByte::decode_u64(&blob[cursor..])?;
            let key_start = cursor + key_consumed;
            let key_end = key_start + key_len as usize;
            let key = blob.get(key_start..key_end)
                .ok_or_else(|| Error::corrupt("json key past end"))?;
            if key == segment.as_bytes() {
                found = Some(key_end);
                break;
            }
            cursor = key_end + node_len(blob, key_end)?;
        }
        match found {
            Some(value_at) => at = value_at,
            None => return Ok(None),
        }
    }
    Ok(Some(at))
}

/// The value a scalar update wants to write.
#[derive(Debug, Clone, Copy)]
pub enum JsonScalar {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
}

fn width_class(tag: u8) -> Option<u8> {
    match tag {
        TAG_NULL | TAG_FALSE | TAG_TRUE => Some(1),
        TAG_INT32 => Some(4),
        TAG_INT64 | TAG_DOUBLE => Some(8),
        _ => None,
    }
}

/// Patch a scalar in place. Fails unless the target exists, is a
/// scalar, and the replacement stays within the same width class.
pub fn inplace_update(blob: &mut [u8], path: &str, scalar: JsonScalar) -> Result<()> {
    let at = locate(blob, path)?
        .ok_or_else(|| Error::schema(format!("json path '{}' not found", path)))?;
    let old_class = width_class(blob[at])
        .ok_or_else(|| Error::schema(format!("json path '{}' is not a scalar", path)))?;

    let (tag, raw): (u8, [u8; 8]) = match scalar {
        JsonScalar::Null => (TAG_NULL, [0; 8]),
        JsonScalar::Bool(false) => (TAG_FALSE, [0; 8]),
        JsonScalar::Bool(true) => (TAG_TRUE, [0; 8]),
        JsonScalar::Int32(v) => {
            let mut raw = [0u8; 8];
            raw[..4].copy_from_slice(&v.to_le_bytes());
            (TAG_INT32, raw)
        }
        JsonScalar::Int64(v) => (TAG_INT64, v.to_le_bytes()),
        JsonScalar::Double(v) => (TAG_DOUBLE, v.to_le_bytes()),
    };
    let new_class = width_class(tag).unwrap();
    if new_class != old_class {
        return Err(Error::schema(format!(
            "json path '{}': {}-byte value cannot replace {}-byte value in place",
            path, new_class, old_class)));
    }
    blob[at] = tag;
    let payload = if new_class == 1 { 0 } else { new_class as usize };
    blob[at + 1..at + 1 + payload].copy_from_slice(&raw[..payload]);
    Ok(())
}

/// Read back a scalar (checker and tests).
pub fn read_scalar(blob: &[u8], at: usize) -> Result<JsonScalar> {
    let tag = *blob.get(at).ok_or_else(|| Error::corrupt("json node past end"))?;
    Ok(match tag {
        TAG_NULL => JsonScalar::Null,
        TAG_FALSE => JsonScalar::Bool(false),
        TAG_TRUE => JsonScalar::Bool(true),
        TAG_INT32 => {
            let raw: [u8; 4] = blob[at + 1..at + 5].try_into()
                .map_err(|_| Error::corrupt("truncated int32"))?;
            JsonScalar::Int32(i32::from_le_bytes(raw))
        }
        TAG_INT64 => {
            let raw: [u8; 8] = blob[at + 1..at + 9].try_into()
                .map_err(|_| Error::corrupt("truncated int64"))?;
            JsonScalar::Int64(i64::from_le_bytes(raw))
        }
        TAG_DOUBLE => {
            let raw: [u8; 8] = blob[at + 1..at + 9].try_into()
                .map_err(|_| Error::corrupt("truncated double"))?;
            JsonScalar::Double(f64::from_le_bytes(raw))
        }
        other => return Err(Error::corrupt(format!("not a scalar tag {}", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_locate() {
        let blob = pack_json_str(r#"{"a": 5, "b": {"c": "deep", "d": 3.5}, "e": [1, 2]}"#).unwrap();
        assert!(locate(&blob, "a").unwrap().is_some());
        assert!(locate(&blob, "b.c").unwrap().is_some());
        assert!(locate(&blob, "b.d").unwrap().is_some());
        assert!(locate(&blob, "b.x").unwrap().is_none());
        assert!(locate(&blob, "e.0").unwrap().is_none());

        let at = locate(&blob, "a").unwrap().unwrap();
        match read_scalar(&blob, at).unwrap() {
            JsonScalar::Int32(v) => assert_eq!(v, 5),
            other => panic!("unexpected scalar {:?}", other),
        }
    }

    #[test]
    fn test_inplace_update_same_class() {
        let mut blob = pack_json_str(r#"{"count": 5}"#).unwrap();
        inplace_update(&mut blob, "count", JsonScalar::Int32(99)).unwrap();
        let at = locate(&blob, "count").unwrap().unwrap();
        match read_scalar(&blob, at).unwrap() {
            JsonScalar::Int32(v) => assert_eq!(v, 99),
            other => panic!("unexpected scalar {:?}", other),
        }
    }

    #[test]
    fn test_inplace_update_class_mismatch() {
        let mut blob = pack_json_str(r#"{"count": 5}"#).unwrap();
        // int32 slot cannot hold a double
        assert!(inplace_update(&mut blob, "count", JsonScalar::Double(1.0)).is_err());
        // But flag can flip within the 1-byte class
        let mut flags = pack_json_str(r#"{"on": true}"#).unwrap();
        inplace_update(&mut flags, "on", JsonScalar::Bool(false)).unwrap();
        inplace_update(&mut flags, "on", JsonScalar::Null).unwrap();
    }

    #[test]
    fn test_int64_double_interchange() {
        let mut blob = pack_json_str(r#"{"big": 10000000000}"#).unwrap();
        inplace_update(&mut blob, "big", JsonScalar::Double(2.5)).unwrap();
        let at = locate(&blob, "big").unwrap().unwrap();
        match read_scalar(&blob, at).unwrap() {
            JsonScalar::Double(v) => assert_eq!(v, 2.5),
            other => panic!("unexpected scalar {:?}", other),
        }
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(pack_json_str("{oops").is_err());
    }
}
