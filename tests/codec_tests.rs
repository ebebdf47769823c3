use mpacklog::codec::LogReader;
use mpacklog::{
    decode_stream, encode, read_log, record, DecodeErrorKind, Error, Float, StreamDecoder, Value,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

fn round_trip(value: &Value) -> Value {
    let bytes = encode(value);
    let mut stream = decode_stream(&bytes);
    let decoded = stream
        .next()
        .expect("one value")
        .expect("well-formed encoding");
    assert!(stream.next().is_none(), "trailing data after {:?}", value);
    assert_eq!(stream.consumed(), bytes.len());
    decoded
}

#[test]
fn test_integer_boundaries() {
    let values: Vec<Value> = vec![
        Value::from(0),
        Value::from(-1),
        Value::from(-32),
        Value::from(-33),
        Value::from(127),
        Value::from(128),
        Value::from(i8::MIN),
        Value::from(i16::MIN),
        Value::from(i32::MIN),
        Value::from(i32::MIN as i64 - 1),
        Value::from(u8::MAX),
        Value::from(u16::MAX),
        Value::from(u16::MAX as u32 + 1),
        Value::from(u32::MAX),
        Value::from(u32::MAX as u64 + 1),
        Value::from(i64::MIN),
        Value::from(i64::MAX),
        Value::from(u64::MAX),
    ];
    for value in &values {
        assert_eq!(&round_trip(value), value);
    }
}

#[test]
fn test_float_round_trip_is_bit_exact() {
    let values = [
        Value::from(0.0f64),
        Value::from(-0.0f64),
        Value::from(f64::NAN),
        Value::from(f64::INFINITY),
        Value::from(f64::NEG_INFINITY),
        Value::from(f64::MIN_POSITIVE),
        Value::from(f64::MAX),
        Value::from(f32::NAN),
        Value::from(-0.0f32),
        Value::from(f32::MAX),
        Value::from(3.14f32),
    ];
    for value in &values {
        let decoded = round_trip(value);
        assert_eq!(&decoded, value);
        if let (Value::Float(Float::F64(a)), Value::Float(Float::F64(b))) = (&decoded, value) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
    // Width is preserved: an f32 stays an f32.
    assert!(matches!(round_trip(&Value::from(1.5f32)), Value::Float(Float::F32(_))));
}

#[test]
fn test_string_and_bytes_lengths() {
    for len in [0usize, 31, 32, 255, 256, 65_535, 65_536] {
        let s = Value::from("é".repeat(len / 2) + &"a".repeat(len % 2));
        assert_eq!(round_trip(&s), s);
        let b = Value::Bytes(vec![0xab; len]);
        assert_eq!(round_trip(&b), b);
    }
}

#[test]
fn test_deeply_nested_structures() {
    let mut value = record! { "leaf" => Value::Null };
    for depth in 0..200 {
        value = if depth % 2 == 0 {
            Value::Array(vec![value, Value::from(depth)])
        } else {
            record! { "child" => value, "depth" => depth }
        };
    }
    assert_eq!(round_trip(&value), value);
}

#[test]
fn test_large_containers() {
    let array = Value::Array((0..70_000).map(Value::from).collect());
    assert_eq!(round_trip(&array), array);

    let map: BTreeMap<String, Value> = (0..20)
        .map(|i| (format!("key{}", i), Value::from(i)))
        .collect();
    let map = Value::Map(map);
    assert_eq!(round_trip(&map), map);
}

#[test]
fn test_record_with_every_variant() {
    let value = record! {
        "null" => Value::Null,
        "bool" => false,
        "int" => -12345,
        "uint" => 12345u32,
        "f32" => 0.25f32,
        "f64" => -1e300,
        "str" => "text",
        "bytes" => &b"\x00\x01\xff"[..],
        "array" => vec![Value::from(1), Value::from("two"), Value::Null],
        "map" => record! { "nested" => record! {} },
    };
    assert_eq!(round_trip(&value), value);
}

#[test]
fn test_encoding_is_deterministic() {
    let a: Value = vec![("b", 2), ("a", 1), ("c", 3)].into_iter().collect();
    let b: Value = vec![("c", 3), ("a", 1), ("b", 2)].into_iter().collect();
    assert_eq!(encode(&a), encode(&b));
}

#[test]
fn test_concatenated_values_decode_in_order() {
    let records: Vec<Value> = (0..10).map(|i| record! { "foo" => i }).collect();
    let bytes: Vec<u8> = records.iter().flat_map(encode).collect();
    let decoded: Vec<Value> = decode_stream(&bytes).collect::<Result<_, _>>().unwrap();
    assert_eq!(decoded, records);
}

#[test]
fn test_truncation_at_every_byte() {
    let first = encode(&record! { "x" => 1 });
    let second = encode(&record! { "x" => 2, "label" => "second" });
    let mut bytes = first.clone();
    bytes.extend_from_slice(&second);

    for cut in 0..=bytes.len() {
        let mut stream = decode_stream(&bytes[..cut]);
        let decoded: Vec<Value> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        let expected = if cut == bytes.len() {
            2
        } else if cut >= first.len() {
            1
        } else {
            0
        };
        assert_eq!(decoded.len(), expected, "cut at {}", cut);
        let boundary = if expected == 2 {
            bytes.len()
        } else if expected == 1 {
            first.len()
        } else {
            0
        };
        assert_eq!(stream.consumed(), boundary);
        assert_eq!(stream.remainder(), &bytes[boundary..cut]);
    }
}

#[test]
fn test_malformed_byte_stops_decoding() {
    let mut bytes = encode(&record! { "x" => 1 });
    let bad_at = bytes.len();
    bytes.push(0xc1);
    bytes.extend(encode(&record! { "x" => 2 }));

    let results: Vec<_> = decode_stream(&bytes).collect();
    assert_eq!(results.len(), 2, "decoding must not resynchronize");
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.offset, bad_at as u64);
    assert_eq!(err.kind, DecodeErrorKind::ReservedMarker(0xc1));
}

#[test]
fn test_stream_decoder_byte_at_a_time() {
    let records: Vec<Value> = (0..5)
        .map(|i| record! { "i" => i, "payload" => "x".repeat(40 * i) })
        .collect();
    let bytes: Vec<u8> = records.iter().flat_map(encode).collect();

    let mut decoder = StreamDecoder::new();
    let mut decoded = Vec::new();
    for byte in &bytes {
        decoder.feed(std::slice::from_ref(byte));
        while let Some(value) = decoder.next_value().unwrap() {
            decoded.push(value);
        }
    }
    assert_eq!(decoded, records);
    assert_eq!(decoder.buffered(), 0);
    assert_eq!(decoder.offset(), bytes.len() as u64);
}

#[test]
fn test_read_log_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.mpack");
    let records: Vec<Value> = (0..100).map(|i| record! { "foo" => i }).collect();
    fs::write(&path, records.iter().flat_map(encode).collect::<Vec<u8>>()).unwrap();

    let read: Vec<Value> = read_log(&path).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(read, records);
}

#[test]
fn test_read_log_ignores_incomplete_tail() {
    let mut bytes = encode(&record! { "a" => 1 });
    let tail = encode(&record! { "b" => 2 });
    bytes.extend_from_slice(&tail[..tail.len() - 1]);

    let read: Vec<Value> = LogReader::with_chunk_size(Cursor::new(bytes), 3)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(read, vec![record! { "a" => 1 }]);
}

#[test]
fn test_read_log_reports_corruption_offset() {
    let mut bytes = encode(&record! { "a" => 1 });
    let bad_at = bytes.len();
    bytes.extend_from_slice(&[0xd5, 0x00, 0x00, 0x00]);

    let results: Vec<_> = LogReader::with_chunk_size(Cursor::new(bytes), 2).collect();
    assert_eq!(results.len(), 2);
    match &results[1] {
        Err(Error::Decode(e)) => {
            assert_eq!(e.offset, bad_at as u64);
            assert_eq!(e.kind, DecodeErrorKind::UnsupportedExtension(0xd5));
        }
        other => panic!("expected a decode error, got {:?}", other),
    }
}

#[test]
fn test_empty_log() {
    assert!(decode_stream(&[]).next().is_none());
    assert!(LogReader::new(Cursor::new(Vec::<u8>::new())).next().is_none());
}
