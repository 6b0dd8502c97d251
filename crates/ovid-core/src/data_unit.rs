//! The self-describing payload codec.
//!
//! Every object is a concatenation of fixed 256-byte data units. Each unit
//! carries the identity the object is expected to have, so a single GET is
//! enough to detect misdirected writes (bucket/key/worker fields), block
//! shuffling and range mis-reads (byte offset), stale reads after an
//! overwrite (write count), and bit corruption or partial writes (the
//! deterministic filler).
//!
//! Unit layout, little-endian integers:
//!
//! | Offset | Length | Field |
//! |---|---|---|
//! | 0 | 16 | bucket name, space-padded, truncated to 16 |
//! | 16 | 12 | key, space-padded |
//! | 28 | 4 | write count (u32) |
//! | 32 | 4 | byte offset of this unit within the object (u32) |
//! | 36 | 4 | worker ID (u32) |
//! | 40 | 8 | generation timestamp, micros since epoch (u64), not validated |
//! | 48 | 208 | filler: byte at file offset i equals i % 256 |
//!
//! The timestamp exists so that rewriting the same (bucket, key, write
//! count) still produces distinguishable bytes for forensic inspection; it
//! is deliberately skipped during validation.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::object::{Object, MAX_KEY_LENGTH};

/// The fixed granule of the object wire format.
pub const DATA_UNIT_SIZE: usize = 256;

/// Stored bucket names are truncated to this many bytes.
pub const MAX_BUCKET_NAME_LENGTH: usize = 16;

/// Write count + byte offset + worker ID + timestamp.
const NUMERIC_HEADER_LENGTH: usize = 20;

/// Unit-local offset where the filler pattern starts.
const FILLER_START: usize = MAX_BUCKET_NAME_LENGTH + MAX_KEY_LENGTH + NUMERIC_HEADER_LENGTH;

/// Generates the full payload for an object: `data_size` bytes of
/// self-describing units carrying the object's current identity.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `data_size` is zero or not a
/// multiple of [`DATA_UNIT_SIZE`].
pub fn generate(data_size: usize, worker_id: u32, bucket: &str, obj: &Object) -> Result<Bytes> {
    if data_size == 0 || data_size % DATA_UNIT_SIZE != 0 {
        return Err(Error::InvalidInput(format!(
            "data size must be a positive multiple of {DATA_UNIT_SIZE}, got {data_size}"
        )));
    }
    let bucket = truncate_bucket(bucket);
    let timestamp_micros = chrono::Utc::now().timestamp_micros().unsigned_abs();

    let mut data = BytesMut::with_capacity(data_size);
    for unit in 0..data_size / DATA_UNIT_SIZE {
        put_data_unit(&mut data, unit, worker_id, bucket, obj, timestamp_micros);
    }
    Ok(data.freeze())
}

fn put_data_unit(
    data: &mut BytesMut,
    unit: usize,
    worker_id: u32,
    bucket: &str,
    obj: &Object,
    timestamp_micros: u64,
) {
    let offset_in_object = unit * DATA_UNIT_SIZE;
    // Space-padded byte fields, so the layout stays fixed regardless of
    // the string contents.
    let mut name_fields = [b' '; MAX_BUCKET_NAME_LENGTH + MAX_KEY_LENGTH];
    name_fields[..bucket.len()].copy_from_slice(bucket.as_bytes());
    let key = obj.key.as_bytes();
    let key = &key[..key.len().min(MAX_KEY_LENGTH)];
    name_fields[MAX_BUCKET_NAME_LENGTH..MAX_BUCKET_NAME_LENGTH + key.len()]
        .copy_from_slice(key);
    data.put_slice(&name_fields);
    data.put_u32_le(obj.write_count);
    data.put_u32_le(offset_in_object as u32);
    data.put_u32_le(worker_id);
    data.put_u64_le(timestamp_micros);
    for i in FILLER_START..DATA_UNIT_SIZE {
        data.put_u8(i as u8);
    }
}

/// Validates an object body against the expected identity.
///
/// Reads exactly `obj.size` bytes from `reader` in 256-byte chunks and
/// checks every decoded field against expectation. All field mismatches of
/// the first bad unit are accumulated into one [`Error::DataCorruption`]
/// report; a short read yields [`Error::Truncated`].
///
/// # Errors
///
/// Returns [`Error::Truncated`], [`Error::DataCorruption`], or
/// [`Error::Transport`] when the body cannot be read.
pub async fn validate<R>(
    worker_id: u32,
    expected_bucket: &str,
    obj: &Object,
    reader: &mut R,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let expected_bucket = truncate_bucket(expected_bucket);
    let mut unit_buf = [0u8; DATA_UNIT_SIZE];
    for unit in 0..obj.size / DATA_UNIT_SIZE {
        let n = read_full(reader, &mut unit_buf).await?;
        if n != DATA_UNIT_SIZE {
            return Err(Error::Truncated {
                expected: DATA_UNIT_SIZE,
                actual: n,
                dump: hex_dump(&unit_buf[..n]),
            });
        }
        validate_data_unit(unit, worker_id, expected_bucket, obj, &unit_buf)?;
    }
    Ok(())
}

fn validate_data_unit(
    unit: usize,
    worker_id: u32,
    expected_bucket: &str,
    obj: &Object,
    data: &[u8],
) -> Result<()> {
    let mut report = String::new();

    let bucket = String::from_utf8_lossy(&data[..MAX_BUCKET_NAME_LENGTH]);
    let bucket = bucket.trim();
    if bucket != expected_bucket {
        let _ = writeln!(
            report,
            "- bucket name is wrong (expected = \"{expected_bucket}\", actual = \"{bucket}\")"
        );
    }

    let key_end = MAX_BUCKET_NAME_LENGTH + MAX_KEY_LENGTH;
    let key = String::from_utf8_lossy(&data[MAX_BUCKET_NAME_LENGTH..key_end]);
    let key = key.trim();
    if key != obj.key {
        let _ = writeln!(
            report,
            "- key is wrong (expected = \"{}\", actual = \"{key}\")",
            obj.key
        );
    }

    let write_count = decode_u32_le(&data[key_end..key_end + 4]);
    if write_count != obj.write_count {
        let _ = writeln!(
            report,
            "- write count is wrong (expected = {}, actual = {write_count})",
            obj.write_count
        );
    }

    let offset_in_object = decode_u32_le(&data[key_end + 4..key_end + 8]);
    let expected_offset = (unit * DATA_UNIT_SIZE) as u32;
    if offset_in_object != expected_offset {
        let _ = writeln!(
            report,
            "- byte offset is wrong (expected = {expected_offset}, actual = {offset_in_object})"
        );
    }

    let actual_worker_id = decode_u32_le(&data[key_end + 8..key_end + 12]);
    if actual_worker_id != worker_id {
        let _ = writeln!(
            report,
            "- worker ID is wrong (expected = {worker_id:#x}, actual = {actual_worker_id:#x})"
        );
    }

    // The timestamp area is informational only and never checked.

    for (i, &byte) in data.iter().enumerate().skip(FILLER_START) {
        if byte != i as u8 {
            let _ = writeln!(
                report,
                "- filler byte at unit offset {i} is wrong (expected = {:#04x}, actual = {byte:#04x})",
                i as u8
            );
            break;
        }
    }

    if report.is_empty() {
        return Ok(());
    }
    let _ = write!(report, "{}{}", hex_dump(data), FIELD_LEGEND);
    Err(Error::DataCorruption { report })
}

fn decode_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn truncate_bucket(bucket: &str) -> &str {
    if bucket.len() <= MAX_BUCKET_NAME_LENGTH {
        return bucket;
    }
    let mut end = MAX_BUCKET_NAME_LENGTH;
    while !bucket.is_char_boundary(end) {
        end -= 1;
    }
    &bucket[..end]
}

/// Reads until `buf` is full or the stream ends, returning the number of
/// bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Error::transport_with_source("failed to read object body", e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Byte-field legend appended to every corruption report.
const FIELD_LEGEND: &str = "\
unit layout: [0,16) bucket name | [16,28) key | [28,32) write count (LE u32)\n\
             [32,36) byte offset (LE u32) | [36,40) worker ID (LE u32)\n\
             [40,48) unix time micros (LE u64, not checked) | [48,256) filler i%256\n";

/// Renders bytes in the classic 16-per-line hex dump format with an ASCII
/// gutter.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 5);
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", line * 16);
        for (i, byte) in chunk.iter().enumerate() {
            if i == 8 {
                out.push(' ');
            }
            let _ = write!(out, " {byte:02x}");
        }
        for i in chunk.len()..16 {
            if i == 8 {
                out.push(' ');
            }
            out.push_str("   ");
        }
        out.push_str("  |");
        for &byte in chunk {
            out.push(if (0x20..0x7f).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn test_object(size: usize, write_count: u32) -> Object {
        Object {
            key: "ov0000000000".to_string(),
            size,
            write_count,
        }
    }

    #[tokio::test]
    async fn generated_payload_validates() {
        let obj = test_object(DATA_UNIT_SIZE * 3, 7);
        let body = generate(obj.size, 0x1234, "bucket-a", &obj).unwrap();
        let mut reader = Cursor::new(body);
        validate(0x1234, "bucket-a", &obj, &mut reader).await.unwrap();
    }

    #[tokio::test]
    async fn long_bucket_names_are_truncated_to_sixteen() {
        let obj = test_object(DATA_UNIT_SIZE, 1);
        let long_bucket = "a-very-long-bucket-name-indeed";
        let body = generate(obj.size, 9, long_bucket, &obj).unwrap();
        assert_eq!(&body[..MAX_BUCKET_NAME_LENGTH], &long_bucket.as_bytes()[..16]);

        // Validation with the original (untruncated) name still succeeds.
        let mut reader = Cursor::new(body);
        validate(9, long_bucket, &obj, &mut reader).await.unwrap();
    }

    #[tokio::test]
    async fn write_count_change_is_detected_in_every_unit() {
        let mut obj = test_object(DATA_UNIT_SIZE * 2, 5);
        let body = generate(obj.size, 3, "b1", &obj).unwrap();
        obj.write_count = 6;

        for unit in 0..2 {
            let mut reader = Cursor::new(body.slice(unit * DATA_UNIT_SIZE..));
            let mut probe = test_object(DATA_UNIT_SIZE, 6);
            probe.key = obj.key.clone();
            let err = validate(3, "b1", &probe, &mut reader).await.unwrap_err();
            match err {
                Error::DataCorruption { report } => {
                    assert!(report.contains("write count is wrong"), "unit {unit}: {report}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn swapped_units_flag_the_byte_offset() {
        let obj = test_object(DATA_UNIT_SIZE * 2, 1);
        let body = generate(obj.size, 0, "b1", &obj).unwrap();
        let mut swapped = Vec::with_capacity(obj.size);
        swapped.extend_from_slice(&body[DATA_UNIT_SIZE..]);
        swapped.extend_from_slice(&body[..DATA_UNIT_SIZE]);

        let mut reader = Cursor::new(swapped);
        let err = validate(0, "b1", &obj, &mut reader).await.unwrap_err();
        match err {
            Error::DataCorruption { report } => {
                assert!(report.contains("byte offset is wrong"), "{report}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn foreign_worker_id_is_detected() {
        let obj = test_object(DATA_UNIT_SIZE, 1);
        let body = generate(obj.size, 0x0a, "b1", &obj).unwrap();
        let mut reader = Cursor::new(body);
        let err = validate(0x0b, "b1", &obj, &mut reader).await.unwrap_err();
        match err {
            Error::DataCorruption { report } => {
                assert!(report.contains("worker ID is wrong"), "{report}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn short_body_is_a_truncation_error() {
        let obj = test_object(DATA_UNIT_SIZE * 2, 1);
        let body = generate(obj.size, 0, "b1", &obj).unwrap();
        let mut reader = Cursor::new(body.slice(..DATA_UNIT_SIZE + 100));
        let err = validate(0, "b1", &obj, &mut reader).await.unwrap_err();
        match err {
            Error::Truncated { expected, actual, .. } => {
                assert_eq!(expected, DATA_UNIT_SIZE);
                assert_eq!(actual, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn corruption_report_accumulates_all_bad_fields_of_one_unit() {
        let obj = test_object(DATA_UNIT_SIZE, 2);
        let body = generate(obj.size, 1, "b1", &obj).unwrap();
        let mut tampered = body.to_vec();
        tampered[0] = b'x'; // bucket
        tampered[28] = 0xff; // write count
        tampered[36] = 0xff; // worker ID
        tampered[100] = 0x00; // filler

        let mut reader = Cursor::new(tampered);
        let err = validate(1, "b1", &obj, &mut reader).await.unwrap_err();
        match err {
            Error::DataCorruption { report } => {
                assert!(report.contains("bucket name is wrong"));
                assert!(report.contains("write count is wrong"));
                assert!(report.contains("worker ID is wrong"));
                assert!(report.contains("filler byte"));
                assert!(report.contains("|"), "report carries a hex dump: {report}");
                assert!(report.contains("unit layout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timestamp_bytes_are_not_validated() {
        let obj = test_object(DATA_UNIT_SIZE, 1);
        let body = generate(obj.size, 0, "b1", &obj).unwrap();
        let mut tampered = body.to_vec();
        for byte in &mut tampered[40..48] {
            *byte = 0xee;
        }
        let mut reader = Cursor::new(tampered);
        validate(0, "b1", &obj, &mut reader).await.unwrap();
    }

    proptest! {
        #[test]
        fn round_trip_for_arbitrary_identities(
            units in 1usize..8,
            worker_id in 0u32..0x10000,
            write_count in 1u32..1000,
            obj_id in 0u64..0xff_ffff,
            bucket in "[a-z][a-z0-9-]{2,30}",
        ) {
            let obj = Object {
                key: format!("ov{obj_id:010x}"),
                size: units * DATA_UNIT_SIZE,
                write_count,
            };
            let body = generate(obj.size, worker_id, &bucket, &obj).unwrap();
            prop_assert_eq!(body.len(), obj.size);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let mut reader = Cursor::new(body);
            rt.block_on(validate(worker_id, &bucket, &obj, &mut reader)).unwrap();
        }
    }
}
