//! Decoding and re-encoding of the `kotlin.Metadata` annotation payload.

pub(crate) mod bit_encoding;
pub(crate) mod class_mapper;
pub(crate) mod filter;
pub(crate) mod protobuf;
pub(crate) mod schema;
pub(crate) mod string_table;

use crate::error::MetadataResult;

use self::bit_encoding::{Encoding, decode_bytes, encode_bytes};
use self::protobuf::{Message, read_delimited, write_varint};
use self::string_table::StringTable;

pub(crate) const METADATA_DESCRIPTOR: &str = "Lkotlin/Metadata;";

/// The `k` element of `kotlin.Metadata`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MetadataKind {
    Class,
    File,
    SyntheticClass,
    MultiFileClassFacade,
    MultiFileClassPart,
    Unknown(i32),
}

impl MetadataKind {
    pub(crate) fn from_code(code: i32) -> Self {
        match code {
            1 => MetadataKind::Class,
            2 => MetadataKind::File,
            3 => MetadataKind::SyntheticClass,
            4 => MetadataKind::MultiFileClassFacade,
            5 => MetadataKind::MultiFileClassPart,
            other => MetadataKind::Unknown(other),
        }
    }

    pub(crate) fn code(self) -> i32 {
        match self {
            MetadataKind::Class => 1,
            MetadataKind::File => 2,
            MetadataKind::SyntheticClass => 3,
            MetadataKind::MultiFileClassFacade => 4,
            MetadataKind::MultiFileClassPart => 5,
            MetadataKind::Unknown(code) => code,
        }
    }

    /// Only class and package payloads carry declarations this crate edits.
    pub(crate) fn is_supported(self) -> bool {
        matches!(
            self,
            MetadataKind::Class | MetadataKind::File | MetadataKind::MultiFileClassPart
        )
    }
}

/// Decoded `d1`/`d2` pair: the string table and the declaration container
/// (a `Class` message for classes, a `Package` message for file facades).
#[derive(Clone, Debug)]
pub(crate) struct KotlinMetadata {
    pub(crate) kind: MetadataKind,
    pub(crate) strings: StringTable,
    pub(crate) container: Message,
    string_table_types: Vec<u8>,
    encoding: Encoding,
}

impl KotlinMetadata {
    pub(crate) fn decode(kind: MetadataKind, d1: &[String], d2: &[String]) -> MetadataResult<Self> {
        let (bytes, encoding) = decode_bytes(d1)?;
        let (types, rest) = read_delimited(&bytes)?;
        let types_message = Message::parse(types)?;
        Ok(Self {
            kind,
            strings: StringTable::new(&types_message, d2.to_vec())?,
            container: Message::parse(rest)?,
            string_table_types: types.to_vec(),
            encoding,
        })
    }

    /// `d1` strings for the current container, packed the way they were read.
    pub(crate) fn encode(&self) -> Vec<String> {
        let mut bytes = Vec::new();
        write_varint(&mut bytes, self.string_table_types.len() as u64);
        bytes.extend_from_slice(&self.string_table_types);
        bytes.extend_from_slice(&self.container.encode());
        encode_bytes(&bytes, self.encoding)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `d1` for a container message with an empty string table.
    pub(crate) fn encode_d1(container: &Message) -> Vec<String> {
        let mut bytes = vec![0];
        bytes.extend_from_slice(&container.encode());
        encode_bytes(&bytes, Encoding::Utf8)
    }

    #[test]
    fn decode_then_encode_is_stable() {
        let mut container = Message::default();
        container.push_int32(3, 0).push_bytes(7, vec![1, 2]);
        let d1 = encode_d1(&container);
        let d2 = vec!["com/example/Foo".to_string()];

        let metadata = KotlinMetadata::decode(MetadataKind::Class, &d1, &d2).expect("decode");

        assert_eq!(metadata.container, container);
        assert_eq!(metadata.strings.get(0).expect("string"), "com/example/Foo");
        assert_eq!(metadata.encode(), d1);
    }

    #[test]
    fn legacy_encoding_is_kept() {
        let mut container = Message::default();
        container.push_int32(3, 0);
        let mut bytes = vec![0];
        bytes.extend_from_slice(&container.encode());
        let d1 = encode_bytes(&bytes, Encoding::SevenBit { marker: false });

        let metadata = KotlinMetadata::decode(MetadataKind::File, &d1, &[]).expect("decode");

        assert_eq!(metadata.encode(), d1);
    }

    #[test]
    fn kinds_round_trip_codes() {
        for code in 1..=6 {
            assert_eq!(MetadataKind::from_code(code).code(), code);
        }
        assert!(MetadataKind::from_code(2).is_supported());
        assert!(!MetadataKind::from_code(3).is_supported());
        assert!(!MetadataKind::from_code(4).is_supported());
        assert!(!MetadataKind::from_code(9).is_supported());
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let d1 = encode_bytes(&[5, 1], Encoding::Utf8);

        assert!(KotlinMetadata::decode(MetadataKind::Class, &d1, &[]).is_err());
    }
}
