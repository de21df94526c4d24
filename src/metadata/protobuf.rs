//! Schema-less protobuf wire codec.
//!
//! A [`Message`] keeps every field in wire order, so fields this crate has no
//! name for survive a decode/encode cycle unchanged.

use crate::error::{MetadataFormatError, MetadataResult};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum WireValue {
    Varint(u64),
    Fixed64(u64),
    LengthDelimited(Vec<u8>),
    Fixed32(u32),
}

impl WireValue {
    fn wire_type(&self) -> u64 {
        match self {
            WireValue::Varint(_) => 0,
            WireValue::Fixed64(_) => 1,
            WireValue::LengthDelimited(_) => 2,
            WireValue::Fixed32(_) => 5,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Field {
    pub(crate) number: u32,
    pub(crate) value: WireValue,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Message {
    fields: Vec<Field>,
}

impl Message {
    pub(crate) fn parse(bytes: &[u8]) -> MetadataResult<Self> {
        let mut cursor = Cursor { bytes, offset: 0 };
        let mut fields = Vec::new();
        while !cursor.is_empty() {
            let key = cursor.varint()?;
            let number = u32::try_from(key >> 3)
                .ok()
                .filter(|number| *number > 0)
                .ok_or_else(|| MetadataFormatError(format!("invalid protobuf field key {key}")))?;
            let value = match key & 0x7 {
                0 => WireValue::Varint(cursor.varint()?),
                1 => WireValue::Fixed64(u64::from_le_bytes(cursor.array()?)),
                2 => {
                    let len = cursor.varint()?;
                    let len = usize::try_from(len)
                        .map_err(|_| MetadataFormatError(format!("protobuf length {len} too large")))?;
                    WireValue::LengthDelimited(cursor.take(len)?.to_vec())
                }
                5 => WireValue::Fixed32(u32::from_le_bytes(cursor.array()?)),
                wire_type => {
                    return Err(MetadataFormatError(format!(
                        "unsupported protobuf wire type {wire_type} for field {number}"
                    )));
                }
            };
            fields.push(Field { number, value });
        }
        Ok(Self { fields })
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for field in &self.fields {
            write_varint(&mut out, (u64::from(field.number) << 3) | field.value.wire_type());
            match &field.value {
                WireValue::Varint(value) => write_varint(&mut out, *value),
                WireValue::Fixed64(value) => out.extend_from_slice(&value.to_le_bytes()),
                WireValue::LengthDelimited(bytes) => {
                    write_varint(&mut out, bytes.len() as u64);
                    out.extend_from_slice(bytes);
                }
                WireValue::Fixed32(value) => out.extend_from_slice(&value.to_le_bytes()),
            }
        }
        out
    }

    pub(crate) fn has(&self, number: u32) -> bool {
        self.fields.iter().any(|field| field.number == number)
    }

    /// Last occurrence wins, as in protobuf's merge semantics for scalars.
    pub(crate) fn int32(&self, number: u32) -> Option<i32> {
        self.fields.iter().rev().find_map(|field| match field.value {
            WireValue::Varint(value) if field.number == number => Some(value as i32),
            _ => None,
        })
    }

    pub(crate) fn bytes(&self, number: u32) -> Option<&[u8]> {
        self.fields.iter().rev().find_map(|field| match &field.value {
            WireValue::LengthDelimited(bytes) if field.number == number => Some(bytes.as_slice()),
            _ => None,
        })
    }

    pub(crate) fn string(&self, number: u32) -> MetadataResult<Option<String>> {
        self.bytes(number)
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| MetadataFormatError(format!("field {number} is not valid utf8")))
            })
            .transpose()
    }

    pub(crate) fn message(&self, number: u32) -> MetadataResult<Option<Message>> {
        self.bytes(number).map(Message::parse).transpose()
    }

    pub(crate) fn messages(&self, number: u32) -> MetadataResult<Vec<Message>> {
        self.occurrences(number)
            .map(|field| match &field.value {
                WireValue::LengthDelimited(bytes) => Message::parse(bytes),
                _ => Err(MetadataFormatError(format!("field {number} is not a message"))),
            })
            .collect()
    }

    /// Repeated int32 values, accepting both packed and unpacked layouts.
    pub(crate) fn repeated_int32(&self, number: u32) -> MetadataResult<Vec<i32>> {
        let mut values = Vec::new();
        for field in self.occurrences(number) {
            match &field.value {
                WireValue::Varint(value) => values.push(*value as i32),
                WireValue::LengthDelimited(bytes) => {
                    let mut cursor = Cursor { bytes, offset: 0 };
                    while !cursor.is_empty() {
                        values.push(cursor.varint()? as i32);
                    }
                }
                _ => {
                    return Err(MetadataFormatError(format!(
                        "field {number} is not a repeated int32"
                    )));
                }
            }
        }
        Ok(values)
    }

    pub(crate) fn occurrences(&self, number: u32) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |field| field.number == number)
    }

    /// Keep the n-th occurrence of `number` when `keep[n]` is true.
    pub(crate) fn retain_occurrences(&mut self, number: u32, keep: &[bool]) {
        let mut occurrence = 0usize;
        self.fields.retain(|field| {
            if field.number != number {
                return true;
            }
            let kept = keep.get(occurrence).copied().unwrap_or(true);
            occurrence += 1;
            kept
        });
    }

    pub(crate) fn remove(&mut self, number: u32) {
        self.fields.retain(|field| field.number != number);
    }

    /// Replace every occurrence of a repeated int32 with one packed field at
    /// the position of the first occurrence.
    pub(crate) fn set_packed_int32(&mut self, number: u32, values: &[i32]) {
        let position = self.fields.iter().position(|field| field.number == number);
        self.remove(number);
        if values.is_empty() {
            return;
        }
        let mut packed = Vec::new();
        for value in values {
            write_varint(&mut packed, *value as i64 as u64);
        }
        let field = Field {
            number,
            value: WireValue::LengthDelimited(packed),
        };
        match position {
            Some(position) => self.fields.insert(position, field),
            None => self.fields.push(field),
        }
    }

    #[cfg(test)]
    pub(crate) fn push_int32(&mut self, number: u32, value: i32) -> &mut Self {
        self.fields.push(Field {
            number,
            value: WireValue::Varint(value as i64 as u64),
        });
        self
    }

    #[cfg(test)]
    pub(crate) fn push_bytes(&mut self, number: u32, bytes: Vec<u8>) -> &mut Self {
        self.fields.push(Field {
            number,
            value: WireValue::LengthDelimited(bytes),
        });
        self
    }

    #[cfg(test)]
    pub(crate) fn push_message(&mut self, number: u32, message: &Message) -> &mut Self {
        self.push_bytes(number, message.encode())
    }
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Split a varint length prefix from the front of `bytes`.
pub(crate) fn read_delimited(bytes: &[u8]) -> MetadataResult<(&[u8], &[u8])> {
    let mut cursor = Cursor { bytes, offset: 0 };
    let len = cursor.varint()?;
    let len = usize::try_from(len)
        .map_err(|_| MetadataFormatError(format!("delimited length {len} too large")))?;
    let head = cursor.take(len)?;
    Ok((head, &bytes[cursor.offset..]))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn varint(&mut self) -> MetadataResult<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .bytes
                .get(self.offset)
                .ok_or_else(|| MetadataFormatError("truncated varint".to_string()))?;
            self.offset += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MetadataFormatError("varint longer than 10 bytes".to_string()))
    }

    fn take(&mut self, len: usize) -> MetadataResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| MetadataFormatError(format!("truncated field of {len} bytes")))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> MetadataResult<[u8; N]> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}
