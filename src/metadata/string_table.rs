//! Resolution of metadata string indices against `d2` and the
//! `StringTableTypes` records that prefix `d1`.

use crate::error::{MetadataFormatError, MetadataResult};

use super::protobuf::Message;

const RECORD: u32 = 1;

const RECORD_RANGE: u32 = 1;
const RECORD_PREDEFINED_INDEX: u32 = 2;
const RECORD_OPERATION: u32 = 3;
const RECORD_SUBSTRING_INDEX: u32 = 4;
const RECORD_REPLACE_CHAR: u32 = 5;
const RECORD_STRING: u32 = 6;

const OPERATION_INTERNAL_TO_CLASS_ID: i32 = 1;
const OPERATION_DESC_TO_CLASS_ID: i32 = 2;

/// Strings every Kotlin JVM compiler can reference without storing them.
const PREDEFINED_STRINGS: &[&str] = &[
    "kotlin/Any",
    "kotlin/Nothing",
    "kotlin/Unit",
    "kotlin/Throwable",
    "kotlin/Number",
    "kotlin/Byte",
    "kotlin/Double",
    "kotlin/Float",
    "kotlin/Int",
    "kotlin/Long",
    "kotlin/Short",
    "kotlin/Boolean",
    "kotlin/Char",
    "kotlin/CharSequence",
    "kotlin/String",
    "kotlin/Comparable",
    "kotlin/Enum",
    "kotlin/Array",
    "kotlin/ByteArray",
    "kotlin/DoubleArray",
    "kotlin/FloatArray",
    "kotlin/IntArray",
    "kotlin/LongArray",
    "kotlin/ShortArray",
    "kotlin/BooleanArray",
    "kotlin/CharArray",
    "kotlin/Cloneable",
    "kotlin/Annotation",
    "kotlin/collections/Iterable",
    "kotlin/collections/MutableIterable",
    "kotlin/collections/Collection",
    "kotlin/collections/MutableCollection",
    "kotlin/collections/List",
    "kotlin/collections/MutableList",
    "kotlin/collections/Set",
    "kotlin/collections/MutableSet",
    "kotlin/collections/Map",
    "kotlin/collections/MutableMap",
    "kotlin/collections/Map.Entry",
    "kotlin/collections/MutableMap.MutableEntry",
    "kotlin/collections/Iterator",
    "kotlin/collections/MutableIterator",
    "kotlin/collections/ListIterator",
    "kotlin/collections/MutableListIterator",
];

#[derive(Clone, Debug)]
struct Record {
    /// Exclusive end of the string indices this record covers.
    end: usize,
    string: Option<String>,
    predefined_index: Option<i32>,
    operation: i32,
    substring_index: Vec<i32>,
    replace_char: Vec<i32>,
}

#[derive(Clone, Debug)]
pub(crate) struct StringTable {
    records: Vec<Record>,
    strings: Vec<String>,
}

impl StringTable {
    pub(crate) fn new(types: &Message, strings: Vec<String>) -> MetadataResult<Self> {
        let mut records = Vec::new();
        let mut end = 0usize;
        for record in types.messages(RECORD)? {
            let range = record.int32(RECORD_RANGE).unwrap_or(1);
            let range = usize::try_from(range)
                .map_err(|_| MetadataFormatError(format!("negative string table range {range}")))?;
            end += range;
            records.push(Record {
                end,
                string: record.string(RECORD_STRING)?,
                predefined_index: record.int32(RECORD_PREDEFINED_INDEX),
                operation: record.int32(RECORD_OPERATION).unwrap_or(0),
                substring_index: record.repeated_int32(RECORD_SUBSTRING_INDEX)?,
                replace_char: record.repeated_int32(RECORD_REPLACE_CHAR)?,
            });
        }
        Ok(Self { records, strings })
    }

    pub(crate) fn get(&self, index: i32) -> MetadataResult<String> {
        let position = usize::try_from(index)
            .map_err(|_| MetadataFormatError(format!("negative string index {index}")))?;
        let Some(record) = self.records.iter().find(|record| position < record.end) else {
            return self.raw(position).map(str::to_string);
        };

        let predefined = record
            .predefined_index
            .and_then(|predefined| usize::try_from(predefined).ok())
            .and_then(|predefined| PREDEFINED_STRINGS.get(predefined));
        let mut chars: Vec<char> = match (&record.string, predefined) {
            (Some(string), _) => string.chars().collect(),
            (None, Some(predefined)) => predefined.chars().collect(),
            (None, None) => self.raw(position)?.chars().collect(),
        };

        if let [begin, end, ..] = *record.substring_index.as_slice() {
            if 0 <= begin && begin <= end && end as usize <= chars.len() {
                chars = chars[begin as usize..end as usize].to_vec();
            }
        }
        if let [from, to, ..] = *record.replace_char.as_slice() {
            if let (Some(from), Some(to)) = (char::from_u32(from as u32), char::from_u32(to as u32)) {
                for c in &mut chars {
                    if *c == from {
                        *c = to;
                    }
                }
            }
        }
        match record.operation {
            OPERATION_INTERNAL_TO_CLASS_ID => replace_dollars(&mut chars),
            OPERATION_DESC_TO_CLASS_ID => {
                if chars.len() >= 2 {
                    chars = chars[1..chars.len() - 1].to_vec();
                }
                replace_dollars(&mut chars);
            }
            _ => {}
        }
        Ok(chars.into_iter().collect())
    }

    fn raw(&self, position: usize) -> MetadataResult<&str> {
        self.strings
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| MetadataFormatError(format!("string index {position} out of range")))
    }
}

fn replace_dollars(chars: &mut [char]) {
    for c in chars {
        if *c == '$' {
            *c = '.';
        }
    }
}
