//! Counter records and the arithmetic done on them.
//!
//! A [`CounterRecord`] is a copy of one provider record taken at read time.
//! Records are never shared between snapshot entities: they are cloned when
//! handed from one collector to another and dropped with their owner.

use serde::{Deserialize, Serialize};

/// Longest record or field name the provider hands out, in bytes.
pub const KSTAT_STRLEN: usize = 31;

/// Number of per-origin buckets in an interrupt record
/// (hard, soft, watchdog, spurious, multiple-service).
pub const INTR_BUCKETS: usize = 5;

/// Tick fields summed by [`cpu_ticks_delta`], in order.
pub const CPU_TICK_FIELDS: [&str; 4] = [
    "cpu_ticks_idle",
    "cpu_ticks_user",
    "cpu_ticks_kernel",
    "cpu_ticks_wait",
];

/// Shape of a record's payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Raw,
    #[default]
    Named,
    Intr,
}

/// Identity of a record in the provider's chain: `module:instance:name`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub module: String,
    pub instance: i32,
    pub name: String,
    pub kind: RecordKind,
}

impl RecordId {
    pub fn new(
        module: impl Into<String>,
        instance: i32,
        name: impl Into<String>,
        kind: RecordKind,
    ) -> Self {
        Self {
            module: module.into(),
            instance,
            name: truncate_name(name.into()),
            kind,
        }
    }

    pub fn named(module: impl Into<String>, instance: i32, name: impl Into<String>) -> Self {
        Self::new(module, instance, name, RecordKind::Named)
    }

    pub fn intr(module: impl Into<String>, instance: i32, name: impl Into<String>) -> Self {
        Self::new(module, instance, name, RecordKind::Intr)
    }

    /// Matches a lookup key; `None` acts as a wildcard like in `kstat_lookup`.
    pub fn matches(&self, module: &str, instance: Option<i32>, name: Option<&str>) -> bool {
        self.module == module
            && instance.is_none_or(|i| i == self.instance)
            && name.is_none_or(|n| n == self.name)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.module, self.instance, self.name)
    }
}

/// Cuts a name down to [`KSTAT_STRLEN`] bytes on a char boundary.
pub fn truncate_name(mut name: String) -> String {
    if name.len() > KSTAT_STRLEN {
        let mut end = KSTAT_STRLEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// Value of a single named field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    /// Text; never summed.
    Str(String),
}

impl FieldValue {
    /// Numeric value reinterpreted as unsigned 64-bit; `None` for text.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::Int32(v) => Some(v as u64),
            FieldValue::UInt32(v) => Some(v as u64),
            FieldValue::Int64(v) => Some(v as u64),
            FieldValue::UInt64(v) => Some(v),
            FieldValue::Str(_) => None,
        }
    }

    /// Numeric value reinterpreted as signed 64-bit; `None` for text.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_u64().map(|v| v as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn add_assign(&mut self, other: &FieldValue) {
        match (self, other) {
            (FieldValue::Int32(a), FieldValue::Int32(b)) => *a = a.wrapping_add(*b),
            (FieldValue::UInt32(a), FieldValue::UInt32(b)) => *a = a.wrapping_add(*b),
            (FieldValue::Int64(a), FieldValue::Int64(b)) => *a = a.wrapping_add(*b),
            (FieldValue::UInt64(a), FieldValue::UInt64(b)) => *a = a.wrapping_add(*b),
            _ => {}
        }
    }
}

/// One `name = value` pair of a named record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: FieldValue,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: truncate_name(name.into()),
            value,
        }
    }
}

/// Payload of a record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CounterData {
    /// No backing buffer.
    #[default]
    Empty,
    Named(Vec<NamedValue>),
    Intr([u64; INTR_BUCKETS]),
    Raw(Vec<u8>),
}

/// An owned copy of a provider record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub id: RecordId,
    /// Provider time the record was created.
    pub crtime: i64,
    /// Provider time the data was captured.
    pub snaptime: i64,
    pub data: CounterData,
}

impl CounterRecord {
    pub fn new(id: RecordId, data: CounterData) -> Self {
        Self {
            id,
            crtime: 0,
            snaptime: 0,
            data,
        }
    }

    /// True when the record carries no data.
    pub fn is_empty(&self) -> bool {
        match &self.data {
            CounterData::Empty => true,
            CounterData::Named(fields) => fields.is_empty(),
            CounterData::Raw(buf) => buf.is_empty(),
            CounterData::Intr(_) => false,
        }
    }

    /// Looks up a named field (`kstat_data_lookup`).
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        match &self.data {
            CounterData::Named(fields) => fields.iter().find(|f| f.name == name).map(|f| &f.value),
            _ => None,
        }
    }

    /// Numeric field value, 0 when missing or textual.
    pub fn value(&self, name: &str) -> u64 {
        self.field(name).and_then(FieldValue::as_u64).unwrap_or(0)
    }

    /// Sum over all interrupt buckets; 0 for non-interrupt records.
    pub fn intr_total(&self) -> u64 {
        match &self.data {
            CounterData::Intr(buckets) => buckets.iter().fold(0u64, |acc, v| acc.wrapping_add(*v)),
            _ => 0,
        }
    }
}

/// Deep copy of `src`. A source without data yields an empty copy.
pub fn copy(src: &CounterRecord) -> CounterRecord {
    src.clone()
}

/// Adds the numeric content of `src` into `dst`.
///
/// An empty `dst` becomes a copy of `src`. Text fields are left alone and raw
/// buffers have no defined sum, so they are left untouched as well. Both
/// records must share a schema; fields are paired by position.
pub fn accumulate(src: &CounterRecord, dst: &mut CounterRecord) {
    if dst.is_empty() {
        *dst = copy(src);
        return;
    }

    match (&mut dst.data, &src.data) {
        (CounterData::Named(d), CounterData::Named(s)) => {
            debug_assert_eq!(d.len(), s.len(), "accumulating records of different shape");
            for (df, sf) in d.iter_mut().zip(s) {
                debug_assert_eq!(df.name, sf.name);
                df.value.add_assign(&sf.value);
            }
        }
        (CounterData::Intr(d), CounterData::Intr(s)) => {
            for (dv, sv) in d.iter_mut().zip(s) {
                *dv = dv.wrapping_add(*sv);
            }
        }
        _ => {}
    }
    dst.snaptime = dst.snaptime.max(src.snaptime);
}

/// Change of a named counter between two reads.
///
/// With no usable `old` the new value is returned as is, so a first sample
/// counts from zero. Counter resets wrap and are not corrected.
pub fn field_delta(old: Option<&CounterRecord>, new: &CounterRecord, name: &str) -> u64 {
    let current = new.value(name);
    match old {
        Some(old) if !old.is_empty() => current.wrapping_sub(old.value(name)),
        _ => current,
    }
}

/// Total ticks (idle + user + kernel + wait) elapsed between two `sys` records.
pub fn cpu_ticks_delta(old: Option<&CounterRecord>, new: &CounterRecord) -> u64 {
    CPU_TICK_FIELDS
        .iter()
        .fold(0u64, |acc, f| acc.wrapping_add(field_delta(old, new, f)))
}

/// Elapsed time between two readings of a signed high-resolution timer that
/// may have wrapped through the signed range.
pub fn hrtime_delta(old: i64, new: i64) -> u64 {
    if new >= old && old >= 0 {
        return (new - old) as u64;
    }

    if new < 0 {
        // Wrapped past the positive ceiling.
        let n = new.unsigned_abs();
        if old >= 0 {
            n.wrapping_sub(old as u64)
        } else {
            n.abs_diff(old.unsigned_abs())
        }
    } else {
        // Either negative to positive, or positive but behind old.
        (u64::MAX - old.unsigned_abs()).wrapping_add(new as u64)
    }
}
