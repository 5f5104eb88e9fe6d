//! Source-position and variable-lifetime maps carried alongside the
//! instruction stream.

/// A source position: file (by index into the map's file list), line, column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourcePos {
    /// Index into [`DebugMap::files`].
    pub file: u16,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Mapping from PC to source position. Entries are stored sorted by PC; a
/// lookup resolves to the entry covering the PC (the last entry at or before
/// it).
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugMap {
    /// Source file names referenced by [`SourcePos::file`].
    pub files: Vec<String>,
    entries: Vec<(u32, SourcePos)>,
}

impl DebugMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file name, returning its index. Repeated names reuse the
    /// existing index.
    pub fn intern_file(&mut self, name: &str) -> u16 {
        if let Some(idx) = self.files.iter().position(|f| f == name) {
            return idx as u16;
        }
        self.files.push(name.to_owned());
        (self.files.len() - 1) as u16
    }

    /// Record the position of the instruction at `pc`. Consecutive records
    /// with the same position collapse into one span.
    pub fn record(&mut self, pc: u32, pos: SourcePos) {
        match self.entries.last() {
            Some((_, last)) if *last == pos => {}
            _ => self.entries.push((pc, pos)),
        }
    }

    /// The source position covering `pc`, if mapped.
    pub fn lookup(&self, pc: u32) -> Option<SourcePos> {
        let idx = self.entries.partition_point(|(p, _)| *p <= pc);
        idx.checked_sub(1).map(|i| self.entries[i].1)
    }

    /// Iterate recorded spans in PC order.
    pub fn iter(&self) -> impl Iterator<Item = &(u32, SourcePos)> {
        self.entries.iter()
    }

    pub(crate) fn from_parts(files: Vec<String>, entries: Vec<(u32, SourcePos)>) -> Self {
        Self { files, entries }
    }
}

/// A variable's register residency: where it lives and over which PCs it is
/// meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LifetimeRecord {
    /// Source-level variable name.
    pub name: String,
    /// Register the variable occupies.
    pub register: u8,
    /// First PC at which the register holds the variable.
    pub start_pc: u32,
    /// One past the last PC at which the register holds the variable.
    pub end_pc: u32,
    /// PC of the defining store.
    pub def_pc: u32,
}

/// Per-function variable lifetime records, indexed by function-table
/// position.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LifetimeMap {
    records: Vec<Vec<LifetimeRecord>>,
}

impl LifetimeMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the records of the function at `func` (growing the map as
    /// needed).
    pub fn set(&mut self, func: u16, records: Vec<LifetimeRecord>) {
        let idx = func as usize;
        if self.records.len() <= idx {
            self.records.resize_with(idx + 1, Vec::new);
        }
        self.records[idx] = records;
    }

    /// The records of the function at `func`.
    pub fn get(&self, func: u16) -> &[LifetimeRecord] {
        self.records
            .get(func as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The record of the variable occupying `register` at `pc` inside the
    /// function at `func`, if any.
    pub fn resolve(&self, func: u16, register: u8, pc: u32) -> Option<&LifetimeRecord> {
        self.get(func).iter().find(|r| {
            r.register == register && r.start_pc <= pc && pc < r.end_pc
        })
    }

    /// Number of per-function record sets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no function has records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate `(function index, records)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[LifetimeRecord])> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (i as u16, r.as_slice()))
    }

    pub(crate) fn from_records(records: Vec<Vec<LifetimeRecord>>) -> Self {
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_to_covering_span() {
        let mut map = DebugMap::new();
        let file = map.intern_file("main.etch");
        map.record(0, SourcePos { file, line: 1, column: 1 });
        map.record(4, SourcePos { file, line: 2, column: 5 });

        assert_eq!(map.lookup(0).unwrap().line, 1);
        assert_eq!(map.lookup(3).unwrap().line, 1);
        assert_eq!(map.lookup(4).unwrap().line, 2);
        assert_eq!(map.lookup(100).unwrap().line, 2);
    }

    #[test]
    fn same_position_spans_collapse() {
        let mut map = DebugMap::new();
        let file = map.intern_file("main.etch");
        let pos = SourcePos { file, line: 3, column: 1 };
        map.record(0, pos);
        map.record(1, pos);
        map.record(2, pos);
        assert_eq!(map.iter().count(), 1);
    }

    #[test]
    fn lifetimes_resolve_by_register_and_pc() {
        let mut map = LifetimeMap::new();
        map.set(
            0,
            vec![LifetimeRecord {
                name: "total".into(),
                register: 2,
                start_pc: 1,
                end_pc: 9,
                def_pc: 1,
            }],
        );
        assert_eq!(map.resolve(0, 2, 4).unwrap().name, "total");
        assert!(map.resolve(0, 2, 9).is_none());
        assert!(map.resolve(0, 3, 4).is_none());
    }
}
