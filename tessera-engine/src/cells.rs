//! The in-memory cell store backing one array.

use std::collections::HashMap;

/// One coordinate of a stored cell: an integer scalar widened to `i128`,
/// or the raw bytes of a string coordinate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum CoordValue {
    Int(i128),
    Bytes(Vec<u8>),
}

/// A full coordinate tuple, one entry per dimension.
pub(crate) type CellKey = Vec<CoordValue>;

/// The stored values of one cell: attribute name to raw cell bytes.
///
/// Fixed-size attributes store exactly `width * cell_val_num` bytes;
/// variable-sized attributes store whatever the writer supplied.
#[derive(Debug, Clone, Default)]
pub(crate) struct CellRow {
    pub(crate) values: HashMap<String, Vec<u8>>,
}

/// Coordinate-indexed cell storage. Rewrites of the same coordinates merge
/// per attribute, last write wins.
#[derive(Debug, Default)]
pub(crate) struct CellTable {
    index: HashMap<CellKey, usize>,
    rows: Vec<(CellKey, CellRow)>,
}

impl CellTable {
    pub(crate) fn upsert(&mut self, key: CellKey, attribute: &str, bytes: Vec<u8>) {
        match self.index.get(&key) {
            Some(&at) => {
                self.rows[at].1.values.insert(attribute.to_string(), bytes);
            }
            None => {
                let mut row = CellRow::default();
                row.values.insert(attribute.to_string(), bytes);
                self.index.insert(key.clone(), self.rows.len());
                self.rows.push((key, row));
            }
        }
    }

    pub(crate) fn get(&self, key: &CellKey) -> Option<&CellRow> {
        self.index.get(key).map(|&at| &self.rows[at].1)
    }

    /// All stored cells in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&CellKey, &CellRow)> {
        self.rows.iter().map(|(k, r)| (k, r))
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod test {
    use crate::cells::{CellTable, CoordValue};

    #[test]
    fn upsert_merges_by_coordinates() {
        let mut table = CellTable::default();
        let key = vec![CoordValue::Int(1), CoordValue::Int(2)];
        table.upsert(key.clone(), "a", vec![1, 0, 0, 0]);
        table.upsert(key.clone(), "b", vec![9]);
        table.upsert(key.clone(), "a", vec![2, 0, 0, 0]);

        assert_eq!(table.len(), 1);
        let row = table.get(&key).unwrap();
        assert_eq!(row.values["a"], vec![2, 0, 0, 0]);
        assert_eq!(row.values["b"], vec![9]);
    }

    #[test]
    fn coordinate_ordering_is_lexicographic() {
        let a = vec![CoordValue::Int(2), CoordValue::Int(3)];
        let b = vec![CoordValue::Int(2), CoordValue::Int(4)];
        assert!(a < b);
    }
}
