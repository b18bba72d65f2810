//! Range query builder.
//!
//! Turns validated [`IteratorOptions`] into a [`ScanSpec`], and a scan spec
//! into parameterised SQL. Nothing here touches the database.

use std::ops::Bound;

use rusqlite::types::Value;

use crate::options::IteratorOptions;
use crate::store::TABLE;

/// Scan direction over the key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Which columns a scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fields {
    Keys,
    Values,
    Both,
}

impl Fields {
    fn reads_value(self) -> bool {
        !matches!(self, Fields::Keys)
    }
}

/// Declarative description of a bounded, ordered range scan.
///
/// Rendering it to SQL is internal to the crate:
///
/// ```compile_fail
/// let spec = openerp_level::ScanSpec::all();
/// let _ = spec.to_query(None, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    pub lower: Bound<Vec<u8>>,
    pub upper: Bound<Vec<u8>>,
    pub order: Order,
    pub limit: Option<usize>,
    pub fields: Fields,
}

/// A rendered statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScanQuery {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

impl ScanSpec {
    /// Full-table ascending scan of both columns.
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            order: Order::Asc,
            limit: None,
            fields: Fields::Both,
        }
    }

    pub fn from_options(options: &IteratorOptions, fields: Fields) -> Self {
        let lower = match (&options.gt, &options.gte) {
            (Some(k), _) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&options.lt, &options.lte) {
            (Some(k), _) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            (None, None) => Bound::Unbounded,
        };
        Self {
            lower,
            upper,
            order: if options.reverse { Order::Desc } else { Order::Asc },
            limit: options.limit,
            fields,
        }
    }

    /// True when the scan can yield nothing regardless of table contents.
    pub fn is_trivially_empty(&self) -> bool {
        if self.limit == Some(0) {
            return true;
        }
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }

    /// Render one page of the scan.
    ///
    /// `after` is the last key already returned; the page resumes strictly
    /// past it in scan order. `page` caps the number of rows.
    pub(crate) fn to_query(&self, after: Option<&[u8]>, page: usize) -> ScanQuery {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        let (lower, upper) = match (after, self.order) {
            (Some(last), Order::Asc) => (Bound::Excluded(last), as_slice(&self.upper)),
            (Some(last), Order::Desc) => (as_slice(&self.lower), Bound::Excluded(last)),
            (None, _) => (as_slice(&self.lower), as_slice(&self.upper)),
        };

        match lower {
            Bound::Excluded(k) => push_condition(&mut conditions, &mut params, ">", k),
            Bound::Included(k) => push_condition(&mut conditions, &mut params, ">=", k),
            Bound::Unbounded => {}
        }
        match upper {
            Bound::Excluded(k) => push_condition(&mut conditions, &mut params, "<", k),
            Bound::Included(k) => push_condition(&mut conditions, &mut params, "<=", k),
            Bound::Unbounded => {}
        }

        let columns = if self.fields.reads_value() {
            "key, value"
        } else {
            "key, NULL"
        };
        let mut sql = format!("SELECT {} FROM {}", columns, TABLE);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(match self.order {
            Order::Asc => " ORDER BY key ASC",
            Order::Desc => " ORDER BY key DESC",
        });
        params.push(Value::Integer(i64::try_from(page).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));

        ScanQuery { sql, params }
    }
}

fn as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn push_condition(conditions: &mut Vec<String>, params: &mut Vec<Value>, op: &str, key: &[u8]) {
    params.push(Value::Blob(key.to_vec()));
    conditions.push(format!("key {} ?{}", op, params.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(s: &str) -> Value {
        Value::Blob(s.as_bytes().to_vec())
    }

    #[test]
    fn unbounded_scan() {
        let spec = ScanSpec::from_options(&IteratorOptions::new(), Fields::Both);
        assert_eq!(spec, ScanSpec::all());

        let q = spec.to_query(None, 64);
        assert_eq!(q.sql, "SELECT key, value FROM kv ORDER BY key ASC LIMIT ?1");
        assert_eq!(q.params, vec![Value::Integer(64)]);
    }

    #[test]
    fn exclusive_and_inclusive_bounds() {
        let options = IteratorOptions::new().gt("a").unwrap().lte("m").unwrap();
        let spec = ScanSpec::from_options(&options, Fields::Both);
        assert_eq!(spec.lower, Bound::Excluded(b"a".to_vec()));
        assert_eq!(spec.upper, Bound::Included(b"m".to_vec()));

        let q = spec.to_query(None, 10);
        assert_eq!(
            q.sql,
            "SELECT key, value FROM kv WHERE key > ?1 AND key <= ?2 ORDER BY key ASC LIMIT ?3"
        );
        assert_eq!(q.params, vec![blob("a"), blob("m"), Value::Integer(10)]);
    }

    #[test]
    fn upper_bound_only_and_reverse() {
        let options = IteratorOptions::new().lt("k").unwrap().reverse(true);
        let q = ScanSpec::from_options(&options, Fields::Keys).to_query(None, 5);
        assert_eq!(
            q.sql,
            "SELECT key, NULL FROM kv WHERE key < ?1 ORDER BY key DESC LIMIT ?2"
        );
        assert_eq!(q.params, vec![blob("k"), Value::Integer(5)]);
    }

    #[test]
    fn continuation_ascending_replaces_lower_bound() {
        let options = IteratorOptions::new().gte("a").unwrap().lt("z").unwrap();
        let spec = ScanSpec::from_options(&options, Fields::Values);
        let q = spec.to_query(Some(b"c"), 2);
        assert_eq!(
            q.sql,
            "SELECT key, value FROM kv WHERE key > ?1 AND key < ?2 ORDER BY key ASC LIMIT ?3"
        );
        assert_eq!(q.params, vec![blob("c"), blob("z"), Value::Integer(2)]);
    }

    #[test]
    fn continuation_descending_replaces_upper_bound() {
        let options = IteratorOptions::new()
            .gte("a")
            .unwrap()
            .lte("z")
            .unwrap()
            .reverse(true);
        let spec = ScanSpec::from_options(&options, Fields::Both);
        let q = spec.to_query(Some(b"q"), 2);
        assert_eq!(
            q.sql,
            "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key DESC LIMIT ?3"
        );
        assert_eq!(q.params, vec![blob("a"), blob("q"), Value::Integer(2)]);
    }

    #[test]
    fn key_data_never_appears_in_statement_text() {
        let options = IteratorOptions::new()
            .gt("'; DROP TABLE kv; --")
            .unwrap();
        let q = ScanSpec::from_options(&options, Fields::Both).to_query(None, 1);
        assert!(!q.sql.contains("DROP"));
        assert_eq!(q.params[0], blob("'; DROP TABLE kv; --"));
    }

    #[test]
    fn empty_byte_string_is_a_real_bound() {
        let options = IteratorOptions::new().gte("").unwrap();
        let spec = ScanSpec::from_options(&options, Fields::Both);
        assert_eq!(spec.lower, Bound::Included(Vec::new()));
        assert!(spec.to_query(None, 1).sql.contains("key >= ?1"));
    }

    #[test]
    fn trivially_empty_scans() {
        let zero = ScanSpec::from_options(&IteratorOptions::new().limit(0), Fields::Both);
        assert!(zero.is_trivially_empty());

        let crossed = IteratorOptions::new().gt("m").unwrap().lt("c").unwrap();
        assert!(ScanSpec::from_options(&crossed, Fields::Both).is_trivially_empty());

        let point = IteratorOptions::new().gte("m").unwrap().lte("m").unwrap();
        assert!(!ScanSpec::from_options(&point, Fields::Both).is_trivially_empty());

        let open_point = IteratorOptions::new().gt("m").unwrap().lte("m").unwrap();
        assert!(ScanSpec::from_options(&open_point, Fields::Both).is_trivially_empty());
    }
}
