use smol_str::SmolStr;

use crate::values::Value;

/// One record as an ordered sequence of `(column, value)` pairs. Insertion
/// order is preserved and names need not be unique; lookup returns the last
/// match so later columns shadow earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(SmolStr, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<SmolStr>, value: Value) {
        self.columns.push((name.into(), value));
    }

    /// Case-insensitive lookup; the last matching column wins.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rev()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SmolStr, Value)> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.columns.iter().map(|(name, _)| name)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }
}

impl FromIterator<(SmolStr, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (SmolStr, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Row {
    type Item = (SmolStr, Value);
    type IntoIter = std::vec::IntoIter<(SmolStr, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn later_columns_shadow_earlier_ones() {
        let mut row = Row::new();
        row.push("a", Value::Int(1));
        row.push("a", Value::Int(2));
        assert_eq!(row.get("a"), Some(&Value::Int(2)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut row = Row::new();
        row.push("Symbol", Value::Str("XOM".into()));
        assert_eq!(row.get("symbol"), Some(&Value::Str("XOM".into())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut row = Row::new();
        row.push("b", Value::Int(1));
        row.push("a", Value::Int(2));
        let names: Vec<_> = row.names().map(SmolStr::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
