use bson::Document;
use serde::de::DeserializeOwned;

use crate::errors::DbError;

/// Materialized result stream returned by aggregate and cursor reads.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    docs: Vec<Document>,
    pos: usize,
}

impl Cursor {
    #[must_use]
    pub const fn new(docs: Vec<Document>) -> Self {
        Self { docs, pos: 0 }
    }

    pub fn advance(&mut self) -> Option<Document> {
        let d = self.docs.get(self.pos)?.clone();
        self.pos += 1;
        Some(d)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.docs.len().saturating_sub(self.pos)
    }

    #[must_use]
    pub fn to_vec(mut self) -> Vec<Document> {
        self.docs.split_off(self.pos.min(self.docs.len()))
    }

    /// Decodes every remaining document into `T`.
    ///
    /// # Errors
    /// The first document that does not decode.
    pub fn deserialize_all<T: DeserializeOwned>(self) -> Result<Vec<T>, DbError> {
        self.to_vec()
            .into_iter()
            .map(|d| bson::deserialize_from_document(d).map_err(DbError::from))
            .collect()
    }
}

impl Iterator for Cursor {
    type Item = Document;
    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn advance_then_drain_rest() {
        let mut c = Cursor::new(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);
        assert_eq!(c.advance(), Some(doc! { "n": 1 }));
        assert_eq!(c.remaining(), 2);
        assert_eq!(c.to_vec(), vec![doc! { "n": 2 }, doc! { "n": 3 }]);
    }

    #[test]
    fn deserialize_all_reports_bad_records() {
        #[derive(serde::Deserialize)]
        struct N {
            n: i32,
        }
        let ok = Cursor::new(vec![doc! { "n": 1 }]).deserialize_all::<N>().unwrap();
        assert_eq!(ok[0].n, 1);
        assert!(Cursor::new(vec![doc! { "n": "x" }]).deserialize_all::<N>().is_err());
    }
}
