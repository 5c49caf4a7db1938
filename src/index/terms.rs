//! Term dictionary: string value <-> compact integer id
//!
//! Append-only. Ids are assigned in first-seen order starting at 0 and are
//! never reassigned, even after every record using a term is deleted.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermDictionary {
    terms: Vec<String>,
    ids: HashMap<String, u32>,
}

impl TermDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a dictionary from its persisted term list (index = id).
    pub fn from_terms(terms: Vec<String>) -> Self {
        let mut ids = HashMap::with_capacity(terms.len());
        for (id, term) in terms.iter().enumerate() {
            ids.entry(term.clone()).or_insert(id as u32);
        }
        Self { terms, ids }
    }

    /// Returns the id for `term`, assigning the next id on first sight.
    pub fn map_term(&mut self, term: &str) -> u32 {
        if let Some(id) = self.ids.get(term) {
            return *id;
        }
        let id = self.terms.len() as u32;
        self.terms.push(term.to_string());
        self.ids.insert(term.to_string(), id);
        id
    }

    pub fn lookup(&self, term: &str) -> Option<u32> {
        self.ids.get(term).copied()
    }

    pub fn term(&self, id: u32) -> Option<&str> {
        self.terms.get(id as usize).map(|s| s.as_str())
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_stable() {
        let mut dict = TermDictionary::new();
        assert_eq!(dict.map_term("red"), 0);
        assert_eq!(dict.map_term("blue"), 1);
        assert_eq!(dict.map_term("red"), 0);
        assert_eq!(dict.term(1), Some("blue"));
        assert_eq!(dict.lookup("green"), None);
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_reload_keeps_ids() {
        let mut dict = TermDictionary::new();
        dict.map_term("a");
        dict.map_term("b");
        let mut reloaded = TermDictionary::from_terms(dict.terms().to_vec());
        assert_eq!(reloaded.lookup("b"), Some(1));
        assert_eq!(reloaded.map_term("c"), 2);
    }
}
