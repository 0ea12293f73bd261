use std::collections::HashMap;

/// A bidirectional mapping between strings and dense integer IDs
///
/// IDs are handed out in insertion order starting from zero. A trainer keeps
/// appending to its alphabets until `train` is called; a [`Model`](crate::Model)
/// holds frozen copies that are only read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alphabet {
    /// Map from string to ID
    str_to_id: HashMap<String, u32>,
    /// Map from ID to string
    id_to_str: Vec<String>,
}

impl Alphabet {
    /// Create a new empty alphabet
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the alphabet
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    /// Returns `true` if the alphabet contains no entries
    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Get or create an ID for a string
    pub fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            let id = self.id_to_str.len() as u32;
            self.str_to_id.insert(s.to_string(), id);
            self.id_to_str.push(s.to_string());
            id
        }
    }

    /// Look up the ID of a string
    pub fn to_id(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn to_str(&self, id: u32) -> Option<&str> {
        self.id_to_str.get(id as usize).map(String::as_str)
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.str_to_id.clear();
        self.id_to_str.clear();
    }

    /// Iterate over all (string, id) pairs in ID order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}

impl<S: AsRef<str>> FromIterator<S> for Alphabet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut alphabet = Self::new();
        for s in iter {
            alphabet.get_or_insert(s.as_ref());
        }
        alphabet
    }
}
