use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::Token;

const NULL_WORD: &str = "<null>";

/// Word <-> id map. Ids are dense and assigned on first sight; id 0 is the
/// NULL word and is never handed out for a surface form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vocabulary {
    ids: HashMap<String, Token>,
    words: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Vocabulary {
            ids: HashMap::new(),
            words: vec![NULL_WORD.to_string()],
        }
    }

    /// Returns the id of `word`, assigning the next free id if unseen.
    pub fn id_for(&mut self, word: &str) -> Token {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len() as Token;
        self.ids.insert(word.to_string(), id);
        self.words.push(word.to_string());
        id
    }

    pub fn lookup(&self, word: &str) -> Option<Token> {
        self.ids.get(word).copied()
    }

    pub fn token_for(&self, id: Token) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    /// Number of ids including NULL.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() == 1
    }

    pub fn encode(&mut self, line: &str) -> Vec<Token> {
        line.split_whitespace().map(|w| self.id_for(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NULL_TOKEN;

    #[test]
    fn ids_are_dense_and_skip_null() {
        let mut v = Vocabulary::new();
        assert!(v.is_empty());
        assert_eq!(v.id_for("le"), 1);
        assert_eq!(v.id_for("chat"), 2);
        assert_eq!(v.id_for("le"), 1);
        assert_eq!(v.len(), 3);
        assert_eq!(v.token_for(2), Some("chat"));
        assert_eq!(v.token_for(NULL_TOKEN), Some(NULL_WORD));
        assert_eq!(v.token_for(9), None);
    }

    #[test]
    fn encode_assigns_in_order() {
        let mut v = Vocabulary::new();
        assert_eq!(v.encode("a b a c"), vec![1, 2, 1, 3]);
        assert_eq!(v.lookup("c"), Some(3));
        assert_eq!(v.lookup("z"), None);
    }
}
