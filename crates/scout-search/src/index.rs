//! Search index over datums

use std::fmt;

use scout_core::tokenize::normalize;
use scout_core::{Datum, DatumTokenizer, QueryTokenizer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::trie::Trie;

/// Snapshot of an index, suitable for persistence and [`SearchIndex::bootstrap`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedIndex {
    pub datums: Vec<Datum>,
    pub trie: Trie,
}

impl SerializedIndex {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Builder for [`SearchIndex`]
///
/// Both tokenizers are required; `build` fails without them.
#[derive(Default)]
pub struct SearchIndexBuilder {
    datum_tokenizer: Option<DatumTokenizer>,
    query_tokenizer: Option<QueryTokenizer>,
}

impl SearchIndexBuilder {
    pub fn datum_tokenizer(mut self, tokenizer: DatumTokenizer) -> Self {
        self.datum_tokenizer = Some(tokenizer);
        self
    }

    pub fn query_tokenizer(mut self, tokenizer: QueryTokenizer) -> Self {
        self.query_tokenizer = Some(tokenizer);
        self
    }

    pub fn build(self) -> Result<SearchIndex> {
        let datum_tokenizer = self
            .datum_tokenizer
            .ok_or(SearchError::MissingTokenizer("datum tokenizer is required"))?;
        let query_tokenizer = self
            .query_tokenizer
            .ok_or(SearchError::MissingTokenizer("query tokenizer is required"))?;

        Ok(SearchIndex {
            datum_tokenizer,
            query_tokenizer,
            datums: Vec::new(),
            trie: Trie::new(),
        })
    }
}

/// Prefix index answering multi-token AND queries
///
/// Datums are append-only; their position in `datums` is their id. A query
/// token matches a datum when it is a prefix of one of the datum's tokens.
pub struct SearchIndex {
    datum_tokenizer: DatumTokenizer,
    query_tokenizer: QueryTokenizer,
    datums: Vec<Datum>,
    trie: Trie,
}

impl SearchIndex {
    pub fn builder() -> SearchIndexBuilder {
        SearchIndexBuilder::default()
    }

    /// Index a batch of datums
    pub fn add<I>(&mut self, data: I)
    where
        I: IntoIterator<Item = Datum>,
    {
        let before = self.datums.len();
        for datum in data {
            self.add_one(datum);
        }
        debug!(
            "Indexed {} datums ({} total, {} trie nodes)",
            self.datums.len() - before,
            self.datums.len(),
            self.trie.node_count()
        );
    }

    /// Index a single datum
    pub fn add_one(&mut self, datum: Datum) {
        let id = self.datums.len();
        for token in normalize((self.datum_tokenizer)(&datum)) {
            self.trie.insert(&token, id);
        }
        self.datums.push(datum);
    }

    /// Datums matching every token of the query, in ascending id order
    pub fn get(&self, query: &str) -> Vec<Datum> {
        let tokens = normalize((self.query_tokenizer)(query));
        let mut matches: Option<Vec<usize>> = None;

        for token in &tokens {
            let Some(ids) = self.trie.lookup(token) else {
                return Vec::new();
            };
            let ids = sorted_unique(ids);
            let narrowed = match matches {
                Some(previous) => intersect_sorted(&previous, &ids),
                None => ids,
            };
            if narrowed.is_empty() {
                return Vec::new();
            }
            matches = Some(narrowed);
        }

        matches
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.datums.get(id).cloned())
            .collect()
    }

    /// Drop every datum
    pub fn reset(&mut self) {
        self.datums.clear();
        self.trie = Trie::new();
    }

    pub fn serialize(&self) -> SerializedIndex {
        SerializedIndex {
            datums: self.datums.clone(),
            trie: self.trie.clone(),
        }
    }

    /// Replace the contents wholesale with a snapshot, without re-tokenizing
    pub fn bootstrap(&mut self, snapshot: SerializedIndex) -> Result<()> {
        snapshot
            .trie
            .validate(snapshot.datums.len())
            .map_err(SearchError::CorruptSnapshot)?;

        self.datums = snapshot.datums;
        self.trie = snapshot.trie;
        debug!("Bootstrapped index with {} datums", self.datums.len());
        Ok(())
    }

    pub fn datums(&self) -> &[Datum] {
        &self.datums
    }

    pub fn len(&self) -> usize {
        self.datums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }
}

impl fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchIndex")
            .field("datums", &self.datums.len())
            .field("trie_nodes", &self.trie.node_count())
            .finish()
    }
}

fn sorted_unique(ids: &[usize]) -> Vec<usize> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Two-pointer intersection of ascending, duplicate-free id lists
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }

    out
}
