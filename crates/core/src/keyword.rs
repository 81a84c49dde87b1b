//! Okapi BM25 over an in-memory corpus, rebuilt from the vector index on
//! every hybrid query.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Bm25Index {
    term_frequencies: Vec<HashMap<String, usize>>,
    lengths: Vec<usize>,
    document_frequency: HashMap<String, usize>,
    average_length: f64,
}

impl Bm25Index {
    pub fn build<'a>(documents: impl IntoIterator<Item = &'a str>) -> Self {
        let mut term_frequencies = Vec::new();
        let mut lengths = Vec::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for document in documents {
            let tokens = tokenize(document);
            let mut frequencies: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *frequencies.entry(token.clone()).or_insert(0) += 1;
            }
            for term in frequencies.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            lengths.push(tokens.len());
            term_frequencies.push(frequencies);
        }

        let average_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        Self {
            term_frequencies,
            lengths,
            document_frequency,
            average_length,
        }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.len() as f64;
        let df = self.document_frequency.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    pub fn score(&self, query_terms: &[String], document: usize) -> f64 {
        let (Some(frequencies), Some(&length)) =
            (self.term_frequencies.get(document), self.lengths.get(document))
        else {
            return 0.0;
        };
        let average = if self.average_length > 0.0 {
            self.average_length
        } else {
            1.0
        };

        query_terms
            .iter()
            .filter_map(|term| frequencies.get(term).map(|tf| (term, *tf as f64)))
            .map(|(term, tf)| {
                let norm = K1 * (1.0 - B + B * length as f64 / average);
                self.idf(term) * tf * (K1 + 1.0) / (tf + norm)
            })
            .sum()
    }

    /// Top `k` documents by score, ties broken by corpus order. Documents
    /// sharing no term with the query are left out.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let mut scored: Vec<(usize, f64)> = (0..self.len())
            .map(|document| (document, self.score(&terms, document)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
        scored.truncate(k);
        scored
    }
}
