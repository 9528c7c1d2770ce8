use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::Utf8Path;

use crate::domain::TermId;
use crate::error::BeaconError;

/// Resolves a filter term to the full set of term codes it should match.
pub trait OntologyExpander: Send + Sync {
    fn expand(&self, term: &TermId) -> Result<BTreeSet<String>, BeaconError>;
}

/// In-memory ontology closure built from parent → children edges.
///
/// A known term expands to itself plus every transitive descendant. A term
/// the index has never seen expands to the empty set, so no entity can match
/// it, unless the index was built with [`OntologyIndex::identity`].
#[derive(Debug, Clone, Default)]
pub struct OntologyIndex {
    closure: BTreeMap<String, BTreeSet<String>>,
    unknown_as_self: bool,
}

impl OntologyIndex {
    pub fn from_edges<I, P, C>(edges: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<C>)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (parent, kids) in edges {
            let parent = parent.into();
            let entry = children.entry(parent).or_default();
            for kid in kids {
                entry.insert(kid.into());
            }
        }
        let known: BTreeSet<String> = children
            .iter()
            .flat_map(|(parent, kids)| std::iter::once(parent).chain(kids.iter()))
            .cloned()
            .collect();

        let mut closure = BTreeMap::new();
        for term in known {
            let mut reached = BTreeSet::new();
            let mut stack = vec![term.clone()];
            while let Some(current) = stack.pop() {
                if !reached.insert(current.clone()) {
                    continue;
                }
                if let Some(kids) = children.get(&current) {
                    stack.extend(kids.iter().cloned());
                }
            }
            closure.insert(term, reached);
        }
        Self {
            closure,
            unknown_as_self: false,
        }
    }

    /// No hierarchy: every term expands to exactly itself.
    pub fn identity() -> Self {
        Self {
            closure: BTreeMap::new(),
            unknown_as_self: true,
        }
    }

    /// Loads `{ "PARENT:1": ["CHILD:2", ...], ... }`.
    pub fn load(path: &Utf8Path) -> Result<Self, BeaconError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| BeaconError::Ontology(format!("read {path}: {err}")))?;
        let edges: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .map_err(|err| BeaconError::Ontology(format!("parse {path}: {err}")))?;
        Ok(Self::from_edges(edges))
    }

    pub fn len(&self) -> usize {
        self.closure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }
}

impl OntologyExpander for OntologyIndex {
    fn expand(&self, term: &TermId) -> Result<BTreeSet<String>, BeaconError> {
        match self.closure.get(term.as_str()) {
            Some(terms) => Ok(terms.clone()),
            None if self.unknown_as_self => Ok(BTreeSet::from([term.as_str().to_string()])),
            None => Ok(BTreeSet::new()),
        }
    }
}
