//! Compiles scoped ontology filters into one parameterized restriction on an
//! entity id column.
//!
//! Every filter becomes a sub-select over the relations table joined to the
//! term index: the ids of `target` entities related to some `scope` entity
//! annotated with one of the filter's expanded terms. Expanded terms of one
//! filter are OR-ed (`IN`), and all sub-selects, within a scope and across
//! scopes, are combined with `INTERSECT`.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{EntityType, Filter, TermId};
use crate::error::BeaconError;
use crate::ontology::OntologyExpander;
use crate::query::{validate_identifier, validate_name};

/// One `SELECT <target id> ... WHERE kind = <scope> AND term IN (...)` leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSubquery {
    pub target: EntityType,
    pub scope: EntityType,
    pub terms: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    All,
    Never,
    Intersect(Vec<RelationSubquery>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    predicate: Predicate,
    sql: String,
    params: Vec<String>,
}

impl Condition {
    /// No restriction.
    pub fn all() -> Self {
        Self {
            predicate: Predicate::All,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Matches no row.
    pub fn never() -> Self {
        Self {
            predicate: Predicate::Never,
            sql: "1 = 0".to_string(),
            params: Vec::new(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self.predicate, Predicate::All)
    }

    pub fn is_never(&self) -> bool {
        matches!(self.predicate, Predicate::Never)
    }

    /// Boolean expression text; empty when unrestricted.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound values, in placeholder order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn subqueries(&self) -> &[RelationSubquery] {
        match &self.predicate {
            Predicate::Intersect(legs) => legs,
            Predicate::All | Predicate::Never => &[],
        }
    }

    pub fn where_clause(&self) -> String {
        if self.is_unrestricted() {
            String::new()
        } else {
            format!("WHERE {}", self.sql)
        }
    }
}

pub struct FilterCompiler<'a> {
    expander: &'a dyn OntologyExpander,
    relations_table: &'a str,
    terms_index_table: &'a str,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(
        expander: &'a dyn OntologyExpander,
        relations_table: &'a str,
        terms_index_table: &'a str,
    ) -> Self {
        Self {
            expander,
            relations_table,
            terms_index_table,
        }
    }

    pub fn compile(
        &self,
        filters: &[Filter],
        target: EntityType,
        default_scope: EntityType,
        id_column: &str,
    ) -> Result<Condition, BeaconError> {
        validate_identifier(id_column)?;
        validate_name(self.relations_table)?;
        validate_name(self.terms_index_table)?;

        if filters.is_empty() {
            return Ok(Condition::all());
        }

        // Canonical order: scopes by EntityType::ALL, terms sorted, duplicates
        // dropped (intersecting a set with itself is a no-op).
        let mut groups: BTreeMap<EntityType, BTreeSet<&TermId>> = BTreeMap::new();
        for filter in filters {
            groups
                .entry(filter.effective_scope(default_scope))
                .or_default()
                .insert(&filter.id);
        }

        let mut legs = Vec::new();
        for (scope, terms) in groups {
            for term in terms {
                let expanded = self.expander.expand(term)?;
                if expanded.is_empty() {
                    tracing::debug!(term = %term, scope = %scope, "filter term expands to nothing");
                    return Ok(Condition::never());
                }
                legs.push(RelationSubquery {
                    target,
                    scope,
                    terms: expanded,
                });
            }
        }

        let mut params = Vec::new();
        let selects = legs
            .iter()
            .map(|leg| self.render_leg(leg, &mut params))
            .collect::<Vec<_>>();
        let sql = format!("{id_column} IN ({})", selects.join(" INTERSECT "));
        tracing::debug!(legs = legs.len(), params = params.len(), "compiled filter condition");

        Ok(Condition {
            predicate: Predicate::Intersect(legs),
            sql,
            params,
        })
    }

    fn render_leg(&self, leg: &RelationSubquery, params: &mut Vec<String>) -> String {
        params.push(leg.scope.as_str().to_string());
        params.extend(leg.terms.iter().cloned());
        let placeholders = vec!["?"; leg.terms.len()].join(", ");
        format!(
            "SELECT RI.{target} FROM \"{relations}\" RI JOIN \"{index}\" TI ON RI.{scope} = TI.id WHERE TI.kind = ? AND TI.term IN ({placeholders})",
            target = leg.target.relation_column(),
            relations = self.relations_table,
            index = self.terms_index_table,
            scope = leg.scope.relation_column(),
        )
    }
}
