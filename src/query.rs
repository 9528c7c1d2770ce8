//! Query text templates. Only trusted identifiers (config table names, entity
//! columns) are spliced into text; every request value travels as a bound
//! parameter.

use std::sync::LazyLock;

use regex::Regex;

use crate::condition::Condition;
use crate::domain::{EntityType, Pagination};
use crate::error::BeaconError;

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("identifier pattern")
});

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern"));

/// Column references, optionally qualified by a table alias (`A.id`).
pub fn validate_identifier(value: &str) -> Result<(), BeaconError> {
    if IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(BeaconError::InvalidIdentifier(value.to_string()))
    }
}

/// Database and table names. These are quoted whole, so no qualifier.
pub fn validate_name(value: &str) -> Result<(), BeaconError> {
    if NAME_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(BeaconError::InvalidIdentifier(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub text: String,
    pub params: Vec<String>,
}

impl SqlQuery {
    /// Text with newlines folded, for logging.
    pub fn one_line(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Restricts an entity table to rows owned by a parent entity.
#[derive(Debug, Clone)]
pub struct ParentScope {
    pub kind: EntityType,
    pub id: String,
}

/// Query builders over one entity table.
#[derive(Debug, Clone, Copy)]
pub struct EntityTable<'a> {
    database: &'a str,
    table: &'a str,
}

impl<'a> EntityTable<'a> {
    pub fn new(database: &'a str, table: &'a str) -> Self {
        Self { database, table }
    }

    pub fn exists(&self, parent: Option<&ParentScope>, condition: &Condition) -> SqlQuery {
        let (restriction, params) = restriction(parent, condition);
        SqlQuery {
            text: format!(
                "SELECT 1 FROM \"{}\".\"{}\"{restriction}\nLIMIT 1",
                self.database, self.table
            ),
            params,
        }
    }

    pub fn count(&self, parent: Option<&ParentScope>, condition: &Condition) -> SqlQuery {
        let (restriction, params) = restriction(parent, condition);
        SqlQuery {
            text: format!(
                "SELECT COUNT(id) FROM \"{}\".\"{}\"{restriction}",
                self.database, self.table
            ),
            params,
        }
    }

    pub fn records(
        &self,
        parent: Option<&ParentScope>,
        condition: &Condition,
        pagination: Pagination,
    ) -> SqlQuery {
        let (restriction, params) = restriction(parent, condition);
        SqlQuery {
            text: format!(
                "SELECT * FROM \"{}\".\"{}\"{restriction}\nORDER BY id\nOFFSET {}\nLIMIT {}",
                self.database, self.table, pagination.skip, pagination.limit
            ),
            params,
        }
    }
}

fn restriction(parent: Option<&ParentScope>, condition: &Condition) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(parent) = parent {
        clauses.push(format!("\"{}\" = ?", parent.kind.relation_column()));
        params.push(parent.id.clone());
    }
    if !condition.is_unrestricted() {
        clauses.push(condition.sql().to_string());
        params.extend(condition.params().iter().cloned());
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("\nWHERE {}", clauses.join("\nAND ")), params)
    }
}

pub fn filtering_terms(
    database: &str,
    terms_table: &str,
    kind: EntityType,
    pagination: Pagination,
) -> SqlQuery {
    SqlQuery {
        text: format!(
            "SELECT DISTINCT term, label, type FROM \"{database}\".\"{terms_table}\"\nWHERE kind = ?\nORDER BY term\nOFFSET {}\nLIMIT {}",
            pagination.skip, pagination.limit
        ),
        params: vec![kind.as_str().to_string()],
    }
}

/// Datasets of an assembly whose analyses satisfy `condition`, with the VCF
/// sample ids of those analyses aggregated into a `samples` column.
/// `condition` must be compiled against the `A.id` column.
pub fn variant_datasets(
    database: &str,
    analyses_table: &str,
    datasets_table: &str,
    condition: &Condition,
    assembly_id: &str,
) -> SqlQuery {
    let mut params = condition.params().to_vec();
    params.push(assembly_id.to_string());
    SqlQuery {
        text: format!(
            "SELECT D.id, D._assemblyid, D._vcflocations, D._vcfchromosomemap, array_agg(A._vcfsampleid) AS samples\n\
             FROM \"{database}\".\"{analyses_table}\" A\n\
             JOIN \"{database}\".\"{datasets_table}\" D ON A._datasetid = D.id\n\
             WHERE {}\n\
             AND D._assemblyid = ?\n\
             GROUP BY D.id, D._assemblyid, D._vcflocations, D._vcfchromosomemap",
            condition.sql()
        ),
        params,
    }
}

/// Every dataset of an assembly; used when no filters restrict the analyses.
pub fn assembly_datasets(database: &str, datasets_table: &str, assembly_id: &str) -> SqlQuery {
    SqlQuery {
        text: format!(
            "SELECT id, _assemblyid, _vcflocations, _vcfchromosomemap FROM \"{database}\".\"{datasets_table}\"\nWHERE _assemblyid = ?"
        ),
        params: vec![assembly_id.to_string()],
    }
}
