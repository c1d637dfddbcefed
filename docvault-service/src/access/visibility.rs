//! Listing predicates.
//!
//! A [`Predicate`] is rendered into one SQL `WHERE` fragment so the metadata
//! store filters, counts, orders and pages over a single result set. Tests
//! also evaluate the same tree against an in-memory `Document` to check the
//! listing filter against the single-document resolver.

use rusqlite::types::Value;

use super::Principal;
#[cfg(test)]
use crate::db::Document;
use crate::db::DocumentType;

/// Filterable document column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    OwnerId,
    DocumentType,
    Department,
    FileName,
    OriginalFileName,
    Description,
}

impl Column {
    fn sql(self) -> &'static str {
        match self {
            Column::OwnerId => "d.owner_id",
            Column::DocumentType => "d.document_type",
            Column::Department => "d.department",
            Column::FileName => "d.file_name",
            Column::OriginalFileName => "d.original_file_name",
            Column::Description => "d.description",
        }
    }

    #[cfg(test)]
    fn value_of(self, doc: &Document) -> Option<String> {
        match self {
            Column::OwnerId => Some(doc.owner_id.clone()),
            Column::DocumentType => Some(doc.document_type.to_string()),
            Column::Department => doc.department.clone(),
            Column::FileName => Some(doc.file_name.clone()),
            Column::OriginalFileName => Some(doc.original_file_name.clone()),
            Column::Description => doc.description.clone(),
        }
    }
}

/// Composable boolean filter over documents
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row
    Always,
    /// Column equals value. A NULL column never matches.
    Eq(Column, String),
    /// Case-insensitive substring match on a column
    Contains(Column, String),
    /// Case-insensitive substring match on any tag
    TagContains(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Conjoin, dropping tautologies.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Always, p) | (p, Predicate::Always) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    /// Render into a SQL fragment, appending bound parameters in order.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::Always => "1 = 1".to_string(),
            Predicate::Eq(column, value) => {
                params.push(Value::Text(value.clone()));
                format!("{} = ?", column.sql())
            }
            Predicate::Contains(column, needle) => {
                params.push(Value::Text(like_pattern(needle)));
                format!("{} LIKE ? ESCAPE '\\'", column.sql())
            }
            Predicate::TagContains(needle) => {
                params.push(Value::Text(like_pattern(needle)));
                "EXISTS (SELECT 1 FROM json_each(d.tags) t WHERE t.value LIKE ? ESCAPE '\\')"
                    .to_string()
            }
            Predicate::And(parts) => join(parts, " AND ", params),
            Predicate::Or(parts) => join(parts, " OR ", params),
        }
    }

    /// Evaluate against a loaded document.
    #[cfg(test)]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Eq(column, value) => column.value_of(doc).as_deref() == Some(value),
            Predicate::Contains(column, needle) => column
                .value_of(doc)
                .is_some_and(|v| contains_ignore_case(&v, needle)),
            Predicate::TagContains(needle) => {
                doc.tags.iter().any(|t| contains_ignore_case(t, needle))
            }
            Predicate::And(parts) => parts.iter().all(|p| p.matches(doc)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(doc)),
        }
    }
}

fn join(parts: &[Predicate], separator: &str, params: &mut Vec<Value>) -> String {
    if parts.is_empty() {
        return if separator.trim() == "AND" { "1 = 1" } else { "1 = 0" }.to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", p.to_sql(params)))
        .collect();
    rendered.join(separator)
}

fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// SQLite LIKE folds ASCII case only; mirror that here.
#[cfg(test)]
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// Visibility predicate: exactly the documents `principal` may list.
pub fn build_filter(principal: &Principal) -> Predicate {
    if principal.is_privileged() {
        return Predicate::Always;
    }

    let mut grants = vec![
        Predicate::Eq(Column::OwnerId, principal.id.clone()),
        Predicate::Eq(Column::DocumentType, DocumentType::Common.to_string()),
    ];
    if let Some(department) = &principal.department_name {
        grants.push(Predicate::And(vec![
            Predicate::Eq(Column::DocumentType, DocumentType::Dept.to_string()),
            Predicate::Eq(Column::Department, department.clone()),
        ]));
    }
    Predicate::Or(grants)
}

/// Substring search over names, description and tags.
pub fn search_filter(term: &str) -> Predicate {
    let term = term.trim();
    if term.is_empty() {
        return Predicate::Always;
    }
    Predicate::Or(vec![
        Predicate::Contains(Column::FileName, term.to_string()),
        Predicate::Contains(Column::OriginalFileName, term.to_string()),
        Predicate::Contains(Column::Description, term.to_string()),
        Predicate::TagContains(term.to_string()),
    ])
}

pub fn type_filter(document_type: Option<DocumentType>) -> Predicate {
    match document_type {
        Some(t) => Predicate::Eq(Column::DocumentType, t.to_string()),
        None => Predicate::Always,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tests::document;
    use crate::access::{Operation, Role, can_access};

    #[test]
    fn test_privileged_filter_is_tautology() {
        let admin = Principal::new("u4", None, Role::Admin);
        assert_eq!(build_filter(&admin), Predicate::Always);
        let mut params = Vec::new();
        assert_eq!(build_filter(&admin).to_sql(&mut params), "1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_user_filter_renders_single_predicate() {
        let user = Principal::new("u1", Some("Eng"), Role::User);
        let mut params = Vec::new();
        let sql = build_filter(&user).to_sql(&mut params);
        assert_eq!(
            sql,
            "(d.owner_id = ?) OR (d.document_type = ?) OR ((d.document_type = ?) AND (d.department = ?))"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("u1".into()),
                Value::Text("common".into()),
                Value::Text("dept".into()),
                Value::Text("Eng".into()),
            ]
        );
    }

    #[test]
    fn test_filter_agrees_with_resolver() {
        let principals = [
            Principal::new("u1", Some("Eng"), Role::User),
            Principal::new("u3", Some("Sales"), Role::User),
            Principal::new("u5", None, Role::User),
            Principal::new("op", None, Role::Operator),
        ];
        let docs = [
            document("u1", DocumentType::Dept, Some("Eng")),
            document("u3", DocumentType::Dept, Some("Sales")),
            document("u9", DocumentType::Common, None),
            document("u9", DocumentType::Dept, Some("Eng")),
        ];
        for p in &principals {
            let filter = build_filter(p);
            for d in &docs {
                assert_eq!(filter.matches(d), can_access(p, d, Operation::Read));
            }
        }
    }

    #[test]
    fn test_search_is_and_ed_onto_visibility() {
        let user = Principal::new("u3", Some("Sales"), Role::User);
        let mut hidden = document("u1", DocumentType::Dept, Some("Eng"));
        hidden.file_name = "Quarterly Plan.pdf".to_string();
        let mut visible = document("u9", DocumentType::Common, None);
        visible.tags = vec!["quarterly".to_string()];

        let filter = build_filter(&user).and(search_filter("QUARTERLY"));
        assert!(!filter.matches(&hidden));
        assert!(filter.matches(&visible));
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        let mut params = Vec::new();
        let sql = search_filter("a").to_sql(&mut params);
        assert_eq!(params.len(), 4);
        assert!(sql.contains("json_each(d.tags)"));
    }

    #[test]
    fn test_and_flattens_tautologies() {
        let p = Predicate::Always.and(type_filter(None));
        assert_eq!(p, Predicate::Always);
        let q = type_filter(Some(DocumentType::Dept)).and(search_filter("  "));
        assert_eq!(q, Predicate::Eq(Column::DocumentType, "dept".into()));
    }
}
