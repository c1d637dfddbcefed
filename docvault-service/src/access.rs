//! Row-level access policy.
//!
//! Grants are additive: a principal may perform an operation when any single
//! grant covers it. Read and download accept the owner, enterprise,
//! department and admin grants; write and delete accept only owner and admin.

pub mod visibility;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::db::{Document, DocumentType};
use crate::error::{ServiceError, ServiceResult};

pub use visibility::{Predicate, build_filter};

/// Role assigned by the authentication provider
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Operator,
    Admin,
}

/// The authenticated actor issuing a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub department_name: Option<String>,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, department_name: Option<&str>, role: Role) -> Self {
        Self {
            id: id.into(),
            department_name: department_name.map(str::to_string),
            role,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Operator | Role::Admin)
    }
}

/// Operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Read,
    Download,
    Write,
    Delete,
}

impl Operation {
    fn is_read_like(self) -> bool {
        matches!(self, Operation::Read | Operation::Download)
    }
}

/// Whether `principal` may perform `operation` on `document`.
pub fn can_access(principal: &Principal, document: &Document, operation: Operation) -> bool {
    let owner = principal.id == document.owner_id;
    let admin = principal.is_privileged();
    if owner || admin {
        return true;
    }
    if !operation.is_read_like() {
        return false;
    }
    match document.document_type {
        DocumentType::Common => true,
        DocumentType::Dept => {
            document.department.is_some() && document.department == principal.department_name
        }
    }
}

/// Gate a single-document operation, mapping a refusal onto the error the
/// caller is allowed to see.
///
/// Read paths never reveal existence. Write paths reveal it only to
/// principals who can already read the document.
pub fn authorize(
    principal: &Principal,
    document: &Document,
    operation: Operation,
) -> ServiceResult<()> {
    if can_access(principal, document, operation) {
        return Ok(());
    }
    if operation.is_read_like() || !can_access(principal, document, Operation::Read) {
        return Err(ServiceError::not_found(&document.id));
    }
    Err(ServiceError::permission_denied(format!(
        "{} is not allowed to {} document {}",
        principal.id, operation, document.id
    )))
}

/// Creating or retyping a document into `common` requires the admin grant.
pub fn authorize_document_type(
    principal: &Principal,
    document_type: DocumentType,
) -> ServiceResult<()> {
    if document_type == DocumentType::Common && !principal.is_privileged() {
        return Err(ServiceError::permission_denied(
            "only administrators may publish enterprise-wide documents",
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{AccessLevel, Document};
    use chrono::Utc;

    pub(crate) fn document(owner: &str, document_type: DocumentType, dept: Option<&str>) -> Document {
        let now = Utc::now();
        Document {
            id: format!("doc-{owner}"),
            file_name: "handbook.pdf".to_string(),
            original_file_name: "handbook.pdf".to_string(),
            document_type,
            department: dept.map(str::to_string),
            access_level: document_type.default_access_level(),
            owner_id: owner.to_string(),
            creator_name: None,
            storage_path: None,
            file_size: None,
            content_hash: None,
            version: "v1.0".to_string(),
            category: None,
            tags: vec![],
            description: None,
            view_count: 0,
            download_count: 0,
            embedding_status: None,
            embedding_error: None,
            total_chunks: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn principals() -> Vec<Principal> {
        vec![
            Principal::new("u1", Some("Eng"), Role::User),
            Principal::new("u2", Some("Eng"), Role::User),
            Principal::new("u3", Some("Sales"), Role::User),
            Principal::new("u5", None, Role::User),
            Principal::new("op", Some("Sales"), Role::Operator),
            Principal::new("u4", None, Role::Admin),
        ]
    }

    fn documents() -> Vec<Document> {
        vec![
            document("u1", DocumentType::Dept, Some("Eng")),
            document("u1", DocumentType::Common, Some("Eng")),
            document("u3", DocumentType::Dept, Some("Sales")),
            document("u4", DocumentType::Common, None),
            document("u5", DocumentType::Dept, None),
        ]
    }

    #[test]
    fn test_read_grant_matches_policy() {
        for p in principals() {
            for d in documents() {
                let expected = p.id == d.owner_id
                    || d.document_type == DocumentType::Common
                    || (d.document_type == DocumentType::Dept
                        && d.department.is_some()
                        && d.department == p.department_name)
                    || p.is_privileged();
                assert_eq!(can_access(&p, &d, Operation::Read), expected, "{p:?} {d:?}");
                assert_eq!(can_access(&p, &d, Operation::Download), expected);
            }
        }
    }

    #[test]
    fn test_write_grant_is_owner_or_admin_only() {
        for p in principals() {
            for d in documents() {
                let expected = p.id == d.owner_id || p.is_privileged();
                assert_eq!(can_access(&p, &d, Operation::Write), expected, "{p:?} {d:?}");
                assert_eq!(can_access(&p, &d, Operation::Delete), expected);
            }
        }
    }

    #[test]
    fn test_principal_without_department_never_matches_departmentless_doc() {
        let p = Principal::new("u9", None, Role::User);
        let d = document("u5", DocumentType::Dept, None);
        assert!(!can_access(&p, &d, Operation::Read));
    }

    #[test]
    fn test_authorize_maps_refusals() {
        let doc = document("u1", DocumentType::Dept, Some("Eng"));
        let colleague = Principal::new("u2", Some("Eng"), Role::User);
        let outsider = Principal::new("u3", Some("Sales"), Role::User);

        assert!(authorize(&colleague, &doc, Operation::Read).is_ok());
        assert!(matches!(
            authorize(&colleague, &doc, Operation::Write),
            Err(ServiceError::PermissionDenied { .. })
        ));
        assert!(matches!(
            authorize(&outsider, &doc, Operation::Read),
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            authorize(&outsider, &doc, Operation::Delete),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_common_requires_privilege() {
        let user = Principal::new("u1", Some("Eng"), Role::User);
        let operator = Principal::new("op", None, Role::Operator);
        assert!(authorize_document_type(&user, DocumentType::Dept).is_ok());
        assert!(matches!(
            authorize_document_type(&user, DocumentType::Common),
            Err(ServiceError::PermissionDenied { .. })
        ));
        assert!(authorize_document_type(&operator, DocumentType::Common).is_ok());
    }

    #[test]
    fn test_access_level_does_not_affect_grants() {
        let mut doc = document("u1", DocumentType::Common, None);
        doc.access_level = AccessLevel::Confidential;
        let reader = Principal::new("u7", Some("Ops"), Role::User);
        assert!(can_access(&reader, &doc, Operation::Read));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("operator".parse::<Role>().unwrap(), Role::Operator);
        assert!("root".parse::<Role>().is_err());
    }
}
