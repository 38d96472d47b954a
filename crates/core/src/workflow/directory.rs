use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::domain::normalize_identity;

/// Resolves a role name to the identities currently holding it. Membership is
/// queried live on every check, so role changes apply to in-flight requests.
pub trait RoleDirectory: Send + Sync {
    fn members_of(&self, role: &str) -> Result<Vec<String>, String>;
}

/// Role directory backed by an in-process table, seeded from configuration and
/// mutable at runtime.
#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    members_by_role: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryRoleDirectory {
    pub fn with_roles<I, R, M>(roles: I) -> Self
    where
        I: IntoIterator<Item = (R, Vec<M>)>,
        R: AsRef<str>,
        M: AsRef<str>,
    {
        let members_by_role = roles
            .into_iter()
            .map(|(role, members)| {
                let members =
                    members.iter().map(|member| normalize_identity(member.as_ref())).collect();
                (normalize_identity(role.as_ref()), members)
            })
            .collect();

        Self { members_by_role: RwLock::new(members_by_role) }
    }

    pub fn set_members(&self, role: &str, members: Vec<String>) {
        let members = members.iter().map(|member| normalize_identity(member)).collect();
        match self.members_by_role.write() {
            Ok(mut table) => {
                table.insert(normalize_identity(role), members);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(normalize_identity(role), members);
            }
        }
    }

    pub fn role_names(&self) -> Vec<String> {
        let table = match self.members_by_role.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = table.keys().cloned().collect();
        names.sort();
        names
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn members_of(&self, role: &str) -> Result<Vec<String>, String> {
        let table = match self.members_by_role.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(table
            .get(&normalize_identity(role))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

impl<T> RoleDirectory for std::sync::Arc<T>
where
    T: RoleDirectory + ?Sized,
{
    fn members_of(&self, role: &str) -> Result<Vec<String>, String> {
        (**self).members_of(role)
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryRoleDirectory, RoleDirectory};

    #[test]
    fn resolves_members_case_insensitively() {
        let directory = InMemoryRoleDirectory::with_roles(vec![(
            "Finance_Director",
            vec!["Ana@X.com", "bo@x.com"],
        )]);

        let members = directory.members_of(" finance_director ").expect("resolve");
        assert_eq!(members, vec!["ana@x.com".to_string(), "bo@x.com".to_string()]);
    }

    #[test]
    fn unknown_roles_resolve_to_nobody() {
        let directory = InMemoryRoleDirectory::default();
        assert!(directory.members_of("auditor").expect("resolve").is_empty());
    }

    #[test]
    fn membership_changes_are_visible_immediately() {
        let directory = InMemoryRoleDirectory::with_roles(vec![("cfo", vec!["ana@x.com"])]);
        directory.set_members("cfo", vec!["cy@x.com".to_string()]);

        assert_eq!(directory.members_of("cfo").expect("resolve"), vec!["cy@x.com".to_string()]);
        assert_eq!(directory.role_names(), vec!["cfo".to_string()]);
    }
}
