//! Referential-integrity checks over a [`Graph`].
//!
//! Every reverse index must agree with the primary records. The checker
//! reports every disagreement instead of stopping at the first, so an
//! operator can see the full extent of a corrupted snapshot.

use std::fmt;

use serde::Serialize;

use ota_types::{fold_email, EntityId};

use crate::graph::Graph;

/// Result of checking a graph.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

/// A specific inconsistency found in the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// The index or record the problem was found in.
    pub subject: String,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    /// An index entry names a record that does not exist.
    DanglingReference,
    /// A record is missing from an index that should list it.
    MissingIndexEntry,
    /// Two indices disagree about a parent/child link.
    ParentMismatch,
    /// An app does not have exactly one Owner.
    OwnerCount,
    /// A deployment's current package is not its last history entry.
    PackagePointer,
    /// The id counter is at or below an id already in use.
    CounterBehind,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Checker<'a> {
    graph: &'a Graph,
    violations: Vec<Violation>,
}

impl Checker<'_> {
    fn push(&mut self, kind: ViolationKind, subject: impl Into<String>, description: String) {
        self.violations.push(Violation {
            kind,
            subject: subject.into(),
            description,
        });
    }

    fn check_accounts(&mut self) {
        let g = self.graph;
        for (email, id) in &g.email_to_account_map {
            match g.accounts.get(id) {
                None => self.push(
                    ViolationKind::DanglingReference,
                    "emailToAccountMap",
                    format!("{email} -> missing account {id}"),
                ),
                Some(account) if fold_email(&account.email) != *email => self.push(
                    ViolationKind::ParentMismatch,
                    "emailToAccountMap",
                    format!("{email} -> {id} whose email is {}", account.email),
                ),
                Some(_) => {}
            }
        }
        for (id, account) in &g.accounts {
            if g.email_to_account_map.get(&fold_email(&account.email)) != Some(id) {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "emailToAccountMap",
                    format!("account {id} ({}) is not indexed by email", account.email),
                );
            }
        }
    }

    fn check_apps(&mut self) {
        let g = self.graph;
        for (account_id, app_ids) in &g.account_to_apps_map {
            if !g.accounts.contains_key(account_id) {
                self.push(
                    ViolationKind::DanglingReference,
                    "accountToAppsMap",
                    format!("missing account {account_id}"),
                );
            }
            for app_id in app_ids {
                match g.apps.get(app_id) {
                    None => self.push(
                        ViolationKind::DanglingReference,
                        "accountToAppsMap",
                        format!("{account_id} -> missing app {app_id}"),
                    ),
                    Some(app) => {
                        let listed = app.collaborators.values().any(|c| &c.account_id == account_id);
                        if !listed {
                            self.push(
                                ViolationKind::ParentMismatch,
                                "accountToAppsMap",
                                format!("{account_id} -> {app_id} but is not a collaborator"),
                            );
                        }
                    }
                }
            }
        }

        for (app_id, app) in &g.apps {
            let owners = app.owner_count();
            if owners != 1 {
                self.push(
                    ViolationKind::OwnerCount,
                    format!("app {app_id}"),
                    format!("{owners} owners"),
                );
            }
            for (email, props) in &app.collaborators {
                let points_back = g
                    .account_to_apps_map
                    .get(&props.account_id)
                    .is_some_and(|apps| apps.contains(app_id));
                if !points_back {
                    self.push(
                        ViolationKind::MissingIndexEntry,
                        "accountToAppsMap",
                        format!("collaborator {email} ({}) lacks pointer to {app_id}", props.account_id),
                    );
                }
            }
            if !g.app_to_account_map.contains_key(app_id) {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "appToAccountMap",
                    format!("app {app_id} has no owner of record"),
                );
            }
        }

        for (app_id, account_id) in &g.app_to_account_map {
            if !g.apps.contains_key(app_id) || !g.accounts.contains_key(account_id) {
                self.push(
                    ViolationKind::DanglingReference,
                    "appToAccountMap",
                    format!("{app_id} -> {account_id}"),
                );
            }
        }
    }

    fn check_deployments(&mut self) {
        let g = self.graph;
        for (app_id, deployment_ids) in &g.app_to_deployments_map {
            if !g.apps.contains_key(app_id) {
                self.push(
                    ViolationKind::DanglingReference,
                    "appToDeploymentsMap",
                    format!("missing app {app_id}"),
                );
            }
            for deployment_id in deployment_ids {
                if !g.deployments.contains_key(deployment_id) {
                    self.push(
                        ViolationKind::DanglingReference,
                        "appToDeploymentsMap",
                        format!("{app_id} -> missing deployment {deployment_id}"),
                    );
                } else if g.deployment_to_app_map.get(deployment_id) != Some(app_id) {
                    self.push(
                        ViolationKind::ParentMismatch,
                        "deploymentToAppMap",
                        format!("{deployment_id} listed under {app_id}"),
                    );
                }
            }
        }

        for (deployment_id, app_id) in &g.deployment_to_app_map {
            if !g.deployments.contains_key(deployment_id) || !g.apps.contains_key(app_id) {
                self.push(
                    ViolationKind::DanglingReference,
                    "deploymentToAppMap",
                    format!("{deployment_id} -> {app_id}"),
                );
            }
        }

        for (key, deployment_id) in &g.deployment_key_to_deployment_map {
            match g.deployments.get(deployment_id) {
                None => self.push(
                    ViolationKind::DanglingReference,
                    "deploymentKeyToDeploymentMap",
                    format!("{key} -> missing deployment {deployment_id}"),
                ),
                Some(d) if d.key != *key => self.push(
                    ViolationKind::ParentMismatch,
                    "deploymentKeyToDeploymentMap",
                    format!("{key} -> {deployment_id} whose key is {}", d.key),
                ),
                Some(_) => {}
            }
        }

        for (deployment_id, deployment) in &g.deployments {
            if !g.deployment_to_app_map.contains_key(deployment_id) {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "deploymentToAppMap",
                    format!("deployment {deployment_id} has no parent app"),
                );
            }
            if g.deployment_key_to_deployment_map.get(&deployment.key) != Some(deployment_id) {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "deploymentKeyToDeploymentMap",
                    format!("deployment {deployment_id} key {} is not indexed", deployment.key),
                );
            }
            if deployment.package.as_ref() != deployment.package_history.last() {
                self.push(
                    ViolationKind::PackagePointer,
                    format!("deployment {deployment_id}"),
                    "current package differs from last history entry".into(),
                );
            }
        }
    }

    fn check_access_keys(&mut self) {
        let g = self.graph;
        for (key_id, account_id) in &g.access_key_to_account_map {
            if !g.access_keys.contains_key(key_id) || !g.accounts.contains_key(account_id) {
                self.push(
                    ViolationKind::DanglingReference,
                    "accessKeyToAccountMap",
                    format!("{key_id} -> {account_id}"),
                );
                continue;
            }
            let listed = g
                .account_to_access_keys_map
                .get(account_id)
                .is_some_and(|keys| keys.contains(key_id));
            if !listed {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "accountToAccessKeysMap",
                    format!("{account_id} does not list {key_id}"),
                );
            }
        }

        for (account_id, key_ids) in &g.account_to_access_keys_map {
            for key_id in key_ids {
                if g.access_key_to_account_map.get(key_id) != Some(account_id) {
                    self.push(
                        ViolationKind::ParentMismatch,
                        "accountToAccessKeysMap",
                        format!("{account_id} lists {key_id} held elsewhere"),
                    );
                }
            }
        }

        for (name, pointer) in &g.access_key_name_to_account_id_map {
            let holder = g
                .access_keys
                .iter()
                .find(|(_, key)| key.name == *name)
                .and_then(|(id, _)| g.access_key_to_account_map.get(id));
            match holder {
                None => self.push(
                    ViolationKind::DanglingReference,
                    "accessKeyNameToAccountIdMap",
                    "name points to no stored access key".into(),
                ),
                Some(account_id) if *account_id != pointer.account_id => self.push(
                    ViolationKind::ParentMismatch,
                    "accessKeyNameToAccountIdMap",
                    format!("name resolves to {} but key is held by {account_id}", pointer.account_id),
                ),
                Some(_) => {}
            }
        }

        for (key_id, key) in &g.access_keys {
            if !g.access_key_name_to_account_id_map.contains_key(&key.name) {
                self.push(
                    ViolationKind::MissingIndexEntry,
                    "accessKeyNameToAccountIdMap",
                    format!("access key {key_id} name is not indexed"),
                );
            }
        }
    }

    fn check_counter(&mut self) {
        let g = self.graph;
        let highest = g
            .accounts
            .keys()
            .chain(g.apps.keys())
            .chain(g.deployments.keys())
            .chain(g.access_keys.keys())
            .filter_map(EntityId::sequence)
            .max();
        if let Some(highest) = highest {
            if g.next_id_number <= highest {
                self.push(
                    ViolationKind::CounterBehind,
                    "NextIdNumber",
                    format!("counter {} but id_{highest} is in use", g.next_id_number),
                );
            }
        }
    }
}

impl Graph {
    /// Check every reverse index against the primary records.
    pub fn verify(&self) -> IntegrityReport {
        let mut checker = Checker {
            graph: self,
            violations: Vec::new(),
        };
        checker.check_accounts();
        checker.check_apps();
        checker.check_deployments();
        checker.check_access_keys();
        checker.check_counter();
        IntegrityReport {
            violations: checker.violations,
        }
    }
}
