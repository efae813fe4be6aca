//! The consumed entity-layer capability and its LMDB implementation

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heed::types::{SerdeBincode, Str, Unit};
use heed::{Database, Env};
use serde::{Deserialize, Serialize};

use crate::error::{data_err, Result};
use crate::store::shared_env;

/// A raw grant row: holder (user or group), path pattern, and the
/// encoded permission value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub holder: String,
    pub artifact_path: String,
    pub permission_value: String,
}

/// A path pattern whose accesses are audited, optionally limited to a
/// date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedArtifact {
    pub artifact_path: String,
    pub from_date: Option<DateTime<Utc>>,
    pub thru_date: Option<DateTime<Utc>>,
}

impl AuditedArtifact {
    /// Date-range filter: in effect from `from_date` (inclusive) until
    /// `thru_date` (exclusive), with open ends.
    pub fn active_at(&self, when: DateTime<Utc>) -> bool {
        self.from_date.map_or(true, |from| from <= when)
            && self.thru_date.map_or(true, |thru| thru > when)
    }
}

/// One security-audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_login_id: String,
    pub artifact_path: String,
    pub incident_date: DateTime<Utc>,
    pub requested_access: String,
}

/// Entity-layer reads (and the one audit write) the authorization
/// manager depends on. Implementations sit on whatever storage actually
/// holds the grant tables.
pub trait Delegator: Send + Sync {
    fn name(&self) -> &str;
    /// Direct group memberships of a user.
    fn user_groups(&self, user_login_id: &str) -> Result<Vec<String>>;
    /// Direct parents of a group (child-to-parent edges).
    fn parent_groups(&self, group_id: &str) -> Result<Vec<String>>;
    fn user_grants(&self, user_login_id: &str) -> Result<Vec<Grant>>;
    fn group_grants(&self, group_id: &str) -> Result<Vec<Grant>>;
    fn audited_artifacts(&self) -> Result<Vec<AuditedArtifact>>;
    fn write_incident(&self, record: AuditRecord) -> Result<()>;
}

// Escape forward slashes so entity ids survive composite keys.
// Only allocates when escaping is needed.
fn escape_key_part(s: &str) -> Cow<'_, str> {
    if s.contains('/') || s.contains('\\') {
        Cow::Owned(s.replace('\\', "\\\\").replace('/', "\\/"))
    } else {
        Cow::Borrowed(s)
    }
}

fn unescape_key_part(s: &str) -> Cow<'_, str> {
    if s.contains('\\') {
        Cow::Owned(s.replace("\\/", "/").replace("\\\\", "\\"))
    } else {
        Cow::Borrowed(s)
    }
}

/// LMDB-backed grant storage.
///
/// Storage patterns:
/// - `user/group` and `child/parent` presence keys for memberships
/// - `holder/<seq>` -> grant row
/// - `path` -> audited-artifact row
/// - `<seq>` -> audit-log row
pub struct LmdbDelegator {
    name: String,
    env: Arc<Env>,
    membership: Database<Str, Unit>,
    group_parents: Database<Str, Unit>,
    user_grants: Database<Str, SerdeBincode<Grant>>,
    group_grants: Database<Str, SerdeBincode<Grant>>,
    audited: Database<Str, SerdeBincode<AuditedArtifact>>,
    incidents: Database<Str, SerdeBincode<AuditRecord>>,
    meta: Database<Str, Str>,
}

impl LmdbDelegator {
    pub fn open(name: impl Into<String>, path: &Path) -> Result<Self> {
        let env = shared_env(path).map_err(data_err)?;
        let mut wtxn = env.write_txn().map_err(data_err)?;
        let delegator = Self {
            name: name.into(),
            membership: env
                .create_database(&mut wtxn, Some("membership"))
                .map_err(data_err)?,
            group_parents: env
                .create_database(&mut wtxn, Some("group-parents"))
                .map_err(data_err)?,
            user_grants: env
                .create_database(&mut wtxn, Some("user-grants"))
                .map_err(data_err)?,
            group_grants: env
                .create_database(&mut wtxn, Some("group-grants"))
                .map_err(data_err)?,
            audited: env
                .create_database(&mut wtxn, Some("audited-artifacts"))
                .map_err(data_err)?,
            incidents: env
                .create_database(&mut wtxn, Some("audit-log"))
                .map_err(data_err)?,
            meta: env.create_database(&mut wtxn, Some("meta")).map_err(data_err)?,
            env: env.clone(),
        };
        wtxn.commit().map_err(data_err)?;
        Ok(delegator)
    }

    pub fn add_user_to_group(&self, user_login_id: &str, group_id: &str) -> Result<()> {
        let key = format!(
            "{}/{}",
            escape_key_part(user_login_id),
            escape_key_part(group_id)
        );
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        self.membership.put(&mut wtxn, &key, &()).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }

    pub fn add_group_parent(&self, child_group_id: &str, parent_group_id: &str) -> Result<()> {
        let key = format!(
            "{}/{}",
            escape_key_part(child_group_id),
            escape_key_part(parent_group_id)
        );
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        self.group_parents.put(&mut wtxn, &key, &()).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }

    pub fn add_user_grant(
        &self,
        user_login_id: &str,
        artifact_path: &str,
        permission_value: &str,
    ) -> Result<()> {
        self.add_grant(&self.user_grants, user_login_id, artifact_path, permission_value)
    }

    pub fn add_group_grant(
        &self,
        group_id: &str,
        artifact_path: &str,
        permission_value: &str,
    ) -> Result<()> {
        self.add_grant(&self.group_grants, group_id, artifact_path, permission_value)
    }

    fn add_grant(
        &self,
        table: &Database<Str, SerdeBincode<Grant>>,
        holder: &str,
        artifact_path: &str,
        permission_value: &str,
    ) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        let seq = self.next_seq(&mut wtxn, "grant-seq")?;
        let key = format!("{}/{:020}", escape_key_part(holder), seq);
        let grant = Grant {
            holder: holder.to_string(),
            artifact_path: artifact_path.to_string(),
            permission_value: permission_value.to_string(),
        };
        table.put(&mut wtxn, &key, &grant).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }

    pub fn add_audited_artifact(
        &self,
        artifact_path: &str,
        from_date: Option<DateTime<Utc>>,
        thru_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let row = AuditedArtifact {
            artifact_path: artifact_path.to_string(),
            from_date,
            thru_date,
        };
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        self.audited.put(&mut wtxn, artifact_path, &row).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }

    /// Every audit row written so far, in write order.
    pub fn incidents(&self) -> Result<Vec<AuditRecord>> {
        let rtxn = self.env.read_txn().map_err(data_err)?;
        let mut rows = Vec::new();
        for item in self.incidents.iter(&rtxn).map_err(data_err)? {
            let (_, record) = item.map_err(data_err)?;
            rows.push(record);
        }
        Ok(rows)
    }

    /// Clear every table (for testing).
    pub fn clear_all(&self) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        self.membership.clear(&mut wtxn).map_err(data_err)?;
        self.group_parents.clear(&mut wtxn).map_err(data_err)?;
        self.user_grants.clear(&mut wtxn).map_err(data_err)?;
        self.group_grants.clear(&mut wtxn).map_err(data_err)?;
        self.audited.clear(&mut wtxn).map_err(data_err)?;
        self.incidents.clear(&mut wtxn).map_err(data_err)?;
        self.meta.clear(&mut wtxn).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }

    fn next_seq(&self, wtxn: &mut heed::RwTxn, key: &str) -> Result<u64> {
        let next = self
            .meta
            .get(wtxn, key)
            .map_err(data_err)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0u64)
            + 1;
        self.meta.put(wtxn, key, &next.to_string()).map_err(data_err)?;
        Ok(next)
    }

    fn edges(&self, table: &Database<Str, Unit>, from: &str) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(data_err)?;
        let prefix = format!("{}/", escape_key_part(from));
        let mut edges = Vec::new();
        for item in table.prefix_iter(&rtxn, &prefix).map_err(data_err)? {
            let (key, _) = item.map_err(data_err)?;
            edges.push(unescape_key_part(&key[prefix.len()..]).into_owned());
        }
        Ok(edges)
    }

    fn grants(&self, table: &Database<Str, SerdeBincode<Grant>>, holder: &str) -> Result<Vec<Grant>> {
        let rtxn = self.env.read_txn().map_err(data_err)?;
        let prefix = format!("{}/", escape_key_part(holder));
        let mut rows = Vec::new();
        for item in table.prefix_iter(&rtxn, &prefix).map_err(data_err)? {
            let (_, grant) = item.map_err(data_err)?;
            rows.push(grant);
        }
        Ok(rows)
    }
}

impl Delegator for LmdbDelegator {
    fn name(&self) -> &str {
        &self.name
    }

    fn user_groups(&self, user_login_id: &str) -> Result<Vec<String>> {
        self.edges(&self.membership, user_login_id)
    }

    fn parent_groups(&self, group_id: &str) -> Result<Vec<String>> {
        self.edges(&self.group_parents, group_id)
    }

    fn user_grants(&self, user_login_id: &str) -> Result<Vec<Grant>> {
        self.grants(&self.user_grants, user_login_id)
    }

    fn group_grants(&self, group_id: &str) -> Result<Vec<Grant>> {
        self.grants(&self.group_grants, group_id)
    }

    fn audited_artifacts(&self) -> Result<Vec<AuditedArtifact>> {
        let rtxn = self.env.read_txn().map_err(data_err)?;
        let mut rows = Vec::new();
        for item in self.audited.iter(&rtxn).map_err(data_err)? {
            let (_, row) = item.map_err(data_err)?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn write_incident(&self, record: AuditRecord) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(data_err)?;
        let seq = self.next_seq(&mut wtxn, "incident-seq")?;
        let key = format!("{:020}", seq);
        self.incidents.put(&mut wtxn, &key, &record).map_err(data_err)?;
        wtxn.commit().map_err(data_err)
    }
}
