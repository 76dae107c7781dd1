//! # Task Catalog Seam
//!
//! The ledger does not decide whether a task is complete; that belongs
//! to the task/referral catalog collaborator. This module defines the
//! interface the reward processor consumes: given an authenticated user
//! and a task id, is there a completed, payable task, and how much is it
//! worth? The ledger's own job starts after the answer: pay out at most
//! once.

use async_trait::async_trait;

use crate::ledger::LedgerError;

/// Eligibility gate for task reward claims.
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    /// The reward (micro-CELF) for a completed task, or `None` when the
    /// task is unknown or not completed for this user.
    async fn completed_task_reward(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<Option<i64>, LedgerError>;
}

/// Flat-reward catalog backed by configuration.
///
/// Deployments wire the real catalog service here; this implementation
/// trusts the upstream completion signal (claims arrive only after the
/// task system validates them) and pays a flat configured amount. Empty
/// task ids are rejected as unknown.
pub struct StaticTaskCatalog {
    /// Reward paid per completed task, micro-CELF.
    reward: i64,
}

impl StaticTaskCatalog {
    /// Create a catalog paying `reward` micro-CELF per task.
    pub fn new(reward: i64) -> Self {
        Self { reward }
    }
}

#[async_trait]
impl TaskCatalog for StaticTaskCatalog {
    async fn completed_task_reward(
        &self,
        _user_id: &str,
        task_id: &str,
    ) -> Result<Option<i64>, LedgerError> {
        if task_id.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.reward))
    }
}
