//! Operator directory

use chrono::Utc;
use tracing::{debug, info};

use super::{NewOperator, OnlineStatus, Operator};
use crate::database::{bindings, operators, LineDatabase};
use crate::error::Result;
use crate::line::Line;
use crate::types::OperatorId;

#[derive(Clone)]
pub struct OperatorDirectory {
    db: LineDatabase,
}

impl OperatorDirectory {
    pub fn new(db: LineDatabase) -> Self {
        Self { db }
    }

    /// Register an operator; new operators start offline with no line
    pub async fn create_operator(&self, new_operator: NewOperator) -> Result<Operator> {
        let mut conn = self.db.acquire().await?;
        let operator = operators::insert_operator(&mut conn, &new_operator, Utc::now()).await?;
        info!(
            "👤 Created operator {} '{}' ({:?}, segment {:?})",
            operator.id, operator.name, operator.role, operator.segment_id
        );
        Ok(operator)
    }

    pub async fn get(&self, operator_id: OperatorId) -> Result<Option<Operator>> {
        let mut conn = self.db.acquire().await?;
        operators::get_operator(&mut conn, operator_id).await
    }

    pub async fn fetch(&self, operator_id: OperatorId) -> Result<Operator> {
        let mut conn = self.db.acquire().await?;
        operators::fetch_operator(&mut conn, operator_id).await
    }

    pub async fn set_online(&self, operator_id: OperatorId) -> Result<Operator> {
        self.set_status(operator_id, OnlineStatus::Online).await
    }

    pub async fn set_offline(&self, operator_id: OperatorId) -> Result<Operator> {
        self.set_status(operator_id, OnlineStatus::Offline).await
    }

    async fn set_status(&self, operator_id: OperatorId, status: OnlineStatus) -> Result<Operator> {
        let mut conn = self.db.acquire().await?;
        operators::set_online_status(&mut conn, operator_id, status, Utc::now()).await?;
        let operator = operators::fetch_operator(&mut conn, operator_id).await?;
        debug!("👤 Operator {} is now {:?}", operator_id, operator.online_status);
        Ok(operator)
    }

    pub async fn list(&self) -> Result<Vec<Operator>> {
        let mut conn = self.db.acquire().await?;
        operators::list_operators(&mut conn).await
    }

    pub async fn list_online(&self) -> Result<Vec<Operator>> {
        let mut conn = self.db.acquire().await?;
        operators::list_online(&mut conn).await
    }

    /// Every line the operator is bound to, active or not
    pub async fn lines_for(&self, operator_id: OperatorId) -> Result<Vec<Line>> {
        let mut conn = self.db.acquire().await?;
        bindings::lines_for_operator(&mut conn, operator_id).await
    }
}
