//! Core LineEngine implementation

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::allocation::{AllocationEngine, RequestOutcome};
use crate::balancer::{BalanceReport, LoadBalancer, LoadSnapshot, SwitchOutcome};
use crate::config::LineEngineConfig;
use crate::database::conversations::{self, MessageDirection};
use crate::database::LineDatabase;
use crate::error::Result;
use crate::health::{Confirmation, HealthMonitor, IdleReport, ReallocationCoordinator, ReallocationReport, SweepReport};
use crate::integration::{Collaborators, FailureSignal, LineAssigner, QueueGate};
use crate::line::LineRegistry;
use crate::operator::OperatorDirectory;
use crate::queue::{QueueDrainReport, QueueStats, WaitingQueue};
use crate::routing::{ContactBindingTable, InboundRoute};
use crate::types::{LineId, OperatorId};

/// An inbound message after routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundDelivery {
    /// `None` when no operator on the line is online
    pub route: Option<InboundRoute>,
    /// Open conversation the message was filed under
    pub conversation_id: Option<i64>,
}

/// Line engine: every component wired together
///
/// Request-triggered operations run on the caller's task. The periodic
/// sweeps are exposed as `run_*` methods that [`crate::server::LineEngineServer`]
/// drives on timers; calling one while the timer's run is in flight returns a
/// skipped report.
pub struct LineEngine {
    config: LineEngineConfig,
    db: LineDatabase,
    collaborators: Collaborators,
    lines: LineRegistry,
    operators: OperatorDirectory,
    contacts: ContactBindingTable,
    allocation: Arc<AllocationEngine>,
    queue: Arc<WaitingQueue>,
    coordinator: Arc<ReallocationCoordinator>,
    health: Arc<HealthMonitor>,
    balancer: Arc<LoadBalancer>,
}

impl LineEngine {
    /// Open the configured database and wire the engine
    pub async fn new(config: LineEngineConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;
        info!("🚀 Creating LineEngine '{}'", config.general.instance_name);

        let db = LineDatabase::new(&config.database).await?;
        info!("✅ Line database ready at {}", config.database.database_url);

        Ok(Arc::new(Self::with_database(config, db, collaborators)))
    }

    /// Wire the engine on an already opened database
    pub fn with_database(config: LineEngineConfig, db: LineDatabase, collaborators: Collaborators) -> Self {
        let queue = Arc::new(WaitingQueue::new(db.clone(), &config, collaborators.clone()));
        let allocation = Arc::new(AllocationEngine::new(
            db.clone(),
            &config,
            collaborators.clone(),
            Arc::clone(&queue) as Arc<dyn QueueGate>,
        ));
        let assigner = Arc::clone(&allocation) as Arc<dyn LineAssigner>;

        let contacts = ContactBindingTable::new(db.clone(), &config);
        let coordinator = Arc::new(ReallocationCoordinator::new(
            db.clone(),
            &config,
            collaborators.clone(),
            Arc::clone(&assigner),
        ));
        let health = Arc::new(HealthMonitor::new(
            db.clone(),
            &config,
            collaborators.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&assigner),
            contacts.clone(),
        ));
        let balancer = Arc::new(LoadBalancer::new(db.clone(), &config, collaborators.clone(), assigner));

        Self {
            lines: LineRegistry::new(db.clone(), Arc::clone(&collaborators.audit)),
            operators: OperatorDirectory::new(db.clone()),
            contacts,
            allocation,
            queue,
            coordinator,
            health,
            balancer,
            collaborators,
            db,
            config,
        }
    }

    /// Operator came online: mark them online and find them a line
    pub async fn operator_connected(&self, operator_id: OperatorId) -> Result<RequestOutcome> {
        self.operators.set_online(operator_id).await?;
        let outcome = self.allocation.request_line(operator_id).await?;
        info!("🟢 Operator {} connected: {}", operator_id, outcome_label(&outcome));
        Ok(outcome)
    }

    /// Operator went offline: they leave the queue but keep their lines
    /// until idle reclamation releases them
    pub async fn operator_disconnected(&self, operator_id: OperatorId) -> Result<()> {
        self.operators.set_offline(operator_id).await?;
        self.queue.remove(operator_id).await?;
        info!("⚫ Operator {} disconnected", operator_id);
        Ok(())
    }

    pub async fn request_line(&self, operator_id: OperatorId) -> Result<RequestOutcome> {
        self.allocation.request_line(operator_id).await
    }

    /// Route an inbound message and file it under the contact's open
    /// conversation, opening one when needed
    pub async fn route_inbound_message(&self, line_id: LineId, contact_phone: &str) -> Result<InboundDelivery> {
        let route = self
            .contacts
            .assign_inbound_message_to_operator(line_id, contact_phone)
            .await?;

        let mut conn = self.db.acquire().await?;
        let now = Utc::now();
        let conversation_id = match &route {
            Some(route) => {
                let existing = conversations::find_open_for_contact(&mut conn, contact_phone, line_id).await?;
                let conversation = match existing {
                    Some(conversation) => conversation,
                    None => {
                        conversations::insert_conversation(&mut conn, contact_phone, route.operator_id, line_id, now)
                            .await?
                    }
                };
                Some(conversation.id)
            }
            None => None,
        };
        conversations::log_message(&mut conn, line_id, conversation_id, MessageDirection::Inbound, now).await?;

        Ok(InboundDelivery { route, conversation_id })
    }

    /// Count an outbound message towards the line's message rate
    pub async fn record_outbound_message(&self, line_id: LineId, conversation_id: Option<i64>) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        conversations::log_message(&mut conn, line_id, conversation_id, MessageDirection::Outbound, Utc::now()).await
    }

    /// Admin ban, then give waiting operators a chance at freed capacity
    pub async fn ban_line(&self, line_id: LineId, actor: &str) -> Result<ReallocationReport> {
        let report = self.coordinator.ban_line(line_id, actor).await?;
        self.drain_after_release().await;
        Ok(report)
    }

    /// Admin unbind; refused in shared-line mode
    pub async fn manual_unbind(&self, line_id: LineId, operator_id: OperatorId, actor: &str) -> Result<bool> {
        let removed = self.allocation.manual_unbind(line_id, operator_id, actor).await?;
        if removed {
            self.drain_after_release().await;
        }
        Ok(removed)
    }

    /// Report a failed send; waits for the confirming probe
    pub async fn report_send_failure(&self, line_id: LineId, signal: FailureSignal) -> Result<Confirmation> {
        self.health.report_send_failure(line_id, signal).await
    }

    /// Fire-and-forget variant of [`Self::report_send_failure`]
    pub fn spawn_send_failure_check(&self, line_id: LineId, signal: FailureSignal) -> JoinHandle<()> {
        let health = Arc::clone(&self.health);
        tokio::spawn(async move {
            if let Err(e) = health.report_send_failure(line_id, signal).await {
                error!("❌ Send failure check on line {} failed: {}", line_id, e);
            }
        })
    }

    async fn drain_after_release(&self) {
        match self.drain_queue().await {
            Ok(report) if !report.assigned.is_empty() => {
                info!("📤 Drained {} waiting operators after release", report.assigned.len());
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️ Queue drain after release failed: {}", e),
        }
    }

    pub async fn drain_queue(&self) -> Result<QueueDrainReport> {
        self.queue.process_queue(self.allocation.as_ref()).await
    }

    /// Full health sweep, followed by a binding integrity check
    pub async fn run_full_sweep(&self) -> Result<SweepReport> {
        let report = self.health.full_sweep().await?;
        if !report.skipped {
            let violations = self.allocation.report_invariant_violations().await?;
            if violations > 0 {
                error!("🚨 {} binding invariant violations after full sweep", violations);
            }
        }
        Ok(report)
    }

    pub async fn run_targeted_sweep(&self) -> Result<SweepReport> {
        self.health.targeted_sweep().await
    }

    pub async fn run_idle_reclamation(&self) -> Result<IdleReport> {
        self.health.idle_reclamation().await
    }

    pub async fn run_balance_sweep(&self) -> Result<BalanceReport> {
        self.balancer.balance_all_lines().await
    }

    pub async fn switch_line_if_needed(&self, operator_id: OperatorId) -> Result<SwitchOutcome> {
        self.balancer.switch_line_if_needed(operator_id).await
    }

    pub async fn line_load(&self, line_id: LineId) -> Result<LoadSnapshot> {
        self.balancer.compute_load(line_id).await
    }

    pub async fn queue_position(&self, operator_id: OperatorId) -> Result<Option<usize>> {
        self.queue.get_position(operator_id).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub fn config(&self) -> &LineEngineConfig {
        &self.config
    }

    pub fn database(&self) -> &LineDatabase {
        &self.db
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn lines(&self) -> &LineRegistry {
        &self.lines
    }

    pub fn operators(&self) -> &OperatorDirectory {
        &self.operators
    }

    pub fn contacts(&self) -> &ContactBindingTable {
        &self.contacts
    }

    pub fn allocation(&self) -> &Arc<AllocationEngine> {
        &self.allocation
    }

    pub fn queue(&self) -> &Arc<WaitingQueue> {
        &self.queue
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }
}

fn outcome_label(outcome: &RequestOutcome) -> String {
    match outcome {
        RequestOutcome::AlreadyAssigned(line) => format!("already on line {}", line.id),
        RequestOutcome::Assigned(line) => format!("assigned line {}", line.id),
        RequestOutcome::Queued(admission) => match admission.position() {
            Some(position) => format!("queued at position {}", position),
            None => "not queued".to_string(),
        },
        RequestOutcome::NotEligible => "not eligible".to_string(),
        RequestOutcome::AllocationDisabled => "allocation disabled".to_string(),
    }
}
