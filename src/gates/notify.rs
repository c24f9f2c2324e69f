//! Gate notifications
//!
//! Delivery is best effort. The gate manager logs and counts a failed send;
//! it never rolls back the transition that triggered it.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::model::{Gate, GateType};
use crate::config::NotificationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Gate created and assigned
    Assignment,
    /// Half the SLA used without an answer
    Reminder,
    /// Reassigned to the next person in the escalation chain
    Escalation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Assignment => "assignment",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Escalation => "escalation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateNotification {
    pub gate_id: String,
    pub assigned_to: String,
    pub gate_type: GateType,
    pub question: String,
    pub experiment_title: String,
    pub outcome_title: String,
    pub sla_hours: f64,
    pub dashboard_url: String,
    pub kind: NotificationKind,
}

impl GateNotification {
    pub fn for_gate(gate: &Gate, kind: NotificationKind, config: &NotificationConfig) -> Self {
        Self {
            gate_id: gate.id.clone(),
            assigned_to: gate.assigned_to.clone(),
            gate_type: gate.gate_type,
            question: gate.question.clone(),
            experiment_title: gate.experiment_title.clone(),
            outcome_title: gate.outcome_title.clone(),
            sla_hours: gate.sla_hours,
            dashboard_url: config.gate_url(&gate.experiment_id, &gate.id),
            kind,
        }
    }
}

#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &GateNotification) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(&self, n: &GateNotification) -> Result<()> {
        info!(
            gate_id = %n.gate_id,
            assigned_to = %n.assigned_to,
            kind = n.kind.as_str(),
            url = %n.dashboard_url,
            "📨 {}",
            n.question
        );
        Ok(())
    }
}

/// POSTs each notification as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Webhook if one is configured, log otherwise.
    pub fn from_config(config: &NotificationConfig) -> Result<Box<dyn NotificationChannel>> {
        match &config.webhook_url {
            Some(url) => Ok(Box::new(Self::new(url.clone(), config.send_timeout)?)),
            None => Ok(Box::new(LogNotifier)),
        }
    }
}

#[async_trait::async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn send(&self, notification: &GateNotification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .with_context(|| format!("webhook POST to {} failed", self.url))?
            .error_for_status()
            .context("webhook rejected notification")?;
        Ok(())
    }
}
