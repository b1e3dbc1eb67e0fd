//! Notification types pushed to live clients
//!
//! The payload is serialized to JSON and carried as opaque bytes through the
//! hub and broker; clients parse it on arrival.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Kind of notification raised by a business module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Approved,
    Rejected,
    LeaveApprovalReq,
    ReimburseApprovalReq,
    PayrollPaid,
    LoanApprovalReq,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Approved => "APPROVED",
            NotificationType::Rejected => "REJECTED",
            NotificationType::LeaveApprovalReq => "LEAVE_APPROVAL_REQ",
            NotificationType::ReimburseApprovalReq => "REIMBURSE_APPROVAL_REQ",
            NotificationType::PayrollPaid => "PAYROLL_PAID",
            NotificationType::LoanApprovalReq => "LOAN_APPROVAL_REQ",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVED" => Ok(NotificationType::Approved),
            "REJECTED" => Ok(NotificationType::Rejected),
            "LEAVE_APPROVAL_REQ" => Ok(NotificationType::LeaveApprovalReq),
            "REIMBURSE_APPROVAL_REQ" => Ok(NotificationType::ReimburseApprovalReq),
            "PAYROLL_PAID" => Ok(NotificationType::PayrollPaid),
            "LOAN_APPROVAL_REQ" => Ok(NotificationType::LoanApprovalReq),
            other => Err(Error::InvalidInput(format!(
                "unknown notification type: {}",
                other
            ))),
        }
    }
}

/// Persisted notification as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: u64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_id: u64,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// JSON bytes sent to the user's live sessions
    pub fn to_push_payload(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
