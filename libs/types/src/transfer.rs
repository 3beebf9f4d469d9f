//! Transfer lifecycle records and the request state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount;
use crate::chain::ChainId;
use crate::error::TypeError;
use crate::token::TokenRef;

/// Lifecycle state of one transfer request
///
/// Transitions are monotone:
///
/// ```text
/// Pending → Submitted → Confirmed → Completed
///    │          │           │
///    ├──────────┴───────────┴──→ Failed ──→ RolledBack
/// Pending/Submitted ──(deadline)──→ Expired ──→ RolledBack
/// ```
///
/// `Completed`, `Failed`, `RolledBack` and `Expired` are terminal; the only
/// permitted exit from a terminal state is the rollback resolution of a
/// failed or expired transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Submitted,
    Confirmed,
    Completed,
    Failed,
    RolledBack,
    Expired,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Expired => "expired",
        }
    }

    /// Whether no further forward progress is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::Expired
        )
    }

    /// Whether the state machine permits `self → next`
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
                | (Submitted, Expired)
                | (Confirmed, Completed)
                | (Confirmed, Failed)
                | (Failed, RolledBack)
                | (Expired, RolledBack)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            "expired" => Ok(Self::Expired),
            other => Err(TypeError::UnknownState(other.to_string())),
        }
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// A request to move tokens between two chains
///
/// Created from an API call or from a normalized source event. Immutable
/// after acceptance except for `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Unique request id; generated when the caller omits it
    #[serde(default = "new_request_id")]
    pub id: String,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_address: String,
    pub to_address: String,
    pub token: TokenRef,
    /// Amount in base units, decimal string on the wire
    #[serde(with = "amount::serde_u256")]
    pub amount: U256,
    /// Bridge fee in the source token's base units, set at acceptance
    #[serde(default, with = "amount::serde_u256_opt", skip_serializing_if = "Option::is_none")]
    pub fee: Option<U256>,
    pub nonce: u64,
    /// After this instant the transfer may no longer progress
    pub deadline: DateTime<Utc>,
    /// Carried for callers that sign requests; advisory, not verified here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default = "now_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now_utc")]
    pub updated_at: DateTime<Utc>,
}

impl TransferRequest {
    /// Whether the deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

/// Authoritative status record for one accepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub request_id: String,
    pub state: TransferState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tx_id: Option<String>,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub estimated_duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferResponse {
    /// Fresh `Pending` response for a newly accepted request
    pub fn pending(
        request_id: &str,
        required_confirmations: u32,
        estimated_duration_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            state: TransferState::Pending,
            source_tx_id: None,
            destination_tx_id: None,
            confirmations: 0,
            required_confirmations,
            estimated_duration_secs,
            actual_duration_secs: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Machine-readable validation issue codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    // Errors
    SameChain,
    NonPositiveAmount,
    PastDeadline,
    InvalidFromAddress,
    InvalidToAddress,
    UnsupportedPair,
    BelowMin,
    AboveMax,
    // Warnings
    FeeUnavailable,
    NoChainConfig,
}

/// One validation error or warning with a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome of validating a transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    #[serde(default, with = "amount::serde_u256_opt", skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_secs: Option<u64>,
}
