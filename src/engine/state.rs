//! Order state machines. Transitions not listed here do not happen; every
//! mutation path funnels through `can_transition` before touching storage.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    /// Waiting for the provider to confirm payment.
    Confirming,
    /// Settled by the provider but parked for an operator decision.
    Reviewing,
    Success,
    Cancelled,
}

impl DepositState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositState::Confirming => "confirming",
            DepositState::Reviewing => "reviewing",
            DepositState::Success => "success",
            DepositState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositState::Success | DepositState::Cancelled)
    }

    pub fn can_transition(&self, to: DepositState) -> bool {
        use DepositState::*;
        matches!(
            (self, to),
            (Confirming, Success)
                | (Confirming, Cancelled)
                | (Confirming, Reviewing)
                | (Reviewing, Success)
                | (Reviewing, Cancelled)
        )
    }

    pub fn ensure_transition(&self, to: DepositState) -> EngineResult<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidOrderState {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirming" => Ok(DepositState::Confirming),
            "reviewing" => Ok(DepositState::Reviewing),
            "success" => Ok(DepositState::Success),
            "cancelled" => Ok(DepositState::Cancelled),
            other => Err(EngineError::validation(format!(
                "unknown deposit state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    /// Waiting for a risk reviewer's verdict.
    Reviewing,
    /// Assigned to a reviewer.
    Dispatched,
    /// Pushed to a payout provider.
    Dealing,
    /// Provider reported the auto payout failed; retryable.
    AutoPayFailed,
    /// Parked by a reviewer pending user contact.
    Hangup,
    Rejected,
    Success,
    Failed,
}

impl WithdrawalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalState::Reviewing => "reviewing",
            WithdrawalState::Dispatched => "dispatched",
            WithdrawalState::Dealing => "dealing",
            WithdrawalState::AutoPayFailed => "autopay_failed",
            WithdrawalState::Hangup => "hangup",
            WithdrawalState::Rejected => "rejected",
            WithdrawalState::Success => "success",
            WithdrawalState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalState::Rejected | WithdrawalState::Success | WithdrawalState::Failed
        )
    }

    pub fn can_transition(&self, to: WithdrawalState) -> bool {
        use WithdrawalState::*;
        matches!(
            (self, to),
            (Reviewing, Dispatched)
                | (Reviewing, Rejected)
                | (Dispatched, Dealing)
                | (Dispatched, Rejected)
                | (Dispatched, Hangup)
                | (Dealing, Success)
                | (Dealing, Failed)
                | (Dealing, AutoPayFailed)
                | (AutoPayFailed, Dealing)
                | (AutoPayFailed, Success)
                | (AutoPayFailed, Failed)
                | (Hangup, Reviewing)
        )
    }

    pub fn ensure_transition(&self, to: WithdrawalState) -> EngineResult<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidOrderState {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reviewing" => Ok(WithdrawalState::Reviewing),
            "dispatched" => Ok(WithdrawalState::Dispatched),
            "dealing" => Ok(WithdrawalState::Dealing),
            "autopay_failed" => Ok(WithdrawalState::AutoPayFailed),
            "hangup" => Ok(WithdrawalState::Hangup),
            "rejected" => Ok(WithdrawalState::Rejected),
            "success" => Ok(WithdrawalState::Success),
            "failed" => Ok(WithdrawalState::Failed),
            other => Err(EngineError::validation(format!(
                "unknown withdrawal state '{}'",
                other
            ))),
        }
    }
}
