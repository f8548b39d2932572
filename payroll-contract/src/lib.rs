//! Payroll contract bindings and the ledger interface of the decryption
//! lifecycle.

use alloy::{
    primitives::{Address, Log},
    providers::{PendingTransactionBuilder, PendingTransactionError, Provider},
};
use async_trait::async_trait;
use payroll_types::{PlanId, SubjectId, TxHash, U256};
use tracing::debug;

pub mod events;
pub mod provider;
mod sol_types;

pub use sol_types::*;

/// A state changing contract call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    RequestDecryption(PlanId),
    RetryDecryption(PlanId),
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// What the ledger currently knows about the decryption of a subject.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DecryptionState {
    /// Has the gateway callback landed?
    pub finalized: bool,
    /// Decrypted value, meaningful only if `finalized`.
    pub value: U256,
}

/// The ledger side of a decryption request.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Address of the contract the calls go to.
    fn address(&self) -> Address;

    /// Sign and send a transaction, returning its hash.
    async fn submit(&self, call: LedgerCall) -> Result<TxHash, LedgerError>;

    /// Wait for a transaction to be included.
    async fn confirm(&self, tx: TxHash) -> Result<Receipt, LedgerError>;

    async fn decryption_state(&self, subject: &SubjectId) -> Result<DecryptionState, LedgerError>;

    /// Upper bound of retries the contract accepts per subject.
    async fn max_retries(&self) -> Result<u32, LedgerError>;
}

/// [`Ledger`] backed by a deployed payroll contract.
#[derive(Debug, Clone)]
pub struct ContractLedger<P> {
    provider: P,
    address: Address,
}

impl<P: Provider> ContractLedger<P> {
    pub fn new(provider: P, address: Address) -> Self {
        Self { provider, address }
    }

    fn contract(&self) -> PayrollFHE::PayrollFHEInstance<&P> {
        PayrollFHE::new(self.address, &self.provider)
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> Ledger for ContractLedger<P> {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit(&self, call: LedgerCall) -> Result<TxHash, LedgerError> {
        let contract = self.contract();
        let pending = match call {
            LedgerCall::RequestDecryption(plan) => {
                contract.requestSalaryDecryption(plan.into()).send().await?
            }
            LedgerCall::RetryDecryption(plan) => {
                contract.retrySalaryDecryption(plan.into()).send().await?
            }
        };
        let hash = *pending.tx_hash();
        debug!(contract = %self.address, ?call, tx = %hash, "transaction sent");
        Ok(hash)
    }

    async fn confirm(&self, tx: TxHash) -> Result<Receipt, LedgerError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx)
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Pending(tx, e))?;
        Ok(Receipt {
            tx_hash: tx,
            success: receipt.status(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|l| l.inner.clone())
                .collect(),
        })
    }

    async fn decryption_state(&self, subject: &SubjectId) -> Result<DecryptionState, LedgerError> {
        let contract = self.contract();
        let plan: U256 = subject.plan().into();
        let finalized = contract
            .isSalaryDecrypted(plan, subject.employee())
            .call()
            .await?;
        if !finalized {
            return Ok(DecryptionState::default());
        }
        let value = contract
            .getMyDecryptedSalary(plan)
            .from(subject.employee())
            .call()
            .await?;
        Ok(DecryptionState { finalized, value })
    }

    async fn max_retries(&self) -> Result<u32, LedgerError> {
        let n = self.contract().maxDecryptionRetries().call().await?;
        Ok(n.saturating_to())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("contract error: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("transaction {0} not confirmed: {1}")]
    Pending(TxHash, #[source] PendingTransactionError),

    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    #[error("rpc error: {0}")]
    Rpc(String),
}
