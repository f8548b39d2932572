//! Typed decoding of the events a decryption request emits.

use alloy::{primitives::Address, sol_types::SolEvent};
use payroll_types::{CorrelationId, SubjectId, U256};
use tracing::debug;

use crate::{PayrollFHE::SalaryDecryptionRequested, Receipt};

/// Extract the correlation id the ledger assigned to a decryption request of
/// `subject`, if `receipt` carries one.
///
/// Only `SalaryDecryptionRequested` events emitted by `contract` for exactly
/// this plan and employee are considered. A zero request id counts as absent.
pub fn correlation_id(
    receipt: &Receipt,
    contract: Address,
    subject: &SubjectId,
) -> Option<CorrelationId> {
    let plan: U256 = subject.plan().into();
    receipt
        .logs
        .iter()
        .filter(|log| log.address == contract)
        .filter_map(|log| match SalaryDecryptionRequested::decode_log(log) {
            Ok(event) => Some(event.data),
            Err(err) => {
                debug!(tx = %receipt.tx_hash, %err, "skipping unrelated log");
                None
            }
        })
        .find(|e| e.planId == plan && e.employee == subject.employee())
        .map(|e| CorrelationId::new(e.requestId))
        .filter(|id| !id.is_zero())
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, B256, Bytes, Log, LogData};
    use alloy::sol_types::SolEvent;
    use payroll_types::{CorrelationId, SubjectId, TxHash, U256};

    use super::correlation_id;
    use crate::{PayrollFHE::SalaryDecryptionRequested, Receipt};

    const CONTRACT: Address = Address::repeat_byte(0xc0);
    const EMPLOYEE: Address = Address::repeat_byte(0xe1);

    fn requested(contract: Address, plan: u64, employee: Address, id: u64) -> Log {
        let event = SalaryDecryptionRequested {
            planId: U256::from(plan),
            employee,
            requestId: U256::from(id),
            timestamp: U256::from(1_700_000_000u64),
        };
        Log {
            address: contract,
            data: event.encode_log_data(),
        }
    }

    fn receipt(logs: Vec<Log>) -> Receipt {
        Receipt {
            tx_hash: TxHash::repeat_byte(1),
            success: true,
            logs,
        }
    }

    #[test]
    fn finds_request_id_among_other_logs() {
        let unrelated = Log {
            address: CONTRACT,
            data: LogData::new_unchecked(vec![B256::repeat_byte(9)], Bytes::new()),
        };
        let r = receipt(vec![unrelated, requested(CONTRACT, 3, EMPLOYEE, 77)]);
        assert_eq!(
            correlation_id(&r, CONTRACT, &SubjectId::new(3, EMPLOYEE)),
            Some(CorrelationId::new(U256::from(77)))
        );
    }

    #[test]
    fn ignores_other_subjects_and_contracts() {
        let subject = SubjectId::new(3, EMPLOYEE);
        let r = receipt(vec![
            requested(CONTRACT, 4, EMPLOYEE, 1),
            requested(CONTRACT, 3, Address::repeat_byte(0xe2), 2),
            requested(Address::repeat_byte(0xbb), 3, EMPLOYEE, 3),
        ]);
        assert_eq!(correlation_id(&r, CONTRACT, &subject), None);
        assert_eq!(correlation_id(&receipt(Vec::new()), CONTRACT, &subject), None);
    }

    #[test]
    fn zero_request_id_is_missing() {
        let r = receipt(vec![requested(CONTRACT, 3, EMPLOYEE, 0)]);
        assert_eq!(correlation_id(&r, CONTRACT, &SubjectId::new(3, EMPLOYEE)), None);
    }
}
