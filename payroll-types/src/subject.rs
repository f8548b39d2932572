use std::fmt;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

macro_rules! Primitive {
    ($name:ident, $t:ty) => {
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name($t);

        impl From<$t> for $name {
            fn from(val: $t) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $t {
            fn from(val: $name) -> Self {
                val.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

Primitive!(PlanId, u64);

impl From<PlanId> for U256 {
    fn from(val: PlanId) -> Self {
        U256::from(val.0)
    }
}

/// The record owning a confidential value: one employee's salary in one plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct SubjectId {
    plan: PlanId,
    employee: Address,
}

impl SubjectId {
    pub fn new<P: Into<PlanId>>(plan: P, employee: Address) -> Self {
        Self {
            plan: plan.into(),
            employee,
        }
    }

    pub fn plan(&self) -> PlanId {
        self.plan
    }

    pub fn employee(&self) -> Address {
        self.employee
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plan, self.employee)
    }
}

/// Identifier minted by the ledger for an accepted decryption request.
///
/// The gateway knows the request under its "handle", the 32-byte big-endian
/// encoding of this value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(U256);

impl CorrelationId {
    pub fn new(id: U256) -> Self {
        Self(id)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `0x`-prefixed, zero-padded 64 digit hex form.
    pub fn handle(&self) -> String {
        B256::from(self.0.to_be_bytes::<32>()).to_string()
    }
}

impl From<U256> for CorrelationId {
    fn from(val: U256) -> Self {
        Self(val)
    }
}

impl From<CorrelationId> for U256 {
    fn from(val: CorrelationId) -> Self {
        val.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};

    use super::{CorrelationId, SubjectId};

    #[test]
    fn handle_is_padded_hex() {
        let id = CorrelationId::new(U256::from(0xabcu64));
        let h = id.handle();
        assert_eq!(h.len(), 66);
        assert!(h.starts_with("0x"));
        assert!(h.ends_with("0abc"));
        assert!(h[2..62].chars().all(|c| c == '0'));
    }

    #[test]
    fn subjects_differ_by_employee() {
        let a = SubjectId::new(7, Address::repeat_byte(1));
        let b = SubjectId::new(7, Address::repeat_byte(2));
        assert_ne!(a, b);
        assert_eq!(a.plan(), b.plan());
        assert!(a.to_string().starts_with("7/0x"));
    }

    #[test]
    fn plan_id_as_contract_argument() {
        let s = SubjectId::new(u64::MAX, Address::ZERO);
        let plan: U256 = s.plan().into();
        assert_eq!(plan, U256::from(u64::MAX));
    }
}
