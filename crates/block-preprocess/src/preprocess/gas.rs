//! Preprocessing gas accounting.
//!
//! Gas reserved for preprocessing is recorded per transaction hash when a
//! block starts and charged by the interpreter through
//! [`PreprocessingGasCharge`] exactly once, before the transaction's normal
//! execution. Precompiles exposing a handler's result must therefore not
//! charge that gas a second time.

use crate::preprocess::{error::PreprocessError, types::Rules};
use alloy_eips::eip2930::AccessList;
use alloy_primitives::B256;
use dashmap::DashMap;

/// Base cost of every transaction.
pub const TX_GAS: u64 = 21_000;
/// Base cost of a contract creation once Homestead is active.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;
/// EIP-2028
pub const TX_DATA_NON_ZERO_GAS_EIP2028: u64 = 16;
pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
/// EIP-3860: per 32-byte word of init code.
pub const INIT_CODE_WORD_GAS: u64 = 2;

/// Intrinsic (base) gas of a transaction.
///
/// Every accumulation step is overflow-checked and fails with
/// [`PreprocessError::GasUintOverflow`].
pub fn intrinsic_gas(
    data: &[u8],
    access_list: &AccessList,
    is_create: bool,
    rules: &Rules,
) -> Result<u64, PreprocessError> {
    let mut gas = if is_create && rules.is_homestead {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };

    if !data.is_empty() {
        let non_zero = data.iter().filter(|byte| **byte != 0).count() as u64;
        let zero = data.len() as u64 - non_zero;
        let non_zero_gas = if rules.is_istanbul {
            TX_DATA_NON_ZERO_GAS_EIP2028
        } else {
            TX_DATA_NON_ZERO_GAS_FRONTIER
        };

        gas = checked_charge(gas, non_zero, non_zero_gas)?;
        gas = checked_charge(gas, zero, TX_DATA_ZERO_GAS)?;

        if is_create && rules.is_shanghai {
            let words = (data.len() as u64).div_ceil(32);
            gas = checked_charge(gas, words, INIT_CODE_WORD_GAS)?;
        }
    }

    let addresses = access_list.0.len() as u64;
    let storage_keys: u64 = access_list
        .0
        .iter()
        .map(|item| item.storage_keys.len() as u64)
        .sum();
    gas = checked_charge(gas, addresses, TX_ACCESS_LIST_ADDRESS_GAS)?;
    gas = checked_charge(gas, storage_keys, TX_ACCESS_LIST_STORAGE_KEY_GAS)?;

    Ok(gas)
}

fn checked_charge(gas: u64, count: u64, unit: u64) -> Result<u64, PreprocessError> {
    count
        .checked_mul(unit)
        .and_then(|cost| gas.checked_add(cost))
        .ok_or(PreprocessError::GasUintOverflow)
}

/// Hook through which the interpreter charges reserved preprocessing gas.
pub trait PreprocessingGasCharge {
    /// Total preprocessing gas reserved for `tx_hash` in the current block.
    ///
    /// Fails with [`PreprocessError::UnknownTransaction`] if the transaction is
    /// not part of the most recently started block, which means the processor and
    /// the interpreter disagree on the block being executed.
    fn preprocessing_gas_charge(&self, tx_hash: B256) -> Result<u64, PreprocessError>;
}

/// Per-block map from transaction hash to reserved preprocessing gas.
#[derive(Debug, Default)]
pub struct GasLedger {
    charges: DashMap<B256, u64>,
}

impl GasLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a zero charge so the hook never reports the transaction as unknown
    /// while its final total is still being computed.
    pub fn reserve(&self, tx_hash: B256) {
        self.charges.insert(tx_hash, 0);
    }

    pub fn record(&self, tx_hash: B256, total: u64) {
        self.charges.insert(tx_hash, total);
    }

    /// Remove the entries of a finished (or abandoned) block.
    pub fn clear<'a>(&self, tx_hashes: impl IntoIterator<Item = &'a B256>) {
        for tx_hash in tx_hashes {
            self.charges.remove(tx_hash);
        }
    }

    pub fn len(&self) -> usize {
        self.charges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charges.is_empty()
    }
}

impl PreprocessingGasCharge for GasLedger {
    fn preprocessing_gas_charge(&self, tx_hash: B256) -> Result<u64, PreprocessError> {
        self.charges
            .get(&tx_hash)
            .map(|total| *total)
            .ok_or(PreprocessError::UnknownTransaction(tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_eips::eip2930::AccessListItem;
    use alloy_primitives::Address;

    fn no_access_list() -> AccessList {
        AccessList::default()
    }

    #[test]
    fn test_plain_transfer() {
        let gas = intrinsic_gas(&[], &no_access_list(), false, &Rules::latest()).unwrap();
        assert_eq!(gas, TX_GAS);
    }

    #[test]
    fn test_contract_creation_base_cost() {
        let homestead = Rules {
            is_homestead: true,
            ..Default::default()
        };
        assert_eq!(
            intrinsic_gas(&[], &no_access_list(), true, &homestead).unwrap(),
            TX_GAS_CONTRACT_CREATION
        );
        // Frontier charged creations like calls
        assert_eq!(
            intrinsic_gas(&[], &no_access_list(), true, &Rules::default()).unwrap(),
            TX_GAS
        );
    }

    #[test]
    fn test_calldata_pricing() {
        let data = [0u8, 0, 1, 2, 3];

        let frontier = intrinsic_gas(&data, &no_access_list(), false, &Rules::default()).unwrap();
        assert_eq!(frontier, TX_GAS + 2 * 4 + 3 * 68);

        let istanbul = Rules {
            is_homestead: true,
            is_istanbul: true,
            is_shanghai: false,
        };
        let gas = intrinsic_gas(&data, &no_access_list(), false, &istanbul).unwrap();
        assert_eq!(gas, TX_GAS + 2 * 4 + 3 * 16);
    }

    #[test]
    fn test_init_code_word_gas() {
        let init_code = vec![1u8; 33];
        let gas = intrinsic_gas(&init_code, &no_access_list(), true, &Rules::latest()).unwrap();
        // Two words of init code
        assert_eq!(gas, TX_GAS_CONTRACT_CREATION + 33 * 16 + 2 * INIT_CODE_WORD_GAS);

        // Calls are not charged for init code
        let gas = intrinsic_gas(&init_code, &no_access_list(), false, &Rules::latest()).unwrap();
        assert_eq!(gas, TX_GAS + 33 * 16);
    }

    #[test]
    fn test_access_list_gas() {
        let access_list = AccessList(vec![
            AccessListItem {
                address: Address::repeat_byte(1),
                storage_keys: vec![B256::with_last_byte(1), B256::with_last_byte(2)],
            },
            AccessListItem {
                address: Address::repeat_byte(2),
                storage_keys: vec![],
            },
        ]);
        let gas = intrinsic_gas(&[], &access_list, false, &Rules::latest()).unwrap();
        assert_eq!(
            gas,
            TX_GAS + 2 * TX_ACCESS_LIST_ADDRESS_GAS + 2 * TX_ACCESS_LIST_STORAGE_KEY_GAS
        );
    }

    #[test]
    fn test_checked_charge_overflow() {
        assert!(matches!(
            checked_charge(u64::MAX - 1, 1, 2),
            Err(PreprocessError::GasUintOverflow)
        ));
        assert!(matches!(
            checked_charge(0, u64::MAX, 2),
            Err(PreprocessError::GasUintOverflow)
        ));
        assert_eq!(checked_charge(10, 3, 4).unwrap(), 22);
    }

    #[test]
    fn test_ledger_unknown_transaction() {
        let ledger = GasLedger::new();
        let tx_hash = B256::with_last_byte(7);
        assert!(matches!(
            ledger.preprocessing_gas_charge(tx_hash),
            Err(PreprocessError::UnknownTransaction(hash)) if hash == tx_hash
        ));
    }

    #[test]
    fn test_ledger_reserve_record_clear() {
        let ledger = GasLedger::new();
        let a = B256::with_last_byte(1);
        let b = B256::with_last_byte(2);

        ledger.reserve(a);
        ledger.reserve(b);
        assert_eq!(ledger.preprocessing_gas_charge(a).unwrap(), 0);

        ledger.record(a, 1_000_000);
        assert_eq!(ledger.preprocessing_gas_charge(a).unwrap(), 1_000_000);
        assert_eq!(ledger.preprocessing_gas_charge(b).unwrap(), 0);
        assert_eq!(ledger.len(), 2);

        ledger.clear([a, b].iter());
        assert!(ledger.is_empty());
        assert!(ledger.preprocessing_gas_charge(a).is_err());
    }
}
