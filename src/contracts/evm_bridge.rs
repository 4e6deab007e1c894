//! Bridge vault contract bindings.

use alloy::primitives::{keccak256, B256};
use alloy::sol;

sol! {
    #[sol(rpc)]
    contract BridgeVault {
        event Locked(
            address indexed sender,
            address indexed token,
            uint256 lockedAmount,
            bytes recipient,
            bytes extraData
        );

        event Unlocked(
            bytes32 indexed burnTxHash,
            address indexed token,
            address recipient,
            uint256 receivedAmount
        );

        function unlockBatch(
            bytes32[] calldata burnTxHashes,
            address[] calldata tokens,
            address[] calldata recipients,
            uint256[] calldata amounts
        ) external;

        function unlocked(bytes32 burnTxHash) external view returns (bool);
    }
}

/// keccak256 of the Locked event signature (topic0)
pub fn locked_event_signature() -> B256 {
    keccak256("Locked(address,address,uint256,bytes,bytes)".as_bytes())
}

/// keccak256 of the Unlocked event signature (topic0)
pub fn unlocked_event_signature() -> B256 {
    keccak256("Unlocked(bytes32,address,address,uint256)".as_bytes())
}
