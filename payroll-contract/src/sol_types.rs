//! Solidity types for contract interaction

use alloy::sol;

sol! {
    /// The confidential payroll contract.
    ///
    /// The fallback contract exposes the same decryption surface for plain
    /// salaries, which are finalized as soon as the request lands.
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface PayrollFHE {
        function requestSalaryDecryption(uint256 planId) external;
        function retrySalaryDecryption(uint256 planId) external;
        function getMyDecryptedSalary(uint256 planId) external view returns (uint256);
        function isSalaryDecrypted(uint256 planId, address employee) external view returns (bool);
        function maxDecryptionRetries() external view returns (uint256);

        event SalaryDecryptionRequested(
            uint256 indexed planId,
            address indexed employee,
            uint256 requestId,
            uint256 timestamp
        );
    }
}
