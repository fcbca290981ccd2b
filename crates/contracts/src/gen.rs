//! Generated EntryPoint bindings
//!
//! The encode/decode paths for calls, events, and structured reverts are
//! derived at build time by `abigen!` from the human-readable ABI below.

use ethers::contract::abigen;

abigen!(
    EntryPointAPI,
    r#"[
        struct UserOperation {address sender;uint256 nonce;bytes initCode;bytes callData;uint256 callGasLimit;uint256 verificationGasLimit;uint256 preVerificationGas;uint256 maxFeePerGas;uint256 maxPriorityFeePerGas;bytes paymasterAndData;bytes signature;}
        struct ReturnInfo {uint256 preOpGas;uint256 prefund;uint256 deadline;bytes paymasterContext;}
        struct StakeInfo {uint256 stake;uint256 unstakeDelaySec;}
        struct AggregatorStakeInfo {address actualAggregator;StakeInfo stakeInfo;}
        struct DepositInfo {uint112 deposit;bool staked;uint112 stake;uint32 unstakeDelaySec;uint64 withdrawTime;}
        function handleOps(UserOperation[] calldata ops,address payable beneficiary) external
        function simulateValidation(UserOperation calldata userOp) external
        function getDepositInfo(address account) external view returns (DepositInfo memory info)
        function balanceOf(address account) external view returns (uint256)
        function getNonce(address sender,uint192 key) external view returns (uint256 nonce)
        function getSenderAddress(bytes memory initCode) external
        error FailedOp(uint256 opIndex, address paymaster, string reason)
        error SenderAddressResult(address sender)
        error SignatureValidationFailed(address aggregator)
        error ValidationResult(ReturnInfo returnInfo,StakeInfo senderInfo,StakeInfo factoryInfo,StakeInfo paymasterInfo)
        error ValidationResultWithAggregation(ReturnInfo returnInfo,StakeInfo senderInfo,StakeInfo factoryInfo,StakeInfo paymasterInfo,AggregatorStakeInfo aggregatorInfo)
        event UserOperationEvent(bytes32 indexed userOpHash,address indexed sender,address indexed paymaster,uint256 nonce,bool success,uint256 actualGasCost,uint256 actualGasUsed)
        event UserOperationRevertReason(bytes32 indexed userOpHash,address indexed sender,uint256 nonce,bytes revertReason)
        event AccountDeployed(bytes32 indexed userOpHash,address indexed sender,address factory,address paymaster)
        event SignatureAggregatorForUserOperations(address indexed aggregator)
    ]"#
);
