//! Settlement-contract ABI bindings. The contract itself is an external
//! collaborator (§1): this module only declares the RPC surface spec.md
//! §4.4 requires — `deposit/withdraw/submitBatch/registerDeal/grief`
//! plus the view functions and events the Chain Client decodes.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// The on-chain settlement registry: deposit ledger mirror, batch
    /// finalization, and the storage-deal registry.
    #[sol(rpc)]
    contract Registry {
        function deposit() external payable;
        function withdraw(bytes32 root, address[] users, uint256[] amounts, uint256[] nonces, bytes[] signatures) external;
        function submitBatch(bytes32 root, address[] users, uint256[] amounts, uint256[] nonces, bytes[] signatures) external returns (uint256 batchId);
        function registerDeal(bytes32 dealId, address client, string cid, uint256 sizeMB, uint256 priceUSDC, uint256 durationDays, uint256 clientStake) external returns (uint256 onChainDealId);
        function grief(address relay, uint256 amount, string reason) external;

        function currentStateRoot() external view returns (bytes32);
        function currentBatchId() external view returns (uint256);
        function getBatchInfo(uint256 batchId) external view returns (bytes32 root, bool finalized);
        function isWithdrawalProcessed(address user, uint256 amount, uint256 nonce) external view returns (bool);
        function getRelayInfo(address relay) external view returns (uint256 stake, bool active);
        function getClientDeals(address client) external view returns (uint256[] memory);

        event Deposited(address indexed user, uint256 amount, uint256 blockTimestamp);
        event BatchSubmitted(uint256 indexed batchId, bytes32 root, address firstUser, uint256 firstAmount, uint256 firstNonce, uint256 count);
        event DealRegistered(bytes32 indexed dealId, uint256 onChainDealId, address indexed client);
    }

    /// Standard ERC20 interface, used for the deal engine's allowance
    /// check against the registry contract (the contract pulls USDC
    /// payment rather than the relay transferring it).
    #[sol(rpc)]
    contract ERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}
