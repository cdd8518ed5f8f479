//! Canonical bridge ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the standard
//! bridges, the cross-domain messengers and the state commitment chain.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Inclusion proof of an L2 -> L1 message, checked by the L1 messenger
    #[derive(Debug)]
    struct ChainBatchHeader {
        uint256 batchIndex;
        bytes32 batchRoot;
        uint256 batchSize;
        uint256 prevTotalElements;
        bytes extraData;
    }

    #[derive(Debug)]
    struct ChainInclusionProof {
        uint256 index;
        bytes32[] siblings;
    }

    #[derive(Debug)]
    struct L2MessageInclusionProof {
        bytes32 stateRoot;
        ChainBatchHeader stateRootBatchHeader;
        ChainInclusionProof stateRootProof;
        bytes stateTrieWitness;
        bytes storageTrieWitness;
    }

    /// Call whose ABI encoding is hashed into the message hash
    function relayMessage(address _target, address _sender, bytes _message, uint256 _messageNonce);

    /// Cross-domain messenger, same event layout on both layers
    #[sol(rpc)]
    contract CrossDomainMessenger {
        function relayMessage(
            address _target,
            address _sender,
            bytes _message,
            uint256 _messageNonce,
            L2MessageInclusionProof _proof
        ) external;

        event SentMessage(bytes message);
        event RelayedMessage(bytes32 msgHash);
        event FailedRelayedMessage(bytes32 msgHash);
    }
}

sol! {
    /// L1 side of the standard bridge
    #[sol(rpc)]
    contract L1StandardBridge {
        function depositETHTo(address _to, uint32 _l2Gas, bytes _data) external payable;

        function depositERC20To(
            address _l1Token,
            address _l2Token,
            address _to,
            uint256 _amount,
            uint32 _l2Gas,
            bytes _data
        ) external;

        event ETHDepositInitiated(
            address indexed _from,
            address indexed _to,
            uint256 _amount,
            bytes _data
        );

        event ERC20DepositInitiated(
            address indexed _l1Token,
            address indexed _l2Token,
            address indexed _from,
            address _to,
            uint256 _amount,
            bytes _data
        );

        event ETHWithdrawalFinalized(
            address indexed _from,
            address indexed _to,
            uint256 _amount,
            bytes _data
        );

        event ERC20WithdrawalFinalized(
            address indexed _l1Token,
            address indexed _l2Token,
            address indexed _from,
            address _to,
            uint256 _amount,
            bytes _data
        );
    }
}

sol! {
    /// L2 side of the standard bridge (predeploy)
    #[sol(rpc)]
    contract L2StandardBridge {
        function withdrawTo(
            address _l2Token,
            address _to,
            uint256 _amount,
            uint32 _l1Gas,
            bytes _data
        ) external;

        event WithdrawalInitiated(
            address indexed _l1Token,
            address indexed _l2Token,
            address indexed _from,
            address _to,
            uint256 _amount,
            bytes _data
        );

        event DepositFinalized(
            address indexed _l1Token,
            address indexed _l2Token,
            address indexed _from,
            address _to,
            uint256 _amount,
            bytes _data
        );
    }
}

sol! {
    /// State commitment chain on L1
    #[sol(rpc)]
    contract StateCommitmentChain {
        function getTotalBatches() external view returns (uint256 _totalBatches);

        event StateBatchAppended(
            uint256 indexed _batchIndex,
            bytes32 _batchRoot,
            uint256 _batchSize,
            uint256 _prevTotalElements,
            bytes _extraData
        );
    }
}

sol! {
    #[sol(rpc)]
    contract ERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}
