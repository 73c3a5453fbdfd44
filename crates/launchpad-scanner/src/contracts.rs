//! Compile-time ABI definitions for the launchpad contracts.
//!
//! Both events carry a single non-indexed tuple, so the topic0 hash is the
//! only filter we can apply on the node side.

use alloy::sol;

sol! {
    /// Pool parameters emitted by the pool factory on creation.
    #[derive(Debug, PartialEq, Eq)]
    struct PoolCreated {
        uint256 poolId;
        address creator;
        address tokenAddress;
        uint256 tokenDecimals;
        string nftName;
        string nftTicker;
        string uri;
        string nftDescription;
        uint256 conversionRate;
        uint256 tokenSupply;
        uint256 tokenBalance;
        uint256 ethBalance;
        uint256 nftPrice;
        uint256 feeRate;
        uint256 mintable;
        uint256 lpAmount;
        uint256 time;
    }

    /// Trade parameters emitted by the bonding curve on every buy or sell.
    #[derive(Debug, PartialEq, Eq)]
    struct TradeExecuted {
        uint256 poolId;
        address trader;
        address sender;
        address tokenAddress;
        string tokenName;
        string tokenTicker;
        string tokenUri;
        uint256 quoteAmount;
        uint256 baseAmount;
        uint256 fee;
        uint256 side;
        uint256 poolEthBalance;
        uint256 poolTokenBalance;
        uint256 time;
    }

    #[derive(Debug, PartialEq, Eq)]
    event NewPool(PoolCreated pool);

    #[derive(Debug, PartialEq, Eq)]
    event Trade(TradeExecuted trade);
}
