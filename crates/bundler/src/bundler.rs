use alloy_chains::Chain;
use cassius_contracts::entry_point_api::EntryPointAPI;
use cassius_primitives::{UserOperation, UserOperationHash, Wallet};
use ethers::{
    providers::Middleware,
    signers::Signer,
    types::{
        transaction::eip2718::TypedTransaction, Address, Eip1559TransactionRequest, H256, U256,
        U64,
    },
};
use std::sync::Arc;
use tracing::{info, trace};

/// A trait for sending a bundle of user operations to the network
#[async_trait::async_trait]
pub trait SendBundleOp: Send + Sync + 'static {
    /// Submits the bundle transaction and returns its hash
    async fn send_bundle(&self, bundle: TypedTransaction) -> eyre::Result<H256>;
}

/// Builds `handleOps` transactions out of user operation bundles and hands
/// them to the sending client
#[derive(Clone)]
pub struct Bundler<M, S>
where
    M: Middleware + 'static,
    S: SendBundleOp,
{
    /// Bundler's wallet
    pub wallet: Wallet,
    /// Beneficiary address where the gas is refunded after execution
    pub beneficiary: Address,
    /// Entry point contract address
    pub entry_point: Address,
    /// Chain the bundler is running on
    pub chain: Chain,
    /// Minimum balance of the bundler account; below it, gas refunds go to
    /// the bundler itself
    pub min_balance: U256,
    /// Ethereum execution client
    pub eth_client: Arc<M>,
    /// Client that sends the bundle to some network
    pub client: Arc<S>,
}

impl<M, S> Bundler<M, S>
where
    M: Middleware + 'static,
    S: SendBundleOp,
{
    pub fn new(
        wallet: Wallet,
        beneficiary: Address,
        entry_point: Address,
        chain: Chain,
        min_balance: U256,
        eth_client: Arc<M>,
        client: Arc<S>,
    ) -> Self {
        Self { wallet, beneficiary, entry_point, chain, min_balance, eth_client, client }
    }

    /// Builds the `handleOps` transaction for a bundle: EIP-1559 fees, gas
    /// estimate, and the bundler account's next nonce
    async fn create_bundle(&self, uos: &[UserOperation]) -> eyre::Result<TypedTransaction> {
        let ep = EntryPointAPI::new(self.entry_point, self.eth_client.clone());

        let nonce =
            self.eth_client.get_transaction_count(self.wallet.signer.address(), None).await?;
        let balance = self.eth_client.get_balance(self.wallet.signer.address(), None).await?;
        let beneficiary = if balance < self.min_balance {
            self.wallet.signer.address()
        } else {
            self.beneficiary
        };

        let mut tx: TypedTransaction =
            ep.handle_ops(uos.iter().cloned().map(Into::into).collect(), beneficiary).tx;

        let access_list = self.eth_client.create_access_list(&tx, None).await?.access_list;
        tx.set_access_list(access_list.clone());
        let estimated_gas = self.eth_client.estimate_gas(&tx, None).await?;
        let (max_fee_per_gas, max_priority_fee) =
            self.eth_client.estimate_eip1559_fees(None).await?;

        Ok(TypedTransaction::Eip1559(Eip1559TransactionRequest {
            to: tx.to().cloned(),
            from: Some(self.wallet.signer.address()),
            data: tx.data().cloned(),
            chain_id: Some(U64::from(self.chain.id())),
            max_priority_fee_per_gas: Some(max_priority_fee),
            max_fee_per_gas: Some(max_fee_per_gas),
            gas: Some(estimated_gas),
            nonce: Some(nonce),
            value: None,
            access_list,
        }))
    }

    /// Sends a bundle of user operations; an empty bundle is a no-op
    pub async fn send_bundle(&self, uos: &[UserOperation]) -> eyre::Result<H256> {
        if uos.is_empty() {
            info!("Skipping creating a new bundle, no user operations");
            return Ok(H256::default());
        };

        info!(
            "Creating a new bundle with {} user operations: {:?}",
            uos.len(),
            uos.iter()
                .map(|uo| uo.hash(&self.entry_point, self.chain.id()))
                .collect::<Vec<UserOperationHash>>()
        );
        trace!("Bundle content: {uos:?}");

        let bundle = self.create_bundle(uos).await?;
        let hash = self.client.send_bundle(bundle).await?;

        info!(
            "Bundle successfully sent, hash: {:?}, account: {:?}, entry point: {:?}, beneficiary: {:?}",
            hash,
            self.wallet.signer.address(),
            self.entry_point,
            self.beneficiary
        );

        Ok(hash)
    }
}
