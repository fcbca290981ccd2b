use crate::bundler::SendBundleOp;
use cassius_primitives::Wallet;
use ethers::{
    middleware::SignerMiddleware,
    providers::Middleware,
    signers::LocalWallet,
    types::{transaction::eip2718::TypedTransaction, H256},
};
use std::{sync::Arc, time::Duration};
use tracing::trace;

/// Sends bundles straight to the Ethereum execution client, signed by the
/// bundler wallet
#[derive(Clone)]
pub struct EthereumClient<M>(pub SignerMiddleware<Arc<M>, LocalWallet>);

#[async_trait::async_trait]
impl<M> SendBundleOp for EthereumClient<M>
where
    M: Middleware + 'static,
{
    async fn send_bundle(&self, bundle: TypedTransaction) -> eyre::Result<H256> {
        trace!("Sending transaction to the execution client: {bundle:?}");

        let tx = self.0.send_transaction(bundle, None).await?.interval(Duration::from_millis(75));
        let tx_hash = tx.tx_hash();

        let tx_receipt = tx.await?;

        trace!("Transaction receipt: {tx_receipt:?}");

        Ok(tx_hash)
    }
}

impl<M> EthereumClient<M>
where
    M: Middleware + 'static,
{
    pub fn new(eth_client: Arc<M>, wallet: Wallet) -> Self {
        let signer = SignerMiddleware::new(eth_client, wallet.signer);
        Self(signer)
    }
}
