//! A `Wallet` is a wrapper around the ethers signing wallet the bundler uses
//! to submit bundles

use crate::UserOperation;
use ethers::{
    prelude::k256::ecdsa::SigningKey,
    signers::{LocalWallet, Signer},
    types::Address,
};

/// Wrapper around ethers wallet
#[derive(Clone, Debug)]
pub struct Wallet {
    /// Signing key of the wallet
    pub signer: ethers::signers::Wallet<SigningKey>,
}

impl Wallet {
    /// Creates a wallet from a hex-encoded private key, bound to the given
    /// chain id
    pub fn from_key(key: &str, chain_id: u64) -> eyre::Result<Self> {
        let signer: LocalWallet = key.trim_start_matches("0x").parse()?;
        Ok(Self { signer: signer.with_chain_id(chain_id) })
    }

    /// Address of the signing key
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Signs the user operation
    pub async fn sign_uo(
        &self,
        uo: &UserOperation,
        ep: &Address,
        chain_id: u64,
    ) -> eyre::Result<UserOperation> {
        let h = uo.hash(ep, chain_id);
        let sig = self.signer.sign_message(h.0.as_bytes()).await?;
        Ok(UserOperation { signature: sig.to_vec().into(), ..uo.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_from_key_binds_chain_id() {
        let wallet = Wallet::from_key(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            1337,
        )
        .unwrap();
        assert_eq!(wallet.signer.chain_id(), 1337);
        assert!(!wallet.address().is_zero());
    }
}
