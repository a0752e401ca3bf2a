//! Account encoding commands

use anyhow::{Context, Result};
use dapp_connect::{account, chain::ChainId};

use super::{print_success, print_warning};

/// Encode `address` on `chain`. The chain may be native (`137`) or a protocol
/// id (`eip155:137`).
pub fn encode(address: &str, chain: &str) -> Result<()> {
    let chain = match chain.parse::<u64>() {
        Ok(native) => ChainId::eip155(native),
        Err(_) => chain
            .parse::<ChainId>()
            .with_context(|| format!("Invalid chain: {}", chain))?,
    };

    if !chain.is_supported() {
        print_warning(&format!("{} is not a supported chain", chain));
    }

    print_success(&account::encode(address, &chain));
    Ok(())
}

pub fn decode(value: &str) -> Result<()> {
    let (address, chain_id) =
        account::decode(value).with_context(|| format!("Invalid account: {}", value))?;

    println!();
    println!("Address:  {}", address);
    println!("Chain ID: {}", chain_id);
    println!();
    Ok(())
}
