//! Supported chains command

use anyhow::Result;
use dapp_connect::chain::{self, ChainId};

/// Run the chains command
pub fn run(testnets: bool) -> Result<()> {
    let chains: Vec<ChainId> = chain::supported_chains()
        .filter(|c| testnets || !chain::is_testnet(c.reference()))
        .collect();

    println!();
    println!("Supported chains:");
    for chain in &chains {
        let label = if chain::is_testnet(chain.reference()) {
            " (testnet)"
        } else {
            ""
        };
        println!("  {:<16} {}{}", chain.to_string(), chain.reference(), label);
    }
    println!();

    Ok(())
}
