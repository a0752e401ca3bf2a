//! Request classification command

use anyhow::Result;
use dapp_connect::classifier::{classify, RequestClass, SIGNING_METHODS};

use super::print_warning;

/// Run the classify command
pub fn run(methods: &[String]) -> Result<()> {
    for method in methods {
        let class = classify(method);
        println!("{:<32} {}", method, class);

        if class == RequestClass::Signing && !SIGNING_METHODS.contains(&method.as_str()) {
            print_warning(&format!(
                "{} is not a known method and will be treated as signing",
                method
            ));
        }
    }

    Ok(())
}
