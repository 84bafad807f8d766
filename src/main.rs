//! OASIS HyperDrive node
//!
//! Main entry point for the node

use oasis_hyperdrive::OasisBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	OasisBuilder::new().start_node().await
}
