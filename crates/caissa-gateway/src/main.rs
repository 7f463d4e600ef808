//! Caissa gateway - CLI entry point.
//!
//! Binary target for running the monitoring engine and WebSocket gateway.

fn main() -> anyhow::Result<()> {
    caissa_gateway::run()
}
