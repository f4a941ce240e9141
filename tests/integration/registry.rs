use std::time::Duration;

use anyhow::Result;
use libpingu::EngineError;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Registry and health table
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn register_then_unregister_restores_state() -> Result<()> {
    let a = spawn_engine()?;
    let before_peers = a.peers();
    let before_health = a.health_table();

    a.register("127.0.0.1:9191")?;
    assert!(a.is_registered(&"127.0.0.1:9191".parse()?));
    a.unregister("127.0.0.1:9191")?;

    assert_eq!(a.peers(), before_peers);
    assert_eq!(a.health_table(), before_health);
    Ok(())
}

#[tokio::test]
async fn invalid_addresses_leave_registry_unchanged() -> Result<()> {
    let a = spawn_engine()?;
    a.register("127.0.0.1:9191")?;

    for bad in ["127.0.0.1:", ":3821", "hello", "localhost:4874"] {
        let err = a.register(bad).expect_err("should be rejected");
        assert!(matches!(err, EngineError::InvalidAddress { .. }), "{bad}: {err}");
        assert!(matches!(a.unregister(bad), Err(EngineError::InvalidAddress { .. })));
    }
    assert_eq!(a.peers().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unregister_clears_health_immediately() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let target = addr_of(&b)?;
    a.register_addr(target);

    let ticker = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(200));
    wait_until(Duration::from_secs(2), || a.is_alive(&target)).await?;

    a.unregister_addr(target);
    assert!(!a.is_alive(&target));
    assert!(!a.health_table().contains_key(&target));

    // Later cycles must not bring it back.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.health_table().is_empty());

    ticker.cancel();
    Ok(())
}

#[tokio::test]
async fn reregistering_keeps_health() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let target = addr_of(&b)?;
    a.register_addr(target);

    let ticker = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(200));
    wait_until(Duration::from_secs(2), || a.is_alive(&target)).await?;

    a.register_addr(target);
    a.register(&target.to_string())?;
    assert!(a.is_alive(&target));
    assert_eq!(a.peers().len(), 1);

    ticker.cancel();
    Ok(())
}
