use std::time::Duration;

use anyhow::Result;
use libpingu::SchedulerState;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Broadcast scheduler
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn broadcast_marks_responsive_and_silent_peers() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let silent = SilentPeer::bind()?;
    a.register_addr(addr_of(&b)?);
    a.register_addr(silent.addr()?);

    let ticker = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(10));
    assert_eq!(ticker.state(), SchedulerState::Running);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let health = a.health_table();
    assert_eq!(health.get(&addr_of(&b)?), Some(&true));
    assert_eq!(health.get(&silent.addr()?), Some(&false));

    ticker.cancel();
    assert_eq!(ticker.state(), SchedulerState::Stopped);
    assert!(a.health_table().is_empty());

    // No cycle commits after cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.health_table().is_empty());
    Ok(())
}

#[tokio::test]
async fn first_cycle_waits_one_period() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let target = addr_of(&b)?;
    a.register_addr(target);

    let ticker = a.broadcast_with_ticker(Duration::from_millis(300), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.health_table().is_empty(), "cycle ran before the first period");

    wait_until(Duration::from_secs(2), || a.is_alive(&target)).await?;
    ticker.cancel();
    Ok(())
}

#[tokio::test]
async fn only_one_scheduler_runs() -> Result<()> {
    let a = spawn_engine()?;
    let first = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(10));
    let second = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(10));

    // Both handles drive the same scheduler.
    second.cancel();
    assert_eq!(first.state(), SchedulerState::Stopped);
    assert_eq!(a.broadcast_state(), SchedulerState::Stopped);
    Ok(())
}

#[tokio::test]
async fn stale_handle_cancel_leaves_new_scheduler_alone() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let target = addr_of(&b)?;
    a.register_addr(target);

    let old = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(200));
    old.cancel();
    let new = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(200));
    wait_until(Duration::from_secs(2), || a.is_alive(&target)).await?;

    old.cancel();
    assert_eq!(old.state(), SchedulerState::Stopped);
    assert!(new.is_running());
    assert_eq!(a.broadcast_state(), SchedulerState::Running);
    assert!(a.is_alive(&target), "old handle cleared the running scheduler's health");

    new.cancel();
    assert!(a.health_table().is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_registry_ticks_are_harmless() -> Result<()> {
    let a = spawn_engine()?;
    let ticker = a.broadcast_with_ticker(Duration::from_millis(5), Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(ticker.is_running());
    assert!(a.health_table().is_empty());
    ticker.cancel();
    Ok(())
}

#[tokio::test]
async fn stopping_the_engine_cancels_broadcast() -> Result<()> {
    let a = spawn_engine()?;
    let b = spawn_engine()?;
    let target = addr_of(&b)?;
    a.register_addr(target);

    let ticker = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_millis(100));
    wait_until(Duration::from_secs(2), || a.is_alive(&target)).await?;

    a.stop();
    assert_eq!(ticker.state(), SchedulerState::Stopped);
    assert!(a.health_table().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.health_table().is_empty());
    // The registry survives a stop.
    assert!(a.is_registered(&target));
    Ok(())
}

#[tokio::test]
async fn cancel_abandons_a_cycle_in_progress() -> Result<()> {
    let a = spawn_engine()?;
    let silent = SilentPeer::bind()?;
    a.register_addr(silent.addr()?);

    // The first cycle starts at 10ms and waits a full second on the silent peer.
    let ticker = a.broadcast_with_ticker(Duration::from_millis(10), Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    ticker.cancel();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(a.health_table().is_empty());
    Ok(())
}
