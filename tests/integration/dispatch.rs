use std::time::Duration;

use anyhow::Result;
use libpingu::OverflowPolicy;
use pingu_core::wire::{self, PacketKind};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Receive loop behaviour on the wire
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn raw_ping_gets_exact_pong_bytes() -> Result<()> {
    let engine = spawn_engine()?;
    let raw = raw_socket().await?;

    raw.send_to(&[0, 2, b'{', b'}'], engine.local_addr()?).await?;
    let (bytes, from) = recv_within(&raw, Duration::from_secs(1))
        .await?
        .expect("engine should answer a ping");

    assert_eq!(bytes, [1, 2, b'{', b'}']);
    assert_eq!(from, engine.local_addr()?);
    Ok(())
}

#[tokio::test]
async fn malformed_datagrams_do_not_stop_the_loop() -> Result<()> {
    let engine = spawn_engine()?;
    let raw = raw_socket().await?;
    let target = engine.local_addr()?;

    let garbage: [&[u8]; 6] = [
        &[9, 9],
        &[0],
        &[3, 2, b'{', b'}'],
        &[0, 2, b'x', b'y'],
        &[0, 7, b'{', b'}'],
        &[0u8; 100],
    ];
    for datagram in garbage {
        raw.send_to(datagram, target).await?;
    }

    // None of the above earns a reply.
    assert!(recv_within(&raw, Duration::from_millis(200)).await?.is_none());

    let ping = wire::encode(PacketKind::Ping)?;
    raw.send_to(&ping, target).await?;
    let (bytes, _) = recv_within(&raw, Duration::from_secs(1))
        .await?
        .expect("loop should still be answering");
    assert_eq!(wire::decode(&bytes)?.kind(), PacketKind::Pong);
    Ok(())
}

#[tokio::test]
async fn pong_is_never_answered() -> Result<()> {
    let engine = spawn_engine()?;
    let raw = raw_socket().await?;

    raw.send_to(&wire::encode(PacketKind::Pong)?, engine.local_addr()?)
        .await?;
    assert!(recv_within(&raw, Duration::from_millis(200)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unsolicited_pong_does_not_mark_anyone_alive() -> Result<()> {
    let engine = spawn_engine()?;
    let raw = raw_socket().await?;
    let raw_addr = raw.local_addr()?.into();
    engine.register_addr(raw_addr);

    raw.send_to(&wire::encode(PacketKind::Pong)?, engine.local_addr()?)
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!engine.is_alive(&raw_addr));
    assert!(engine.health_table().is_empty());
    Ok(())
}

#[tokio::test]
async fn pong_from_a_raw_peer_completes_a_probe() -> Result<()> {
    let engine = spawn_engine()?;
    let raw = raw_socket().await?;
    let raw_addr = raw.local_addr()?.into();

    let responder = async {
        let (bytes, from) = recv_within(&raw, Duration::from_secs(1))
            .await?
            .expect("engine should ping the raw peer");
        assert_eq!(wire::decode(&bytes)?.kind(), PacketKind::Ping);
        raw.send_to(&wire::encode(PacketKind::Pong)?, from).await?;
        anyhow::Ok(())
    };

    let (probed, responded) = tokio::join!(
        engine.ping_pong_addr(raw_addr, Duration::from_secs(2)),
        responder,
    );
    responded?;
    probed?;
    Ok(())
}

#[tokio::test]
async fn pong_flood_under_tight_limits_keeps_loop_answering() -> Result<()> {
    let config = EngineConfig {
        max_inflight_dispatch: 1,
        overflow: OverflowPolicy::Block,
        recv_buffer_size: 1,
        verbose: true,
        ..EngineConfig::default()
    };
    let engine = spawn_engine_with(config)?;
    let engine_addr = engine.local_addr()?;

    let flooders = [raw_socket().await?, raw_socket().await?, raw_socket().await?];
    let targets = flooders
        .iter()
        .map(|s| s.local_addr().map(PeerAddr::from))
        .collect::<std::io::Result<Vec<_>>>()?;
    let pong = wire::encode(PacketKind::Pong)?;

    let flood = async {
        for _ in 0..50 {
            for socket in &flooders {
                socket.send_to(&pong, engine_addr).await?;
            }
            tokio::task::yield_now().await;
        }
        anyhow::Ok(())
    };

    let timeout = Duration::from_millis(500);
    let started = std::time::Instant::now();
    let (result, flooded) = tokio::join!(engine.probe(targets.clone(), timeout), flood);
    flooded?;
    let result = result?;

    assert_eq!(result.len(), targets.len());
    assert!(started.elapsed() < timeout + PROMPT, "blocked dispatch stalled the probe");

    // Let in-flight dispatch drain, then the single permit must be free again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let raw = raw_socket().await?;
    raw.send_to(&wire::encode(PacketKind::Ping)?, engine_addr).await?;
    let (bytes, _) = recv_within(&raw, Duration::from_secs(1))
        .await?
        .expect("loop should answer after the flood");
    assert_eq!(wire::decode(&bytes)?.kind(), PacketKind::Pong);
    Ok(())
}

#[tokio::test]
async fn drop_overflow_probe_converges_over_many_responders() -> Result<()> {
    let config = EngineConfig {
        overflow: OverflowPolicy::Drop,
        recv_buffer_size: 1,
        verbose: true,
        ..EngineConfig::default()
    };
    let engine = spawn_engine_with(config)?;

    let mut targets = Vec::new();
    let mut responders = Vec::new();
    for _ in 0..4 {
        let socket = raw_socket().await?;
        targets.push(PeerAddr::from(socket.local_addr()?));
        // Answer the ping with a burst of pongs; some may be dropped on a
        // full queue, the rest must get through.
        responders.push(tokio::spawn(async move {
            let (bytes, from) = recv_within(&socket, Duration::from_secs(2))
                .await?
                .expect("engine should ping every responder");
            assert_eq!(wire::decode(&bytes)?.kind(), PacketKind::Ping);
            let pong = wire::encode(PacketKind::Pong)?;
            for _ in 0..20 {
                socket.send_to(&pong, from).await?;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            anyhow::Ok(())
        }));
    }

    let timeout = Duration::from_secs(2);
    let started = std::time::Instant::now();
    let result = engine.probe(targets.clone(), timeout).await?;

    assert!(started.elapsed() < timeout, "probe did not exit early");
    for t in &targets {
        assert_eq!(result.get(t), Some(&true), "{t} should be alive");
    }
    for responder in responders {
        responder.await??;
    }
    Ok(())
}

#[tokio::test]
async fn drop_overflow_policy_still_delivers() -> Result<()> {
    let config = EngineConfig {
        overflow: OverflowPolicy::Drop,
        recv_buffer_size: 1,
        ..EngineConfig::default()
    };
    let a = spawn_engine_with(config)?;
    let b = spawn_engine()?;

    a.ping_pong_addr(addr_of(&b)?, Duration::from_secs(1)).await?;
    Ok(())
}
