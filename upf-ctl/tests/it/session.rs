use std::time::Duration;

use futures::FutureExt;

use upf_ctl::{
    rules::{ACCESS, ACTION_DROP, ACTION_FORWARD, CORE, DST_CORE},
    with_session, ClientError, ClientOptions, Far, Pdr, Qer, Session, SessionState,
};
use upf_sim::{Engine, Fault, SimServer, ENOENT};
use upf_wire::CommandKind;

use crate::setup;

fn pdrs(n: u64) -> Vec<Pdr> {
    (1..=n)
        .map(|i| Pdr {
            src_iface: CORE,
            dst_ip: 0x1000_0000 + i as u32,
            src_iface_mask: 0xff,
            dst_ip_mask: u32::MAX,
            precedence: 100,
            pdr_id: i,
            fse_id: 1,
            far_id: 1,
            qer_ids: vec![1],
            ..Default::default()
        })
        .collect()
}

fn far() -> Far {
    Far { far_id: 1, fse_id: 1, apply_action: ACTION_FORWARD, dst_intf: DST_CORE, ..Default::default() }
}

fn qer(qer_id: u32) -> Qer {
    Qer { qer_id, fse_id: 1, ul_mbr: 10_000, dl_mbr: 20_000, ..Default::default() }
}

/// Waits for removals running in the background to drain the engine.
async fn wait_until_empty(engine: &Engine) {
    for _ in 0..100 {
        if engine.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine still holds rules: {:?}", engine.commands());
}

#[tokio::test]
async fn scope_removes_everything_it_installed() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine().clone();
    let mut session = Session::new(client);

    let installed = session
        .scope(|s| {
            async move {
                for pdr in pdrs(5) {
                    s.add_pdr(pdr).await?;
                }
                s.add_far(far()).await?;
                s.add_app_qer(qer(1)).await?;
                s.add_session_qer(qer(2)).await?;

                assert_eq!(s.rules().len(), 8);
                Ok::<_, ClientError>(s.rules().len())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(installed, 8);
    assert!(session.rules().is_empty());
    assert_eq!(session.state(), SessionState::Active);
    assert!(engine.is_empty());

    assert_eq!(engine.count(CommandKind::DeletePdr), 5);
    assert_eq!(engine.count(CommandKind::DeleteFar), 1);
    assert_eq!(engine.count(CommandKind::DeleteAppQos), 2);
    assert_eq!(engine.count(CommandKind::DeleteSessionQos), 2);
}

#[tokio::test]
async fn removal_follows_installation_order() {
    let (server, client) = setup(ClientOptions::default()).await;
    let mut session = Session::new(client);

    session.add_session_qer(qer(2)).await.unwrap();
    session.add_app_qer(qer(1)).await.unwrap();
    session.add_far(far()).await.unwrap();
    session.add_pdr(pdrs(1).remove(0)).await.unwrap();

    let report = session.end().await;
    assert_eq!(report.removed, 4);

    let deletes: Vec<CommandKind> = server
        .engine()
        .commands()
        .into_iter()
        .map(|r| r.kind)
        .filter(CommandKind::is_delete)
        .collect();
    assert_eq!(
        deletes,
        vec![
            CommandKind::DeletePdr,
            CommandKind::DeleteFar,
            CommandKind::DeleteAppQos,
            CommandKind::DeleteAppQos,
            CommandKind::DeleteSessionQos,
            CommandKind::DeleteSessionQos,
        ]
    );
}

#[tokio::test]
async fn failing_workload_still_cleans_up() {
    let (server, client) = setup(ClientOptions::default()).await;
    let mut session = Session::new(client);

    let result: Result<(), ClientError> = session
        .scope(|s| {
            async move {
                for pdr in pdrs(3) {
                    s.add_pdr(pdr).await?;
                }
                // Nothing installed under this id.
                s.client().delete_far(&Far { far_id: 42, apply_action: ACTION_DROP, ..far() }).await?;
                Ok(())
            }
            .boxed()
        })
        .await;

    match result {
        Err(ClientError::Remote(err)) => assert_eq!(err.code, ENOENT),
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.rules().is_empty());
    assert!(server.engine().is_empty());
    assert_eq!(server.engine().count(CommandKind::DeletePdr), 3);
}

#[tokio::test]
async fn panicking_workload_still_cleans_up() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine().clone();

    let task = tokio::spawn(async move {
        let mut session = Session::new(client);
        session
            .scope(|s| {
                async move {
                    s.add_far(far()).await?;
                    s.add_app_qer(qer(1)).await?;
                    if !s.rules().is_empty() {
                        panic!("workload failed");
                    }
                    Ok::<(), ClientError>(())
                }
                .boxed()
            })
            .await
    });

    let err = task.await.unwrap_err();
    assert!(err.is_panic());
    assert!(engine.is_empty());
    assert_eq!(engine.count(CommandKind::DeleteFar), 1);
    assert_eq!(engine.count(CommandKind::DeleteAppQos), 2);
}

#[tokio::test]
async fn cancelled_scope_still_cleans_up() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine().clone();
    let mut session = Session::new(client);

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        session.scope(|s| {
            async move {
                s.add_far(far()).await?;
                s.add_app_qer(qer(1)).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), ClientError>(())
            }
            .boxed()
        }),
    )
    .await;
    assert!(outcome.is_err());

    // The removals were handed off when the scope was dropped.
    assert!(session.rules().is_empty());
    assert_eq!(session.state(), SessionState::Active);
    wait_until_empty(&engine).await;
    assert_eq!(engine.count(CommandKind::DeleteFar), 1);
    assert_eq!(engine.count(CommandKind::DeleteAppQos), 2);

    // The session stays usable.
    session.add_far(far()).await.unwrap();
    assert_eq!(session.end().await.removed, 1);
    assert!(engine.is_empty());
}

#[tokio::test]
async fn dropped_session_removes_its_rules() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine().clone();

    let mut session = Session::new(client);
    for pdr in pdrs(3) {
        session.add_pdr(pdr).await.unwrap();
    }
    session.add_session_qer(qer(2)).await.unwrap();
    assert_eq!(engine.pdr_count(), 3);

    drop(session);

    wait_until_empty(&engine).await;
    assert_eq!(engine.count(CommandKind::DeletePdr), 3);
    assert_eq!(engine.count(CommandKind::DeleteSessionQos), 2);
}

#[tokio::test]
async fn cancelled_cleanup_keeps_the_remaining_rules() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine().clone();

    let mut session = Session::new(client);
    for pdr in pdrs(4) {
        session.add_pdr(pdr).await.unwrap();
    }

    engine.set_latency(Duration::from_millis(200));
    assert!(tokio::time::timeout(Duration::from_millis(50), session.cleanup()).await.is_err());
    assert_eq!(session.state(), SessionState::Cleaning);
    engine.set_latency(Duration::ZERO);

    // The interrupted removal may or may not have landed; the rest is still queued.
    let report = session.cleanup().await;
    assert_eq!(report.attempted(), 4);
    wait_until_empty(&engine).await;
}

#[tokio::test]
async fn half_installed_qer_is_recorded_and_removed() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();
    engine.inject_fault(Fault::once(CommandKind::AddSessionQos, 12).on_iface(CORE));

    let mut session = Session::new(client);
    let err = session.add_session_qer(qer(7)).await.unwrap_err();
    assert!(matches!(err, ClientError::Directional(_)), "{err:?}");
    assert_eq!(err.code(), Some(12));

    assert_eq!(session.rules().session_qers.len(), 1);
    assert_eq!(engine.session_qos_count(), 1);

    let report = session.cleanup().await;
    assert!(engine.is_empty());
    assert!(session.rules().is_empty());

    // The downlink half was never installed, so its delete fails.
    assert_eq!(report.removed, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].1.code(), Some(ENOENT));
}

#[tokio::test]
async fn rejected_rules_are_not_recorded() {
    let (server, client) = setup(ClientOptions::default()).await;
    server.engine().inject_fault(Fault::always(CommandKind::AddPdr, 17));

    let mut session = Session::new(client);
    let err = session.add_pdr(pdrs(1).remove(0)).await.unwrap_err();
    assert_eq!(err.code(), Some(17));
    assert!(session.rules().is_empty());

    // Both directions rejected: nothing to remove later.
    server.engine().inject_fault(Fault::always(CommandKind::AddAppQos, 17));
    assert!(session.add_app_qer(qer(1)).await.is_err());
    assert!(session.rules().is_empty());
}

#[tokio::test]
async fn lenient_rejections_are_not_recorded() {
    let (server, client) = setup(ClientOptions::default().strict(false)).await;
    server.engine().inject_fault(Fault::once(CommandKind::AddFar, 17));

    let mut session = Session::new(client);
    let response = session.add_far(far()).await.unwrap();
    assert_eq!(response.error.code, 17);
    assert!(session.rules().is_empty());

    session.add_far(far()).await.unwrap();
    assert_eq!(session.rules().fars.len(), 1);
    assert_eq!(session.end().await.removed, 1);
}

#[tokio::test]
async fn cleanup_continues_past_failures() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();

    let mut session = Session::new(client);
    for pdr in pdrs(4) {
        session.add_pdr(pdr).await.unwrap();
    }
    session.add_far(far()).await.unwrap();

    engine.inject_fault(Fault::once(CommandKind::DeletePdr, 5));
    let report = session.cleanup().await;

    assert_eq!(report.attempted(), 5);
    assert_eq!(report.removed, 4);
    assert!(!report.is_clean());
    assert_eq!(report.failures[0].1.code(), Some(5));
    assert!(session.rules().is_empty());

    // One PDR survived the failed delete.
    assert_eq!(engine.pdr_count(), 1);
    assert_eq!(engine.far_count(), 0);
}

#[tokio::test]
async fn cleanup_survives_a_dead_engine() {
    let (server, client) = setup(ClientOptions::default().timeout(Duration::from_millis(500))).await;
    let mut session = Session::new(client);
    session.add_far(far()).await.unwrap();
    session.add_app_qer(qer(1)).await.unwrap();

    drop(server);

    let report = session.cleanup().await;
    assert_eq!(report.removed, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(session.rules().is_empty());
}

#[tokio::test]
async fn with_session_opens_and_ends_a_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let engine = Engine::new();
    let server = SimServer::spawn(engine.clone()).await.unwrap();

    let pdr = Pdr { src_iface: ACCESS, src_iface_mask: 0xff, pdr_id: 1, ..Default::default() };
    let installed = with_session(server.local_addr(), ClientOptions::default(), |s| {
        async move {
            s.add_pdr(pdr).await?;
            s.add_far(far()).await?;
            Ok::<_, ClientError>(s.rules().len())
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(installed, 2);
    assert!(engine.is_empty());
}
