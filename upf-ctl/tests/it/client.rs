use std::time::Duration;

use upf_ctl::{
    rules::{ACCESS, ACTION_DROP, ACTION_FORWARD, CORE, DST_ACCESS, DST_CORE},
    CallOptions, ClientError, ClientOptions, Direction, Far, Pdr, Qer, ReqError, Rule, RuleError,
};
use upf_sim::{Fault, ENOENT};
use upf_wire::{CommandKind, PortCounters, PortStats};

use crate::setup;

fn uplink_pdr() -> Pdr {
    Pdr {
        src_iface: ACCESS,
        tunnel_ip4_dst: 0xc0a8_0101,
        tunnel_teid: 0x3000_0000,
        src_ip: 0x1000_0001,
        src_iface_mask: 0xff,
        tunnel_ip4_dst_mask: u32::MAX,
        tunnel_teid_mask: u32::MAX,
        src_ip_mask: u32::MAX,
        precedence: 255,
        pdr_id: 1,
        fse_id: 1,
        ctr_id: 0,
        far_id: 1,
        qer_ids: vec![2, 3],
        need_decap: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn pdr_install_then_delete() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();
    let pdr = uplink_pdr();

    client.add_pdr(&pdr).await.unwrap();

    let entry = engine.pdr(&pdr.keys(), &pdr.masks()).unwrap();
    assert_eq!(entry.priority, u32::MAX - 255);
    assert_eq!(entry.values.qer_id, 2);
    assert!(entry.values.need_decap);

    client.delete_pdr(&pdr).await.unwrap();
    assert!(engine.pdr(&pdr.keys(), &pdr.masks()).is_none());
    assert!(engine.is_empty());
}

#[tokio::test]
async fn far_action_codes_reach_the_engine() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();

    let downlink = Far {
        far_id: 1,
        fse_id: 1,
        apply_action: ACTION_FORWARD,
        dst_intf: DST_ACCESS,
        tunnel_type: 1,
        tunnel_ip4_src: 0xc0a8_0101,
        tunnel_ip4_dst: 0xc0a8_0102,
        tunnel_teid: 7,
        tunnel_port: 2152,
        ..Default::default()
    };
    let uplink = Far { far_id: 2, dst_intf: DST_CORE, ..downlink };
    let dropped = Far { far_id: 3, apply_action: ACTION_DROP, ..downlink };

    for far in [&downlink, &uplink, &dropped] {
        client.add_far(far).await.unwrap();
    }

    assert_eq!(engine.far(&downlink.keys()).unwrap().action, 0);
    assert_eq!(engine.far(&uplink.keys()).unwrap().action, 1);
    assert_eq!(engine.far(&dropped.keys()).unwrap().action, 2);
    assert_eq!(engine.far(&downlink.keys()).unwrap().tunnel_port, 2152);

    for far in [&downlink, &uplink, &dropped] {
        client.delete_far(far).await.unwrap();
    }
    assert_eq!(engine.far_count(), 0);
}

#[tokio::test]
async fn invalid_far_is_rejected_before_sending() {
    let (server, client) = setup(ClientOptions::default()).await;

    let far = Far { far_id: 4, fse_id: 1, ..Default::default() };
    match client.add_far(&far).await {
        Err(ClientError::Rule(RuleError::InvalidActionMask { far_id: 4, mask: 0 })) => {}
        other => panic!("unexpected {other:?}"),
    }

    assert!(server.engine().commands().is_empty());
}

#[tokio::test]
async fn qers_are_installed_per_direction() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();

    let qer = Qer {
        qer_id: 2,
        fse_id: 1,
        qfi: 5,
        ul_mbr: 40_000,
        dl_mbr: 80_000,
        dl_gbr: 8,
        burst_duration_ms: 10,
        ..Default::default()
    };

    client.add_app_qer(&qer).await.unwrap();
    client.add_session_qer(&qer).await.unwrap();
    assert_eq!(engine.count(CommandKind::AddAppQos), 2);
    assert_eq!(engine.count(CommandKind::AddSessionQos), 2);

    let up = engine.app_qos(&qer.keys(Direction::Uplink)).unwrap();
    assert_eq!(up.qfi, 5);
    assert_eq!(up.qos.cir, 1);
    assert_eq!(up.qos.pir, 5_000_000);
    assert_eq!(up.qos.pbs, 50_000);
    assert_eq!(up.qos.cbs, 1);

    let down = engine.session_qos(&qer.keys(Direction::Downlink)).unwrap();
    assert_eq!(qer.keys(Direction::Downlink).src_iface, CORE);
    assert_eq!(down.cir, 1000);
    assert_eq!(down.pir, 10_000_000);
    assert_eq!(down.cbs, 10);

    client.delete_app_qer(&qer).await.unwrap();
    client.delete_session_qer(&qer).await.unwrap();
    assert!(engine.is_empty());
}

#[tokio::test]
async fn unmetered_qer_still_installs() {
    let (server, client) = setup(ClientOptions::default()).await;

    let qer = Qer { qer_id: 1, fse_id: 1, ..Default::default() };
    client.install(&Rule::SessionQer(qer)).await.unwrap();

    let qos = server.engine().session_qos(&qer.keys(Direction::Uplink)).unwrap();
    assert_eq!((qos.cir, qos.pir, qos.cbs, qos.pbs, qos.ebs), (1, 1, 1, 1, 1));
}

#[tokio::test]
async fn remote_errors_are_reported_verbatim() {
    let (_server, client) = setup(ClientOptions::default()).await;

    let far = Far { far_id: 9, fse_id: 1, apply_action: ACTION_DROP, ..Default::default() };
    match client.delete_far(&far).await {
        Err(ClientError::Remote(err)) => {
            assert_eq!(err.command, "delete_far");
            assert_eq!(err.target, "FAR 9 (fseid 1)");
            assert_eq!(err.code, ENOENT);
            assert_eq!(err.message, "far not found");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn lenient_calls_return_the_response() {
    let (_server, client) = setup(ClientOptions::default().strict(false)).await;

    let far = Far { far_id: 9, fse_id: 1, apply_action: ACTION_DROP, ..Default::default() };
    let response = client.delete_far(&far).await.unwrap();
    assert_eq!(response.error.code, ENOENT);

    let (_server, client) = setup(ClientOptions::default()).await;
    let response =
        client.remove_with(&Rule::Far(far), CallOptions::default().strict(false)).await.unwrap();
    assert!(!response.is_ok());
}

#[tokio::test]
async fn both_directions_are_attempted() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();
    engine.inject_fault(Fault::once(CommandKind::AddAppQos, 5).on_iface(ACCESS));

    let qer = Qer { qer_id: 3, fse_id: 1, ul_mbr: 1000, dl_mbr: 1000, ..Default::default() };
    let err = match client.add_app_qer(&qer).await {
        Err(ClientError::Directional(err)) => err,
        other => panic!("unexpected {other:?}"),
    };

    assert!(matches!(&err.uplink, Err(ClientError::Remote(e)) if e.code == 5));
    assert!(err.downlink.as_ref().is_ok_and(|r| r.is_ok()));
    assert!(err.partially_applied());

    assert_eq!(engine.count(CommandKind::AddAppQos), 2);
    assert!(engine.app_qos(&qer.keys(Direction::Uplink)).is_none());
    assert!(engine.app_qos(&qer.keys(Direction::Downlink)).is_some());
}

#[tokio::test]
async fn lenient_qer_reports_both_rejections() {
    let (server, client) = setup(ClientOptions::default().strict(false)).await;
    let engine = server.engine();
    engine.inject_fault(Fault::once(CommandKind::AddAppQos, 5).on_iface(ACCESS));
    engine.inject_fault(Fault::once(CommandKind::AddAppQos, 7).on_iface(CORE));

    let qer = Qer { qer_id: 4, fse_id: 1, ul_mbr: 1000, dl_mbr: 1000, ..Default::default() };
    let err = match client.add_app_qer(&qer).await {
        Err(ClientError::Directional(err)) => err,
        other => panic!("unexpected {other:?}"),
    };

    assert_eq!(err.codes(), [Some(5), Some(7)]);
    assert_eq!(err.uplink.as_ref().unwrap().error.code, 5);
    assert_eq!(err.downlink.as_ref().unwrap().error.code, 7);
    assert!(!err.partially_applied());
    assert_eq!(engine.app_qos_count(), 0);

    // A single rejected direction still comes back as the rejecting response.
    engine.inject_fault(Fault::once(CommandKind::AddAppQos, 7).on_iface(CORE));
    let response = client.add_app_qer(&qer).await.unwrap();
    assert_eq!(response.error.code, 7);
    assert_eq!(engine.app_qos_count(), 1);
}

#[tokio::test]
async fn slow_engine_times_out() {
    let (server, client) = setup(ClientOptions::default()).await;
    server.engine().set_latency(Duration::from_millis(300));

    let pdr = uplink_pdr();
    let err = client
        .install_with(&Rule::Pdr(pdr), CallOptions::default().timeout(Duration::from_millis(30)))
        .await
        .unwrap_err();

    match &err {
        ClientError::Timeout { command, timeout, .. } => {
            assert_eq!(command, "add_pdr");
            assert_eq!(*timeout, Duration::from_millis(30));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.is_retriable());
}

#[tokio::test]
async fn in_flight_requests_are_bounded() {
    let (server, client) = setup(ClientOptions::default().max_in_flight(1)).await;
    server.engine().set_latency(Duration::from_millis(100));

    let a = Far { far_id: 1, fse_id: 1, apply_action: ACTION_DROP, ..Default::default() };
    let b = Far { far_id: 2, ..a };

    let (first, second) = futures::join!(client.add_far(&a), client.add_far(&b));
    assert!(first.is_ok());
    match second {
        Err(err @ ClientError::Transport(ReqError::TooManyRequests)) => assert!(err.is_retriable()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn closed_client_fails_with_transport_error() {
    let (_server, mut client) = setup(ClientOptions::default()).await;
    assert!(client.is_connected());

    client.close();
    assert!(!client.is_connected());

    let err = client.add_pdr(&uplink_pdr()).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(ReqError::NotConnected)), "{err:?}");
    assert!(err.is_transport());
}

#[tokio::test]
async fn port_stats_use_fast_path_name() {
    let (server, client) = setup(ClientOptions::default()).await;

    let stats = PortStats {
        inc: PortCounters { packets: 10, dropped: 1, bytes: 1000 },
        out: PortCounters { packets: 9, dropped: 0, bytes: 900 },
        timestamp: 1.5,
    };
    server.engine().set_port_stats("accessFast", stats);

    assert_eq!(client.port_stats("access").await.unwrap(), stats);

    match client.port_stats("n9").await {
        Err(ClientError::Remote(err)) => {
            assert_eq!(err.target, "n9Fast");
            assert_eq!(err.code, ENOENT);
        }
        other => panic!("unexpected {other:?}"),
    }
}
