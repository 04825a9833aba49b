use upf_ctl::{
    ClientError, ClientOptions, DEFAULT_PERCENTILES, POST_DL_QOS_MODULE, POST_UL_QOS_MODULE,
    PRE_QOS_MODULE,
};
use upf_sim::ENOENT;
use upf_wire::{CommandKind, FlowMeasureStats, Histogram, PortCounters, PortStats, Percentile};

use crate::setup;

fn measurement(packets: u64) -> FlowMeasureStats {
    let histogram = |base: u64| Histogram {
        count: packets,
        min_ns: base,
        avg_ns: base * 2,
        max_ns: base * 10,
        percentiles: DEFAULT_PERCENTILES
            .iter()
            .map(|p| Percentile { percentile: *p, value_ns: base * u64::from(*p) })
            .collect(),
    };

    FlowMeasureStats {
        packets,
        bytes: packets * 64,
        latency: histogram(1_000),
        jitter: histogram(10),
    }
}

#[tokio::test]
async fn read_flattens_flow_statistics() {
    let (server, client) = setup(ClientOptions::default()).await;
    server.engine().set_measurement(PRE_QOS_MODULE, measurement(100));

    let stats = client.stats().read(PRE_QOS_MODULE, false, &[50, 99]).await.unwrap();
    assert_eq!(stats.get("packets"), Some(100.0));
    assert_eq!(stats.get("bytes"), Some(6400.0));
    assert_eq!(stats.get("latency.p50_ns"), Some(50_000.0));
    assert_eq!(stats.get("latency.p99_ns"), Some(99_000.0));
    assert_eq!(stats.get("jitter.max_ns"), Some(100.0));
    // Only the requested cut-points come back.
    assert_eq!(stats.get("latency.p90_ns"), None);

    // A non-clearing read is repeatable.
    let again = client.stats().read(PRE_QOS_MODULE, false, &[50, 99]).await.unwrap();
    assert_eq!(stats, again);
}

#[tokio::test]
async fn clearing_read_resets_counters() {
    let (server, client) = setup(ClientOptions::default()).await;
    server.engine().set_measurement(POST_DL_QOS_MODULE, measurement(7));

    let first = client.stats().read(POST_DL_QOS_MODULE, true, &DEFAULT_PERCENTILES).await.unwrap();
    assert_eq!(first.get("packets"), Some(7.0));

    let second = client.stats().read(POST_DL_QOS_MODULE, true, &DEFAULT_PERCENTILES).await.unwrap();
    assert_eq!(second.get("packets"), Some(0.0));
    assert_eq!(second.get("latency.p90_ns"), Some(0.0));
}

#[tokio::test]
async fn session_stats_reads_every_module() {
    let (server, client) = setup(ClientOptions::default()).await;
    let engine = server.engine();
    engine.set_measurement(PRE_QOS_MODULE, measurement(30));
    engine.set_measurement(POST_DL_QOS_MODULE, measurement(20));
    engine.set_measurement(POST_UL_QOS_MODULE, measurement(10));

    let stats = client.stats().session_stats(&DEFAULT_PERCENTILES).await.unwrap();
    assert_eq!(stats.pre_qos.get("packets"), Some(30.0));
    assert_eq!(stats.post_dl_qos.get("packets"), Some(20.0));
    assert_eq!(stats.post_ul_qos.get("packets"), Some(10.0));
    assert_eq!(engine.count(CommandKind::Read), 3);

    // Session reads clear the counters.
    let stats = client.stats().session_stats(&DEFAULT_PERCENTILES).await.unwrap();
    assert_eq!(stats.pre_qos.get("packets"), Some(0.0));
}

#[tokio::test]
async fn unknown_module_is_a_remote_error() {
    let (_server, client) = setup(ClientOptions::default()).await;

    match client.stats().read("qosMeasure", false, &[50]).await {
        Err(ClientError::Remote(err)) => {
            assert_eq!(err.command, "read");
            assert_eq!(err.target, "qosMeasure");
            assert_eq!(err.code, ENOENT);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn port_counters_are_flattened() {
    let (server, client) = setup(ClientOptions::default()).await;
    server.engine().set_port_stats(
        "coreFast",
        PortStats {
            inc: PortCounters { packets: 3, dropped: 0, bytes: 192 },
            out: PortCounters { packets: 2, dropped: 1, bytes: 128 },
            timestamp: 12.25,
        },
    );

    let stats = client.stats().port("core").await.unwrap();
    assert_eq!(stats.get("inc.bytes"), Some(192.0));
    assert_eq!(stats.get("out.dropped"), Some(1.0));
    assert_eq!(stats.get("timestamp"), Some(12.25));
}
